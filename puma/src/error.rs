// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types shared across the PUMA subsystems.
//!
//! `PumaError` is the structured, serializable error that rides inside a
//! `Value::Complete` marker and on the `StatusChannel`: it has to survive a
//! trip across a process boundary, so it is a plain data type rather than a
//! `Box<dyn Error>`. The per-subsystem enums below are the errors returned
//! synchronously to callers; only the kinds that `spec.md` §7 calls
//! "Transport" or "User" errors are convertible into a `PumaError`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured error that can cross a process boundary.
///
/// Carries a short machine-readable `code`, a human-readable `message`,
/// and (best-effort) the `Display` of whatever caused it, since the
/// original error type is usually not `Send + Sync + 'static` across a
/// serialization boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumaError {
    pub code: String,
    pub message: String,
    pub source_display: Option<String>,
}

impl PumaError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), source_display: None }
    }

    pub fn with_source(mut self, source: impl fmt::Display) -> Self {
        self.source_display = Some(source.to_string());
        self
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new("user_error", message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("transport_error", message)
    }
}

impl fmt::Display for PumaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(source) = &self.source_display {
            write!(f, " (caused by: {source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for PumaError {}

/// Protocol errors: API misuse. Surfaced synchronously to the caller and
/// never propagated into the dataflow (`spec.md` §7).
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error("buffer is already completed")]
    Completed,
    #[error("buffer already has a subscriber")]
    AlreadySubscribed,
    #[error("bounded buffer is full")]
    Full,
    #[error("publisher has already declared completion")]
    PublisherAlreadyCompleted,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl BufferError {
    /// Converts a (rare) transport-level failure into a forwardable
    /// `PumaError`; protocol misuse is intentionally not convertible,
    /// since §7 requires it stay local to the caller.
    pub fn into_puma_error(self) -> Option<PumaError> {
        match self {
            BufferError::Transport(err) => Some(PumaError::transport(err.to_string())),
            _ => None,
        }
    }
}

/// Transport errors: failures in the underlying IPC/thread primitive.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("network IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("channel disconnected")]
    Disconnected,
}

#[derive(thiserror::Error, Debug)]
pub enum WakeupError {
    #[error("failed to create wakeup primitive: {0}")]
    Create(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("runner is not in a state that allows this operation: {0}")]
    InvalidState(&'static str),
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
    #[error("worker shutdown timed out and had to be killed")]
    ShutdownTimeout,
    #[error("worker reported an error: {0}")]
    Worker(PumaError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(thiserror::Error, Debug)]
pub enum EnvironmentError {
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Wakeup(#[from] WakeupError),
}

#[derive(thiserror::Error, Debug)]
pub enum LogFunnelError {
    #[error("failed to start log listener: {0}")]
    ListenerStart(std::io::Error),
    #[error("log configuration error: {0}")]
    Config(String),
}
