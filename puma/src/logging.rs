// SPDX-License-Identifier: GPL-3.0-or-later

//! Logging initialisation (`spec.md` §6, ambient addition).
//!
//! Matches the teacher's `env_logger::init()` call in `bin/main.rs`, made
//! configurable through `crate::config::LogConfig` instead of hard-coded:
//! the `console` handler class drives `env_logger` the same way the
//! teacher does, and the `rotating_file` handler class points
//! `env_logger` at a `tracing_appender` daily-rolling writer instead,
//! since the teacher has no file-rotation need of its own to imitate.

use crate::config::{Handler, HandlerClass, LogConfig};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Installs the global logger described by `config`. Call once, as early
/// as possible in `main` — mirrors the teacher's `env_logger::init()`
/// being the first statement of `bin/main.rs`.
///
/// Returns the rotation guard when a `rotating_file` handler is active;
/// holding on to it keeps the background flush thread alive for the
/// process lifetime, the same contract `tracing_appender::non_blocking`
/// imposes on its callers.
pub fn init(config: &LogConfig) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let handler_name = config
        .root
        .handlers
        .first()
        .ok_or_else(|| anyhow::anyhow!("log configuration root logger has no handlers"))?;
    let handler = config
        .handlers
        .get(handler_name)
        .ok_or_else(|| anyhow::anyhow!("log configuration root handler '{handler_name}' is undefined"))?;

    let level = config.root.level.to_level_filter();
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    match handler.class {
        HandlerClass::Console => {
            builder.target(env_logger::Target::Stderr);
            builder.init();
            Ok(None)
        }
        HandlerClass::RotatingFile => {
            let (writer, guard) = rotating_writer(handler)?;
            builder.target(env_logger::Target::Pipe(Box::new(writer)));
            builder.init();
            Ok(Some(guard))
        }
    }
}

fn rotating_writer(
    handler: &Handler,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, tracing_appender::non_blocking::WorkerGuard)> {
    let filename = handler
        .filename
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("rotating_file handler is missing a filename"))?;
    let directory = filename.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name_prefix = filename
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("rotating_file handler filename has no file component"))?;

    if let Some(days) = handler.retention_days {
        prune_old_logs(directory, days);
    }

    let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// Best-effort retention sweep: removes files in `directory` whose
/// modification time is older than `retention_days`. Matches `spec.md`
/// §6's "30-day retention" for the production profile; failures are
/// logged, not propagated, since a failed prune must never prevent the
/// logger itself from starting.
fn prune_old_logs(directory: &Path, retention_days: u32) {
    let cutoff = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("log retention sweep: cannot read {}: {e}", directory.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > cutoff);
        if is_stale {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("log retention sweep: failed to remove {}: {e}", path.display());
                }
            }
        }
    }
}
