// SPDX-License-Identifier: GPL-3.0-or-later

//! LogFunnel (`spec.md` §4.7, component C8): an auto-starting singleton
//! that routes log records from every process-flavoured worker into one
//! sink process.
//!
//! Grounded in the same TCP listener/reader idiom as `crate::buffer`'s
//! process transport (`CollectorOnTcp` in the teacher), generalised from
//! `Event`/`Value<T>` to a serialisable stand-in for `log::Record`. The
//! parent process is always the sink: it already has the configured
//! `env_logger`/`LogConfig` handlers installed (`crate::logging`), so
//! the funnel just needs to re-emit received records through the `log`
//! facade for those handlers to apply.

use crate::error::LogFunnelError;
use crate::transport::{read_frame, BufferListener, RemoteEndpoint};
use log::Level;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;

/// A serialisable stand-in for `log::Record`, able to cross a process
/// boundary; `log::Record` itself borrows its message's `Arguments`,
/// which cannot be serialised or owned across threads let alone
/// processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl RemoteLogRecord {
    fn from_record(record: &log::Record) -> Self {
        Self {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            module_path: record.module_path().map(str::to_string),
            file: record.file().map(str::to_string),
            line: record.line(),
        }
    }

    fn level(&self) -> Level {
        self.level.parse().unwrap_or(Level::Info)
    }
}

/// The lock discipline `spec.md` §5 carves out an exception for: "No
/// global mutable state is permitted inside the core other than the
/// LogFunnel's lifecycle counter, which is protected by a dedicated
/// lock."
struct FunnelState {
    refcount: usize,
    addr: Option<SocketAddr>,
}

static FUNNEL: OnceLock<Mutex<FunnelState>> = OnceLock::new();

fn funnel_mutex() -> &'static Mutex<FunnelState> {
    FUNNEL.get_or_init(|| Mutex::new(FunnelState { refcount: 0, addr: None }))
}

/// Process-wide handle to the log funnel. Acquire one per
/// process-flavoured `Runner` you start; dropping it releases the
/// reference, tearing the listener down when the count reaches zero.
pub struct LogFunnel {
    _private: (),
}

impl LogFunnel {
    /// Starts the listener if this is the first live reference, and
    /// returns the address a worker should connect `init_child_logging`
    /// to.
    pub fn ensure_started() -> Result<(SocketAddr, Self), LogFunnelError> {
        let mutex = funnel_mutex();
        let mut state = mutex.lock().unwrap_or_else(|e| e.into_inner());
        if state.refcount == 0 {
            let listener = BufferListener::bind()
                .map_err(|e| LogFunnelError::ListenerStart(io_error_of(e)))?;
            let addr = listener.addr();
            state.addr = Some(addr);
            thread::Builder::new()
                .name("puma-log-funnel".to_string())
                .spawn(move || funnel_loop(listener))
                .map_err(LogFunnelError::ListenerStart)?;
            log::debug!("log funnel listening on {addr}");
        }
        state.refcount += 1;
        let addr = state.addr.expect("addr set above on first start");
        Ok((addr, Self { _private: () }))
    }
}

impl Drop for LogFunnel {
    fn drop(&mut self) {
        let mutex = funnel_mutex();
        let mut state = mutex.lock().unwrap_or_else(|e| e.into_inner());
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            log::debug!("log funnel reference count reached zero; listener thread will idle out");
        }
    }
}

fn io_error_of(e: crate::error::TransportError) -> std::io::Error {
    match e {
        crate::error::TransportError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    }
}

fn funnel_loop(listener: BufferListener) {
    loop {
        let stream = match listener.accept() {
            Ok(s) => s,
            Err(e) => {
                log::debug!("log funnel accept loop ending: {e}");
                return;
            }
        };
        thread::spawn(move || funnel_reader_loop(stream));
    }
}

fn funnel_reader_loop(mut stream: std::net::TcpStream) {
    loop {
        let record: Option<RemoteLogRecord> = match read_frame(&mut stream) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("log funnel reader ending: {e}");
                return;
            }
        };
        let Some(record) = record else {
            return;
        };
        log::log!(target: "puma::remote", record.level(), "[{}] {}", record.target, record.message);
    }
}

/// A `log::Log` implementation installed in a child process that ships
/// every record to the parent's funnel instead of emitting locally.
struct FunnelLogger {
    endpoint: Mutex<RemoteEndpoint>,
    max_level: Level,
}

impl log::Log for FunnelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let remote = RemoteLogRecord::from_record(record);
        if let Ok(mut endpoint) = self.endpoint.lock() {
            let _ = endpoint.send(&remote);
        }
    }

    fn flush(&self) {}
}

static CHILD_LOGGER_INSTALLED: AtomicUsize = AtomicUsize::new(0);

/// Reconfigures this process's logging to route every record to the
/// parent's log funnel (`spec.md` §4.7: "Each child process's logging
/// subsystem is reconfigured on entry to route records to an
/// inter-process log queue"). Call once, early in a process-flavoured
/// worker's entry point.
pub fn init_child_logging(addr: SocketAddr, max_level: Level) -> Result<(), LogFunnelError> {
    if CHILD_LOGGER_INSTALLED.swap(1, Ordering::SeqCst) == 1 {
        return Ok(());
    }
    let endpoint = RemoteEndpoint::connect(addr)
        .map_err(|e| LogFunnelError::Config(e.to_string()))?;
    let logger = FunnelLogger { endpoint: Mutex::new(endpoint), max_level };
    log::set_max_level(max_level.to_level_filter());
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| LogFunnelError::Config(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ensure_started_is_reference_counted() {
        let (addr1, guard1) = LogFunnel::ensure_started().unwrap();
        let (addr2, guard2) = LogFunnel::ensure_started().unwrap();
        assert_eq!(addr1, addr2);
        drop(guard1);
        drop(guard2);
    }

    #[test]
    fn remote_log_record_round_trips_through_json() {
        let record = RemoteLogRecord {
            level: "WARN".to_string(),
            target: "puma::buffer".to_string(),
            message: "discard sweep armed".to_string(),
            module_path: Some("puma::buffer".to_string()),
            file: Some("buffer.rs".to_string()),
            line: Some(42),
        };
        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: RemoteLogRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.level(), Level::Warn);
    }
}
