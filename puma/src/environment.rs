// SPDX-License-Identifier: GPL-3.0-or-later

//! The Environment abstraction (`spec.md` §3, §4.6, component C7).
//!
//! A process picks exactly one `Flavour` — `Thread` or `Process` — and
//! obtains every `Buffer`, `Runner`, `Wakeup` and `SharedValue` from the
//! matching `Environment` implementation. The contract is identical
//! across flavours; only the backing changes, which is what lets
//! application code switch flavour with a single line (`spec.md` §4.6).

use crate::buffer::{Buffer, Capacity};
use crate::error::EnvironmentError;
use crate::runnable::RunnableBuilder;
use crate::runner::Runner;
use crate::transport::{read_frame, write_frame, BufferListener, RemoteEndpoint};
use crate::wakeup::{new_wakeup, Wakeup};
use puma_platform::Flavour;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

/// A process-wide factory for the flavoured primitives. `spec.md` §4.6
/// requires exactly `create_buffer`, `create_runner`-equivalent
/// construction, `create_wakeup`, `create_shared_value`; `Runner`
/// construction is split into `spawn_thread`/`spawn_process` on
/// `Runner` itself since the two flavours take structurally different
/// arguments (a builder closure vs. a worker-entry id), but `Environment`
/// is still the single place application code asks "what flavour am I".
pub trait Environment: Send + Sync {
    fn flavour(&self) -> Flavour;

    fn create_buffer<T>(&self, capacity: Capacity) -> Buffer<T>
    where
        T: Send + 'static + Serialize + DeserializeOwned,
    {
        Buffer::new(capacity, self.flavour())
    }

    fn create_wakeup(&self) -> Wakeup;

    fn create_shared_value<T>(&self, initial: T) -> Result<SharedValue<T>, EnvironmentError>
    where
        T: Send + 'static + Serialize + DeserializeOwned;
}

/// Thread-flavoured `Environment`: every primitive stays in this
/// process's address space.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadEnvironment;

impl Environment for ThreadEnvironment {
    fn flavour(&self) -> Flavour {
        Flavour::Thread
    }

    fn create_wakeup(&self) -> Wakeup {
        new_wakeup(Flavour::Thread)
    }

    fn create_shared_value<T>(&self, initial: T) -> Result<SharedValue<T>, EnvironmentError>
    where
        T: Send + 'static + Serialize + DeserializeOwned,
    {
        Ok(SharedValue::Local(Arc::new(Mutex::new(initial))))
    }
}

/// Process-flavoured `Environment`: buffers serialise across loopback
/// TCP (`crate::transport`), runners spawn re-exec'd child processes,
/// shared values are mediated by a dedicated manager thread reachable
/// over TCP — the cheapest faithful substitute for a manager-mediated
/// object without pulling in a new IPC crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn flavour(&self) -> Flavour {
        Flavour::Process
    }

    fn create_wakeup(&self) -> Wakeup {
        new_wakeup(Flavour::Process)
    }

    fn create_shared_value<T>(&self, initial: T) -> Result<SharedValue<T>, EnvironmentError>
    where
        T: Send + 'static + Serialize + DeserializeOwned,
    {
        let listener = BufferListener::bind().map_err(crate::error::BufferError::from)?;
        let addr = listener.addr();
        let value = Arc::new(Mutex::new(initial));
        let manager_value = Arc::clone(&value);
        thread::Builder::new()
            .name("puma-shared-value-manager".to_string())
            .spawn(move || shared_value_manager_loop(listener, manager_value))
            .map_err(|e| crate::error::BufferError::from(crate::error::TransportError::Io(e)))?;
        Ok(SharedValue::Remote { addr, local_cache: value })
    }
}

/// Builds a thread-flavoured `RunnableBuilder` and spawns it via
/// `Runner::spawn_thread`. A small convenience so application code
/// doesn't need to match on flavour at every call site when it already
/// knows which one it's using.
pub fn spawn_runner_thread(
    make_builder: impl FnOnce(Wakeup) -> RunnableBuilder + Send + 'static,
) -> Result<Runner, EnvironmentError> {
    Runner::spawn_thread(make_builder).map_err(EnvironmentError::from)
}

pub fn spawn_runner_process(
    entry_id: impl Into<String>,
    extra_env: HashMap<String, String>,
) -> Result<Runner, EnvironmentError> {
    Runner::spawn_process(entry_id, extra_env).map_err(EnvironmentError::from)
}

#[derive(Serialize, Deserialize)]
enum SharedValueRequest<T> {
    Get,
    Set(T),
}

#[derive(Serialize, Deserialize)]
enum SharedValueResponse<T> {
    Value(T),
    Ack,
}

/// A value shared across workers. Thread flavour is a plain
/// `Arc<Mutex<T>>`; process flavour is mediated by a manager thread
/// reachable over TCP, with a best-effort local cache so that `get()`
/// in the owning (manager) process doesn't pay a round trip.
pub enum SharedValue<T> {
    Local(Arc<Mutex<T>>),
    Remote { addr: SocketAddr, local_cache: Arc<Mutex<T>> },
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        match self {
            SharedValue::Local(value) => SharedValue::Local(Arc::clone(value)),
            SharedValue::Remote { addr, local_cache } => {
                SharedValue::Remote { addr: *addr, local_cache: Arc::clone(local_cache) }
            }
        }
    }
}

impl<T> SharedValue<T>
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    pub fn get(&self) -> Result<T, EnvironmentError> {
        match self {
            SharedValue::Local(value) => Ok(value.lock().unwrap_or_else(|e| e.into_inner()).clone()),
            SharedValue::Remote { addr, .. } => {
                let mut endpoint = RemoteEndpoint::connect(*addr)
                    .map_err(crate::error::BufferError::from)
                    .map_err(EnvironmentError::from)?;
                endpoint
                    .send(&SharedValueRequest::<T>::Get)
                    .map_err(crate::error::BufferError::from)
                    .map_err(EnvironmentError::from)?;
                let response: SharedValueResponse<T> = read_response(&mut endpoint)?;
                match response {
                    SharedValueResponse::Value(v) => Ok(v),
                    SharedValueResponse::Ack => {
                        Err(EnvironmentError::from(crate::error::BufferError::Transport(
                            crate::error::TransportError::Disconnected,
                        )))
                    }
                }
            }
        }
    }

    pub fn set(&self, value: T) -> Result<(), EnvironmentError> {
        match self {
            SharedValue::Local(shared) => {
                *shared.lock().unwrap_or_else(|e| e.into_inner()) = value;
                Ok(())
            }
            SharedValue::Remote { addr, local_cache } => {
                let mut endpoint = RemoteEndpoint::connect(*addr)
                    .map_err(crate::error::BufferError::from)
                    .map_err(EnvironmentError::from)?;
                endpoint
                    .send(&SharedValueRequest::Set(value.clone()))
                    .map_err(crate::error::BufferError::from)
                    .map_err(EnvironmentError::from)?;
                let _response: SharedValueResponse<T> = read_response(&mut endpoint)?;
                *local_cache.lock().unwrap_or_else(|e| e.into_inner()) = value;
                Ok(())
            }
        }
    }
}

/// `RemoteEndpoint` only exposes a write half (it mirrors the
/// fire-and-forget `ReporterOnTcp` role); shared-value access needs a
/// response, so this reads directly off the same stream via a small
/// accessor rather than growing `RemoteEndpoint`'s public surface for a
/// single caller.
fn read_response<T: DeserializeOwned>(
    endpoint: &mut RemoteEndpoint,
) -> Result<T, EnvironmentError> {
    endpoint
        .read_response()
        .map_err(crate::error::BufferError::from)
        .map_err(EnvironmentError::from)
}

fn shared_value_manager_loop<T>(listener: BufferListener, value: Arc<Mutex<T>>)
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    loop {
        let mut stream = match listener.accept() {
            Ok(s) => s,
            Err(e) => {
                log::debug!("shared-value manager ending: {e}");
                return;
            }
        };
        let request: Option<SharedValueRequest<T>> = match read_frame(&mut stream) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("shared-value manager: malformed request: {e}");
                continue;
            }
        };
        let response = match request {
            Some(SharedValueRequest::Get) => {
                SharedValueResponse::Value(value.lock().unwrap_or_else(|e| e.into_inner()).clone())
            }
            Some(SharedValueRequest::Set(v)) => {
                *value.lock().unwrap_or_else(|e| e.into_inner()) = v;
                SharedValueResponse::Ack
            }
            None => continue,
        };
        let _ = write_frame(&mut stream, &response);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_environment_shared_value_round_trips() {
        let env = ThreadEnvironment;
        let shared = env.create_shared_value(41i32).unwrap();
        shared.set(42).unwrap();
        assert_eq!(shared.get().unwrap(), 42);
    }

    #[test]
    fn process_environment_shared_value_round_trips_over_loopback() {
        let env = ProcessEnvironment;
        let shared = env.create_shared_value(String::from("a")).unwrap();
        shared.set(String::from("b")).unwrap();
        assert_eq!(shared.get().unwrap(), "b");
    }
}
