// SPDX-License-Identifier: GPL-3.0-or-later

//! The Runner lifecycle shell (`spec.md` §3, §4.4, component C6).
//!
//! A `Runner` owns a `Runnable`'s `CommandChannel` and `StatusChannel`
//! and the worker substrate executing it — a `std::thread` for
//! `ThreadRunner`, a re-exec'd `std::process::Command` for
//! `ProcessRunner`, supervised the way the teacher's
//! `intercept::supervise` supervises a wrapped compiler invocation.

use crate::buffer::{self, Handler};
use crate::command::{new_command_buffer, Command, CommandPublisher};
use crate::error::{BufferError, PumaError, RunnerError};
use crate::runnable::RunnableBuilder;
use crate::status::{new_status_buffer, StatusReport, StatusSink, StatusSubscription};
use crate::transport::supervise::{supervise, terminate_with_timeout};
use crate::wakeup::{new_wakeup, Wakeup};
use puma_platform::Flavour;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Child;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// `spec.md` §3's Runner state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

enum Worker {
    Thread(Option<JoinHandle<Result<(), PumaError>>>),
    Process(Option<Child>),
}

/// Lifecycle shell around a `Runnable`: owns its `CommandChannel` and
/// `StatusChannel`, the worker substrate, and the state machine of
/// `spec.md` §4.4.
pub struct Runner {
    state: RunnerState,
    command_out: CommandPublisher,
    status_in: StatusSubscription,
    status_wakeup: Wakeup,
    worker: Worker,
    flavour: Flavour,
}

impl Runner {
    /// Spawns a thread-flavoured worker. `make_builder` runs on the new
    /// worker thread and is handed the private `Wakeup` it must use for
    /// every `RunnableBuilder::subscribe` call, matching §4.3's "owns a
    /// private Wakeup W ... subscribes W to each registered input
    /// Buffer and the CommandChannel".
    pub fn spawn_thread(
        make_builder: impl FnOnce(Wakeup) -> RunnableBuilder + Send + 'static,
    ) -> Result<Self, RunnerError> {
        let command_buffer = new_command_buffer(Flavour::Thread);
        let status_buffer = new_status_buffer(Flavour::Thread);

        let command_out = command_buffer.publish();
        let status_out = status_buffer.publish();

        let status_wakeup: Wakeup = new_wakeup(Flavour::Thread);
        let status_in = status_buffer.subscribe(Arc::clone(&status_wakeup))?;

        let worker_wakeup: Wakeup = new_wakeup(Flavour::Thread);
        let command_in = command_buffer.subscribe(Arc::clone(&worker_wakeup))?;

        let handle = std::thread::Builder::new()
            .name("puma-worker".to_string())
            .spawn(move || {
                let builder = make_builder(worker_wakeup);
                let runnable = builder.build(command_in, StatusSink::Local(status_out));
                runnable.run()
            })
            .map_err(RunnerError::Spawn)?;

        log::debug!("thread-flavoured runner starting");
        Ok(Self {
            state: RunnerState::Starting,
            command_out,
            status_in,
            status_wakeup,
            worker: Worker::Thread(Some(handle)),
            flavour: Flavour::Thread,
        })
    }

    /// Spawns a process-flavoured worker by re-executing the current
    /// binary with `--puma-worker-entry <entry_id>`. The entry point
    /// (registered by application code, see `crate::environment`) is
    /// responsible for reading `PUMA_COMMAND_ADDR`/`PUMA_STATUS_ADDR`
    /// from the environment and bridging them with
    /// `buffer::bridge_remote`/[`crate::transport::RemoteEndpoint`].
    ///
    /// `extra_env` carries any additional bootstrap data (e.g. the
    /// addresses of other process-flavoured input buffers) the caller
    /// wants the worker to receive.
    pub fn spawn_process(
        entry_id: impl Into<String>,
        extra_env: HashMap<String, String>,
    ) -> Result<Self, RunnerError> {
        let command_buffer = new_command_buffer(Flavour::Process);
        let status_buffer = new_status_buffer(Flavour::Process);

        let command_out = command_buffer.publish();
        let command_addr = command_buffer.serve_remote_subscriber()?;

        let status_wakeup: Wakeup = new_wakeup(Flavour::Process);
        let status_in = status_buffer.subscribe(Arc::clone(&status_wakeup))?;
        let status_addr = status_buffer
            .remote_address()
            .expect("subscribe() just started this buffer's listener");

        let exe = std::env::current_exe().map_err(RunnerError::Spawn)?;
        let mut command = std::process::Command::new(exe);
        command.arg("--puma-worker-entry").arg(entry_id.into());
        command.env("PUMA_COMMAND_ADDR", command_addr.to_string());
        command.env("PUMA_STATUS_ADDR", status_addr.to_string());
        for (key, value) in extra_env {
            command.env(key, value);
        }

        let child = command.spawn().map_err(RunnerError::Spawn)?;
        log::debug!("process-flavoured runner starting, pid={}", child.id());

        Ok(Self {
            state: RunnerState::Starting,
            command_out,
            status_in,
            status_wakeup,
            worker: Worker::Process(Some(child)),
            flavour: Flavour::Process,
        })
    }

    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Polls the `StatusChannel` without blocking; advances
    /// `Starting -> Running` on the first `Ready` report, surfaces a
    /// fatal error by transitioning to `Failed`.
    ///
    /// Callers are required to invoke this periodically on the parent
    /// side (`spec.md` §4.4's error-polling contract); it is also
    /// invoked from `stop()`/`Drop` as a safety net, not a substitute.
    pub fn check_for_errors(&mut self) -> Result<(), RunnerError> {
        struct Poll {
            reports: Vec<StatusReport>,
        }
        impl Handler<StatusReport> for Poll {
            fn on_value(&mut self, value: StatusReport) {
                self.reports.push(value);
            }
            fn on_complete(&mut self, _error: Option<PumaError>) {}
        }

        let mut poll = Poll { reports: Vec::new() };
        self.status_in.call_events(&mut poll);

        for report in poll.reports {
            match report {
                StatusReport::Ready => {
                    if self.state == RunnerState::Starting {
                        log::debug!("runner observed worker ready");
                        self.state = RunnerState::Running;
                    }
                }
                StatusReport::Error(error) => {
                    log::error!("runner observed worker error: {error}");
                    self.state = RunnerState::Failed;
                    return Err(RunnerError::Worker(error));
                }
                StatusReport::Stopped => {
                    self.state = RunnerState::Stopped;
                }
            }
        }
        Ok(())
    }

    /// Enqueues an application-defined command on the CommandChannel, to
    /// be dispatched to whatever handler the worker registered for
    /// `command.method_id` via `RunnableBuilder::on_command`.
    pub fn send_command(&mut self, command: Command) -> Result<(), RunnerError> {
        self.command_out.publish_value(command)?;
        Ok(())
    }

    /// Enqueues `Stop` on the CommandChannel and transitions to
    /// `Stopping`. Does not wait for the worker to exit; call
    /// [`Runner::join`] for that.
    pub fn stop(&mut self) -> Result<(), RunnerError> {
        if self.state == RunnerState::Stopped || self.state == RunnerState::Failed {
            return Ok(());
        }
        log::debug!("runner enqueuing stop command");
        self.command_out.publish_value(Command::stop())?;
        self.state = RunnerState::Stopping;
        Ok(())
    }

    /// Blocks for orderly worker teardown, killing it if it does not
    /// exit within the teardown grace period (a thread cannot be force
    /// killed, so for `ThreadRunner` this is just a join).
    pub fn join(&mut self) -> Result<(), RunnerError> {
        match &mut self.worker {
            Worker::Thread(handle) => {
                if let Some(handle) = handle.take() {
                    match handle.join() {
                        Ok(Ok(())) => {
                            self.state = RunnerState::Stopped;
                            Ok(())
                        }
                        Ok(Err(error)) => {
                            self.state = RunnerState::Failed;
                            Err(RunnerError::Worker(error))
                        }
                        Err(_panic) => {
                            self.state = RunnerState::Failed;
                            Err(RunnerError::InvalidState("worker thread panicked"))
                        }
                    }
                } else {
                    Ok(())
                }
            }
            Worker::Process(child) => {
                if let Some(mut child) = child.take() {
                    let exited_cleanly =
                        terminate_with_timeout(&mut child, TEARDOWN_GRACE).map_err(RunnerError::Spawn)?;
                    if !exited_cleanly {
                        self.state = RunnerState::Failed;
                        return Err(RunnerError::ShutdownTimeout);
                    }
                    self.state = RunnerState::Stopped;
                }
                Ok(())
            }
        }
    }

    /// Runs this runner's worker process to completion under signal
    /// supervision, forwarding termination signals. Only meaningful for
    /// `ProcessRunner`; calling it on a `ThreadRunner` is a logic error.
    pub fn supervise_process(&mut self) -> Result<std::process::ExitStatus, RunnerError> {
        match &mut self.worker {
            Worker::Process(child) => {
                let child = child.take().ok_or(RunnerError::InvalidState("worker already reaped"))?;
                supervise(child).map_err(RunnerError::Spawn)
            }
            Worker::Thread(_) => Err(RunnerError::InvalidState("supervise_process called on a ThreadRunner")),
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if matches!(self.state, RunnerState::Stopped | RunnerState::Failed | RunnerState::Created) {
            return;
        }
        log::debug!("runner dropped while active, tearing down as a safety net");
        let _ = self.stop();
        let _ = self.join();
    }
}

/// Bridges a `--puma-worker-entry`-spawned process back to its parent's
/// CommandChannel/StatusChannel using the bootstrap addresses the
/// parent passed via `PUMA_COMMAND_ADDR`/`PUMA_STATUS_ADDR`. Application
/// worker entry points call this first, then build a `RunnableBuilder`
/// with the returned wakeup and pass the returned handles to `build()`.
pub fn bridge_worker_channels(
) -> Result<(Wakeup, crate::command::CommandSubscription, StatusSink), RunnerError> {
    let command_addr = read_bootstrap_addr("PUMA_COMMAND_ADDR")?;
    let status_addr = read_bootstrap_addr("PUMA_STATUS_ADDR")?;

    let command_buffer = buffer::bridge_remote::<Command>(command_addr)?;
    let wakeup: Wakeup = new_wakeup(Flavour::Process);
    let command_in = command_buffer.subscribe(Arc::clone(&wakeup))?;

    let status_endpoint = crate::transport::RemoteEndpoint::connect(status_addr)
        .map_err(|e| RunnerError::Buffer(BufferError::from(e)))?;

    Ok((wakeup, command_in, StatusSink::Remote(status_endpoint)))
}

fn read_bootstrap_addr(var: &str) -> Result<SocketAddr, RunnerError> {
    let raw = std::env::var(var)
        .map_err(|_| RunnerError::InvalidState("missing worker bootstrap environment variable"))?;
    raw.parse()
        .map_err(|_| RunnerError::InvalidState("malformed worker bootstrap socket address"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::runnable::EventHandler;

    struct NoopHandler;
    impl EventHandler<i32> for NoopHandler {
        fn on_value(&mut self, _value: i32) -> Result<(), PumaError> {
            Ok(())
        }
    }

    #[test]
    fn thread_runner_runs_to_ready_then_stops() {
        let mut runner = Runner::spawn_thread(|wakeup| RunnableBuilder::new(wakeup)).unwrap();

        // Give the worker a moment to publish `Ready`.
        std::thread::sleep(Duration::from_millis(50));
        runner.check_for_errors().unwrap();
        assert_eq!(runner.state(), RunnerState::Running);

        runner.stop().unwrap();
        runner.join().unwrap();
        assert_eq!(runner.state(), RunnerState::Stopped);
    }
}
