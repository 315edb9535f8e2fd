// SPDX-License-Identifier: GPL-3.0-or-later

//! The Runnable servicing loop (`spec.md` §3, §4.3, component C5).
//!
//! A `Runnable` is built from a [`RunnableBuilder`]: register input
//! buffers with their handlers, worker-side command handlers, and an
//! optional tick callback, then `build()` it and hand it to a `Runner`
//! to drive on a thread or a process. Handler dispatch goes through a
//! small set of boxed trait objects (`InputPort`, `OutputPort`) rather
//! than a generic `Runnable<T>` — the same "explicit registration table"
//! choice `spec.md` §9 calls for instead of attribute-scope sugar or
//! dynamic method lookup.

use crate::buffer::{self, Buffer, Publisher, Subscription};
use crate::command::{Command, CommandArgs};
use crate::error::PumaError;
use crate::status::{StatusReport, StatusSink};
use crate::timestamp::precision_timestamp;
use crate::wakeup::Wakeup;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

/// What draining one input port found.
enum DrainOutcome {
    /// No terminal condition; the port may still produce more values.
    Open,
    /// The upstream buffer completed, carrying an optional error.
    Completed(Option<PumaError>),
}

/// Type-erased (buffer, handler) pair, so a `Runnable` can hold input
/// ports of differing `T` in one `Vec`.
trait InputPort: Send {
    fn drain(&mut self) -> DrainOutcome;
}

/// User-supplied sink for one input buffer's values. Distinct from
/// `buffer::Handler` in that `on_value` is fallible: an error here is
/// what `spec.md` §4.3 calls an error "raised inside a Handler".
pub trait EventHandler<T>: Send {
    fn on_value(&mut self, value: T) -> Result<(), PumaError>;

    /// Called once if the upstream completed without error. The default
    /// does nothing; most handlers only care about the data path.
    fn on_complete(&mut self, _error: Option<PumaError>) {}
}

struct BufferInput<T, H> {
    subscription: Subscription<T>,
    handler: H,
    _marker: PhantomData<T>,
}

impl<T, H> InputPort for BufferInput<T, H>
where
    T: Send + 'static + Serialize + DeserializeOwned,
    H: EventHandler<T> + Send,
{
    fn drain(&mut self) -> DrainOutcome {
        struct Adapter<'a, T, H> {
            handler: &'a mut H,
            error: Option<PumaError>,
            completed: Option<Option<PumaError>>,
            _marker: PhantomData<T>,
        }

        impl<'a, T, H: EventHandler<T>> buffer::Handler<T> for Adapter<'a, T, H> {
            fn on_value(&mut self, value: T) {
                if self.error.is_some() {
                    return;
                }
                if let Err(e) = self.handler.on_value(value) {
                    self.error = Some(e);
                }
            }
            fn on_complete(&mut self, error: Option<PumaError>) {
                self.handler.on_complete(error.clone());
                self.completed = Some(error);
            }
        }

        let mut adapter: Adapter<'_, T, H> =
            Adapter { handler: &mut self.handler, error: None, completed: None, _marker: PhantomData };
        self.subscription.call_events(&mut adapter);

        if let Some(error) = adapter.error {
            return DrainOutcome::Completed(Some(error));
        }
        match adapter.completed {
            Some(error) => DrainOutcome::Completed(error),
            None => DrainOutcome::Open,
        }
    }
}

/// Type-erased output buffer, used only for the best-effort
/// `Complete(err)` broadcast on fatal error (`spec.md` §4.3).
trait OutputPort: Send {
    fn complete_downstream(&mut self, error: Option<PumaError>);
}

impl<T> OutputPort for Publisher<T>
where
    T: Send + 'static + Serialize + DeserializeOwned,
{
    fn complete_downstream(&mut self, error: Option<PumaError>) {
        // Best-effort: a downstream buffer that is already complete
        // (or whose publisher already closed it) is simply skipped.
        let _ = self.publish_complete(error);
    }
}

type CommandHandler = Box<dyn FnMut(CommandArgs) -> Result<(), PumaError> + Send>;
type TickHandler = Box<dyn FnMut(f64) -> Result<(), PumaError> + Send>;

/// Builds a [`Runnable`] by registering its inputs, outputs, command
/// handlers and tick callback before it starts servicing.
pub struct RunnableBuilder {
    wakeup: Wakeup,
    inputs: Vec<Box<dyn InputPort>>,
    outputs: Vec<Box<dyn OutputPort>>,
    command_handlers: HashMap<String, CommandHandler>,
    tick_interval: Option<Duration>,
    ticks_enabled: bool,
    on_tick: Option<TickHandler>,
}

impl RunnableBuilder {
    pub fn new(wakeup: Wakeup) -> Self {
        Self {
            wakeup,
            inputs: Vec::new(),
            outputs: Vec::new(),
            command_handlers: HashMap::new(),
            tick_interval: None,
            ticks_enabled: false,
            on_tick: None,
        }
    }

    /// Registers an input buffer with its handler, in registration
    /// order (`spec.md` §4.3 step 4 processes inputs "in registration
    /// order").
    pub fn subscribe<T, H>(&mut self, buffer: &Buffer<T>, handler: H) -> Result<(), PumaError>
    where
        T: Send + 'static + Serialize + DeserializeOwned,
        H: EventHandler<T> + Send + 'static,
    {
        let subscription = buffer
            .subscribe(self.wakeup.clone())
            .map_err(|e| PumaError::new("subscribe_failed", e.to_string()))?;
        self.inputs.push(Box::new(BufferInput { subscription, handler, _marker: PhantomData }));
        Ok(())
    }

    /// Registers an owned output `Publisher`, so a fatal error can be
    /// forwarded downstream as `Complete(err)` on teardown.
    pub fn register_output<T>(&mut self, publisher: Publisher<T>)
    where
        T: Send + 'static + Serialize + DeserializeOwned,
    {
        self.outputs.push(Box::new(publisher));
    }

    pub fn on_command(
        &mut self,
        method_id: impl Into<String>,
        handler: impl FnMut(CommandArgs) -> Result<(), PumaError> + Send + 'static,
    ) {
        self.command_handlers.insert(method_id.into(), Box::new(handler));
    }

    pub fn on_tick(&mut self, handler: impl FnMut(f64) -> Result<(), PumaError> + Send + 'static) {
        self.on_tick = Some(Box::new(handler));
    }

    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.tick_interval = Some(interval);
    }

    pub fn resume_ticks(&mut self) {
        self.ticks_enabled = true;
    }

    pub fn pause_ticks(&mut self) {
        self.ticks_enabled = false;
    }

    pub fn build(
        self,
        command_in: Subscription<Command>,
        status_out: StatusSink,
    ) -> Runnable {
        Runnable {
            wakeup: self.wakeup,
            inputs: self.inputs,
            outputs: self.outputs,
            command_handlers: self.command_handlers,
            tick_interval: self.tick_interval,
            ticks_enabled: self.ticks_enabled,
            on_tick: self.on_tick,
            command_in,
            status_out,
            stop_requested: false,
            error_state: None,
        }
    }
}

/// A fully wired worker. `run()` is the servicing loop of `spec.md`
/// §4.3; it is invoked by a `Runner`'s worker substrate (a thread or a
/// re-exec'd process), never directly by application code.
pub struct Runnable {
    wakeup: Wakeup,
    inputs: Vec<Box<dyn InputPort>>,
    outputs: Vec<Box<dyn OutputPort>>,
    command_handlers: HashMap<String, CommandHandler>,
    tick_interval: Option<Duration>,
    ticks_enabled: bool,
    on_tick: Option<TickHandler>,
    command_in: Subscription<Command>,
    status_out: StatusSink,
    stop_requested: bool,
    error_state: Option<PumaError>,
}

impl Runnable {
    /// Runs the servicing loop to completion. Returns the terminal
    /// error, if any; `Ok(())` covers both a clean `stop()` and clean
    /// exhaustion of every input.
    pub fn run(mut self) -> Result<(), PumaError> {
        let _ = self.status_out.publish_value(StatusReport::Ready);
        log::debug!("runnable entering servicing loop");

        let mut next_tick_deadline = if self.ticks_enabled {
            self.tick_interval.map(|d| precision_timestamp() + d.as_secs_f64())
        } else {
            None
        };

        let mut terminal_completion = false;

        'service: loop {
            let now = precision_timestamp();
            let deadline = next_tick_deadline.unwrap_or(f64::INFINITY);
            let remaining = if deadline.is_finite() {
                Duration::from_secs_f64((deadline - now).max(0.0))
            } else {
                Duration::from_secs(3600)
            };

            self.wakeup.wait(remaining);
            self.wakeup.consume();

            // Step 3: drain the command channel.
            let commands = self.drain_commands();
            for command in commands {
                if command.is_stop() {
                    log::debug!("runnable received stop command");
                    self.stop_requested = true;
                    continue;
                }
                if let Some(handler) = self.command_handlers.get_mut(&command.method_id) {
                    if let Err(e) = handler(command.args) {
                        log::error!("command handler for {} failed: {e}", command.method_id);
                        self.error_state = Some(e);
                    }
                } else {
                    log::warn!("no handler registered for command {}", command.method_id);
                }
                if self.error_state.is_some() {
                    break;
                }
            }

            if self.stop_requested || self.error_state.is_some() {
                break 'service;
            }

            // Step 4: drain each input buffer in registration order.
            for input in &mut self.inputs {
                match input.drain() {
                    DrainOutcome::Open => {}
                    DrainOutcome::Completed(None) => {
                        terminal_completion = true;
                    }
                    DrainOutcome::Completed(Some(err)) => {
                        self.error_state = Some(err);
                    }
                }
                if terminal_completion || self.error_state.is_some() {
                    break;
                }
            }

            if terminal_completion || self.error_state.is_some() {
                break 'service;
            }

            // Step 5: tick. Re-sample the clock here rather than reusing
            // `now` from the top of the loop: on a timeout wakeup the wall
            // clock has reached `deadline` only *after* `wait()` returns,
            // so checking the stale pre-wait value would miss the tick on
            // the iteration that actually slept to the deadline.
            if self.ticks_enabled && precision_timestamp() >= deadline {
                if let Some(on_tick) = &mut self.on_tick {
                    if let Err(e) = on_tick(precision_timestamp()) {
                        self.error_state = Some(e);
                    }
                }
                next_tick_deadline =
                    Some(precision_timestamp() + self.tick_interval.unwrap_or(Duration::ZERO).as_secs_f64());
                if self.error_state.is_some() {
                    break 'service;
                }
            }
        }

        self.teardown()
    }

    fn drain_commands(&mut self) -> Vec<Command> {
        struct Collector {
            commands: Vec<Command>,
        }
        impl buffer::Handler<Command> for Collector {
            fn on_value(&mut self, value: Command) {
                self.commands.push(value);
            }
            fn on_complete(&mut self, _error: Option<PumaError>) {
                // A completed CommandChannel means the parent is gone;
                // treat it the same as an explicit stop.
                self.commands.push(Command::stop());
            }
        }
        let mut collector = Collector { commands: Vec::new() };
        self.command_in.call_events(&mut collector);
        collector.commands
    }

    fn teardown(mut self) -> Result<(), PumaError> {
        match self.error_state.clone() {
            Some(error) => {
                log::error!("runnable terminating with error: {error}");
                for output in &mut self.outputs {
                    output.complete_downstream(Some(error.clone()));
                }
                let _ = self.status_out.publish_value(StatusReport::Error(error.clone()));
                let _ = self.status_out.publish_complete(None);
                Err(error)
            }
            None => {
                log::debug!("runnable terminating cleanly");
                for output in &mut self.outputs {
                    output.complete_downstream(None);
                }
                let _ = self.status_out.publish_value(StatusReport::Stopped);
                let _ = self.status_out.publish_complete(None);
                Ok(())
            }
        }
    }
}
