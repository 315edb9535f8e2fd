// SPDX-License-Identifier: GPL-3.0-or-later

//! Multicaster (`spec.md` §4.5): a specialised `Runnable` that
//! subscribes to exactly one input `Buffer` and re-publishes every
//! `Value` to N output `Buffer`s.

use crate::buffer::{Buffer, Publisher};
use crate::error::PumaError;
use crate::runnable::{EventHandler, RunnableBuilder};
use crate::wakeup::Wakeup;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Fans a single input buffer out to every registered output.
///
/// `Complete(err?)` is forwarded to all outputs regardless of whether
/// publishing to an earlier output failed — `spec.md` §4.5: "An error
/// publishing to any one output does not prevent attempts to publish to
/// the others; accumulated errors are reported via the StatusChannel."
struct FanOutHandler<T> {
    outputs: Vec<Publisher<T>>,
}

impl<T> EventHandler<T> for FanOutHandler<T>
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    fn on_value(&mut self, value: T) -> Result<(), PumaError> {
        let mut errors = Vec::new();
        for output in &mut self.outputs {
            if let Err(e) = output.publish_value(value.clone()) {
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PumaError::new("multicast_publish_failed", errors.join("; ")))
        }
    }

    fn on_complete(&mut self, error: Option<PumaError>) {
        for output in &mut self.outputs {
            let _ = output.publish_complete(error.clone());
        }
    }
}

/// Registers a multicaster's input and outputs on a `RunnableBuilder`.
/// The resulting `Runnable` has no command handlers or tick callback of
/// its own; it is otherwise an ordinary `Runnable` and is run by a
/// `Runner` exactly like any other.
pub fn register_multicaster<T>(
    builder: &mut RunnableBuilder,
    input: &Buffer<T>,
    outputs: Vec<Buffer<T>>,
) -> Result<(), PumaError>
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    let publishers = outputs.iter().map(Buffer::publish).collect();
    let handler = FanOutHandler { outputs: publishers };
    builder
        .subscribe(input, handler)
        .map_err(|e| PumaError::new("multicast_subscribe_failed", e.to_string()))
}

/// Convenience: builds a `RunnableBuilder` already wired as a
/// multicaster, ready to hand to `Runner::spawn_thread`/`spawn_process`.
pub fn multicaster_builder<T>(
    wakeup: Wakeup,
    input: &Buffer<T>,
    outputs: Vec<Buffer<T>>,
) -> Result<RunnableBuilder, PumaError>
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    let mut builder = RunnableBuilder::new(wakeup);
    register_multicaster(&mut builder, input, outputs)?;
    Ok(builder)
}
