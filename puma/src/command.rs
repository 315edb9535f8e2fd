// SPDX-License-Identifier: GPL-3.0-or-later

//! CommandChannel (`spec.md` §3, §4.3, component C3): a `Buffer`
//! specialised to carry serialised commands from parent to worker.

use crate::buffer::{Buffer, Capacity, Publisher, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Identifies a worker-side method. Interned as a string rather than a
/// numeric code, since the set of commands is fixed per `Runnable` type
/// and an integer registry would just move the naming problem elsewhere.
pub type CommandId = String;

/// Positional and keyed arguments, kept as `serde_json::Value` so they
/// stay serialisable whether the worker is a thread or a process
/// (`spec.md` §3: "values must be serialisable when crossing process
/// boundaries").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandArgs {
    pub positional: Vec<JsonValue>,
    pub keyed: HashMap<String, JsonValue>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(mut self, args: Vec<JsonValue>) -> Self {
        self.positional = args;
        self
    }

    pub fn with_keyed(mut self, args: HashMap<String, JsonValue>) -> Self {
        self.keyed = args;
        self
    }
}

/// A serialisable invocation of a worker-side method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub method_id: CommandId,
    pub args: CommandArgs,
}

/// Built in, always handled by the servicing loop regardless of what the
/// `Runnable` registers (`spec.md` §4.3).
pub const STOP_METHOD_ID: &str = "__stop__";

impl Command {
    pub fn new(method_id: impl Into<String>, args: CommandArgs) -> Self {
        Self { method_id: method_id.into(), args }
    }

    pub fn stop() -> Self {
        Self { method_id: STOP_METHOD_ID.to_string(), args: CommandArgs::new() }
    }

    pub fn is_stop(&self) -> bool {
        self.method_id == STOP_METHOD_ID
    }
}

pub type CommandPublisher = Publisher<Command>;
pub type CommandSubscription = Subscription<Command>;

/// Constructs a fresh unbounded `Buffer<Command>`; commands are small and
/// rare compared to data-plane traffic, so bounding them would only add
/// a way to deadlock a `stop()` call.
pub fn new_command_buffer(flavour: puma_platform::Flavour) -> Buffer<Command> {
    Buffer::new(Capacity::Unbounded, flavour)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stop_command_round_trips_through_json() {
        let command = Command::stop();
        let encoded = serde_json::to_string(&command).unwrap();
        let decoded: Command = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.is_stop());
    }

    #[test]
    fn named_command_carries_positional_and_keyed_args() {
        let mut keyed = HashMap::new();
        keyed.insert("retries".to_string(), JsonValue::from(3));
        let command = Command::new(
            "resize",
            CommandArgs::new().with_positional(vec![JsonValue::from(42)]).with_keyed(keyed),
        );
        assert!(!command.is_stop());
        assert_eq!(command.args.positional, vec![JsonValue::from(42)]);
        assert_eq!(command.args.keyed["retries"], JsonValue::from(3));
    }
}
