// SPDX-License-Identifier: GPL-3.0-or-later

//! StatusChannel (`spec.md` §3, §4.4, component C4): a `Buffer`
//! specialised to carry lifecycle and error reports from worker to
//! parent.
//!
//! `StatusReport::Ready` is the detail `spec.md` §4.4's state table
//! needs ("worker reports ready" triggers Starting -> Running) but which
//! the distilled spec leaves implicit; see `SPEC_FULL.md` §3 for the
//! grounding note.

use crate::buffer::{Buffer, Capacity, Publisher, Subscription};
use crate::error::{BufferError, PumaError};
use crate::transport::RemoteEndpoint;
use crate::value::Value;
use puma_platform::Flavour;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusReport {
    /// The worker has entered its servicing loop and is ready to
    /// process commands and input buffers.
    Ready,
    /// The worker hit a fatal error and is tearing itself down.
    Error(PumaError),
    /// The worker's loop exited cleanly (in response to `stop_requested`
    /// or input exhaustion) without error.
    Stopped,
}

pub type StatusPublisher = Publisher<StatusReport>;
pub type StatusSubscription = Subscription<StatusReport>;

pub fn new_status_buffer(flavour: Flavour) -> Buffer<StatusReport> {
    Buffer::new(Capacity::Unbounded, flavour)
}

/// Where a `Runnable` sends its `StatusReport`s.
///
/// Thread-flavoured workers publish directly into the parent's
/// in-memory `Buffer`. Process-flavoured workers run in a different
/// address space than the `Buffer` they report to (the parent always
/// owns and subscribes to the `StatusChannel`), so they instead hold a
/// `RemoteEndpoint` connected to the parent's listener address.
pub enum StatusSink {
    Local(StatusPublisher),
    Remote(RemoteEndpoint),
}

impl StatusSink {
    pub fn publish_value(&mut self, report: StatusReport) -> Result<(), BufferError> {
        match self {
            StatusSink::Local(publisher) => publisher.publish_value(report),
            StatusSink::Remote(endpoint) => endpoint.send(&Value::Data(report)).map_err(BufferError::from),
        }
    }

    pub fn publish_complete(&mut self, error: Option<PumaError>) -> Result<(), BufferError> {
        match self {
            StatusSink::Local(publisher) => publisher.publish_complete(error),
            StatusSink::Remote(endpoint) => {
                endpoint.send(&Value::<StatusReport>::Complete(error)).map_err(BufferError::from)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_report_round_trips_through_json() {
        let report = StatusReport::Error(PumaError::user("boom"));
        let encoded = serde_json::to_string(&report).unwrap();
        let decoded: StatusReport = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(decoded, StatusReport::Error(e) if e.message == "boom"));
    }
}
