// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end scenario: a buffer abandoned by both ends reclaims its
//! queued values after the flavour's discard grace period, and a
//! re-attaching subscriber before the grace period elapses cancels the
//! sweep (`spec.md` §8, "discard sweep"; §4.2 I3).

use puma::buffer::{Buffer, Capacity, Handler};
use puma::error::PumaError;
use puma::wakeup::ThreadWakeup;
use puma_platform::Flavour;
use std::sync::Arc;
use std::time::Duration;

struct Collector {
    values: Vec<i32>,
}

impl Handler<i32> for Collector {
    fn on_value(&mut self, value: i32) {
        self.values.push(value);
    }
    fn on_complete(&mut self, _error: Option<PumaError>) {}
}

#[test]
fn abandoned_queue_is_reclaimed_after_grace_period() {
    let buffer: Buffer<i32> = Buffer::new(Capacity::Unbounded, Flavour::Thread);
    {
        let mut publisher = buffer.publish();
        publisher.publish_value(1).unwrap();
        publisher.publish_value(2).unwrap();
    } // publisher dropped with no subscriber attached: sweep arms

    let grace = puma_platform::discard_grace_period(Flavour::Thread);
    std::thread::sleep(grace + Duration::from_millis(500));

    // A subscriber attaching after the sweep sees an empty, still-open
    // buffer — the stranded values are gone, not delivered late.
    let wakeup = Arc::new(ThreadWakeup::new());
    let mut subscription = buffer.subscribe(wakeup).unwrap();
    let mut collector = Collector { values: Vec::new() };
    subscription.call_events(&mut collector);
    assert!(collector.values.is_empty(), "discard sweep should have reclaimed the stranded values");
}

#[test]
fn re_subscribing_before_grace_elapses_preserves_the_queue() {
    let buffer: Buffer<i32> = Buffer::new(Capacity::Unbounded, Flavour::Thread);
    {
        let mut publisher = buffer.publish();
        publisher.publish_value(7).unwrap();
    }

    // Re-attach well within the 5s grace period.
    std::thread::sleep(Duration::from_millis(100));
    let wakeup = Arc::new(ThreadWakeup::new());
    let mut subscription = buffer.subscribe(wakeup).unwrap();
    let mut collector = Collector { values: Vec::new() };
    subscription.call_events(&mut collector);
    assert_eq!(collector.values, vec![7]);
}
