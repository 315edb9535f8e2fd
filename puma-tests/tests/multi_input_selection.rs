// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end scenario: a single `Runnable` subscribed to two input
//! buffers in registration order, both feeding one shared multi-publisher
//! output buffer (`spec.md` §8, "multi-input selection"). Asserts that
//! neither input is starved, not a specific interleaving.

use puma::buffer::{Buffer, Capacity, Handler, Publisher};
use puma::error::PumaError;
use puma::runnable::{EventHandler, RunnableBuilder};
use puma::runner::Runner;
use puma::wakeup::ThreadWakeup;
use puma_platform::Flavour;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Tagger {
    tag: &'static str,
    output: Publisher<String>,
    remaining: Arc<Mutex<usize>>,
}

impl EventHandler<i32> for Tagger {
    fn on_value(&mut self, value: i32) -> Result<(), PumaError> {
        self.output
            .publish_value(format!("{}:{value}", self.tag))
            .map_err(|e| PumaError::new("buffer_error", e.to_string()))
    }

    fn on_complete(&mut self, error: Option<PumaError>) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining -= 1;
        if *remaining == 0 {
            let _ = self.output.publish_complete(error);
        }
    }
}

struct Collector {
    values: Arc<Mutex<Vec<String>>>,
    done: Arc<Mutex<bool>>,
}

impl Handler<String> for Collector {
    fn on_value(&mut self, value: String) {
        self.values.lock().unwrap().push(value);
    }
    fn on_complete(&mut self, _error: Option<PumaError>) {
        *self.done.lock().unwrap() = true;
    }
}

#[test]
fn both_inputs_are_serviced_without_starvation() {
    let input_a: Buffer<i32> = Buffer::new(Capacity::Unbounded, Flavour::Thread);
    let input_b: Buffer<i32> = Buffer::new(Capacity::Unbounded, Flavour::Thread);
    let output: Buffer<String> = Buffer::new(Capacity::Unbounded, Flavour::Thread);

    let worker_a = input_a.clone();
    let worker_b = input_b.clone();
    let remaining = Arc::new(Mutex::new(2usize));
    let output_a = output.publish();
    let output_b = output.publish();
    let remaining_a = Arc::clone(&remaining);
    let remaining_b = Arc::clone(&remaining);

    let mut runner = Runner::spawn_thread(move |wakeup| {
        let mut builder = RunnableBuilder::new(wakeup);
        builder.subscribe(&worker_a, Tagger { tag: "a", output: output_a, remaining: remaining_a }).unwrap();
        builder.subscribe(&worker_b, Tagger { tag: "b", output: output_b, remaining: remaining_b }).unwrap();
        builder
    })
    .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    runner.check_for_errors().unwrap();

    let mut pub_a = input_a.publish();
    let mut pub_b = input_b.publish();
    pub_a.publish_value(1).unwrap();
    pub_b.publish_value(1).unwrap();
    pub_a.publish_value(2).unwrap();
    pub_b.publish_value(2).unwrap();
    pub_a.publish_complete(None).unwrap();
    pub_b.publish_complete(None).unwrap();

    let values = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(false));
    let wakeup = Arc::new(ThreadWakeup::new());
    let mut subscription = output.subscribe(wakeup).unwrap();
    let mut collector = Collector { values: Arc::clone(&values), done: Arc::clone(&done) };

    for _ in 0..100 {
        subscription.call_events(&mut collector);
        if *done.lock().unwrap() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    assert!(*done.lock().unwrap(), "merged output buffer never completed");
    let seen: HashSet<String> = values.lock().unwrap().iter().cloned().collect();
    let expected: HashSet<String> =
        ["a:1", "a:2", "b:1", "b:2"].iter().map(|s| s.to_string()).collect();
    assert_eq!(seen, expected, "both input buffers must be drained, not just one");

    runner.check_for_errors().unwrap();
    runner.stop().unwrap();
    runner.join().unwrap();
}
