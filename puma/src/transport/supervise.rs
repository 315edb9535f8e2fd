// SPDX-License-Identifier: GPL-3.0-or-later

//! Process supervision for `ProcessRunner` workers.
//!
//! Adapted from the teacher's `intercept::supervise`: forward termination
//! signals to the child, poll `try_wait` rather than blocking on `wait`,
//! and give a cooperating child a bounded window to exit before it gets
//! killed outright.

use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs `child` to completion, forwarding `SIGTERM`/`SIGINT`/`SIGQUIT` (on
/// the platforms `signal-hook` supports them) to it so that killing the
/// parent process tears the worker down too.
pub fn supervise(mut child: Child) -> std::io::Result<ExitStatus> {
    let signaled = Arc::new(AtomicUsize::new(0));
    for signal in signal_hook::consts::TERM_SIGNALS {
        // Best-effort: if registration fails the worker still gets
        // reaped normally, it just won't receive forwarded signals.
        let _ = signal_hook::flag::register_usize(*signal, Arc::clone(&signaled), *signal as usize);
    }

    loop {
        if signaled.swap(0, Ordering::SeqCst) != 0 {
            log::debug!("supervisor received signal, forwarding to worker process");
            child.kill()?;
        }

        match child.try_wait()? {
            Some(status) => {
                log::debug!("worker process exited with {status}");
                return Ok(status);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Waits up to `timeout` for `child` to exit on its own (expected after a
/// `Stop` command has been enqueued on its CommandChannel); kills it if
/// the deadline passes. Returns whether the process exited cooperatively.
pub fn terminate_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            log::debug!("worker process exited cooperatively with {status}");
            return Ok(true);
        }
        if Instant::now() >= deadline {
            log::warn!("worker process did not exit within the teardown grace period, killing it");
            child.kill()?;
            child.wait()?;
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}
