// SPDX-License-Identifier: GPL-3.0-or-later

//! The Wakeup primitive (`spec.md` §4.1, component C1).
//!
//! A level-less, many-to-one event: any number of producers may call
//! `signal()`, a single consumer calls `wait(timeout)`, and one signal is
//! enough to wake the consumer no matter how many producers signalled
//! concurrently. This is the mechanism `Runnable` uses to multiplex its
//! input buffers and command channel without polling (§4.3).

use crate::error::WakeupError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Shared handle to a wakeup event, as stored by a `Subscription`.
///
/// Cloning a `Wakeup` clones the `Arc`; every clone refers to the same
/// underlying event, which is exactly what lets one Wakeup be handed to
/// several `Buffer::subscribe` calls at once.
pub type Wakeup = Arc<dyn WakeupSignal>;

pub trait WakeupSignal: Send + Sync {
    /// Sets the event. Non-blocking. Concurrent signals collapse into a
    /// single pending wakeup.
    fn signal(&self);

    /// Blocks until the event has been set since the last `consume`, or
    /// until `timeout` elapses. Returns whether the event was set.
    fn wait(&self, timeout: Duration) -> bool;

    /// Atomically clears the event.
    fn consume(&self);
}

/// In-process condition-variable-backed wakeup, used by thread-flavoured
/// environments. Workers in the same address space share the `Arc`.
#[derive(Clone)]
pub struct ThreadWakeup {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ThreadWakeup {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(false), Condvar::new())) }
    }
}

impl Default for ThreadWakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeupSignal for ThreadWakeup {
    fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
        *pending = true;
        cvar.notify_one();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let pending = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (pending, _result) = cvar
            .wait_timeout_while(pending, timeout, |pending| !*pending)
            .unwrap_or_else(|e| e.into_inner());
        *pending
    }

    fn consume(&self) {
        let (lock, _cvar) = &*self.inner;
        let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
        *pending = false;
    }
}

/// Self-pipe-backed wakeup, used by process-flavoured environments.
///
/// Built on an OS pipe rather than a condition variable: the file
/// descriptor is a kernel-visible object, which is the property
/// `spec.md` §4.1 asks for when it says process flavour uses
/// "OS-visible events". A single byte written by `signal()` makes the
/// read end readable; `wait()` polls the read end with a timeout;
/// `consume()` drains every byte currently buffered so that collapsed
/// concurrent signals only wake the waiter once.
#[cfg(unix)]
pub struct ProcessWakeup {
    read_fd: std::os::unix::io::RawFd,
    write_fd: std::os::unix::io::RawFd,
}

#[cfg(unix)]
impl ProcessWakeup {
    pub fn new() -> Result<Self, WakeupError> {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(WakeupError::Create(std::io::Error::last_os_error()));
        }
        // Non-blocking so `signal()` never blocks a publisher and `wait()`
        // can be driven purely through `poll()`.
        for fd in fds {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1] })
    }
}

#[cfg(unix)]
impl Drop for ProcessWakeup {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

// Safety: the two raw fds are never aliased mutably; `pipe(2)` fds may
// freely be used from multiple threads for read/write.
#[cfg(unix)]
unsafe impl Send for ProcessWakeup {}
#[cfg(unix)]
unsafe impl Sync for ProcessWakeup {}

#[cfg(unix)]
impl WakeupSignal for ProcessWakeup {
    fn signal(&self) {
        let byte = [1u8];
        unsafe {
            libc::write(self.write_fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut pollfd = libc::pollfd { fd: self.read_fd, events: libc::POLLIN, revents: 0 };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        rc > 0 && (pollfd.revents & libc::POLLIN) != 0
    }

    fn consume(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }
}

/// Picks the Wakeup implementation `spec.md` §4.1 calls for per flavour:
/// an OS-visible self-pipe for `Flavour::Process`, a condition variable
/// for `Flavour::Thread`. Falls back to `ThreadWakeup` on non-unix
/// targets, where `ProcessWakeup` does not compile, and if pipe creation
/// itself fails (a worker's own internal wakeup outliving that failure
/// is still strictly better than propagating it through every call site
/// that only wanted a `Wakeup`).
pub fn new_wakeup(flavour: puma_platform::Flavour) -> Wakeup {
    #[cfg(unix)]
    {
        if flavour == puma_platform::Flavour::Process {
            match ProcessWakeup::new() {
                Ok(w) => return Arc::new(w),
                Err(e) => log::warn!("falling back to ThreadWakeup: {e}"),
            }
        }
    }
    let _ = flavour;
    Arc::new(ThreadWakeup::new())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_wakeup_wakes_on_signal() {
        let w = ThreadWakeup::new();
        assert!(!w.wait(Duration::from_millis(10)));
        w.signal();
        assert!(w.wait(Duration::from_millis(10)));
    }

    #[test]
    fn thread_wakeup_consume_clears_the_event() {
        let w = ThreadWakeup::new();
        w.signal();
        w.consume();
        assert!(!w.wait(Duration::from_millis(10)));
    }

    #[test]
    fn thread_wakeup_collapses_concurrent_signals() {
        let w = ThreadWakeup::new();
        w.signal();
        w.signal();
        w.signal();
        assert!(w.wait(Duration::from_millis(10)));
        w.consume();
        assert!(!w.wait(Duration::from_millis(10)));
    }

    #[test]
    fn one_wakeup_can_be_shared_by_many_signallers() {
        let w = Arc::new(ThreadWakeup::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let w = w.clone();
            handles.push(std::thread::spawn(move || w.signal()));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(w.wait(Duration::from_millis(50)));
    }

    #[cfg(unix)]
    #[test]
    fn process_wakeup_wakes_on_signal() {
        let w = ProcessWakeup::new().unwrap();
        assert!(!w.wait(Duration::from_millis(10)));
        w.signal();
        assert!(w.wait(Duration::from_millis(10)));
        w.consume();
        assert!(!w.wait(Duration::from_millis(10)));
    }
}
