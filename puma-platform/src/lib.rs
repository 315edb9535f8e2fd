// SPDX-License-Identifier: GPL-3.0-or-later

//! Runtime platform-capability queries.
//!
//! This crate answers the small set of "does this host behave differently"
//! questions that PUMA's process-flavoured primitives need at run time:
//! how long a discard sweep should wait before reclaiming an abandoned
//! buffer, and whether process spawn on this platform is slow enough to
//! warrant a longer grace period.

use std::time::Duration;

/// The execution substrate flavour a buffer or runner was created with.
///
/// Mirrors `puma::environment::Flavour` without introducing a dependency
/// cycle between the two crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    Thread,
    Process,
}

/// Default discard-sweep grace period for thread-flavoured buffers.
const THREAD_GRACE: Duration = Duration::from_secs(5);

/// Default discard-sweep grace period for process-flavoured buffers on
/// platforms where process spawn is fast.
const PROCESS_GRACE_FAST_SPAWN: Duration = Duration::from_secs(5);

/// Default discard-sweep grace period for process-flavoured buffers on
/// platforms where process spawn is slow enough that a re-attaching
/// publisher or subscriber needs more time to show up.
const PROCESS_GRACE_SLOW_SPAWN: Duration = Duration::from_secs(15);

/// Returns `true` on platforms where spawning a new OS process is slow
/// enough to matter for discard-sweep timing.
///
/// macOS and Windows are treated as slow-spawn platforms: both route
/// process creation through a privileged service (`launchd`/posix_spawn
/// on macOS, CreateProcess plus antivirus hooks on Windows) that adds
/// tens of milliseconds of latency compared to a Linux `fork`+`exec`.
pub fn slow_process_spawn() -> bool {
    cfg!(any(target_os = "macos", target_os = "windows"))
}

/// Returns the discard-sweep grace period for a buffer of the given
/// flavour on the current platform.
///
/// See `spec.md` §4.2: 5s default, 15s for process-flavoured buffers on
/// platforms with slow process spawn.
pub fn discard_grace_period(flavour: Flavour) -> Duration {
    match flavour {
        Flavour::Thread => THREAD_GRACE,
        Flavour::Process if slow_process_spawn() => PROCESS_GRACE_SLOW_SPAWN,
        Flavour::Process => PROCESS_GRACE_FAST_SPAWN,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_grace_is_always_five_seconds() {
        assert_eq!(discard_grace_period(Flavour::Thread), Duration::from_secs(5));
    }

    #[test]
    fn process_grace_matches_spawn_speed() {
        let expected =
            if slow_process_spawn() { Duration::from_secs(15) } else { Duration::from_secs(5) };
        assert_eq!(discard_grace_period(Flavour::Process), expected);
    }
}
