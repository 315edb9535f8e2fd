// SPDX-License-Identifier: GPL-3.0-or-later

//! Field ownership policies for `Runnable` state (`spec.md` §9, "Cross-process
//! state sharing").
//!
//! The source expresses this with `child_only`/`parent_only`/`copied`/
//! `unmanaged` attribute sugar. Re-architected here as an explicit,
//! constructed-once choice per field rather than metaclass magic: a
//! [`FieldPolicy<T>`] is one of four variants, chosen when the field is
//! declared, and [`FieldPolicy::read`] enforces the declared visibility
//! at every read instead of relying on which process happens to hold the
//! pointer.

use crate::environment::SharedValue;
use crate::error::EnvironmentError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Which side of the parent/worker boundary is evaluating a [`FieldPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Worker,
}

/// A declared access policy for one piece of `Runnable` state.
pub enum FieldPolicy<T> {
    /// Lives only on the worker side; reading it from the parent is a
    /// logic error, not a silent default.
    WorkerOnly(T),
    /// Lives only on the parent side; reading it from the worker is a
    /// logic error.
    ParentOnly(T),
    /// Copied by value into the worker at spawn time
    /// ([`FieldPolicy::snapshot_for_spawn`]); afterwards the parent's and
    /// worker's copies evolve independently, with no further
    /// synchronisation.
    SnapshotAtSpawn(T),
    /// Mediated by a [`SharedValue`]: both sides read and write through
    /// it, each observing the other's writes subject to the flavour's
    /// consistency model.
    Shared(SharedValue<T>),
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("field is worker-only and cannot be read from the parent side")]
    NotVisibleToParent,
    #[error("field is parent-only and cannot be read from the worker side")]
    NotVisibleToWorker,
    #[error(transparent)]
    Shared(#[from] EnvironmentError),
}

impl<T> FieldPolicy<T>
where
    T: Clone + Send + 'static + Serialize + DeserializeOwned,
{
    /// Reads the field's current value as observed from `side`, enforcing
    /// the declared visibility.
    pub fn read(&self, side: Side) -> Result<T, PolicyError> {
        match (self, side) {
            (FieldPolicy::WorkerOnly(value), Side::Worker) => Ok(value.clone()),
            (FieldPolicy::WorkerOnly(_), Side::Parent) => Err(PolicyError::NotVisibleToParent),
            (FieldPolicy::ParentOnly(value), Side::Parent) => Ok(value.clone()),
            (FieldPolicy::ParentOnly(_), Side::Worker) => Err(PolicyError::NotVisibleToWorker),
            (FieldPolicy::SnapshotAtSpawn(value), _) => Ok(value.clone()),
            (FieldPolicy::Shared(shared), _) => Ok(shared.get()?),
        }
    }

    /// Writes a new value as observed from `side`, enforcing the same
    /// visibility rule as [`FieldPolicy::read`]. `SnapshotAtSpawn` write
    /// only updates the local copy — by definition the two sides no
    /// longer share storage after spawn.
    pub fn write(&mut self, side: Side, value: T) -> Result<(), PolicyError> {
        match (self, side) {
            (FieldPolicy::WorkerOnly(slot), Side::Worker) => {
                *slot = value;
                Ok(())
            }
            (FieldPolicy::WorkerOnly(_), Side::Parent) => Err(PolicyError::NotVisibleToParent),
            (FieldPolicy::ParentOnly(slot), Side::Parent) => {
                *slot = value;
                Ok(())
            }
            (FieldPolicy::ParentOnly(_), Side::Worker) => Err(PolicyError::NotVisibleToWorker),
            (FieldPolicy::SnapshotAtSpawn(slot), _) => {
                *slot = value;
                Ok(())
            }
            (FieldPolicy::Shared(shared), _) => Ok(shared.set(value)?),
        }
    }

    /// Produces the value to hand the spawned worker: `SnapshotAtSpawn`
    /// clones so the two copies can diverge from this point on;
    /// `WorkerOnly`/`ParentOnly` are carried across unchanged (a
    /// worker-only field still starts out equal to whatever the parent
    /// declared it as, it just becomes unreadable from the parent
    /// afterwards); `Shared` hands over another handle to the same
    /// backing value.
    pub fn snapshot_for_spawn(&self) -> Self {
        match self {
            FieldPolicy::WorkerOnly(value) => FieldPolicy::WorkerOnly(value.clone()),
            FieldPolicy::ParentOnly(value) => FieldPolicy::ParentOnly(value.clone()),
            FieldPolicy::SnapshotAtSpawn(value) => FieldPolicy::SnapshotAtSpawn(value.clone()),
            FieldPolicy::Shared(shared) => FieldPolicy::Shared(shared.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::environment::{Environment, ThreadEnvironment};

    #[test]
    fn worker_only_rejects_parent_reads() {
        let field = FieldPolicy::WorkerOnly(7i32);
        assert_eq!(field.read(Side::Worker).unwrap(), 7);
        assert!(matches!(field.read(Side::Parent), Err(PolicyError::NotVisibleToParent)));
    }

    #[test]
    fn parent_only_rejects_worker_reads() {
        let field = FieldPolicy::ParentOnly("secret".to_string());
        assert_eq!(field.read(Side::Parent).unwrap(), "secret");
        assert!(matches!(field.read(Side::Worker), Err(PolicyError::NotVisibleToWorker)));
    }

    #[test]
    fn snapshot_at_spawn_diverges_after_spawn() {
        let mut parent_side = FieldPolicy::SnapshotAtSpawn(1i32);
        let mut worker_side = parent_side.snapshot_for_spawn();

        parent_side.write(Side::Parent, 2).unwrap();
        worker_side.write(Side::Worker, 99).unwrap();

        assert_eq!(parent_side.read(Side::Parent).unwrap(), 2);
        assert_eq!(worker_side.read(Side::Worker).unwrap(), 99);
    }

    #[test]
    fn shared_is_visible_from_both_sides() {
        let env = ThreadEnvironment;
        let shared = env.create_shared_value(0i32).unwrap();
        let field = FieldPolicy::Shared(shared);

        field.write(Side::Worker, 5).unwrap();
        assert_eq!(field.read(Side::Parent).unwrap(), 5);
    }
}
