//! Handle table.
//!
//! Maps small integer handles to live sessions. All operations take the
//! same mutex and none of them calls out while holding it, so callers may
//! freely take other locks from inside [`HandleTable::for_each`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::error::{SessionError, SessionResult};
use crate::session::types::SessionHandle;

enum Slot<T> {
    /// Handed out by `allocate`, not yet registered
    Reserved,
    Live(T),
}

/// Registry of sessions keyed by the lowest free handle.
///
/// [`allocate`](HandleTable::allocate) reserves the value it returns, so two
/// bring-ups running at once never receive the same handle. Reservations
/// are invisible to lookups until [`register`](HandleTable::register) turns
/// them into live entries, or [`release`](HandleTable::release) drops them.
pub struct HandleTable<T> {
    slots: Mutex<BTreeMap<i32, Slot<T>>>,
    limit: i32,
}

impl<T: Clone> HandleTable<T> {
    /// Create a table spanning the full non-negative `i32` range.
    pub fn new() -> Self {
        Self::with_limit(i32::MAX)
    }

    /// Create a table whose handles lie in `[0, limit)`.
    pub fn with_limit(limit: i32) -> Self {
        HandleTable {
            slots: Mutex::new(BTreeMap::new()),
            limit: limit.max(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, BTreeMap<i32, Slot<T>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the lowest unused handle.
    pub fn allocate(&self) -> SessionResult<SessionHandle> {
        let mut slots = self.slots();

        let mut candidate = 0;
        for &taken in slots.keys() {
            if taken != candidate {
                break;
            }
            candidate += 1;
        }

        if candidate >= self.limit {
            return Err(SessionError::HandleSpaceExhausted);
        }

        slots.insert(candidate, Slot::Reserved);
        Ok(SessionHandle(candidate))
    }

    /// Publish `value` under a handle obtained from `allocate`.
    pub fn register(&self, handle: SessionHandle, value: T) {
        self.slots().insert(handle.0, Slot::Live(value));
    }

    /// Give back a reservation that will never be registered.
    pub fn release(&self, handle: SessionHandle) {
        let mut slots = self.slots();
        if matches!(slots.get(&handle.0), Some(Slot::Reserved)) {
            slots.remove(&handle.0);
        }
    }

    pub fn lookup(&self, handle: SessionHandle) -> Option<T> {
        match self.slots().get(&handle.0) {
            Some(Slot::Live(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Remove a live entry and return it.
    pub fn remove(&self, handle: SessionHandle) -> Option<T> {
        let mut slots = self.slots();
        if !matches!(slots.get(&handle.0), Some(Slot::Live(_))) {
            return None;
        }
        match slots.remove(&handle.0) {
            Some(Slot::Live(value)) => Some(value),
            _ => None,
        }
    }

    /// Copy out every live entry in handle order.
    pub fn snapshot(&self) -> Vec<(SessionHandle, T)> {
        self.slots()
            .iter()
            .filter_map(|(&raw, slot)| match slot {
                Slot::Live(value) => Some((SessionHandle(raw), value.clone())),
                Slot::Reserved => None,
            })
            .collect()
    }

    /// Apply `f` to a snapshot of the live entries, outside the lock.
    pub fn for_each(&self, mut f: impl FnMut(SessionHandle, &T)) {
        for (handle, value) in self.snapshot() {
            f(handle, &value);
        }
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.snapshot().into_iter().map(|(handle, _)| handle).collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
