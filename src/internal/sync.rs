//! Synchronization primitives.

use std::collections::HashMap;
use std::sync::{Condvar, LockResult, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
use std::task::Waker;
use std::time::Duration;

/// A mutex paired with a condition variable, used to put threads to sleep until another thread changes the protected
/// state and wakes them up.
pub(crate) struct Monitor<T> {
    lock: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            lock: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Acquire the lock for an operation that never suspends.
    ///
    /// The protected state is only ever changed by single stores, so a panic in another thread cannot leave it torn
    /// and a poisoned lock is recovered. The poison is left in place for a suspended waiter to observe.
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock before possibly suspending.
    ///
    /// The caller was not waiting when any earlier panic happened, so leftover poison is cleared rather than reported.
    pub(crate) fn lock_fresh(&self) -> MutexGuard<'_, T> {
        self.lock_clearing().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock, clearing any poison on it.
    ///
    /// Returns `Err` holding the guard if the lock was poisoned, so a caller that was waiting can tell it was
    /// interrupted. Only the first caller to observe a given poisoning sees it.
    pub(crate) fn lock_clearing(&self) -> LockResult<MutexGuard<'_, T>> {
        self.lock.lock().map_err(|e| {
            self.lock.clear_poison();
            e
        })
    }

    /// Release the lock and sleep until notified, then reacquire the lock.
    ///
    /// If another thread panicked while holding the lock in the meantime, the poison is cleared and `Err` is returned
    /// with the reacquired guard.
    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> LockResult<MutexGuard<'a, T>> {
        self.condvar.wait(guard).map_err(|e| {
            self.lock.clear_poison();
            e
        })
    }

    /// Same as `wait`, but gives up after the given duration.
    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> LockResult<(MutexGuard<'a, T>, WaitTimeoutResult)> {
        self.condvar.wait_timeout(guard, timeout).map_err(|e| {
            self.lock.clear_poison();
            e
        })
    }

    /// Wake up every thread sleeping on this monitor.
    pub(crate) fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

/// Set of wakers belonging to tasks waiting for a state change.
///
/// Each waiting future owns one slot, so repeated polls replace the stored waker instead of piling up new ones.
#[derive(Default)]
pub(crate) struct WakerSet {
    next_key: u64,
    wakers: HashMap<u64, Waker>,
}

impl WakerSet {
    /// Store a waker, returning the key of the slot it was placed in.
    ///
    /// If `key` still refers to a live slot its waker is replaced in place.
    pub(crate) fn register(&mut self, key: Option<u64>, waker: &Waker) -> u64 {
        if let Some(key) = key {
            if let Some(existing) = self.wakers.get_mut(&key) {
                if !existing.will_wake(waker) {
                    *existing = waker.clone();
                }
                return key;
            }
        }

        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        self.wakers.insert(key, waker.clone());
        key
    }

    /// Drop the slot for a waiter that is no longer interested.
    ///
    /// Returns `true` if the slot was still registered.
    pub(crate) fn remove(&mut self, key: u64) -> bool {
        self.wakers.remove(&key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }

    /// Remove every waker from the set so they can be woken after the lock is released.
    pub(crate) fn take(&mut self) -> Vec<Waker> {
        self.wakers.drain().map(|(_, waker)| waker).collect()
    }
}
