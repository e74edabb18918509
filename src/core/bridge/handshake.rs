//! One-shot thread-id handshake.
//!
//! The requester of a new thread blocks on a [`ThreadIdSlot`] until the new
//! execution context writes its id and wakes it. This is the only
//! synchronization that crosses the isolation boundary.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

/// Slot value while the handshake is in progress
pub const PENDING: i32 = -1;

/// Slot value when the host could not create the context
pub const SPAWN_FAILED: i32 = -2;

/// Atomic integer slot shared by the requester and the new context
#[derive(Debug)]
pub struct ThreadIdSlot {
    value: AtomicI32,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ThreadIdSlot {
    pub fn new() -> Self {
        Self {
            value: AtomicI32::new(PENDING),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub fn load(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Publish the id (or a negative failure code) and wake the requester
    pub fn store_and_notify(&self, value: i32) {
        let _guard = self.lock.lock();
        self.value.store(value, Ordering::Release);
        self.wake.notify_all();
    }

    /// Block until the slot leaves `PENDING`
    pub fn wait(&self) -> i32 {
        let mut guard = self.lock.lock();
        loop {
            let value = self.load();
            if value != PENDING {
                return value;
            }
            self.wake.wait(&mut guard);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `None` while still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let mut guard = self.lock.lock();
        let value = self.load();
        if value != PENDING {
            return Some(value);
        }
        self.wake.wait_for(&mut guard, timeout);
        match self.load() {
            PENDING => None,
            value => Some(value),
        }
    }
}

impl Default for ThreadIdSlot {
    fn default() -> Self {
        Self::new()
    }
}
