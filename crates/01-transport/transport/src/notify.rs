//! Wakeup primitives shared by pools, flows and bridges.
//!
//! A [`Notifiable`] is the only way one execution context hands a wakeup to
//! another. Implementations must never block: `notify` may be called from a
//! different thread, from a polling loop outside any executor, or from inside
//! another flow's state.

use crate::wait::{self, WaitWord};

#[cfg(feature = "loom")]
use loom::sync::atomic::Ordering;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::Ordering;

/// Something that can be woken up.
pub trait Notifiable: Send + Sync {
    /// Delivers one wakeup. Must return promptly without blocking.
    fn notify(&self);

    /// Like [`Notifiable::notify`], but reports whether anything was waiting
    /// to receive the wakeup. Targets that can go away (a dropped or
    /// finished flow) return `false` so the caller can pass the wakeup on.
    fn try_notify(&self) -> bool {
        self.notify();
        true
    }
}

/// Counting notifiable a plain thread can block on.
///
/// Used to wait for work handed to an executor from outside of it. Each
/// `notify` releases exactly one `wait_for_notification`.
pub struct SyncNotifiable {
    pending: WaitWord,
}

impl SyncNotifiable {
    /// Creates a notifiable with no pending wakeups.
    pub fn new() -> Self {
        Self {
            pending: WaitWord::new(0),
        }
    }

    /// Parks the calling thread until one wakeup is available, then consumes it.
    pub fn wait_for_notification(&self) {
        loop {
            let current = self.pending.load(Ordering::Acquire);
            if current > 0 {
                if self
                    .pending
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            wait::wait_u32(&self.pending, 0);
        }
    }

    /// Consumes one pending wakeup without blocking. Returns whether one was present.
    pub fn try_take(&self) -> bool {
        let current = self.pending.load(Ordering::Acquire);
        current > 0
            && self
                .pending
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

impl Default for SyncNotifiable {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifiable for SyncNotifiable {
    fn notify(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        wait::wake_one(&self.pending);
    }
}
