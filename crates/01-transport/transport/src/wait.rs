//! Atomic wait/notify shims used to park threads without spinning.
//!
//! Native targets rely on the `atomic-wait` crate (futex-backed where
//! available). Loom builds stub these operations so the deterministic
//! scheduler never blocks inside a model.

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU32, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU32, Ordering};

/// Atomic word the shims park on. Under `loom` this is the model's atomic.
pub type WaitWord = AtomicU32;

/// Result of attempting to wait on an atomic location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The value matched and the caller was woken by a notify (or spuriously).
    Ok,
    /// The value no longer matched when the wait was attempted.
    NotEqual,
}

#[cfg(feature = "loom")]
mod imp {
    use super::{AtomicU32, WaitResult};

    #[inline]
    pub(crate) fn wait_u32(atomic: &AtomicU32, expected: u32) -> WaitResult {
        let _ = (atomic, expected);
        loom::thread::yield_now();
        WaitResult::NotEqual
    }

    #[inline]
    pub(crate) fn wake_one(atomic: &AtomicU32) {
        let _ = atomic;
    }

    #[inline]
    pub(crate) fn wake_all(atomic: &AtomicU32) {
        let _ = atomic;
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    use super::{AtomicU32, Ordering, WaitResult};

    #[inline]
    pub(crate) fn wait_u32(atomic: &AtomicU32, expected: u32) -> WaitResult {
        if atomic.load(Ordering::Acquire) != expected {
            return WaitResult::NotEqual;
        }
        atomic_wait::wait(atomic, expected);
        WaitResult::Ok
    }

    #[inline]
    pub(crate) fn wake_one(atomic: &AtomicU32) {
        atomic_wait::wake_one(atomic as *const AtomicU32);
    }

    #[inline]
    pub(crate) fn wake_all(atomic: &AtomicU32) {
        atomic_wait::wake_all(atomic as *const AtomicU32);
    }
}

/// Blocks the caller while the atomic still holds `expected`.
///
/// Returns immediately when the value already differs, so a wake that lands
/// between reading the value and calling this function is never lost.
#[inline]
pub fn wait_u32(atomic: &AtomicU32, expected: u32) -> WaitResult {
    imp::wait_u32(atomic, expected)
}

/// Wakes at most one waiter parked on `atomic`.
#[inline]
pub fn wake_one(atomic: &AtomicU32) {
    imp::wake_one(atomic)
}

/// Wakes all waiters parked on `atomic`.
#[inline]
pub fn wake_all(atomic: &AtomicU32) {
    imp::wake_all(atomic)
}

/// Bumps a wake sequence and releases one parked waiter.
#[inline]
pub fn bump_and_wake_one(seq: &AtomicU32) {
    seq.fetch_add(1, Ordering::Release);
    wake_one(seq);
}
