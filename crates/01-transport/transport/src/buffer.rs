//! Reference-counted message cells.
//!
//! A [`Buffer`] owns one payload plus the origin tag used for loop avoidance.
//! Cloning a buffer adds a reference; dropping (or [`Buffer::release`]) removes
//! one. When the last reference goes away the payload is recycled and handed
//! back to the pool it came from. Because access goes through the handle,
//! reading a payload after its final release cannot be expressed.

use core::fmt;
use core::mem::ManuallyDrop;
use core::num::NonZeroU64;
use core::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a message endpoint, used as the origin tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(NonZeroU64);

impl PortId {
    /// Allocates a fresh, process-unique identity.
    pub fn next() -> Self {
        let raw = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(raw) {
            Some(id) => Self(id),
            None => panic!("port id space exhausted"),
        }
    }

    /// Raw numeric value, for logging.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortId({})", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Cleanup applied to a payload when its last reference is released.
///
/// Implementations should drop anything the next user must not observe while
/// keeping reusable storage (e.g. a `Vec`'s capacity).
pub trait Recycle: Default + Send + Sync + 'static {
    /// Resets the payload in place.
    fn recycle(&mut self) {
        *self = Self::default();
    }
}

impl<T: Send + Sync + 'static> Recycle for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}

impl Recycle for String {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// Destination for payloads whose last reference was released.
pub(crate) trait Reclaim<T>: Send + Sync {
    fn reclaim(&self, value: T);
}

struct Cell<T> {
    data: ManuallyDrop<T>,
    origin: Option<PortId>,
    home: Option<Arc<dyn Reclaim<T>>>,
}

impl<T> Drop for Cell<T> {
    fn drop(&mut self) {
        // SAFETY: `Drop` runs exactly once and `data` is never touched afterwards.
        let data = unsafe { ManuallyDrop::take(&mut self.data) };
        match self.home.take() {
            Some(home) => home.reclaim(data),
            None => drop(data),
        }
    }
}

/// Shared handle to a pooled payload.
pub struct Buffer<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Buffer<T> {
    /// Wraps a value that does not belong to any pool.
    pub fn detached(value: T) -> Self {
        Self {
            cell: Arc::new(Cell {
                data: ManuallyDrop::new(value),
                origin: None,
                home: None,
            }),
        }
    }

    pub(crate) fn pooled(value: T, home: Arc<dyn Reclaim<T>>) -> Self {
        Self {
            cell: Arc::new(Cell {
                data: ManuallyDrop::new(value),
                origin: None,
                home: Some(home),
            }),
        }
    }

    /// Port that produced this buffer, if tagged.
    pub fn origin(&self) -> Option<PortId> {
        self.cell.origin
    }

    /// Tags the buffer with the port that produced it.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared: the tag of a message other holders can
    /// already see must not change.
    pub fn set_origin(&mut self, origin: Option<PortId>) {
        match Arc::get_mut(&mut self.cell) {
            Some(cell) => cell.origin = origin,
            None => panic!("origin tag changed on a shared buffer"),
        }
    }

    /// Builder-style variant of [`Buffer::set_origin`].
    pub fn with_origin(mut self, origin: PortId) -> Self {
        self.set_origin(Some(origin));
        self
    }

    /// Mutable payload access, available only while this is the sole reference.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.cell).map(|cell| &mut *cell.data)
    }

    /// Number of live references to this cell.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// True when no other holder shares this cell.
    pub fn is_unique(&self) -> bool {
        self.ref_count() == 1
    }

    /// Adds a reference. Equivalent to `clone`.
    pub fn add_ref(&self) -> Self {
        self.clone()
    }

    /// Drops this reference; the cell is recycled when it was the last one.
    pub fn release(self) {
        drop(self);
    }

    /// True when both handles point at the same cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Deref for Buffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell.data
    }
}

impl<T: fmt::Debug> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("origin", &self.cell.origin)
            .field("refs", &self.ref_count())
            .field("data", &*self.cell.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_ids_are_unique() {
        let a = PortId::next();
        let b = PortId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn clone_and_release_track_references() {
        let buf = Buffer::detached(vec![1u8, 2, 3]);
        assert_eq!(buf.ref_count(), 1);
        let other = buf.add_ref();
        assert_eq!(buf.ref_count(), 2);
        assert!(Buffer::ptr_eq(&buf, &other));
        other.release();
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(&buf[..], &[1, 2, 3]);
    }

    #[test]
    fn origin_is_set_on_unique_buffer() {
        let id = PortId::next();
        let buf = Buffer::detached(String::from("x")).with_origin(id);
        assert_eq!(buf.origin(), Some(id));
    }

    #[test]
    #[should_panic(expected = "shared buffer")]
    fn origin_cannot_change_once_shared() {
        let mut buf = Buffer::detached(0u8.to_string());
        let _peer = buf.clone();
        buf.set_origin(Some(PortId::next()));
    }

    #[test]
    fn get_mut_requires_unique_reference() {
        let mut buf = Buffer::detached(vec![0u8]);
        buf.get_mut().expect("unique").push(1);
        let peer = buf.clone();
        assert!(buf.get_mut().is_none());
        drop(peer);
        assert_eq!(buf.get_mut().map(|v| v.len()), Some(2));
    }
}
