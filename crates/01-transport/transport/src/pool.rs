//! Pools of recyclable message cells.
//!
//! Embedded deployments size pools for the worst case up front, so running
//! out of cells is a configuration fault rather than a runtime retry path.
//! When it does happen the *requesting flow* waits: [`Pool::alloc_or_wait`]
//! registers a [`Notifiable`] that is woken once a cell comes back. Nothing
//! here ever blocks a thread.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, Reclaim, Recycle};
use crate::notify::Notifiable;
use crate::{TransportError, TransportResult};

/// Configuration describing the shape of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Fixed number of cells, or `None` to grow on demand.
    pub capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_owned(),
            capacity: None,
        }
    }
}

struct PoolState<T> {
    free: Vec<T>,
    outstanding: usize,
    peak: usize,
    waiters: VecDeque<Arc<dyn Notifiable>>,
}

struct PoolShared<T> {
    name: String,
    capacity: Option<usize>,
    state: Mutex<PoolState<T>>,
}

impl<T: Recycle> Reclaim<T> for PoolShared<T> {
    fn reclaim(&self, mut value: T) {
        value.recycle();
        let mut waiter = {
            let mut state = self.state.lock();
            assert!(
                state.outstanding > 0,
                "pool `{}` got back more cells than it handed out",
                self.name
            );
            state.outstanding -= 1;
            state.free.push(value);
            state.waiters.pop_front()
        };
        // A waiter whose flow is gone cannot take the cell; hand the wakeup
        // to the next one so it is not lost.
        while let Some(target) = waiter {
            if target.try_notify() {
                tracing::trace!(pool = %self.name, "cell returned, waking waiter");
                return;
            }
            tracing::trace!(pool = %self.name, "waiter gone, passing wakeup on");
            waiter = self.state.lock().waiters.pop_front();
        }
    }
}

/// Allocator of reference-counted [`Buffer`]s.
pub struct Pool<T: Recycle> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Recycle> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Recycle> Pool<T> {
    /// Creates a pool from `config`.
    ///
    /// Fixed pools pre-populate every cell so steady-state allocation never
    /// touches the heap for the payload.
    pub fn new(config: PoolConfig) -> TransportResult<Self> {
        let PoolConfig { name, capacity } = config;
        if capacity == Some(0) {
            return Err(TransportError::InvalidCapacity {
                pool: name,
                requested: 0,
                minimum: 1,
            });
        }

        let free = match capacity {
            Some(count) => (0..count).map(|_| T::default()).collect(),
            None => Vec::new(),
        };

        Ok(Self {
            shared: Arc::new(PoolShared {
                name,
                capacity,
                state: Mutex::new(PoolState {
                    free,
                    outstanding: 0,
                    peak: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        })
    }

    /// Creates a pool with exactly `capacity` cells.
    pub fn fixed(name: impl Into<String>, capacity: usize) -> TransportResult<Self> {
        Self::new(PoolConfig {
            name: name.into(),
            capacity: Some(capacity),
        })
    }

    /// Creates a pool that allocates a new cell whenever none is free.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                capacity: None,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    outstanding: 0,
                    peak: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Fixed cell count, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// Cells that can be handed out right now without growing.
    pub fn free_count(&self) -> usize {
        let state = self.shared.state.lock();
        match self.shared.capacity {
            Some(capacity) => capacity - state.outstanding,
            None => state.free.len(),
        }
    }

    /// Cells currently held by at least one buffer.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Highest number of cells outstanding at once.
    pub fn peak(&self) -> usize {
        self.shared.state.lock().peak
    }

    /// Number of waiters parked on this pool.
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Attempts to hand out a cell without waiting.
    ///
    /// Returns `None` when a fixed pool is exhausted.
    pub fn try_alloc(&self) -> Option<Buffer<T>> {
        let value = {
            let mut state = self.shared.state.lock();
            self.take_cell(&mut state)?
        };
        Some(self.wrap(value))
    }

    /// Hands out a cell, or registers `waiter` to be notified once one is
    /// returned.
    ///
    /// The check and the registration happen under one lock, so a release
    /// racing with this call always finds the waiter. A waiter that is
    /// already parked is not registered twice. After the wakeup the caller
    /// must call this again; another allocator may have taken the cell.
    pub fn alloc_or_wait(&self, waiter: &Arc<dyn Notifiable>) -> Option<Buffer<T>> {
        let value = {
            let mut state = self.shared.state.lock();
            match self.take_cell(&mut state) {
                Some(value) => value,
                None => {
                    if !state.waiters.iter().any(|w| Arc::ptr_eq(w, waiter)) {
                        state.waiters.push_back(Arc::clone(waiter));
                    }
                    tracing::debug!(
                        pool = %self.shared.name,
                        waiting = state.waiters.len(),
                        "pool exhausted, allocation deferred"
                    );
                    return None;
                }
            }
        };
        Some(self.wrap(value))
    }

    /// Removes a parked waiter. Returns whether it was registered.
    pub fn cancel_wait(&self, waiter: &Arc<dyn Notifiable>) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
        state.waiters.len() != before
    }

    fn take_cell(&self, state: &mut PoolState<T>) -> Option<T> {
        if let Some(capacity) = self.shared.capacity {
            if state.outstanding >= capacity {
                return None;
            }
        }
        let value = state.free.pop().unwrap_or_default();
        state.outstanding += 1;
        state.peak = state.peak.max(state.outstanding);
        Some(value)
    }

    fn wrap(&self, value: T) -> Buffer<T> {
        let home: Arc<dyn Reclaim<T>> = self.shared.clone();
        Buffer::pooled(value, home)
    }
}
