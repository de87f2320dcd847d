use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Message priority within a flow's input queue (P0 ≻ P1 ≻ P2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Served before anything else.
    P0,
    /// Default priority.
    #[default]
    P1,
    /// Served only when nothing else is queued.
    P2,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];

    fn index(self) -> usize {
        match self {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
        }
    }
}

/// How a queue orders its items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDiscipline {
    /// Strict arrival order; priorities are ignored.
    #[default]
    Fifo,
    /// Highest priority first, FIFO within a priority.
    Priority,
}

/// Input queue of a flow.
///
/// Under [`QueueDiscipline::Fifo`] every item lands in a single bucket, so
/// ordering is exactly insertion order. Under [`QueueDiscipline::Priority`]
/// items are kept in one bucket per [`Priority`].
#[derive(Debug)]
pub struct Queue<T> {
    discipline: QueueDiscipline,
    buckets: [VecDeque<T>; 3],
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new(QueueDiscipline::Fifo)
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue with the given ordering.
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self {
            discipline,
            buckets: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    fn bucket_for(&self, priority: Priority) -> usize {
        match self.discipline {
            QueueDiscipline::Fifo => Priority::default().index(),
            QueueDiscipline::Priority => priority.index(),
        }
    }

    /// Enqueues `item` at the back of the bucket matching `priority`.
    pub fn push(&mut self, priority: Priority, item: T) {
        let bucket = self.bucket_for(priority);
        self.buckets[bucket].push_back(item);
    }

    /// Pops the next item honoring the queue's discipline.
    pub fn pop(&mut self) -> Option<T> {
        self.buckets.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Total number of queued items.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    /// Removes every queued item in pop order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.buckets.iter_mut().flat_map(|bucket| bucket.drain(..))
    }
}
