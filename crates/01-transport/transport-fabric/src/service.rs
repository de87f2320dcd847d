//! Owning service handle and submission outcomes.

use std::sync::Arc;

use crate::executor::Executor;

/// Explicit owner of a group of flows.
///
/// Flows and hubs are constructed from a `&Service` rather than reaching for
/// an ambient executor; cloning the handle shares the same executor.
#[derive(Clone)]
pub struct Service {
    name: Arc<str>,
    executor: Executor,
}

impl Service {
    pub fn new(name: impl Into<Arc<str>>, executor: Executor) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executor every flow of this service runs on.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("executor", &self.executor.name())
            .finish()
    }
}

/// Outcome returned when handing a buffer to a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Buffer entered the port's queue.
    Accepted,
    /// Port's queue policy rejected the buffer; the reference was released.
    Dropped,
    /// Port has terminated or gone away; the reference was released.
    Closed,
}

impl SubmitOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}
