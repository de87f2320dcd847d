//! Error handling helpers for the transport crate.
//!
//! The transport layer keeps its error surface small: only configuration
//! validation can fail. Runtime conditions such as an exhausted pool are
//! reported through `Option` results and waiter registration instead.

use thiserror::Error;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

/// Errors surfaced by low-level transport helpers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Requested pool capacity is below the minimum.
    #[error("pool `{pool}` capacity {requested} must be at least {minimum}")]
    InvalidCapacity {
        /// Name of the pool being configured.
        pool: String,
        /// Capacity that was requested.
        requested: usize,
        /// Smallest accepted capacity.
        minimum: usize,
    },
}
