use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Point-in-time view of a bridge's traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub bytes_written: u64,
    pub frames_written: u64,
    /// Outbound buffers fully handed to hardware and released.
    pub completions: u64,
    /// Inbound buffers injected into the hub.
    pub inbound: u64,
    /// Polls that saw inbound data but found the pool empty.
    pub deferred_reads: u64,
    /// Outbound buffers released unwritten because the link stalled.
    pub shed: u64,
}

#[derive(Default)]
pub(crate) struct BridgeCounters {
    bytes_written: AtomicU64,
    frames_written: AtomicU64,
    completions: AtomicU64,
    inbound: AtomicU64,
    deferred_reads: AtomicU64,
    shed: AtomicU64,
}

impl BridgeCounters {
    pub(crate) fn add_bytes(&self, n: usize) {
        if n > 0 {
            self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_frame(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_deferred_read(&self) {
        self.deferred_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            inbound: self.inbound.load(Ordering::Relaxed),
            deferred_reads: self.deferred_reads.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
        }
    }
}

/// Read-only handle on a bridge's counters that outlives moving the bridge
/// into a loop runtime.
#[derive(Clone)]
pub struct BridgeMonitor {
    counters: Arc<BridgeCounters>,
}

impl BridgeMonitor {
    pub(crate) fn new(counters: Arc<BridgeCounters>) -> Self {
        Self { counters }
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for BridgeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BridgeMonitor").field(&self.stats()).finish()
    }
}
