//! Outbound half shared by every bridge.
//!
//! The write flow is the bridge's port on its hub. For each buffer it takes
//! from its queue it parks the buffer in the shared [`WriteSlot`] and waits.
//! The bridge's poll drains the slot into hardware and, once the last
//! byte or frame is accepted, releases the buffer and notifies the flow,
//! which moves on to the next queued buffer.
//!
//! A link that accepts nothing for `stall_polls` consecutive polls is
//! stalled. It then sheds: every outbound buffer is released unwritten, so
//! a dead peer cannot pin cells of a pool shared with healthy links. Every
//! `stall_polls` idle polls the write path is reopened for one buffer; the
//! first write that makes progress ends shedding.

use std::sync::Arc;

use hub::Hub;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use transport::{Buffer, PortId, Recycle};
use transport_fabric::{Action, Flow, FlowContext, FlowOptions, Service, StateFlow};

use crate::stats::BridgeCounters;

/// Idle polls before a link that accepts nothing is treated as stalled.
pub const DEFAULT_STALL_POLLS: u32 = 1_000;

/// Settings shared by every bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub name: String,
    /// Polls without write progress before the link sheds outbound
    /// traffic; `None` waits for the hardware forever.
    pub stall_polls: Option<u32>,
}

impl BridgeOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            name: "bridge".to_owned(),
            stall_polls: Some(DEFAULT_STALL_POLLS),
        }
    }
}

pub(crate) struct WriteSlot<T> {
    pub(crate) pending: Option<Buffer<T>>,
    /// Bytes (or frames) of `pending` already written.
    pub(crate) offset: usize,
    pub(crate) enabled: bool,
    pub(crate) shedding: bool,
}

impl<T> WriteSlot<T> {
    fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            pending: None,
            offset: 0,
            enabled: true,
            shedding: false,
        }))
    }

    /// Hands back the in-flight buffer, resetting progress.
    fn take(&mut self) -> Option<Buffer<T>> {
        self.offset = 0;
        self.pending.take()
    }
}

#[derive(Debug)]
pub(crate) enum WriteState {
    Done,
}

pub(crate) struct WriteFlow<T> {
    slot: Arc<Mutex<WriteSlot<T>>>,
    name: String,
    counters: Arc<BridgeCounters>,
}

impl<T: Recycle> StateFlow for WriteFlow<T> {
    type Message = T;
    type State = WriteState;

    fn entry(&mut self, ctx: &mut FlowContext<'_, T>) -> Action<WriteState> {
        let mut slot = self.slot.lock();
        if !slot.enabled {
            drop(slot);
            tracing::trace!(bridge = %self.name, "bridge disabled, discarding outbound buffer");
            return Action::ReleaseAndExit;
        }
        if slot.shedding {
            drop(slot);
            self.counters.add_shed();
            return Action::ReleaseAndExit;
        }
        debug_assert!(slot.pending.is_none(), "one buffer in flight per bridge");
        slot.pending = ctx.take_message();
        slot.offset = 0;
        Action::WaitAndCall(WriteState::Done)
    }

    fn resume(&mut self, state: WriteState, _ctx: &mut FlowContext<'_, T>) -> Action<WriteState> {
        match state {
            WriteState::Done => {
                if self.slot.lock().pending.is_some() {
                    return Action::WaitAndCall(WriteState::Done);
                }
                Action::ReleaseAndExit
            }
        }
    }
}

/// What a write attempt did with the in-flight buffer.
pub(crate) enum Progress {
    /// Every byte or frame was accepted.
    Done,
    /// Some, not all, was accepted.
    Partial,
    /// Nothing was accepted.
    Blocked,
}

/// The write flow of a bridge together with its hub membership.
pub(crate) struct Outbound<T: Recycle> {
    name: String,
    hub: Hub<T>,
    flow: Flow<WriteFlow<T>>,
    slot: Arc<Mutex<WriteSlot<T>>>,
    counters: Arc<BridgeCounters>,
    enabled: bool,
    stall_polls: Option<u32>,
    idle_polls: u32,
    retrying: bool,
}

impl<T: Recycle> Outbound<T> {
    /// Creates the write flow and registers it on `hub`.
    pub(crate) fn new(
        service: &Service,
        hub: &Hub<T>,
        options: &BridgeOptions,
        counters: Arc<BridgeCounters>,
    ) -> Self {
        let slot = WriteSlot::new();
        let flow = Flow::new(
            service,
            WriteFlow {
                slot: Arc::clone(&slot),
                name: options.name.clone(),
                counters: Arc::clone(&counters),
            },
            FlowOptions::named(format!("{}:write", options.name)),
        );
        hub.register_port(&flow.sink());
        Self {
            name: options.name.clone(),
            hub: hub.clone(),
            flow,
            slot,
            counters,
            enabled: true,
            stall_polls: options.stall_polls,
            idle_polls: 0,
            retrying: false,
        }
    }

    pub(crate) fn id(&self) -> PortId {
        self.flow.id()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn hub(&self) -> &Hub<T> {
        &self.hub
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn is_shedding(&self) -> bool {
        self.slot.lock().shedding
    }

    #[cfg(test)]
    pub(crate) fn run_state(&self) -> transport_fabric::RunState {
        self.flow.run_state()
    }

    /// Joins or leaves the hub, calling `switch_port` to power the hardware
    /// to match. Leaving discards the pending buffer and makes the flow drop
    /// everything queued behind it. Returns whether anything changed.
    pub(crate) fn set_enabled(&mut self, enabled: bool, switch_port: impl FnOnce(bool)) -> bool {
        if enabled == self.enabled {
            return false;
        }
        self.enabled = enabled;
        if enabled {
            switch_port(true);
            {
                let mut slot = self.slot.lock();
                slot.enabled = true;
                slot.shedding = false;
            }
            self.idle_polls = 0;
            self.retrying = false;
            self.hub.register_port(&self.flow.sink());
            tracing::info!(bridge = %self.name, "bridge enabled");
        } else {
            switch_port(false);
            self.hub.unregister_port(self.flow.id());
            let discarded = {
                let mut slot = self.slot.lock();
                slot.enabled = false;
                slot.take()
            };
            self.release(discarded);
            tracing::info!(bridge = %self.name, "bridge disabled");
        }
        true
    }

    /// Offers the in-flight buffer to `write`, which advances the offset and
    /// reports how far it got. Returns the work done for the loop.
    pub(crate) fn poll(&mut self, write: impl FnOnce(&T, &mut usize) -> Progress) -> usize {
        let mut slot = self.slot.lock();
        let progress = match &mut *slot {
            WriteSlot {
                pending: Some(buffer),
                offset,
                ..
            } => Some(write(&**buffer, offset)),
            _ => None,
        };
        let Some(progress) = progress else {
            drop(slot);
            self.idle();
            return 0;
        };
        match progress {
            Progress::Done => {
                let done = slot.take();
                drop(slot);
                drop(done);
                self.counters.add_completion();
                self.progressed();
                self.flow.notify();
                1
            }
            Progress::Partial => {
                drop(slot);
                self.progressed();
                1
            }
            Progress::Blocked => {
                drop(slot);
                self.blocked();
                0
            }
        }
    }

    fn progressed(&mut self) {
        self.idle_polls = 0;
        if std::mem::take(&mut self.retrying) {
            tracing::info!(bridge = %self.name, "stalled link accepts writes again");
        }
    }

    fn blocked(&mut self) {
        let Some(limit) = self.stall_polls else {
            return;
        };
        self.idle_polls += 1;
        if !self.retrying && self.idle_polls < limit {
            return;
        }
        let discarded = {
            let mut slot = self.slot.lock();
            slot.shedding = true;
            slot.take()
        };
        if self.retrying {
            tracing::debug!(bridge = %self.name, "link still stalled");
        } else {
            tracing::warn!(
                bridge = %self.name,
                polls = limit,
                "link stalled, shedding outbound traffic"
            );
        }
        self.idle_polls = 0;
        self.retrying = false;
        if discarded.is_some() {
            self.counters.add_shed();
        }
        self.release(discarded);
    }

    /// Nothing in flight. While shedding, counts towards reopening the write
    /// path for one buffer.
    fn idle(&mut self) {
        let Some(limit) = self.stall_polls else {
            return;
        };
        let mut slot = self.slot.lock();
        if !slot.shedding {
            self.idle_polls = 0;
            return;
        }
        self.idle_polls += 1;
        if self.idle_polls >= limit {
            slot.shedding = false;
            drop(slot);
            self.idle_polls = 0;
            self.retrying = true;
            tracing::debug!(bridge = %self.name, "retrying stalled link");
        }
    }

    fn release(&self, buffer: Option<Buffer<T>>) {
        if buffer.is_some() {
            drop(buffer);
            self.flow.notify();
        }
    }
}

impl<T: Recycle> Drop for Outbound<T> {
    fn drop(&mut self) {
        self.set_enabled(false, |_| {});
    }
}
