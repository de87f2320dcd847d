//! Execution fabric: the cooperative executor, the flows that run on it, and
//! the loop members a host polls alongside it.

mod error;
mod executor;
mod flow;
mod port;
mod runtime;
mod service;

pub use error::{FabricError, FabricResult};
pub use executor::{Executor, ExecutorConfig, ExecutorStats, FlowPriority, Runnable};
pub use flow::{Action, Flow, FlowContext, FlowOptions, RunState, StateFlow};
pub use port::Sink;
pub use runtime::{LoopMember, LoopRuntime, MemberId};
pub use service::{Service, SubmitOutcome};
