pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod trace;
pub mod types;

pub use config::FlowConfig;
pub use error::{CompileError, FlowError, NodeError, Result, RunFailure};
pub use event::EventBus;
pub use state::{AccumulateOp, MergePolicy, PartialState, Schema, State};
pub use trace::{Trace, TraceEntry};
pub use types::*;
