pub mod graph;
pub mod pipeline;
pub mod run_log;

pub use graph::{
    compile, spawn_run, CompiledGraph, Edge, EdgeKind, GraphBuilder, Node, NodeRegistry,
    RouteLabel, Router, RunOptions, RunOutput, StepFn,
};
pub use pipeline::{SearchTool, StaticSearch};
pub use run_log::RunLogger;
