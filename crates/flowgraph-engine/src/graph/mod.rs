//! Graph engine: named step functions over a progressively merged state.
//!
//! A workflow is a directed graph of `Node`s. Every node has exactly one
//! outgoing `Edge`: either a static successor or a `Router` whose label is
//! looked up in a label map. `GraphBuilder::compile` validates the wiring
//! once; the resulting `CompiledGraph` is immutable and can be run any
//! number of times, concurrently, each run owning its own state and trace.

pub mod compiled;
pub mod compiler;
pub mod edge;
pub mod executor;
pub mod node;
pub mod render;

pub use compiled::CompiledGraph;
pub use compiler::{compile, GraphBuilder, DEFAULT_STEP_LIMIT};
pub use edge::{Edge, EdgeKind, RouteLabel, Router};
pub use executor::{spawn_run, RunOptions, RunOutput};
pub use node::{Node, NodeRegistry, StepFn};
