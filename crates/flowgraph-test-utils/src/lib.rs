//! Fixtures shared by the flowgraph test suites.

use std::io::Write;
use std::sync::{Arc, Mutex};

use flowgraph_core::error::NodeError;
use flowgraph_core::state::{PartialState, State};
use flowgraph_engine::graph::{CompiledGraph, Node};
use flowgraph_engine::pipeline::{self, SearchTool};

/// Canned answer used by `scenario_graph`.
pub const SKY_IS_BLUE: &str = "Information found: The sky is blue.";

/// Search tool that records every query it receives.
#[derive(Debug, Default)]
pub struct RecordingSearch {
    answer: String,
    queries: Mutex<Vec<String>>,
}

impl RecordingSearch {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries seen so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl SearchTool for RecordingSearch {
    fn search(&self, query: &str) -> Result<String, NodeError> {
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        Ok(self.answer.clone())
    }
}

/// Search tool that always fails.
#[derive(Debug, Clone)]
pub struct FailingSearch(pub String);

impl SearchTool for FailingSearch {
    fn search(&self, _query: &str) -> Result<String, NodeError> {
        Err(self.0.clone().into())
    }
}

/// The planner pipeline backed by a recording search tool.
pub fn scenario_graph() -> (CompiledGraph, Arc<RecordingSearch>) {
    let search = Arc::new(RecordingSearch::new(SKY_IS_BLUE));
    let graph = pipeline::planner_graph(search.clone()).expect("planner pipeline compiles");
    (graph, search)
}

/// A node that returns the same partial state every time.
pub fn constant_node(name: &str, partial: PartialState) -> Node {
    Node::new(name, move |_state: &State| Ok(partial.clone()))
}

/// A node that adds 1 to `iterations`.
pub fn tick_node(name: &str) -> Node {
    constant_node(name, PartialState::new().set("iterations", 1))
}

/// Write `content` to a temporary `.toml` file.
pub fn temp_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}
