//! The planner pipeline: `planner -> router -> {search_data, respond} -> END`.
//!
//! The planner looks at the query and writes an advisory `decision`; the
//! router turns that decision into a label. Search is delegated to a
//! `SearchTool`, the seam where a real tool, model or database call plugs in.

use std::sync::Arc;

use tracing::debug;

use flowgraph_core::config::PipelineConfig;
use flowgraph_core::error::{CompileError, NodeError};
use flowgraph_core::state::{AccumulateOp, PartialState, Schema, State};
use flowgraph_core::types::{Label, END};

use crate::graph::{CompiledGraph, GraphBuilder, Node, Router};

pub const PLANNER: &str = "planner";
pub const SEARCH: &str = "search_data";
pub const RESPOND: &str = "respond";

pub const SEARCH_NEEDED: &str = "search_needed";
pub const FINAL_RESPONSE: &str = "final_response";

/// What the respond node writes, with or without a search result.
pub const FINAL_ANSWER: &str = "Final response generated.";

/// External lookup used by the search node.
pub trait SearchTool: Send + Sync + 'static {
    fn search(&self, query: &str) -> Result<String, NodeError>;
}

/// Returns the same answer for every query.
#[derive(Debug, Clone)]
pub struct StaticSearch {
    answer: String,
}

impl StaticSearch {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

impl SearchTool for StaticSearch {
    fn search(&self, _query: &str) -> Result<String, NodeError> {
        Ok(self.answer.clone())
    }
}

/// State shape of the pipeline.
pub fn schema() -> Schema {
    Schema::new()
        .overwrite("query")
        .accumulate("iterations", AccumulateOp::Sum)
        .overwrite("decision")
        .overwrite("search_result")
        .overwrite("final_answer")
}

/// Initial state for a query.
pub fn initial_state(query: impl Into<String>) -> State {
    State::new().with("query", query.into()).with("iterations", 0)
}

/// Build the pipeline with the default keyword.
pub fn planner_graph(search: Arc<dyn SearchTool>) -> Result<CompiledGraph, CompileError> {
    build(search, &PipelineConfig::default())
}

/// Build the pipeline from config.
pub fn build(
    search: Arc<dyn SearchTool>,
    config: &PipelineConfig,
) -> Result<CompiledGraph, CompileError> {
    let keyword = config.search_keyword.to_lowercase();

    let planner = Node::new(PLANNER, move |state: &State| {
        let query = state.get_str("query").unwrap_or_default();
        let decision = if query.to_lowercase().contains(&keyword) {
            SEARCH
        } else {
            RESPOND
        };
        debug!(query, decision, "Planner decided");
        Ok(PartialState::new()
            .set("query", query)
            .set("iterations", 1)
            .set("decision", decision))
    })
    .with_description("Decide whether the query needs a search")
    .with_writes(["query", "iterations", "decision"]);

    let search_node = Node::new(SEARCH, move |state: &State| {
        let query = state.get_str("query").unwrap_or_default();
        let result = search.search(query)?;
        Ok(PartialState::new()
            .set("query", query)
            .set("iterations", 1)
            .set("search_result", result))
    })
    .with_description("Gather information for the query")
    .with_writes(["query", "iterations", "search_result"]);

    let respond = Node::new(RESPOND, |state: &State| {
        Ok(PartialState::new()
            .set("query", state.get_str("query").unwrap_or_default())
            .set("iterations", 1)
            .set("final_answer", FINAL_ANSWER))
    })
    .with_description("Compose the final answer")
    .with_writes(["query", "iterations", "final_answer"]);

    let mut g = GraphBuilder::new(schema());
    g.add_node(planner)
        .add_node(search_node)
        .add_node(respond)
        .set_entry_point(PLANNER)
        .add_conditional_edges(
            PLANNER,
            Router::closed([SEARCH_NEEDED, FINAL_RESPONSE], route_decision),
            [(SEARCH_NEEDED, SEARCH), (FINAL_RESPONSE, RESPOND)],
        )
        .add_edge(SEARCH, RESPOND)
        .add_edge(RESPOND, END);
    g.compile()
}

/// Map the planner's decision to a label. Unknown decisions pass through
/// unchanged so the executor rejects them instead of guessing.
fn route_decision(state: &State) -> Label {
    match state.get_str("decision") {
        Some(SEARCH) => Label::new(SEARCH_NEEDED),
        Some(RESPOND) => Label::new(FINAL_RESPONSE),
        Some(other) => Label::new(other),
        None => Label::new("<no decision>"),
    }
}
