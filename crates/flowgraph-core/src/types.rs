use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::PartialState;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the terminal sentinel when a graph is rendered or parsed from text.
pub const END: &str = "__end__";

/// Name of the virtual start node used when rendering.
pub const START: &str = "__start__";

/// A router's output, looked up in a conditional edge's label map.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub String);

impl Label {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successor of a node: another node or the end of the run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    /// Parse a destination name; `END` maps to `Target::End`.
    pub fn parse(name: &str) -> Self {
        if name == END {
            Target::End
        } else {
            Target::Node(name.to_string())
        }
    }

    pub fn node(&self) -> Option<&str> {
        match self {
            Target::Node(n) => Some(n),
            Target::End => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Node(n) => n,
            Target::End => END,
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::parse(&s)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Events emitted by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// Run started at the entry node.
    RunStarted { run_id: RunId, entry: String },
    /// A step function is about to be invoked.
    NodeStarted { run_id: RunId, node: String, step: usize },
    /// A step function returned and its partial state was merged.
    NodeFinished {
        run_id: RunId,
        node: String,
        step: usize,
        elapsed_ms: u64,
        partial: PartialState,
    },
    /// Successor resolved. `label` is set for conditional edges.
    Routed {
        run_id: RunId,
        from: String,
        label: Option<Label>,
        to: Target,
    },
    /// Run reached the terminal.
    RunCompleted {
        run_id: RunId,
        steps: usize,
        elapsed_ms: u64,
    },
    /// Run aborted.
    RunFailed {
        run_id: RunId,
        error: String,
        last_node: Option<String>,
    },
}

impl GraphEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            GraphEvent::RunStarted { run_id, .. }
            | GraphEvent::NodeStarted { run_id, .. }
            | GraphEvent::NodeFinished { run_id, .. }
            | GraphEvent::Routed { run_id, .. }
            | GraphEvent::RunCompleted { run_id, .. }
            | GraphEvent::RunFailed { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GraphEvent::RunCompleted { .. } | GraphEvent::RunFailed { .. }
        )
    }
}
