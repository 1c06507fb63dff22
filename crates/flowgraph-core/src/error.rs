use thiserror::Error;

use crate::trace::Trace;

/// Boxed error raised by a step function.
pub type NodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Graph construction failures. Always raised before any run is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Node name is reserved: {0}")]
    ReservedNodeName(String),

    #[error("Node has no outgoing edge: {0}")]
    MissingOutEdge(String),

    #[error("Node has more than one outgoing edge definition: {0}")]
    DuplicateOutEdge(String),

    #[error("Dangling reference: {from} -> {to} (label {label})")]
    DanglingReference {
        from: String,
        label: String,
        to: String,
    },

    #[error("No entry point set")]
    MissingEntryPoint,

    #[error("Router on {node} can return label {label} which has no destination")]
    UnmappedLabel { node: String, label: String },

    #[error("Node {node} writes undeclared field: {field}")]
    UndeclaredField { node: String, field: String },

    #[error("Invalid route condition `{expr}`: {reason}")]
    InvalidCondition { expr: String, reason: String },

    #[error("Step limit must be at least 1")]
    ZeroStepLimit,
}

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph errors
    #[error("Graph compile error: {0}")]
    Compile(#[from] CompileError),

    // State errors
    #[error("Schema violation: field {field} is not declared")]
    SchemaViolation { field: String },

    #[error("Field {field}: cannot {op} {value}")]
    IncompatibleValue {
        field: String,
        op: String,
        value: String,
    },

    // Run errors
    #[error("Router on {node} returned unmapped label: {label}")]
    UnmappedRouteLabel { node: String, label: String },

    #[error("Run exceeded step limit ({0})")]
    StepLimitExceeded(usize),

    #[error("Step limit must be at least 1")]
    ZeroStepLimit,

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded deadline ({0}ms)")]
    DeadlineExceeded(u64),

    #[error("Node failed: {node}: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// A run that aborted, with everything collected up to the failure.
#[derive(Debug, Error)]
#[error("{error} (last node: {})", last_node.as_deref().unwrap_or("<none>"))]
pub struct RunFailure {
    #[source]
    pub error: FlowError,
    /// The node being executed or routed from when the run aborted.
    pub last_node: Option<String>,
    /// Every node visited so far, including the one that failed if it
    /// produced a partial state.
    pub trace: Trace,
}

impl RunFailure {
    pub fn new(error: FlowError, last_node: Option<String>, trace: Trace) -> Self {
        Self {
            error,
            last_node,
            trace,
        }
    }
}
