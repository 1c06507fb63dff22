use std::collections::HashMap;
use std::sync::Arc;

use flowgraph_core::error::{CompileError, NodeError};
use flowgraph_core::state::{PartialState, State};
use flowgraph_core::types::{END, START};

/// A step function: reads a state snapshot, returns the fields it changed.
///
/// Implemented for every matching closure. Implement it directly for step
/// types that carry their own collaborators (clients, tools).
pub trait StepFn: Send + Sync + 'static {
    fn call(&self, state: &State) -> Result<PartialState, NodeError>;
}

impl<F> StepFn for F
where
    F: Fn(&State) -> Result<PartialState, NodeError> + Send + Sync + 'static,
{
    fn call(&self, state: &State) -> Result<PartialState, NodeError> {
        self(state)
    }
}

/// A named unit of work in the graph.
#[derive(Clone)]
pub struct Node {
    /// Unique identifier for this node.
    pub name: String,
    /// Human-readable description, used when rendering.
    pub description: Option<String>,
    /// Fields this node may write. Checked against the schema at compile
    /// time when non-empty.
    pub writes: Vec<String>,
    step: Arc<dyn StepFn>,
}

impl Node {
    /// Create a node from a closure.
    pub fn new<F>(name: impl Into<String>, step: F) -> Self
    where
        F: Fn(&State) -> Result<PartialState, NodeError> + Send + Sync + 'static,
    {
        Self::from_step(name, Arc::new(step))
    }

    /// Create a node from a shared step implementation.
    pub fn from_step(name: impl Into<String>, step: Arc<dyn StepFn>) -> Self {
        Self {
            name: name.into(),
            description: None,
            writes: vec![],
            step,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare the fields this node writes.
    pub fn with_writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Run the step function against a snapshot.
    pub fn invoke(&self, state: &State) -> Result<PartialState, NodeError> {
        self.step.call(state)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// Name -> node mapping, in registration order.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Names are write-once.
    pub fn register(&mut self, node: Node) -> Result<(), CompileError> {
        if node.name == END || node.name == START {
            return Err(CompileError::ReservedNodeName(node.name));
        }
        if self.nodes.contains_key(&node.name) {
            return Err(CompileError::DuplicateNode(node.name));
        }
        self.order.push(node.name.clone());
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Look up a node by name.
    pub fn resolve(&self, name: &str) -> Result<&Node, CompileError> {
        self.nodes
            .get(name)
            .ok_or_else(|| CompileError::UnknownNode(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Nodes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Node {
        Node::new(name, |_state: &State| Ok(PartialState::new()))
    }

    #[test]
    fn test_node_builder() {
        let node = noop("n1")
            .with_description("Research")
            .with_writes(["findings", "iterations"]);

        assert_eq!(node.name, "n1");
        assert_eq!(node.description.as_deref(), Some("Research"));
        assert_eq!(node.writes, vec!["findings", "iterations"]);
    }

    #[test]
    fn test_invoke_sees_snapshot() {
        let node = Node::new("echo", |state: &State| {
            let query = state.get_str("query").unwrap_or_default().to_uppercase();
            Ok(PartialState::new().set("query", query))
        });
        let partial = node.invoke(&State::new().with("query", "hi")).unwrap();
        assert_eq!(partial.get("query"), Some(&serde_json::json!("HI")));
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = NodeRegistry::new();
        registry.register(noop("a")).unwrap();
        let err = registry.register(noop("a")).unwrap_err();
        assert_eq!(err, CompileError::DuplicateNode("a".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_reserved_names() {
        let mut registry = NodeRegistry::new();
        for name in [END, START] {
            let err = registry.register(noop(name)).unwrap_err();
            assert_eq!(err, CompileError::ReservedNodeName(name.into()));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = NodeRegistry::new();
        let err = registry.resolve("ghost").unwrap_err();
        assert_eq!(err, CompileError::UnknownNode("ghost".into()));
    }

    #[test]
    fn test_registration_order() {
        let mut registry = NodeRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(noop(name)).unwrap();
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }

    struct Constant(i64);

    impl StepFn for Constant {
        fn call(&self, _state: &State) -> Result<PartialState, NodeError> {
            Ok(PartialState::new().set("iterations", self.0))
        }
    }

    #[test]
    fn test_struct_step() {
        let node = Node::from_step("const", Arc::new(Constant(4)));
        let partial = node.invoke(&State::new()).unwrap();
        assert_eq!(partial.get("iterations"), Some(&serde_json::json!(4)));
    }
}
