use std::collections::HashMap;

use flowgraph_core::state::Schema;

use super::edge::Edge;
use super::node::{Node, NodeRegistry};

/// A validated, immutable graph. Built once, run many times.
///
/// Holds no per-run state, so one instance can serve concurrent runs
/// from behind an `Arc`.
#[derive(Debug)]
pub struct CompiledGraph {
    pub(crate) schema: Schema,
    pub(crate) registry: NodeRegistry,
    pub(crate) edges: HashMap<String, Edge>,
    /// Edge sources in declaration order.
    pub(crate) edge_order: Vec<String>,
    pub(crate) entry: String,
    pub(crate) step_limit: usize,
    pub(crate) unreachable: Vec<String>,
}

impl CompiledGraph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }

    /// Node names in registration order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.registry.resolve(name).ok()
    }

    /// The outgoing edge of `name`.
    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges.get(name)
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edge_order.iter().filter_map(|from| self.edges.get(from))
    }

    /// Nodes that cannot be reached from the entry point.
    pub fn unreachable_nodes(&self) -> &[String] {
        &self.unreachable
    }
}
