use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use flowgraph_core::error::CompileError;
use flowgraph_core::state::Schema;
use flowgraph_core::types::{Label, Target};

use super::compiled::CompiledGraph;
use super::edge::{Edge, EdgeKind, Router};
use super::node::{Node, NodeRegistry};

/// Default bound on node invocations per run.
pub const DEFAULT_STEP_LIMIT: usize = 10_000;

/// Collects nodes and edges, then validates them into a `CompiledGraph`.
///
/// Errors from individual calls (duplicate names) are held back and
/// reported by `compile`, so construction reads as a flat list of calls.
pub struct GraphBuilder {
    schema: Schema,
    registry: NodeRegistry,
    edges: Vec<Edge>,
    entry: Option<String>,
    step_limit: usize,
    errors: Vec<CompileError>,
}

impl GraphBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            registry: NodeRegistry::new(),
            edges: Vec::new(),
            entry: None,
            step_limit: DEFAULT_STEP_LIMIT,
            errors: Vec::new(),
        }
    }

    /// Register a node.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        if let Err(e) = self.registry.register(node) {
            self.errors.push(e);
        }
        self
    }

    /// Add an unconditional edge. Use `END` as `to` for a terminal sink.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<Target>) -> &mut Self {
        self.edges.push(Edge::to(from, to));
        self
    }

    /// Add a routed edge: `router` picks a label, `label_map` picks the node.
    pub fn add_conditional_edges<I, L, T>(
        &mut self,
        from: impl Into<String>,
        router: Router,
        label_map: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<Label>,
        T: Into<Target>,
    {
        self.edges.push(Edge::conditional(from, router, label_map));
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    /// Mark a node as a terminal sink (an edge to `END`).
    pub fn set_finish_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.add_edge(name, Target::End)
    }

    /// Override the per-run step limit. Zero is rejected at compile.
    pub fn with_step_limit(&mut self, limit: usize) -> &mut Self {
        if limit == 0 {
            self.errors.push(CompileError::ZeroStepLimit);
        } else {
            self.step_limit = limit;
        }
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<CompiledGraph, CompileError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let entry = self.entry.ok_or(CompileError::MissingEntryPoint)?;
        let mut graph = compile(self.schema, self.registry, self.edges, entry)?;
        graph.step_limit = self.step_limit;
        Ok(graph)
    }
}

/// Validate a registry and edge list into an immutable graph.
pub fn compile(
    schema: Schema,
    registry: NodeRegistry,
    edges: Vec<Edge>,
    entry: impl Into<String>,
) -> Result<CompiledGraph, CompileError> {
    let entry = entry.into();
    registry.resolve(&entry)?;

    let mut table: HashMap<String, Edge> = HashMap::new();
    let mut edge_order = Vec::with_capacity(edges.len());

    for edge in edges {
        registry.resolve(&edge.from)?;
        if table.contains_key(&edge.from) {
            return Err(CompileError::DuplicateOutEdge(edge.from));
        }

        match &edge.kind {
            EdgeKind::Static(target) => {
                if let Target::Node(to) = target {
                    registry.resolve(to)?;
                }
            }
            EdgeKind::Conditional { router, label_map } => {
                for (label, target) in label_map {
                    if let Target::Node(to) = target {
                        if !registry.contains(to) {
                            return Err(CompileError::DanglingReference {
                                from: edge.from.clone(),
                                label: label.to_string(),
                                to: to.clone(),
                            });
                        }
                    }
                }
                if let Some(labels) = router.labels() {
                    if let Some(label) = labels.iter().find(|l| !label_map.contains_key(*l)) {
                        return Err(CompileError::UnmappedLabel {
                            node: edge.from.clone(),
                            label: label.to_string(),
                        });
                    }
                }
            }
        }

        edge_order.push(edge.from.clone());
        table.insert(edge.from.clone(), edge);
    }

    for node in registry.iter() {
        if let Some(field) = node.writes.iter().find(|f| !schema.declares(f)) {
            return Err(CompileError::UndeclaredField {
                node: node.name.clone(),
                field: field.clone(),
            });
        }
        if !table.contains_key(&node.name) {
            return Err(CompileError::MissingOutEdge(node.name.clone()));
        }
    }

    let unreachable = unreachable_nodes(&registry, &table, &entry);
    for name in &unreachable {
        warn!(node = %name, entry = %entry, "Node is unreachable from the entry point");
    }

    debug!(
        entry = %entry,
        nodes = registry.len(),
        edges = table.len(),
        "Graph compiled"
    );

    Ok(CompiledGraph {
        schema,
        registry,
        edges: table,
        edge_order,
        entry,
        step_limit: DEFAULT_STEP_LIMIT,
        unreachable,
    })
}

/// Breadth-first walk from the entry; returns nodes never reached, in registration order.
fn unreachable_nodes(
    registry: &NodeRegistry,
    edges: &HashMap<String, Edge>,
    entry: &str,
) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(entry);
    queue.push_back(entry);

    while let Some(current) = queue.pop_front() {
        let Some(edge) = edges.get(current) else {
            continue;
        };
        for (_, target) in edge.destinations() {
            if let Target::Node(next) = target {
                if seen.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }
    }

    registry
        .names()
        .filter(|name| !seen.contains(name))
        .map(str::to_string)
        .collect()
}
