use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use flowgraph_core::types::{Target, END, START};

use super::compiled::CompiledGraph;

impl CompiledGraph {
    /// Render as a Mermaid flowchart.
    ///
    /// Conditional edges are dotted and labelled with the router label.
    pub fn to_mermaid(&self) -> String {
        let ids = MermaidIds::new(self.node_names());
        let mut out = String::from("graph TD;\n");
        let _ = writeln!(out, "\t{START}([<p>{START}</p>]):::first");
        for name in self.node_names() {
            let _ = writeln!(out, "\t{}(\"{}\")", ids.node(name), mermaid_text(name));
        }
        let _ = writeln!(out, "\t{END}([<p>{END}</p>]):::last");

        let _ = writeln!(out, "\t{START} --> {};", ids.node(&self.entry));
        for edge in self.edges() {
            let from = ids.node(&edge.from);
            for (label, target) in edge.destinations() {
                let to = ids.target(target);
                match label {
                    Some(label) => {
                        let text = mermaid_text(label.as_str());
                        let _ = writeln!(out, "\t{from} -. &nbsp;{text}&nbsp; .-> {to};");
                    }
                    None => {
                        let _ = writeln!(out, "\t{from} --> {to};");
                    }
                }
            }
        }

        out.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
        out.push_str("\tclassDef first fill-opacity:0\n");
        out.push_str("\tclassDef last fill:#bfb6fc\n");
        out
    }

    /// Render as a Graphviz DOT digraph.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph G {\n\trankdir=TB;\n");
        let _ = writeln!(out, "\t{} [shape=oval];", dot_id(START));
        for name in self.node_names() {
            let _ = writeln!(out, "\t{} [shape=box];", dot_id(name));
        }
        let _ = writeln!(out, "\t{} [shape=oval];", dot_id(END));

        let _ = writeln!(out, "\t{} -> {};", dot_id(START), dot_id(&self.entry));
        for edge in self.edges() {
            for (label, target) in edge.destinations() {
                let from = dot_id(&edge.from);
                let to = dot_id(target.name());
                match label {
                    Some(label) => {
                        let _ = writeln!(
                            out,
                            "\t{from} -> {to} [style=dashed, label={}];",
                            dot_id(label.as_str())
                        );
                    }
                    None => {
                        let _ = writeln!(out, "\t{from} -> {to};");
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Mermaid node ids, unique per drawing. Names that sanitize to the same
/// id get a numeric suffix in registration order.
struct MermaidIds<'a> {
    ids: HashMap<&'a str, String>,
}

impl<'a> MermaidIds<'a> {
    fn new(names: impl Iterator<Item = &'a str>) -> Self {
        let mut taken: HashSet<String> = [START.to_string(), END.to_string()].into();
        let mut ids = HashMap::new();
        for name in names {
            let base = mermaid_id(name);
            let mut id = base.clone();
            let mut n = 2;
            while taken.contains(&id) {
                id = format!("{base}_{n}");
                n += 1;
            }
            taken.insert(id.clone());
            ids.insert(name, id);
        }
        Self { ids }
    }

    fn node(&self, name: &str) -> String {
        self.ids
            .get(name)
            .cloned()
            .unwrap_or_else(|| mermaid_id(name))
    }

    fn target(&self, target: &Target) -> String {
        match target {
            Target::Node(name) => self.node(name),
            Target::End => END.to_string(),
        }
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Escape text placed inside a quoted Mermaid label.
fn mermaid_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "#quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn dot_id(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use flowgraph_core::state::{PartialState, Schema, State};
    use flowgraph_core::types::{Label, END};

    use crate::graph::{GraphBuilder, Node, Router};

    fn graph() -> crate::graph::CompiledGraph {
        let noop = |name: &str| Node::new(name, |_s: &State| Ok(PartialState::new()));
        let mut g = GraphBuilder::new(Schema::new());
        g.add_node(noop("planner"))
            .add_node(noop("search data"))
            .add_conditional_edges(
                "planner",
                Router::closed(["go", "stop"], |_s: &State| Label::new("stop")),
                [("go", "search data"), ("stop", END)],
            )
            .set_finish_point("search data")
            .set_entry_point("planner");
        g.compile().unwrap()
    }

    #[test]
    fn test_mermaid() {
        let text = graph().to_mermaid();
        assert!(text.starts_with("graph TD;\n"));
        assert!(text.contains("\tplanner(\"planner\")"));
        assert!(text.contains("\tsearch_data(\"search data\")"));
        assert!(text.contains("\t__start__ --> planner;"));
        assert!(text.contains("\tplanner -. &nbsp;go&nbsp; .-> search_data;"));
        assert!(text.contains("\tplanner -. &nbsp;stop&nbsp; .-> __end__;"));
        assert!(text.contains("\tsearch_data --> __end__;"));
    }

    #[test]
    fn test_mermaid_colliding_ids_stay_distinct() {
        let noop = |name: &str| Node::new(name, |_s: &State| Ok(PartialState::new()));
        let mut g = GraphBuilder::new(Schema::new());
        g.add_node(noop("search data"))
            .add_node(noop("search_data"))
            .add_node(noop("say \"hi\" (loud)"))
            .add_edge("search data", "search_data")
            .add_edge("search_data", "say \"hi\" (loud)")
            .set_finish_point("say \"hi\" (loud)")
            .set_entry_point("search data");
        let text = g.compile().unwrap().to_mermaid();

        assert!(text.contains("\tsearch_data(\"search data\")"));
        assert!(text.contains("\tsearch_data_2(\"search_data\")"));
        assert!(text.contains("\tsearch_data --> search_data_2;"));
        assert!(text.contains("\tsay__hi___loud_(\"say #quot;hi#quot; (loud)\")"));
        assert!(text.contains("\tsearch_data_2 --> say__hi___loud_;"));
    }

    #[test]
    fn test_dot() {
        let text = graph().to_dot();
        assert!(text.starts_with("digraph G {"));
        assert!(text.contains("\t\"__start__\" -> \"planner\";"));
        assert!(text.contains("\t\"planner\" -> \"search data\" [style=dashed, label=\"go\"];"));
        assert!(text.contains("\t\"search data\" -> \"__end__\";"));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_render_is_deterministic() {
        let g = graph();
        assert_eq!(g.to_mermaid(), g.to_mermaid());
        assert_eq!(g.to_dot(), graph().to_dot());
    }
}
