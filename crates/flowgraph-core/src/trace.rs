use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::{PartialState, Schema, State};

/// One node visit: which node ran and what it contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based step number within the run.
    pub step: usize,
    pub node: String,
    pub partial: PartialState,
    /// Wall time spent inside the step function.
    pub elapsed_ms: u64,
}

/// Ordered audit log of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Visited node names in execution order.
    pub fn node_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node.as_str()).collect()
    }

    /// Rebuild every intermediate state by replaying the merges.
    ///
    /// Element `i` is the state after entry `i` was merged, so the last
    /// element equals the run's final state.
    pub fn replay(&self, schema: &Schema, initial: &State) -> Result<Vec<State>> {
        let mut states = Vec::with_capacity(self.entries.len());
        let mut current = initial.clone();
        for entry in &self.entries {
            current = schema.merge(&current, &entry.partial)?;
            states.push(current.clone());
        }
        Ok(states)
    }
}

impl IntoIterator for Trace {
    type Item = TraceEntry;
    type IntoIter = std::vec::IntoIter<TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AccumulateOp;

    fn entry(step: usize, node: &str, partial: PartialState) -> TraceEntry {
        TraceEntry {
            step,
            node: node.into(),
            partial,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_replay_reconstructs_states() {
        let schema = Schema::new()
            .overwrite("query")
            .accumulate("iterations", AccumulateOp::Sum);
        let mut trace = Trace::new();
        trace.push(entry(1, "a", PartialState::new().set("iterations", 1)));
        trace.push(entry(
            2,
            "b",
            PartialState::new().set("iterations", 1).set("query", "rewritten"),
        ));

        let initial = State::new().with("query", "q").with("iterations", 0);
        let states = trace.replay(&schema, &initial).unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].get_i64("iterations"), Some(1));
        assert_eq!(states[0].get_str("query"), Some("q"));
        assert_eq!(states[1].get_i64("iterations"), Some(2));
        assert_eq!(states[1].get_str("query"), Some("rewritten"));
        assert_eq!(trace.node_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_serializes_as_list() {
        let mut trace = Trace::new();
        trace.push(entry(1, "a", PartialState::new().set("x", 1)));
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json[0]["node"], "a");
        assert_eq!(json[0]["partial"]["x"], 1);
    }
}
