//! Run state, partial updates and the per-field merge policy.
//!
//! A `Schema` declares every field a graph may carry and how a node's
//! contribution to that field is folded into the running state. Merging is a
//! pure function of `(current, partial)` so merge outcomes can be asserted
//! without running any node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// The state threaded through a run.
///
/// Keys are field names declared in the graph's `Schema`; values are JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    data: BTreeMap<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a State from initial data.
    pub fn from_map(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get a value as an integer, if it's one.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_i64())
    }

    /// Builder-style setter, handy for initial states.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the underlying data map, in key order.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }
}

/// The subset of fields a node contributes on one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialState {
    updates: BTreeMap<String, Value>,
}

impl PartialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, consuming and returning self.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.insert(key.into(), value.into());
        self
    }

    /// Set a field in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.updates.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.updates.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.updates.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.updates.keys().map(String::as_str)
    }
}

/// How a partial value is combined into the running state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Last write wins.
    #[default]
    Overwrite,
    /// Combine with the prior value through an associative operator.
    Accumulate(AccumulateOp),
}

/// Associative operators available to `MergePolicy::Accumulate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulateOp {
    /// Numeric addition. Integers stay integers unless either side is a float.
    Sum,
    /// Array concatenation; a scalar is appended as a single element.
    Append,
    /// String concatenation.
    Concat,
    /// Shallow object merge, right-hand keys win.
    Merge,
    Max,
    Min,
}

impl AccumulateOp {
    pub fn name(&self) -> &'static str {
        match self {
            AccumulateOp::Sum => "sum",
            AccumulateOp::Append => "append",
            AccumulateOp::Concat => "concat",
            AccumulateOp::Merge => "merge",
            AccumulateOp::Max => "max",
            AccumulateOp::Min => "min",
        }
    }

    /// The value assumed when the field is absent (or null) in the state.
    /// `Max` and `Min` have no JSON identity; the incoming value is taken as is.
    pub fn identity(&self) -> Option<Value> {
        match self {
            AccumulateOp::Sum => Some(Value::from(0)),
            AccumulateOp::Append => Some(Value::Array(Vec::new())),
            AccumulateOp::Concat => Some(Value::String(String::new())),
            AccumulateOp::Merge => Some(Value::Object(serde_json::Map::new())),
            AccumulateOp::Max | AccumulateOp::Min => None,
        }
    }

    /// Apply the operator: `existing <op> incoming`.
    pub fn apply(&self, field: &str, existing: Option<&Value>, incoming: &Value) -> Result<Value> {
        let existing = match existing {
            Some(Value::Null) | None => self.identity(),
            Some(v) => Some(v.clone()),
        };

        let incompatible = |value: &Value| FlowError::IncompatibleValue {
            field: field.to_string(),
            op: self.name().to_string(),
            value: value.to_string(),
        };

        match self {
            AccumulateOp::Sum => {
                let lhs = existing.unwrap_or_else(|| Value::from(0));
                if !lhs.is_f64() && !incoming.is_f64() {
                    // Integer counters stay exact or fail.
                    return match (lhs.as_i64(), incoming.as_i64()) {
                        (Some(a), Some(b)) => a
                            .checked_add(b)
                            .map(Value::from)
                            .ok_or_else(|| incompatible(incoming)),
                        (None, _) => Err(incompatible(&lhs)),
                        (_, None) => Err(incompatible(incoming)),
                    };
                }
                match (lhs.as_f64(), incoming.as_f64()) {
                    (Some(a), Some(b)) => serde_json::Number::from_f64(a + b)
                        .map(Value::Number)
                        .ok_or_else(|| incompatible(incoming)),
                    (None, _) => Err(incompatible(&lhs)),
                    (_, None) => Err(incompatible(incoming)),
                }
            }
            AccumulateOp::Append => {
                let mut items = match existing {
                    Some(Value::Array(items)) => items,
                    Some(other) => return Err(incompatible(&other)),
                    None => Vec::new(),
                };
                match incoming {
                    Value::Array(more) => items.extend(more.iter().cloned()),
                    other => items.push(other.clone()),
                }
                Ok(Value::Array(items))
            }
            AccumulateOp::Concat => match (existing, incoming) {
                (Some(Value::String(mut s)), Value::String(more)) => {
                    s.push_str(more);
                    Ok(Value::String(s))
                }
                (Some(Value::String(_)), other) => Err(incompatible(other)),
                (Some(other), _) => Err(incompatible(&other)),
                (None, other) => Err(incompatible(other)),
            },
            AccumulateOp::Merge => match (existing, incoming) {
                (Some(Value::Object(mut map)), Value::Object(more)) => {
                    for (k, v) in more {
                        map.insert(k.clone(), v.clone());
                    }
                    Ok(Value::Object(map))
                }
                (Some(Value::Object(_)), other) => Err(incompatible(other)),
                (Some(other), _) => Err(incompatible(&other)),
                (None, other) => Err(incompatible(other)),
            },
            AccumulateOp::Max | AccumulateOp::Min => {
                let b = incoming.as_f64().ok_or_else(|| incompatible(incoming))?;
                let Some(current) = existing else {
                    return Ok(incoming.clone());
                };
                let a = current.as_f64().ok_or_else(|| incompatible(&current))?;
                let keep_current = match self {
                    AccumulateOp::Max => a >= b,
                    _ => a <= b,
                };
                Ok(if keep_current { current } else { incoming.clone() })
            }
        }
    }
}

/// Declared state shape: field name -> merge policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, MergePolicy>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with an explicit policy.
    pub fn field(mut self, name: impl Into<String>, policy: MergePolicy) -> Self {
        self.fields.insert(name.into(), policy);
        self
    }

    /// Declare a last-write-wins field.
    pub fn overwrite(self, name: impl Into<String>) -> Self {
        self.field(name, MergePolicy::Overwrite)
    }

    /// Declare an accumulating field.
    pub fn accumulate(self, name: impl Into<String>, op: AccumulateOp) -> Self {
        self.field(name, MergePolicy::Accumulate(op))
    }

    pub fn policy(&self, name: &str) -> Option<MergePolicy> {
        self.fields.get(name).copied()
    }

    pub fn declares(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Declared fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, MergePolicy)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Check that a state only carries declared fields.
    pub fn validate(&self, state: &State) -> Result<()> {
        let undeclared = state
            .data()
            .keys()
            .find(|k| !self.fields.contains_key(k.as_str()));
        match undeclared {
            Some(field) => Err(FlowError::SchemaViolation {
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Fold a partial state into `current`, returning the merged state.
    ///
    /// Fields absent from `partial` are left untouched. Fails without
    /// producing a state if `partial` names an undeclared field or an
    /// accumulate operand has the wrong type.
    pub fn merge(&self, current: &State, partial: &PartialState) -> Result<State> {
        if let Some(field) = partial.keys().find(|k| !self.declares(k)) {
            return Err(FlowError::SchemaViolation {
                field: field.to_string(),
            });
        }

        let mut next = current.clone();
        for (field, value) in partial.iter() {
            let merged = match self.fields[field] {
                MergePolicy::Overwrite => value.clone(),
                MergePolicy::Accumulate(op) => op.apply(field, current.get(field), value)?,
            };
            next.data.insert(field.clone(), merged);
        }
        Ok(next)
    }
}
