use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use flowgraph_core::error::CompileError;
use flowgraph_core::state::State;
use flowgraph_core::types::{Label, Target};

/// A closed set of route labels, usually a fieldless enum.
///
/// Routers built with `Router::typed` declare every label up front, so the
/// compiler can check each one against the label map.
pub trait RouteLabel: Copy + Send + Sync + 'static {
    /// Every value of the type.
    fn all() -> &'static [Self];
    /// The label string used in the label map.
    fn as_label(&self) -> &'static str;
}

type RouteFn = dyn Fn(&State) -> Label + Send + Sync;

/// Chooses a successor label from the current state.
#[derive(Clone)]
pub struct Router {
    route: Arc<RouteFn>,
    /// Every label the router can return, if known.
    labels: Option<Vec<Label>>,
}

impl Router {
    /// A router whose labels are only known at run time.
    pub fn dynamic<F>(route: F) -> Self
    where
        F: Fn(&State) -> Label + Send + Sync + 'static,
    {
        Self {
            route: Arc::new(route),
            labels: None,
        }
    }

    /// A router that declares the labels it returns.
    pub fn closed<F, I, L>(labels: I, route: F) -> Self
    where
        F: Fn(&State) -> Label + Send + Sync + 'static,
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        Self {
            route: Arc::new(route),
            labels: Some(labels.into_iter().map(Into::into).collect()),
        }
    }

    /// A router over a `RouteLabel` enum.
    pub fn typed<L, F>(route: F) -> Self
    where
        L: RouteLabel,
        F: Fn(&State) -> L + Send + Sync + 'static,
    {
        Self {
            route: Arc::new(move |state: &State| Label::new(route(state).as_label())),
            labels: Some(L::all().iter().map(|l| Label::new(l.as_label())).collect()),
        }
    }

    /// A rule router: the first matching expression wins, `fallback` otherwise.
    ///
    /// Supported expressions:
    /// - `key == "value"`: exact match
    /// - `key != "value"`: not equal
    /// - `key contains "substr"`: substring match
    /// - `key matches "regex"`: regex match
    pub fn expr<I, E, L>(rules: I, fallback: impl Into<Label>) -> Result<Self, CompileError>
    where
        I: IntoIterator<Item = (E, L)>,
        E: AsRef<str>,
        L: Into<Label>,
    {
        let mut parsed = Vec::new();
        for (expr, label) in rules {
            parsed.push((Condition::parse(expr.as_ref())?, label.into()));
        }
        let fallback = fallback.into();

        let mut labels: Vec<Label> = parsed.iter().map(|(_, l)| l.clone()).collect();
        labels.push(fallback.clone());
        labels.sort();
        labels.dedup();

        Ok(Self {
            route: Arc::new(move |state: &State| {
                parsed
                    .iter()
                    .find(|(cond, _)| cond.evaluate(state))
                    .map(|(_, label)| label.clone())
                    .unwrap_or_else(|| fallback.clone())
            }),
            labels: Some(labels),
        })
    }

    /// Invoke the router.
    pub fn route(&self, state: &State) -> Label {
        (self.route)(state)
    }

    /// Declared labels, if the router has a closed set.
    pub fn labels(&self) -> Option<&[Label]> {
        self.labels.as_deref()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// How a node picks its successor.
#[derive(Debug, Clone)]
pub enum EdgeKind {
    /// Always go to `Target`.
    Static(Target),
    /// Ask the router, then look the label up.
    Conditional {
        router: Router,
        label_map: BTreeMap<Label, Target>,
    },
}

/// The single outgoing edge definition of a node.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    pub kind: EdgeKind,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn to(from: impl Into<String>, to: impl Into<Target>) -> Self {
        Self {
            from: from.into(),
            kind: EdgeKind::Static(to.into()),
        }
    }

    /// Create a conditional edge.
    pub fn conditional<I, L, T>(from: impl Into<String>, router: Router, label_map: I) -> Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<Label>,
        T: Into<Target>,
    {
        Self {
            from: from.into(),
            kind: EdgeKind::Conditional {
                router,
                label_map: label_map
                    .into_iter()
                    .map(|(l, t)| (l.into(), t.into()))
                    .collect(),
            },
        }
    }

    /// Every destination this edge can lead to, with the label for conditional ones.
    pub fn destinations(&self) -> Vec<(Option<&Label>, &Target)> {
        match &self.kind {
            EdgeKind::Static(target) => vec![(None, target)],
            EdgeKind::Conditional { label_map, .. } => {
                label_map.iter().map(|(l, t)| (Some(l), t)).collect()
            }
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, EdgeKind::Conditional { .. })
    }
}

/// `key == "v"`, `key != "v"`, `key contains "v"` or `key matches "v"`.
/// Word operators need whitespace on both sides; the value must be quoted.
const CONDITION_GRAMMAR: &str =
    r#"^(?:([^\s=!"]+)\s*(==|!=)\s*|(\S+)\s+(contains|matches)\s+)"(.*)"$"#;

/// A parsed routing expression.
#[derive(Debug, Clone)]
enum Condition {
    Equals(String, String),
    NotEquals(String, String),
    Contains(String, String),
    Matches(String, Regex),
}

impl Condition {
    fn parse(expr: &str) -> Result<Self, CompileError> {
        let expr = expr.trim();
        let invalid = |reason: &str| CompileError::InvalidCondition {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let grammar = Regex::new(CONDITION_GRAMMAR).map_err(|e| invalid(&e.to_string()))?;
        let caps = grammar.captures(expr).ok_or_else(|| {
            invalid(r#"expected `key OP "value"` with OP one of ==, !=, contains, matches"#)
        })?;
        let (key, op) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
            (Some(key), Some(op), _, _) | (_, _, Some(key), Some(op)) => (key.as_str(), op.as_str()),
            _ => return Err(invalid("missing key or operator")),
        };
        let value = caps.get(5).map_or("", |m| m.as_str());

        Ok(match op {
            "==" => Condition::Equals(key.to_string(), value.to_string()),
            "!=" => Condition::NotEquals(key.to_string(), value.to_string()),
            "contains" => Condition::Contains(key.to_string(), value.to_string()),
            _ => {
                let re = Regex::new(value).map_err(|e| invalid(&e.to_string()))?;
                Condition::Matches(key.to_string(), re)
            }
        })
    }

    /// Missing keys never match.
    fn evaluate(&self, state: &State) -> bool {
        let text = |key: &str| {
            state.get(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };
        match self {
            Condition::Equals(key, value) => text(key).is_some_and(|s| s == *value),
            Condition::NotEquals(key, value) => text(key).is_some_and(|s| s != *value),
            Condition::Contains(key, substr) => text(key).is_some_and(|s| s.contains(substr.as_str())),
            Condition::Matches(key, re) => text(key).is_some_and(|s| re.is_match(&s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Route {
        Search,
        Answer,
    }

    impl RouteLabel for Route {
        fn all() -> &'static [Self] {
            &[Route::Search, Route::Answer]
        }

        fn as_label(&self) -> &'static str {
            match self {
                Route::Search => "search",
                Route::Answer => "answer",
            }
        }
    }

    #[test]
    fn test_edge_builders() {
        let e = Edge::to("a", "b");
        assert_eq!(e.from, "a");
        assert!(matches!(e.kind, EdgeKind::Static(Target::Node(ref n)) if n == "b"));
        assert!(!e.is_conditional());

        let e = Edge::to("a", flowgraph_core::types::END);
        assert!(matches!(e.kind, EdgeKind::Static(Target::End)));

        let router = Router::dynamic(|_s: &State| Label::new("x"));
        let e = Edge::conditional("a", router, [("x", "b"), ("y", "__end__")]);
        assert!(e.is_conditional());
        assert_eq!(e.destinations().len(), 2);
    }

    #[test]
    fn test_typed_router() {
        let router = Router::typed(|state: &State| {
            if state.get_str("decision") == Some("search") {
                Route::Search
            } else {
                Route::Answer
            }
        });
        assert_eq!(
            router.labels().unwrap(),
            &[Label::new("search"), Label::new("answer")]
        );
        let state = State::new().with("decision", "search");
        assert_eq!(router.route(&state), Label::new("search"));
        assert_eq!(router.route(&State::new()), Label::new("answer"));
    }

    #[test]
    fn test_closed_router_declares_labels() {
        let router = Router::closed(["a", "b"], |_s: &State| Label::new("a"));
        assert_eq!(router.labels().map(|l| l.len()), Some(2));
        assert!(Router::dynamic(|_s: &State| Label::new("a")).labels().is_none());
    }

    #[test]
    fn test_condition_equals() {
        let state = State::new().with("status", "success");
        assert!(Condition::parse(r#"status == "success""#).unwrap().evaluate(&state));
        assert!(!Condition::parse(r#"status == "failure""#).unwrap().evaluate(&state));
    }

    #[test]
    fn test_condition_not_equals() {
        let state = State::new().with("status", "success");
        assert!(Condition::parse(r#"status != "failure""#).unwrap().evaluate(&state));
        assert!(!Condition::parse(r#"status != "success""#).unwrap().evaluate(&state));
    }

    #[test]
    fn test_condition_contains() {
        let state = State::new().with("query", "fetch data please");
        assert!(Condition::parse(r#"query contains "data""#).unwrap().evaluate(&state));
        assert!(!Condition::parse(r#"query contains "hello""#).unwrap().evaluate(&state));
    }

    #[test]
    fn test_condition_matches() {
        let state = State::new().with("query", "SELECT * FROM t");
        let cond = Condition::parse(r#"query matches "(?i)^select\b""#).unwrap();
        assert!(cond.evaluate(&state));
    }

    #[test]
    fn test_condition_non_string_value() {
        let state = State::new().with("iterations", 3);
        assert!(Condition::parse(r#"iterations == "3""#).unwrap().evaluate(&state));
    }

    #[test]
    fn test_condition_missing_key() {
        let state = State::new();
        assert!(!Condition::parse(r#"missing == "value""#).unwrap().evaluate(&state));
        assert!(!Condition::parse(r#"missing != "value""#).unwrap().evaluate(&state));
    }

    #[test]
    fn test_condition_invalid_expr() {
        let err = Condition::parse("this is not valid").unwrap_err();
        assert!(matches!(err, CompileError::InvalidCondition { .. }));

        let err = Condition::parse(r#"q matches "(""#).unwrap_err();
        assert!(matches!(err, CompileError::InvalidCondition { .. }));
    }

    #[test]
    fn test_condition_keys_containing_operator_words() {
        let cond = Condition::parse(r#"has_matches == "1""#).unwrap();
        assert!(matches!(cond, Condition::Equals(ref k, ref v) if k == "has_matches" && v == "1"));
        assert!(cond.evaluate(&State::new().with("has_matches", "1")));

        let cond = Condition::parse(r#"mycontains == "x""#).unwrap();
        assert!(matches!(cond, Condition::Equals(ref k, _) if k == "mycontains"));

        let cond = Condition::parse(r#"matches contains "a""#).unwrap();
        assert!(matches!(cond, Condition::Contains(ref k, ref v) if k == "matches" && v == "a"));

        let cond = Condition::parse(r#"note != "x contains y""#).unwrap();
        assert!(matches!(cond, Condition::NotEquals(ref k, ref v) if k == "note" && v == "x contains y"));
    }

    #[test]
    fn test_condition_requires_quoted_value_and_spaced_words() {
        for expr in [
            "status == success",
            r#"querycontains "data""#,
            r#"query contains"data""#,
            r#"== "x""#,
        ] {
            assert!(
                matches!(Condition::parse(expr), Err(CompileError::InvalidCondition { .. })),
                "{expr} should be rejected"
            );
        }
        assert!(Condition::parse(r#"status=="ok""#).is_ok());
    }

    #[test]
    fn test_expr_router_with_operator_word_in_key() {
        let router = Router::expr([(r#"has_matches == "1""#, "yes")], "no").unwrap();
        assert_eq!(router.route(&State::new().with("has_matches", "1")).0, "yes");
        assert_eq!(router.route(&State::new().with("has_matches", "0")).0, "no");
    }

    #[test]
    fn test_expr_router() {
        let router = Router::expr(
            [
                (r#"query contains "data""#, "search_needed"),
                (r#"query == "bye""#, "done"),
            ],
            "final_response",
        )
        .unwrap();

        let labels: Vec<&str> = router.labels().unwrap().iter().map(Label::as_str).collect();
        assert_eq!(labels, vec!["done", "final_response", "search_needed"]);

        let route = |q: &str| router.route(&State::new().with("query", q)).0;
        assert_eq!(route("fetch data please"), "search_needed");
        assert_eq!(route("bye"), "done");
        assert_eq!(route("hello"), "final_response");
    }
}
