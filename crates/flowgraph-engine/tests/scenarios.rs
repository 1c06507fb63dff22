use std::sync::Arc;

use flowgraph_core::error::{CompileError, FlowError};
use flowgraph_core::state::{AccumulateOp, PartialState, Schema, State};
use flowgraph_core::types::{Label, END};
use flowgraph_engine::graph::{GraphBuilder, Node, Router, RunOptions};
use flowgraph_engine::pipeline::{self, initial_state};
use flowgraph_test_utils::{constant_node, scenario_graph, tick_node, FailingSearch, SKY_IS_BLUE};

fn agent_schema() -> Schema {
    Schema::new()
        .overwrite("query")
        .accumulate("iterations", AccumulateOp::Sum)
        .overwrite("decision")
}

#[test]
fn test_search_path() {
    let (graph, search) = scenario_graph();
    let out = graph.run(initial_state("fetch data please")).unwrap();

    assert_eq!(out.trace.node_names(), vec!["planner", "search_data", "respond"]);
    assert_eq!(
        out.trace.entries()[0].partial.get("decision"),
        Some(&serde_json::json!("search_data"))
    );
    assert_eq!(out.state.get_i64("iterations"), Some(3));
    assert_eq!(out.state.get_str("search_result"), Some(SKY_IS_BLUE));
    assert_eq!(out.state.get_str("final_answer"), Some(pipeline::FINAL_ANSWER));
    assert_eq!(out.steps, 3);
    assert_eq!(search.queries(), vec!["fetch data please"]);
}

#[test]
fn test_direct_response_path() {
    let (graph, search) = scenario_graph();
    let out = graph.run(initial_state("hello")).unwrap();

    assert_eq!(out.trace.node_names(), vec!["planner", "respond"]);
    assert_eq!(
        out.trace.entries()[0].partial.get("decision"),
        Some(&serde_json::json!("respond"))
    );
    assert_eq!(out.state.get_i64("iterations"), Some(2));
    assert_eq!(
        out.state.get_str("final_answer"),
        Some("Final response generated.")
    );
    assert!(search.queries().is_empty());
}

#[test]
fn test_keyword_match_is_case_insensitive() {
    let (graph, _) = scenario_graph();
    let out = graph.run(initial_state("Show me the DATA")).unwrap();
    assert_eq!(out.trace.node_names(), vec!["planner", "search_data", "respond"]);
}

#[test]
fn test_unmapped_route_label() {
    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(constant_node(
        "planner",
        PartialState::new().set("decision", "dance").set("iterations", 1),
    ))
    .add_node(tick_node("respond"))
    .add_conditional_edges(
        "planner",
        Router::dynamic(|s: &State| Label::new(s.get_str("decision").unwrap_or_default())),
        [("respond", "respond")],
    )
    .set_finish_point("respond")
    .set_entry_point("planner");
    let graph = g.compile().unwrap();

    let failure = graph.run(State::new().with("iterations", 0)).unwrap_err();
    match &failure.error {
        FlowError::UnmappedRouteLabel { node, label } => {
            assert_eq!(node, "planner");
            assert_eq!(label, "dance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failure.trace.node_names(), vec!["planner"]);
    assert_eq!(failure.last_node.as_deref(), Some("planner"));
}

#[test]
fn test_expr_router_fallback_is_an_explicit_label() {
    let mut g = GraphBuilder::new(pipeline::schema());
    g.add_node(constant_node(
        "planner",
        PartialState::new().set("decision", "improvise"),
    ))
    .add_node(tick_node("respond"))
    .add_conditional_edges(
        "planner",
        Router::expr([(r#"decision == "respond""#, "final_response")], "unknown").unwrap(),
        [("final_response", "respond"), ("unknown", END)],
    )
    .set_finish_point("respond")
    .set_entry_point("planner");
    let graph = g.compile().unwrap();
    let out = graph.run(initial_state("hi")).unwrap();
    assert_eq!(out.trace.node_names(), vec!["planner"]);
}

#[test]
fn test_schema_violation_stops_before_routing() {
    let routed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = routed.clone();

    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(constant_node(
        "planner",
        PartialState::new().set("iterations", 1).set("mood", "sunny"),
    ))
    .add_node(tick_node("respond"))
    .add_conditional_edges(
        "planner",
        Router::dynamic(move |_s: &State| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Label::new("go")
        }),
        [("go", "respond")],
    )
    .set_finish_point("respond")
    .set_entry_point("planner");
    let graph = g.compile().unwrap();

    let failure = graph.run(State::new().with("iterations", 0)).unwrap_err();
    assert!(matches!(
        failure.error,
        FlowError::SchemaViolation { ref field } if field == "mood"
    ));
    assert!(!routed.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(failure.trace.node_names(), vec!["planner"]);
}

#[test]
fn test_missing_out_edge() {
    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(tick_node("planner"))
        .add_node(tick_node("respond"))
        .add_edge("planner", "respond")
        .set_entry_point("planner");
    assert_eq!(
        g.compile().unwrap_err(),
        CompileError::MissingOutEdge("respond".into())
    );
}

#[test]
fn test_absent_entry_node() {
    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(tick_node("respond"))
        .set_finish_point("respond")
        .set_entry_point("planner");
    assert_eq!(
        g.compile().unwrap_err(),
        CompileError::UnknownNode("planner".into())
    );
}

#[test]
fn test_runs_terminate_within_step_limit() {
    for limit in [1usize, 2, 7, 50] {
        let mut g = GraphBuilder::new(agent_schema());
        g.add_node(tick_node("spin"))
            .add_conditional_edges(
                "spin",
                Router::closed(["again"], |_s: &State| Label::new("again")),
                [("again", "spin")],
            )
            .set_entry_point("spin");
        let graph = g.compile().unwrap();

        let failure = graph
            .run_with(State::new(), &RunOptions::new().with_step_limit(limit))
            .unwrap_err();
        assert!(matches!(failure.error, FlowError::StepLimitExceeded(l) if l == limit));
        assert_eq!(failure.trace.len(), limit);
    }
}

#[test]
fn test_trace_replays_to_final_state() {
    let (graph, _) = scenario_graph();
    let initial = initial_state("fetch data please");
    let out = graph.run(initial.clone()).unwrap();

    let states = out.trace.replay(graph.schema(), &initial).unwrap();
    assert_eq!(states.len(), 3);
    assert_eq!(states[0].get_i64("iterations"), Some(1));
    assert_eq!(states[1].get_i64("iterations"), Some(2));
    assert_eq!(states.last(), Some(&out.state));
}

#[test]
fn test_failing_node_keeps_partial_trace() {
    let graph = pipeline::planner_graph(Arc::new(FailingSearch("index offline".into()))).unwrap();
    let failure = graph.run(initial_state("fetch data please")).unwrap_err();

    assert!(matches!(failure.error, FlowError::Node { ref node, .. } if node == "search_data"));
    assert_eq!(failure.trace.node_names(), vec!["planner"]);
    assert!(failure.to_string().contains("index offline"));
}

#[test]
fn test_custom_node_with_typed_router() {
    use flowgraph_engine::graph::RouteLabel;

    #[derive(Clone, Copy)]
    enum Next {
        More,
        Done,
    }

    impl RouteLabel for Next {
        fn all() -> &'static [Self] {
            &[Next::More, Next::Done]
        }

        fn as_label(&self) -> &'static str {
            match self {
                Next::More => "more",
                Next::Done => "done",
            }
        }
    }

    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(Node::new("count", |_s: &State| {
        Ok(PartialState::new().set("iterations", 1))
    }))
    .add_conditional_edges(
        "count",
        Router::typed(|s: &State| {
            if s.get_i64("iterations").unwrap_or(0) < 4 {
                Next::More
            } else {
                Next::Done
            }
        }),
        [("more", "count"), ("done", END)],
    )
    .set_entry_point("count");
    let graph = g.compile().unwrap();

    let out = graph.run(State::new()).unwrap();
    assert_eq!(out.state.get_i64("iterations"), Some(4));
    assert_eq!(out.steps, 4);
}

#[test]
fn test_typed_router_missing_label_fails_compile() {
    use flowgraph_engine::graph::RouteLabel;

    #[derive(Clone, Copy)]
    enum Next {
        More,
        Done,
    }

    impl RouteLabel for Next {
        fn all() -> &'static [Self] {
            &[Next::More, Next::Done]
        }

        fn as_label(&self) -> &'static str {
            match self {
                Next::More => "more",
                Next::Done => "done",
            }
        }
    }

    let mut g = GraphBuilder::new(agent_schema());
    g.add_node(tick_node("count"))
        .add_conditional_edges(
            "count",
            Router::typed(|_s: &State| Next::Done),
            [("done", END)],
        )
        .set_entry_point("count");
    assert_eq!(
        g.compile().unwrap_err(),
        CompileError::UnmappedLabel {
            node: "count".into(),
            label: "more".into(),
        }
    );
}
