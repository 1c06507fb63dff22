use std::sync::Arc;

use flowgraph_core::config::FlowConfig;
use flowgraph_engine::pipeline;
use flowgraph_engine::StaticSearch;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

/// Print a health report; returns the number of failed checks.
pub fn run_doctor(config: &FlowConfig) -> usize {
    let checks = vec![
        check_engine(config),
        check_log_dir(config),
        check_pipeline(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count
}

fn check_engine(config: &FlowConfig) -> CheckResult {
    let engine = &config.engine;
    let deadline = engine
        .deadline_secs
        .map_or("no deadline".to_string(), |s| format!("deadline {}s", s));
    CheckResult {
        label: "Engine".into(),
        ok: engine.step_limit > 0,
        detail: format!("step limit {}, {}", engine.step_limit, deadline),
    }
}

fn check_log_dir(config: &FlowConfig) -> CheckResult {
    let Some(log) = config.log.as_ref().filter(|l| l.enabled) else {
        return CheckResult {
            label: "Run log".into(),
            ok: true,
            detail: "Disabled".into(),
        };
    };

    let dir = log.log_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return CheckResult {
            label: "Run log".into(),
            ok: false,
            detail: format!("Cannot create {}: {}", dir.display(), e),
        };
    }

    // Check writable by attempting to create a temp file
    let test_file = dir.join(".doctor_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            std::fs::remove_file(&test_file).ok();
            CheckResult {
                label: "Run log".into(),
                ok: true,
                detail: format!("{} (level {})", dir.display(), log.level),
            }
        }
        Err(e) => CheckResult {
            label: "Run log".into(),
            ok: false,
            detail: format!("{} not writable: {}", dir.display(), e),
        },
    }
}

fn check_pipeline(config: &FlowConfig) -> CheckResult {
    let search = Arc::new(StaticSearch::new(config.pipeline.search_result.clone()));
    match pipeline::build(search, &config.pipeline) {
        Ok(graph) if graph.unreachable_nodes().is_empty() => CheckResult {
            label: "Pipeline".into(),
            ok: true,
            detail: format!("{} nodes, entry '{}'", graph.node_names().count(), graph.entry()),
        },
        Ok(graph) => CheckResult {
            label: "Pipeline".into(),
            ok: false,
            detail: format!("Unreachable nodes: {}", graph.unreachable_nodes().join(", ")),
        },
        Err(e) => CheckResult {
            label: "Pipeline".into(),
            ok: false,
            detail: format!("Compile failed: {}", e),
        },
    }
}
