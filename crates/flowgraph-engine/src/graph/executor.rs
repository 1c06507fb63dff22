use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use flowgraph_core::config::EngineConfig;
use flowgraph_core::error::{CompileError, FlowError, RunFailure};
use flowgraph_core::event::EventBus;
use flowgraph_core::state::State;
use flowgraph_core::trace::{Trace, TraceEntry};
use flowgraph_core::types::{GraphEvent, Label, RunId, Target};

use super::compiled::CompiledGraph;
use super::edge::EdgeKind;

/// Per-run knobs. All optional; the default runs with the graph's step limit
/// and no cancellation, deadline or events.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Override the graph's step limit for this run. Zero fails the run
    /// before the first step.
    pub step_limit: Option<usize>,
    /// Checked once per step; a cancelled token aborts the run.
    pub cancel: Option<CancellationToken>,
    /// Wall-clock budget for the whole run, checked once per step.
    pub timeout: Option<Duration>,
    /// Receives `GraphEvent`s as the run progresses.
    pub events: Option<Arc<EventBus>>,
    /// Use a caller-chosen id instead of a fresh one.
    pub run_id: Option<RunId>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying the engine section of the config file.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            step_limit: Some(config.step_limit),
            timeout: config.deadline_secs.map(Duration::from_secs),
            ..Self::default()
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: RunId,
    /// The state after the last merge.
    pub state: State,
    /// Per-node contributions in execution order.
    pub trace: Trace,
    /// Number of nodes executed.
    pub steps: usize,
    /// Total execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Everything owned by one run. Never shared.
struct RunContext<'a> {
    run_id: RunId,
    current: Target,
    state: State,
    steps: usize,
    trace: Trace,
    started: Instant,
    options: &'a RunOptions,
}

impl<'a> RunContext<'a> {
    fn emit(&self, event: GraphEvent) {
        if let Some(bus) = &self.options.events {
            bus.publish(event);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Abort: log, publish and package the partial trace.
    fn fail(self, err: FlowError, last_node: Option<String>) -> RunFailure {
        error!(
            run_id = %self.run_id,
            node = last_node.as_deref().unwrap_or("<none>"),
            steps = self.steps,
            error = %err,
            "Graph run failed"
        );
        self.emit(GraphEvent::RunFailed {
            run_id: self.run_id.clone(),
            error: err.to_string(),
            last_node: last_node.clone(),
        });
        RunFailure::new(err, last_node, self.trace)
    }
}

impl CompiledGraph {
    /// Run the graph to completion with default options.
    pub fn run(&self, initial: State) -> Result<RunOutput, RunFailure> {
        self.run_with(initial, &RunOptions::default())
    }

    /// Run the graph from the entry node until `END`.
    ///
    /// Exactly one step function runs per iteration and merges are applied
    /// in execution order. Any failure aborts the run and returns the trace
    /// collected so far.
    pub fn run_with(&self, initial: State, options: &RunOptions) -> Result<RunOutput, RunFailure> {
        let step_limit = options.step_limit.unwrap_or(self.step_limit);
        let mut ctx = RunContext {
            run_id: options.run_id.clone().unwrap_or_default(),
            current: Target::Node(self.entry.clone()),
            state: initial,
            steps: 0,
            trace: Trace::new(),
            started: Instant::now(),
            options,
        };

        info!(run_id = %ctx.run_id, entry = %self.entry, step_limit, "Graph run started");
        ctx.emit(GraphEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            entry: self.entry.clone(),
        });

        if step_limit == 0 {
            return Err(ctx.fail(FlowError::ZeroStepLimit, None));
        }
        if let Err(e) = self.schema.validate(&ctx.state) {
            return Err(ctx.fail(e, None));
        }

        while let Target::Node(current) = ctx.current.clone() {
            ctx.steps += 1;
            if ctx.steps > step_limit {
                return Err(ctx.fail(FlowError::StepLimitExceeded(step_limit), Some(current)));
            }
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(ctx.fail(FlowError::Cancelled, Some(current)));
            }
            if let Some(timeout) = options.timeout {
                if ctx.started.elapsed() >= timeout {
                    let budget_ms = timeout.as_millis() as u64;
                    return Err(ctx.fail(FlowError::DeadlineExceeded(budget_ms), Some(current)));
                }
            }

            let node = match self.registry.resolve(&current) {
                Ok(n) => n,
                Err(e) => return Err(ctx.fail(e.into(), Some(current))),
            };

            debug!(run_id = %ctx.run_id, node = %current, step = ctx.steps, "Executing graph node");
            ctx.emit(GraphEvent::NodeStarted {
                run_id: ctx.run_id.clone(),
                node: current.clone(),
                step: ctx.steps,
            });

            let node_start = Instant::now();
            let partial = match node.invoke(&ctx.state) {
                Ok(p) => p,
                Err(source) => {
                    let err = FlowError::Node {
                        node: current.clone(),
                        source,
                    };
                    return Err(ctx.fail(err, Some(current)));
                }
            };
            let entry = TraceEntry {
                step: ctx.steps,
                node: current.clone(),
                partial,
                elapsed_ms: node_start.elapsed().as_millis() as u64,
            };

            match self.schema.merge(&ctx.state, &entry.partial) {
                Ok(merged) => ctx.state = merged,
                Err(e) => {
                    ctx.trace.push(entry);
                    return Err(ctx.fail(e, Some(current)));
                }
            }

            ctx.emit(GraphEvent::NodeFinished {
                run_id: ctx.run_id.clone(),
                node: current.clone(),
                step: ctx.steps,
                elapsed_ms: entry.elapsed_ms,
                partial: entry.partial.clone(),
            });

            let (label, next) = match self.next_target(&current, &ctx.state) {
                Ok(resolved) => resolved,
                Err(e) => {
                    ctx.trace.push(entry);
                    return Err(ctx.fail(e, Some(current)));
                }
            };

            debug!(
                run_id = %ctx.run_id,
                from = %current,
                label = label.as_ref().map(Label::as_str).unwrap_or("-"),
                to = %next,
                "Routed"
            );
            ctx.emit(GraphEvent::Routed {
                run_id: ctx.run_id.clone(),
                from: current,
                label,
                to: next.clone(),
            });

            ctx.trace.push(entry);
            ctx.current = next;
        }

        let elapsed_ms = ctx.elapsed_ms();
        info!(run_id = %ctx.run_id, steps = ctx.steps, elapsed_ms, "Graph run complete");
        ctx.emit(GraphEvent::RunCompleted {
            run_id: ctx.run_id.clone(),
            steps: ctx.steps,
            elapsed_ms,
        });

        Ok(RunOutput {
            run_id: ctx.run_id,
            state: ctx.state,
            trace: ctx.trace,
            steps: ctx.steps,
            elapsed_ms,
        })
    }

    /// Resolve the successor of `current` against the merged state.
    fn next_target(
        &self,
        current: &str,
        state: &State,
    ) -> Result<(Option<Label>, Target), FlowError> {
        let edge = self
            .edges
            .get(current)
            .ok_or_else(|| CompileError::MissingOutEdge(current.to_string()))?;

        match &edge.kind {
            EdgeKind::Static(target) => Ok((None, target.clone())),
            EdgeKind::Conditional { router, label_map } => {
                let label = router.route(state);
                match label_map.get(&label) {
                    Some(target) => Ok((Some(label), target.clone())),
                    None => Err(FlowError::UnmappedRouteLabel {
                        node: current.to_string(),
                        label: label.0,
                    }),
                }
            }
        }
    }
}

/// Run a graph on tokio's blocking pool.
///
/// Step functions are synchronous and may block; this keeps them off the
/// async worker threads. Each call gets its own run context.
pub fn spawn_run(
    graph: Arc<CompiledGraph>,
    initial: State,
    options: RunOptions,
) -> JoinHandle<Result<RunOutput, RunFailure>> {
    tokio::task::spawn_blocking(move || graph.run_with(initial, &options))
}
