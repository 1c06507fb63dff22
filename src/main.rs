mod doctor;

use std::io::{self, BufRead};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowgraph_core::config::FlowConfig;
use flowgraph_core::event::EventBus;
use flowgraph_core::state::State;
use flowgraph_core::trace::Trace;
use flowgraph_core::types::RunId;
use flowgraph_engine::graph::{spawn_run, CompiledGraph, RunOptions};
use flowgraph_engine::pipeline;
use flowgraph_engine::{RunLogger, StaticSearch};

#[derive(Parser)]
#[command(name = "flowgraph", version, about = "Directed-graph workflow executor")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the planner pipeline on a query and print the result
    Run {
        /// The query (read from stdin when empty)
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
        /// Override the configured step limit (at least 1)
        #[arg(long)]
        step_limit: Option<NonZeroUsize>,
    },
    /// Render the planner pipeline
    Draw {
        #[arg(long, value_enum, default_value_t = DrawFormat::Mermaid)]
        format: DrawFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Run configuration and pipeline checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DrawFormat {
    Mermaid,
    Dot,
}

/// What `run` prints on stdout.
#[derive(Serialize)]
struct RunReport<'a> {
    run_id: &'a RunId,
    status: &'static str,
    steps: usize,
    trace: &'a Trace,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a State>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flowgraph=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "flowgraph", &mut io::stdout());
        return Ok(());
    }

    let config = FlowConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { query, step_limit } => {
            let mut text = query.join(" ");
            if text.is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            let ok = run_query(&config, text, step_limit).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Draw { format, output } => {
            let graph = build_pipeline(&config)?;
            let text = match format {
                DrawFormat::Mermaid => graph.to_mermaid(),
                DrawFormat::Dot => graph.to_dot(),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "Graph written");
                }
                None => print!("{}", text),
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            if doctor::run_doctor(&config) > 0 {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn build_pipeline(config: &FlowConfig) -> anyhow::Result<CompiledGraph> {
    let search = Arc::new(StaticSearch::new(config.pipeline.search_result.clone()));
    pipeline::build(search, &config.pipeline).context("compiling planner pipeline")
}

/// Run one query; prints a JSON report and returns whether the run completed.
async fn run_query(
    config: &FlowConfig,
    query: String,
    step_limit: Option<NonZeroUsize>,
) -> anyhow::Result<bool> {
    let graph = Arc::new(build_pipeline(config)?);
    let event_bus = Arc::new(EventBus::new(config.engine.event_capacity));
    let run_id = RunId::new();
    let cancel = CancellationToken::new();

    let mut options = RunOptions::from_config(&config.engine)
        .with_cancel(cancel.clone())
        .with_events(event_bus.clone())
        .with_run_id(run_id.clone());
    if let Some(limit) = step_limit {
        options = options.with_step_limit(limit.get());
    }

    let logger = config
        .log
        .as_ref()
        .filter(|l| l.enabled)
        .map(|l| RunLogger::from_config(l).spawn(&event_bus, run_id.clone(), CancellationToken::new()));

    // Ctrl-C cancels at the next step boundary
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let result = spawn_run(graph, pipeline::initial_state(query), options)
        .await
        .context("run task panicked")?;
    ctrl_c.abort();

    if let Some(handle) = logger {
        if let Ok(Some(path)) = handle.await {
            info!(path = %path.display(), "Run log written");
        }
    }

    let (report, ok) = match &result {
        Ok(out) => (
            RunReport {
                run_id: &out.run_id,
                status: "completed",
                steps: out.steps,
                trace: &out.trace,
                state: Some(&out.state),
                error: None,
            },
            true,
        ),
        Err(failure) => (
            RunReport {
                run_id: &run_id,
                status: "failed",
                steps: failure.trace.len(),
                trace: &failure.trace,
                state: None,
                error: Some(failure.to_string()),
            },
            false,
        ),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ok)
}
