use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use flowgraph_core::config::LogConfig;
use flowgraph_core::event::EventBus;
use flowgraph_core::types::{GraphEvent, RunId};

/// JSONL run logger.
///
/// Listens on the EventBus and writes structured log entries as JSONL
/// (one JSON object per line). This format is append-only and crash-resilient:
/// even if the process dies mid-run, all previously written lines are intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Create a new RunLogger.
    ///
    /// `log_dir` is the base directory; logs are written to
    /// `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level` controls verbosity: 1=summary, 2=per-node, 3=per-node with partial states.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.log_dir(), config.level)
    }

    /// Subscribe now and write in a background task.
    ///
    /// Subscribing before the run starts guarantees `RunStarted` is seen.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<Option<PathBuf>> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    /// Write JSONL until cancellation or the run's RunCompleted/RunFailed.
    ///
    /// Returns the log file path, or `None` if the file could not be opened.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<GraphEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return None;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");

        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != &run_id {
                                continue;
                            }
                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    // Flush after each entry for crash resilience
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }

                            if event.is_terminal() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        // Final flush
        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }

    /// Convert a GraphEvent to a log entry (returns None if filtered by level).
    fn event_to_entry(&self, event: &GraphEvent) -> Option<LogEntry> {
        let entry = |event_type: &str, node: Option<&str>, step: Option<usize>, detail| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().0.clone(),
            event_type: event_type.to_string(),
            node: node.map(str::to_string),
            step,
            detail,
        };

        match event {
            // L1: Always logged (run summary)
            GraphEvent::RunStarted { entry: start, .. } => Some(entry(
                "run_started",
                Some(start),
                None,
                None,
            )),
            GraphEvent::RunCompleted {
                steps, elapsed_ms, ..
            } => Some(entry(
                "run_completed",
                None,
                Some(*steps),
                Some(serde_json::json!({ "elapsed_ms": elapsed_ms })),
            )),
            GraphEvent::RunFailed {
                error, last_node, ..
            } => Some(entry(
                "run_failed",
                last_node.as_deref(),
                None,
                Some(serde_json::json!({ "error": error })),
            )),

            // L2: Per-node events
            GraphEvent::NodeFinished {
                node,
                step,
                elapsed_ms,
                partial,
                ..
            } if self.level >= 2 => {
                let mut detail = serde_json::json!({ "elapsed_ms": elapsed_ms });
                if self.level >= 3 {
                    detail["partial"] = truncate_json(
                        &serde_json::to_value(partial).unwrap_or_default(),
                        500,
                    );
                }
                Some(entry("node_finished", Some(node), Some(*step), Some(detail)))
            }
            GraphEvent::Routed {
                from, label, to, ..
            } if self.level >= 2 => Some(entry(
                "routed",
                Some(from),
                None,
                Some(serde_json::json!({ "label": label, "to": to.name() })),
            )),

            // L3: Node start markers
            GraphEvent::NodeStarted { node, step, .. } if self.level >= 3 => {
                Some(entry("node_started", Some(node), Some(*step), None))
            }

            _ => None,
        }
    }
}

/// Truncate a JSON value for logging. Short values are kept as JSON.
fn truncate_json(value: &serde_json::Value, max_len: usize) -> serde_json::Value {
    let s = value.to_string();
    if s.len() <= max_len {
        value.clone()
    } else {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        serde_json::Value::String(format!("{}...", &s[..cut]))
    }
}
