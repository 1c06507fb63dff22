use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level flowgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// JSONL run logging. Absent = disabled.
    #[serde(default)]
    pub log: Option<LogConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Executor limits applied to every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum node invocations per run before aborting.
    #[serde(default = "default_step_limit")]
    pub step_limit: usize,
    /// Optional wall-clock budget per run, in seconds.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Capacity of the event bus channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_limit: default_step_limit(),
            deadline_secs: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_step_limit() -> usize { 10_000 }
fn default_event_capacity() -> usize { 256 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.flowgraph/logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Logging level: 1 = run summary only, 2 = per-node, 3 = per-node with partial states (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "~/.flowgraph/logs".to_string() }
fn default_log_level() -> u8 { 2 }

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn log_dir(&self) -> PathBuf {
        expand_home(&self.log_dir)
    }
}

/// Settings for the bundled planner pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Canned answer returned by the static search tool.
    #[serde(default = "default_search_result")]
    pub search_result: String,
    /// Substring in the query that sends the planner to the search node.
    #[serde(default = "default_search_keyword")]
    pub search_keyword: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search_result: default_search_result(),
            search_keyword: default_search_keyword(),
        }
    }
}

fn default_search_result() -> String { "Information found: The sky is blue.".to_string() }
fn default_search_keyword() -> String { "data".to_string() }

impl FlowConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.engine.step_limit == 0 {
            return Err(FlowError::Config("engine.step_limit must be at least 1".into()));
        }
        if self.engine.event_capacity == 0 {
            return Err(FlowError::Config(
                "engine.event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
