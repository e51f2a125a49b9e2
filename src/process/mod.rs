// ProcessGuard - process registry data model
//
// Canonical process types shared by the Supervisor, Crash Policy Engine,
// Alert Manager and Daemon Loop. The registry itself (name -> ManagedProcess)
// lives in `manager::Supervisor`, which owns both the record map and the
// subprocess handle map as the single writer for both.

pub mod manager;

pub use manager::{ProcessEvent, Supervisor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How many process metrics samples are kept before compaction.
pub const METRICS_HISTORY_CAP: usize = 1000;
/// Target length after compaction (oldest dropped).
pub const METRICS_HISTORY_COMPACT_TO: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Nodejs,
    Python,
    Java,
    Go,
    Rust,
    Generic,
}

impl Default for ProcessKind {
    fn default() -> Self {
        ProcessKind::Generic
    }
}

/// Per-process lifecycle state. See the Supervisor's state machine for
/// the transition table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Unknown,
}

impl Default for ProcessStatus {
    fn default() -> Self {
        ProcessStatus::Stopped
    }
}

fn default_true() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_delay_seconds() -> u64 {
    5
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

/// Accepts either a shell-style string (split on whitespace) or a JSON
/// array, always normalizing to argv.
fn deserialize_command<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Immutable (after registration) description of a managed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_command")]
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub process_kind: ProcessKind,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_delay_seconds")]
    pub restart_delay_seconds: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub redirect_output: bool,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default = "default_true")]
    pub alert_on_failure: bool,
    #[serde(default)]
    pub alert_on_high_cpu: bool,
    #[serde(default)]
    pub alert_on_high_memory: bool,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
}

#[cfg(test)]
impl ProcessConfig {
    pub fn for_testing(name: &str, command: Vec<&str>) -> Self {
        Self {
            name: name.to_string(),
            command: command.into_iter().map(str::to_string).collect(),
            working_dir: PathBuf::from("."),
            process_kind: ProcessKind::Generic,
            env_vars: HashMap::new(),
            auto_restart: true,
            max_restarts: 5,
            restart_delay_seconds: 0,
            log_file: None,
            redirect_output: false,
            cpu_limit: None,
            memory_limit: None,
            alert_on_failure: true,
            alert_on_high_cpu: false,
            alert_on_high_memory: false,
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
        }
    }
}

/// A TCP/UDP socket owned by a managed process at sample time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub local_address: String,
    pub remote_address: String,
    pub status: String,
    pub transport: String,
}

/// One point-in-time sample of a process's resource usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub timestamp: DateTime<Utc>,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_mb: f64,
    pub open_files: u32,
    pub connections: Vec<Connection>,
    pub threads: u32,
    pub status: ProcessStatus,
    pub uptime_seconds: u64,
}

impl ProcessMetrics {
    /// A synthesized sample for a process whose pid has disappeared.
    pub fn failed(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            pid: None,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_mb: 0.0,
            open_files: 0,
            connections: Vec::new(),
            threads: 0,
            status: ProcessStatus::Failed,
            uptime_seconds: 0,
        }
    }
}

/// Mutable runtime record owned by the Supervisor's registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub metrics_history: Vec<ProcessMetrics>,
}

impl ManagedProcess {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Stopped,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_restart: None,
            metrics_history: Vec::new(),
        }
    }

    /// Append a sample, compacting the history (1000 -> 500, oldest dropped)
    /// once the cap is exceeded.
    pub fn push_metrics(&mut self, sample: ProcessMetrics) {
        self.metrics_history.push(sample);
        if self.metrics_history.len() > METRICS_HISTORY_CAP {
            let drop = self.metrics_history.len() - METRICS_HISTORY_COMPACT_TO;
            self.metrics_history.drain(0..drop);
        }
    }
}
