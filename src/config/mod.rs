// ProcessGuard - configuration schema
//
// JSON on-disk config (see loader.rs for the search-path/env-override
// pipeline). Unknown keys are ignored by serde_json by default; every field
// has a default so a missing key never fails to parse.

pub mod loader;

use crate::monitoring::NotificationConfig;
use crate::process::ProcessConfig;
use serde::{Deserialize, Serialize};

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_file() -> String {
    "/var/log/processguard/daemon.log".to_string()
}

fn default_log_base_dir() -> String {
    "/var/log/processguard".to_string()
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_log_retention_days() -> i64 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_log_base_dir")]
    pub log_base_dir: String,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,
    #[serde(default = "default_true")]
    pub auto_start_processes: bool,
    #[serde(default = "default_true")]
    pub cleanup_logs: bool,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: default_log_file(),
            log_base_dir: default_log_base_dir(),
            monitor_interval: default_monitor_interval(),
            auto_start_processes: true,
            cleanup_logs: true,
            log_retention_days: default_log_retention_days(),
            processes: Vec::new(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// Default config file location, per §6.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/processguard/config.json";
