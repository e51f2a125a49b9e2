// Configuration loading: search paths -> env overrides -> CLI overrides -> validate.
//
// A missing or malformed file is never fatal: it's logged and defaults are
// used instead of failing the daemon.

use super::{Config, DEFAULT_CONFIG_PATH};
use crate::logging::enhancer::config as config_log;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs as async_fs;

#[derive(Debug)]
pub enum ConfigError {
    FileNotFound(PathBuf),
    Io(std::io::Error),
    Json(serde_json::Error),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "configuration file not found: {}", path.display()),
            ConfigError::Io(err) => write!(f, "IO error: {err}"),
            ConfigError::Json(err) => write!(f, "JSON parsing error: {err}"),
            ConfigError::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_overrides: HashMap<String, String>,
    cli_overrides: HashMap<String, String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from(DEFAULT_CONFIG_PATH)],
            env_overrides: Self::load_env_overrides(),
            cli_overrides: HashMap::new(),
        }
    }

    pub fn with_search_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths: paths,
            env_overrides: Self::load_env_overrides(),
            cli_overrides: HashMap::new(),
        }
    }

    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.push(path);
    }

    pub fn set_cli_overrides(&mut self, overrides: HashMap<String, String>) {
        self.cli_overrides = overrides;
    }

    /// Loads config, falling back to defaults on any file-level problem
    /// (not found or malformed) rather than failing the daemon.
    pub async fn load_async(&self) -> Result<Config, ConfigError> {
        info!("loading configuration from search paths: {:?}", self.search_paths);
        let start = Instant::now();
        let path_label = self.search_paths.first().map(|p| p.display().to_string()).unwrap_or_default();

        let mut config = match self.find_and_load_config_async().await {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => {
                warn!("no configuration file found, using defaults");
                Config::default()
            }
            Err(err) => {
                warn!("configuration file malformed ({err}), using defaults");
                config_log::log_config_error(&path_label, &err.to_string());
                Config::default()
            }
        };

        self.apply_env_overrides(&mut config)?;
        self.apply_cli_overrides(&mut config)?;
        if let Err(err) = self.validate_config(&config) {
            config_log::log_config_error(&path_label, &err.to_string());
            return Err(err);
        }

        info!("configuration loaded");
        debug!("final configuration: {config:?}");
        config_log::log_config_load(&path_label, start.elapsed().as_millis() as u64);

        Ok(config)
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = match self.find_and_load_config() {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => Config::default(),
            Err(_) => Config::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.apply_cli_overrides(&mut config)?;
        self.validate_config(&config)?;
        Ok(config)
    }

    fn find_and_load_config(&self) -> Result<Config, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                let content = fs::read_to_string(path)?;
                return Ok(serde_json::from_str(&content)?);
            }
        }
        Err(ConfigError::FileNotFound(
            self.search_paths.first().cloned().unwrap_or_default(),
        ))
    }

    async fn find_and_load_config_async(&self) -> Result<Config, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                info!("found configuration file: {}", path.display());
                let content = async_fs::read_to_string(path).await?;
                return Ok(serde_json::from_str(&content)?);
            }
        }
        Err(ConfigError::FileNotFound(
            self.search_paths.first().cloned().unwrap_or_default(),
        ))
    }

    fn load_env_overrides() -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        let env_mappings = [
            ("PROCESSGUARD_LOG_LEVEL", "log_level"),
            ("PROCESSGUARD_LOG_BASE_DIR", "log_base_dir"),
            ("PROCESSGUARD_MONITOR_INTERVAL", "monitor_interval"),
            ("PROCESSGUARD_LOG_RETENTION_DAYS", "log_retention_days"),
        ];
        for (env_var, config_path) in &env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                overrides.insert(config_path.to_string(), value);
            }
        }
        overrides
    }

    fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
        for (path, value) in &self.env_overrides {
            self.apply_override(config, path, value)?;
        }
        Ok(())
    }

    fn apply_cli_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
        for (path, value) in &self.cli_overrides {
            self.apply_override(config, path, value)?;
        }
        Ok(())
    }

    fn apply_override(&self, config: &mut Config, path: &str, value: &str) -> Result<(), ConfigError> {
        debug!("applying override: {path} = {value}");
        match path {
            "log_level" => config.log_level = value.to_string(),
            "log_base_dir" => config.log_base_dir = value.to_string(),
            "monitor_interval" => {
                config.monitor_interval = value
                    .parse()
                    .map_err(|_| ConfigError::Validation(format!("invalid value for {path}: {value}")))?;
            }
            "log_retention_days" => {
                config.log_retention_days = value
                    .parse()
                    .map_err(|_| ConfigError::Validation(format!("invalid value for {path}: {value}")))?;
            }
            _ => warn!("unknown configuration override path: {path}"),
        }
        Ok(())
    }

    fn validate_config(&self, config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];
        if !valid_log_levels.contains(&config.log_level.to_uppercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log level: {}",
                config.log_level
            )));
        }
        if config.monitor_interval == 0 {
            return Err(ConfigError::Validation("monitor_interval must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub async fn save_config_async(&self, config: &Config, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent).await?;
        }
        async_fs::write(path, json).await?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[tokio::test]
    #[serial]
    async fn test_load_default_config_when_missing() {
        let loader = ConfigLoader::with_search_paths(vec![PathBuf::from("/no/such/processguard.json")]);
        let config = loader.load_async().await.unwrap();
        assert_eq!(config.monitor_interval, 10);
        assert!(config.auto_start_processes);
    }

    #[tokio::test]
    #[serial]
    async fn test_save_and_load_round_trip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let loader = ConfigLoader::new();
        let mut config = Config::default();
        config.monitor_interval = 15;
        loader.save_config_async(&config, path).await.unwrap();

        let loader_with_path = ConfigLoader::with_search_paths(vec![path.to_path_buf()]);
        let loaded = loader_with_path.load_async().await.unwrap();
        assert_eq!(loaded.monitor_interval, 15);
    }

    #[tokio::test]
    #[serial]
    async fn test_env_override_applies() {
        let original = std::env::var("PROCESSGUARD_MONITOR_INTERVAL").ok();
        unsafe {
            std::env::set_var("PROCESSGUARD_MONITOR_INTERVAL", "20");
        }

        let loader = ConfigLoader::with_search_paths(vec![PathBuf::from("/no/such/processguard.json")]);
        let config = loader.load_async().await.unwrap();
        assert_eq!(config.monitor_interval, 20);

        unsafe {
            match original {
                Some(value) => std::env::set_var("PROCESSGUARD_MONITOR_INTERVAL", value),
                None => std::env::remove_var("PROCESSGUARD_MONITOR_INTERVAL"),
            }
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_malformed_file_falls_back_to_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "{ not valid json").unwrap();

        let loader = ConfigLoader::with_search_paths(vec![temp_file.path().to_path_buf()]);
        let config = loader.load_async().await.unwrap();
        assert_eq!(config.monitor_interval, 10);
    }
}
