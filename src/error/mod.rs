// ProcessGuard - Error Handling
// User-facing error type with recovery guidance, shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-module log level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLevel {
    pub default: String,
    pub modules: std::collections::HashMap<String, String>,
}

impl Default for LogLevel {
    fn default() -> Self {
        let mut modules = std::collections::HashMap::new();
        modules.insert("processguard".to_string(), "info".to_string());
        modules.insert("processguard::process".to_string(), "info".to_string());
        modules.insert("processguard::crash".to_string(), "debug".to_string());
        modules.insert("processguard::monitoring".to_string(), "debug".to_string());

        Self {
            default: "warn".to_string(),
            modules,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub enabled: bool,
    pub verbose_errors: bool,
    pub stack_traces: bool,
    pub performance_metrics: bool,
    pub memory_tracking: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            verbose_errors: true,
            stack_traces: cfg!(debug_assertions),
            performance_metrics: false,
            memory_tracking: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    pub log_level: LogLevel,
    pub debug: DebugConfig,
    pub auto_recovery: bool,
    pub max_recovery_attempts: u32,
    pub error_reporting: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            debug: DebugConfig::default(),
            auto_recovery: true,
            max_recovery_attempts: 3,
            error_reporting: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserError {
    pub error_type: ErrorType,
    pub message: String,
    pub guidance: String,
    pub recovery_actions: Vec<RecoveryAction>,
    pub error_code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    ProcessError,
    CrashPolicyError,
    AlertError,
    LogStoreError,
    HostProbeError,
    ConfigError,
    FileError,
    NetworkError,
    SystemError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub description: String,
    pub command: Option<String>,
    pub automatic: bool,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code, self.message)
    }
}

impl std::error::Error for UserError {}

impl UserError {
    pub fn process_not_found(name: &str) -> Self {
        Self {
            error_type: ErrorType::ProcessError,
            message: format!("process '{name}' is not registered"),
            guidance: "check the process name against the registry, or register it first"
                .to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "list registered processes".to_string(),
                command: None,
                automatic: false,
            }],
            error_code: "PROC_001".to_string(),
        }
    }

    pub fn process_already_registered(name: &str) -> Self {
        Self {
            error_type: ErrorType::ProcessError,
            message: format!("process '{name}' is already registered"),
            guidance: "unregister the existing entry first, or pick a different name".to_string(),
            recovery_actions: vec![],
            error_code: "PROC_002".to_string(),
        }
    }

    pub fn spawn_failed(name: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::ProcessError,
            message: format!("failed to spawn process '{name}': {reason}"),
            guidance: "check that the command exists and the working directory is accessible"
                .to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "retry through auto_restart_sweep".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "PROC_003".to_string(),
        }
    }

    pub fn signal_failed(name: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::ProcessError,
            message: format!("failed to signal process '{name}': {reason}"),
            guidance: "the process group may already be gone; check it with health_check"
                .to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "re-run health_check to reconcile state".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "PROC_004".to_string(),
        }
    }

    pub fn process_disabled(name: &str) -> Self {
        Self {
            error_type: ErrorType::CrashPolicyError,
            message: format!("process '{name}' is disabled by crash policy"),
            guidance: "call force_enable to clear the disabled flag".to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "force_enable the process".to_string(),
                command: None,
                automatic: false,
            }],
            error_code: "CRASH_001".to_string(),
        }
    }

    pub fn process_quarantined(name: &str) -> Self {
        Self {
            error_type: ErrorType::CrashPolicyError,
            message: format!("process '{name}' is quarantined"),
            guidance: "wait for the quarantine to expire or call force_enable".to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "force_enable the process".to_string(),
                command: None,
                automatic: false,
            }],
            error_code: "CRASH_002".to_string(),
        }
    }

    pub fn config_load_failed(file_path: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::ConfigError,
            message: format!("failed to load config file '{file_path}': {reason}"),
            guidance: "check that the file contains valid JSON matching the config schema"
                .to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "continue with built-in defaults".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "CONF_001".to_string(),
        }
    }

    pub fn config_validation_failed(reason: &str) -> Self {
        Self {
            error_type: ErrorType::ConfigError,
            message: format!("config validation failed: {reason}"),
            guidance: "fix the offending field in the config file".to_string(),
            recovery_actions: vec![],
            error_code: "CONF_002".to_string(),
        }
    }

    pub fn file_operation_failed(operation: &str, file_path: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::FileError,
            message: format!("file operation '{operation}' failed for '{file_path}': {reason}"),
            guidance: "check file permissions and that the path exists".to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "create the missing directory".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "FILE_001".to_string(),
        }
    }

    pub fn log_store_error(name: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::LogStoreError,
            message: format!("log store operation failed for '{name}': {reason}"),
            guidance: "check the log base directory is writable".to_string(),
            recovery_actions: vec![],
            error_code: "LOG_001".to_string(),
        }
    }

    pub fn host_probe_failed(field: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::HostProbeError,
            message: format!("host probe failed to read '{field}': {reason}"),
            guidance: "falling back to the direct-mode value for this field".to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "fall back to direct sampling".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "HOST_001".to_string(),
        }
    }

    pub fn notification_failed(sink: &str, reason: &str) -> Self {
        Self {
            error_type: ErrorType::NetworkError,
            message: format!("notification sink '{sink}' failed: {reason}"),
            guidance: "check sink connectivity and credentials".to_string(),
            recovery_actions: vec![],
            error_code: "ALERT_001".to_string(),
        }
    }

    pub fn system_resource_exhausted(resource: &str) -> Self {
        Self {
            error_type: ErrorType::SystemError,
            message: format!("system resource exhausted: {resource}"),
            guidance: "reduce system load or terminate unneeded processes".to_string(),
            recovery_actions: vec![RecoveryAction {
                description: "stop the oldest non-essential process".to_string(),
                command: None,
                automatic: true,
            }],
            error_code: "SYS_001".to_string(),
        }
    }

    /// Error severity for prioritizing operator attention.
    pub fn severity(&self) -> ErrorSeverity {
        match self.error_type {
            ErrorType::SystemError => ErrorSeverity::Critical,
            ErrorType::ProcessError | ErrorType::CrashPolicyError => ErrorSeverity::High,
            ErrorType::ConfigError | ErrorType::AlertError | ErrorType::HostProbeError => {
                ErrorSeverity::Medium
            }
            ErrorType::FileError | ErrorType::NetworkError | ErrorType::LogStoreError => {
                ErrorSeverity::Low
            }
        }
    }

    pub fn execute_auto_recovery(&self) -> bool {
        self.recovery_actions.iter().any(|action| action.automatic)
    }

    pub fn with_debug_info(&self, config: &DebugConfig) -> String {
        let mut message = format!("[{}] {}", self.error_code, self.message);

        if config.verbose_errors {
            message.push_str(&format!("\nerror type: {:?}", self.error_type));
            message.push_str(&format!("\nseverity: {:?}", self.severity()));
        }

        if config.stack_traces && config.enabled {
            message.push_str("\nstack trace: (not captured)");
        }

        message.push_str(&format!("\nguidance: {}", self.guidance));

        if !self.recovery_actions.is_empty() {
            message.push_str("\nrecovery actions:");
            for (i, action) in self.recovery_actions.iter().enumerate() {
                message.push_str(&format!(
                    "\n  {}. {} (automatic: {})",
                    i + 1,
                    action.description,
                    action.automatic
                ));
            }
        }

        message
    }

    pub fn with_performance_info(&self, duration: std::time::Duration, memory_usage: u64) -> String {
        format!(
            "{}\n[perf] duration: {:?}, memory: {}MB",
            self.message,
            duration,
            memory_usage / 1024 / 1024
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

pub type Result<T> = std::result::Result<T, UserError>;

#[macro_export]
macro_rules! safe_unwrap {
    ($result:expr, $error_msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => {
                log::error!("Operation failed: {} - {}", $error_msg, e);
                return Err(UserError::system_resource_exhausted(&format!(
                    "{}: {}",
                    $error_msg, e
                )));
            }
        }
    };
    ($option:expr, $error_msg:expr, $error_type:expr) => {
        match $option {
            Some(val) => val,
            None => {
                log::error!("Value not found: {}", $error_msg);
                return Err($error_type);
            }
        }
    };
}

pub fn safe_file_operation<F, T>(operation: &str, file_path: &str, f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, std::io::Error>,
{
    match f() {
        Ok(result) => Ok(result),
        Err(e) => {
            log::error!("File operation '{}' failed for '{}': {}", operation, file_path, e);
            Err(UserError::file_operation_failed(operation, file_path, &e.to_string()))
        }
    }
}

pub fn safe_process_operation<F, T>(process_id: &str, f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, Box<dyn std::error::Error>>,
{
    match f() {
        Ok(result) => Ok(result),
        Err(e) => {
            log::error!("Process operation failed for '{}': {}", process_id, e);
            Err(UserError::spawn_failed(process_id, &e.to_string()))
        }
    }
}

pub fn safe_lock_operation<T, F, R>(operation_name: &str, f: F) -> std::result::Result<R, UserError>
where
    F: FnOnce() -> std::result::Result<R, T>,
{
    match f() {
        Ok(result) => Ok(result),
        Err(_) => {
            log::error!("Lock contention in operation: {}", operation_name);
            Err(UserError::system_resource_exhausted(&format!(
                "lock contention: {operation_name}"
            )))
        }
    }
}

pub async fn safe_async_operation<F, Fut, T>(operation_name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, Box<dyn std::error::Error>>>,
{
    match f().await {
        Ok(result) => Ok(result),
        Err(e) => {
            log::error!("Async operation '{}' failed: {}", operation_name, e);
            Err(UserError::system_resource_exhausted(&format!(
                "{operation_name}: {e}"
            )))
        }
    }
}

impl From<std::io::Error> for UserError {
    fn from(err: std::io::Error) -> Self {
        Self::file_operation_failed("io", "<unknown>", &err.to_string())
    }
}

impl From<serde_json::Error> for UserError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_load_failed("<config>", &err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_not_found_error() {
        let error = UserError::process_not_found("svc");
        assert_eq!(error.error_code, "PROC_001");
        assert!(error.message.contains("svc"));
    }

    #[test]
    fn test_spawn_failed_severity() {
        let error = UserError::spawn_failed("svc", "binary missing");
        assert_eq!(error.severity() as u8, ErrorSeverity::High as u8);
    }

    #[test]
    fn test_auto_recovery_detection() {
        let error = UserError::spawn_failed("svc", "oom");
        assert!(error.execute_auto_recovery());
    }

    #[test]
    fn test_error_serialization() {
        let error = UserError::process_not_found("svc");
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: UserError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(error.error_code, deserialized.error_code);
    }

    #[test]
    fn test_debug_info_generation() {
        let error = UserError::process_not_found("svc");
        let debug_config = DebugConfig {
            enabled: true,
            verbose_errors: true,
            stack_traces: false,
            performance_metrics: true,
            memory_tracking: true,
        };

        let debug_message = error.with_debug_info(&debug_config);
        assert!(debug_message.contains("PROC_001"));
        assert!(debug_message.contains("svc"));
        assert!(debug_message.contains("error type"));
    }

    #[test]
    fn test_performance_info() {
        let error = UserError::process_not_found("svc");
        let duration = std::time::Duration::from_millis(100);
        let memory_usage = 1024 * 1024 * 50;

        let perf_message = error.with_performance_info(duration, memory_usage);
        assert!(perf_message.contains("duration"));
        assert!(perf_message.contains("50MB"));
    }

    #[test]
    fn test_error_handling_config_default() {
        let config = ErrorHandlingConfig::default();
        assert!(config.auto_recovery);
        assert_eq!(config.max_recovery_attempts, 3);
        assert!(config.error_reporting);
    }

    #[test]
    fn test_log_level_config() {
        let log_level = LogLevel::default();
        assert_eq!(log_level.default, "warn");
        assert!(log_level.modules.contains_key("processguard"));
    }
}
