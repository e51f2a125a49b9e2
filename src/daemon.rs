// ProcessGuard - component bundle and Daemon Loop
//
// `ProcessGuard` wires the four subsystems together behind one struct (no
// singleton, callers hold an `Arc<ProcessGuard>`). `run()` is the periodic
// driver: a fixed six-step tick, built around a `tokio::main` +
// `tracing_subscriber::fmt::init()` startup shape.

use crate::config::Config;
use crate::crash::{CrashAction, CrashPolicyEngine};
use crate::error::{Result, UserError};
use crate::logging::enhancer::process as process_log;
use crate::logging::LogContext;
use crate::logs::{LogFileInfo, LogStore};
use crate::metrics::collector::DirectCollector;
use crate::metrics::host_overlay;
use crate::metrics::{SystemInfo, SystemMetrics};
use crate::monitoring::{Alert, AlertManager, HOST_ALERT_THRESHOLD_PERCENT};
use crate::process::{ManagedProcess, ProcessConfig, ProcessEvent, ProcessMetrics, ProcessStatus};
use crate::process::Supervisor;
use crate::{log_debug, log_error, log_info, log_warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Backoff applied after a tick that raised an error before the next attempt.
const TICK_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The four core subsystems plus the Host Probe, bundled for an out-of-scope
/// transport layer to call directly.
pub struct ProcessGuard {
    pub supervisor: Arc<Supervisor>,
    pub crash_engine: Arc<CrashPolicyEngine>,
    pub alert_manager: Arc<AlertManager>,
    pub log_store: Arc<LogStore>,
    collector: Mutex<DirectCollector>,
    host_overlay_available: bool,
    config: Config,
    running: AtomicBool,
}

impl ProcessGuard {
    pub async fn new(config: Config) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>) {
        let (supervisor, events) = Supervisor::new();
        let guard = Arc::new(Self {
            supervisor: Arc::new(supervisor),
            crash_engine: Arc::new(CrashPolicyEngine::new()),
            alert_manager: Arc::new(AlertManager::from_notification_config(&config.notifications)),
            log_store: Arc::new(LogStore::new(PathBuf::from(&config.log_base_dir))),
            collector: Mutex::new(DirectCollector::new()),
            host_overlay_available: host_overlay::overlay_available(),
            config,
            running: AtomicBool::new(true),
        });
        (guard, events)
    }

    /// Registers every configured process and optionally auto-starts it.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<()> {
        for process_config in self.config.processes.clone() {
            let name = process_config.name.clone();
            self.supervisor.register(process_config).await?;
            if self.config.auto_start_processes {
                if let Err(e) = self.supervisor.start(&name).await {
                    log_warn!(
                        LogContext::new("daemon", "bootstrap_start_failure").with_entity_id(&name),
                        "Failed to auto-start process '{}': {}",
                        name,
                        e
                    );
                }
            }
        }
        Ok(())
    }

    // ---- External surface (§4.7) ----

    pub async fn list_processes(&self) -> Vec<ManagedProcess> {
        self.supervisor.list().await
    }

    pub async fn create_process(&self, config: ProcessConfig) -> Result<()> {
        self.supervisor.register(config).await
    }

    pub async fn get_process(&self, name: &str) -> Option<ManagedProcess> {
        self.supervisor.get(name).await
    }

    pub async fn start_process(&self, name: &str) -> Result<()> {
        self.supervisor.start(name).await
    }

    pub async fn stop_process(&self, name: &str) -> Result<()> {
        self.supervisor.stop(name).await
    }

    /// Restarts a process, first consulting the Crash Policy Engine's gate.
    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let (allowed, reason) = self.crash_engine.can_restart(name).await;
        if !allowed {
            return Err(UserError::process_disabled(name))
                .map_err(|e| {
                    log_warn!(
                        LogContext::new("daemon", "restart_blocked").with_entity_id(name),
                        "Restart of '{}' blocked: {}",
                        name,
                        reason.unwrap_or_default()
                    );
                    e
                });
        }
        self.supervisor.restart(name).await
    }

    pub async fn delete_process(&self, name: &str) -> Result<()> {
        self.supervisor.unregister(name).await?;
        self.log_store.remove(name).await
    }

    pub async fn system_info(&self) -> SystemInfo {
        self.collector.lock().await.system_info()
    }

    pub async fn system_metrics(&self) -> SystemMetrics {
        self.sample_host().await
    }

    pub async fn list_alerts(&self, active_only: bool) -> Vec<Alert> {
        if active_only {
            self.alert_manager.active().await
        } else {
            self.alert_manager.history(24 * 365).await
        }
    }

    pub async fn acknowledge_alert(&self, id: &str) -> bool {
        self.alert_manager.acknowledge(id).await
    }

    pub async fn resolve_alert(&self, id: &str) -> bool {
        self.alert_manager.resolve(id).await
    }

    pub async fn list_log_files(&self, name: &str) -> Result<Vec<LogFileInfo>> {
        self.log_store.list_log_files(name).await
    }

    pub async fn recent_logs(&self, name: &str, n: usize) -> Result<Vec<String>> {
        self.log_store.tail_log_file(name, n).await
    }

    /// Streams newly appended log lines for `name` as they land, polling the
    /// current log file. The stream ends when the receiver is dropped.
    pub async fn tail_logs(self: &Arc<Self>, name: &str) -> Result<tokio::sync::mpsc::Receiver<String>> {
        if self.supervisor.get(name).await.is_none() {
            return Err(UserError::process_not_found(name));
        }
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let guard = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            let mut seen = guard.log_store.tail_log_file(&name, 0).await.unwrap_or_default().len();
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let lines = match guard.log_store.tail_log_file(&name, usize::MAX).await {
                    Ok(lines) => lines,
                    Err(_) => continue,
                };
                for line in lines.iter().skip(seen) {
                    if tx.send(line.clone()).await.is_err() {
                        return;
                    }
                }
                seen = lines.len();
            }
        });
        Ok(rx)
    }

    /// Streams a `SystemMetrics` snapshot once per monitor interval until the
    /// receiver is dropped.
    pub fn live_metrics_feed(self: &Arc<Self>) -> tokio::sync::mpsc::Receiver<SystemMetrics> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let guard = Arc::clone(self);
        let period = Duration::from_secs(self.config.monitor_interval.max(1));
        tokio::spawn(async move {
            loop {
                let metrics = guard.sample_host().await;
                if tx.send(metrics).await.is_err() {
                    return;
                }
                tokio::time::sleep(period).await;
            }
        });
        rx
    }

    // ---- Daemon Loop ----

    /// Runs the periodic driver until a shutdown signal arrives. Returns once
    /// the Supervisor has stopped every managed process.
    pub async fn run(self: Arc<Self>, mut events: tokio::sync::mpsc::UnboundedReceiver<ProcessEvent>) {
        let period = Duration::from_secs(self.config.monitor_interval.max(1));
        let event_guard = Arc::clone(&self);
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                event_guard.handle_event(event).await;
            }
        });

        let mut shutdown = Self::shutdown_signal();

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = self.tick().await {
                        log_error!(
                            LogContext::new("daemon", "tick_error"),
                            "Tick failed: {}",
                            e
                        );
                        tokio::time::sleep(TICK_ERROR_BACKOFF).await;
                    }
                }
                _ = &mut shutdown => {
                    log_info!(LogContext::new("daemon", "shutdown_signal"), "Shutdown signal received");
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }

        self.supervisor.shutdown_all().await;
        event_task.abort();
    }

    #[cfg(unix)]
    fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            let mut int = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("failed to install SIGINT handler");
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        })
    }

    #[cfg(not(unix))]
    fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        })
    }

    /// One monitoring tick, per §4.6:
    /// 1. sample host, 2. evaluate host alerts, 3. per-process health-check +
    /// sample + alerts + debug log, 4. auto-restart sweep through the crash
    /// gate, 5. log gc, 6. (sleep happens in the caller's select loop).
    async fn tick(&self) -> Result<()> {
        let host_metrics = self.sample_host().await;
        self.evaluate_host_alerts(&host_metrics).await;

        for name in self.supervisor.names().await {
            let status = self.supervisor.health_check(&name).await?;
            let pid = self.supervisor.pid_of(&name).await;

            let sample = match pid {
                Some(pid) if status == ProcessStatus::Running => {
                    self.collector.lock().await.sample_process(pid)
                }
                _ => ProcessMetrics::failed(chrono::Utc::now()),
            };
            self.supervisor.sample_metrics(&name, sample.clone()).await?;
            self.evaluate_process_alerts(&name, &sample).await;

            let line = format!(
                "[{}] [DEBUG] status={:?} cpu={:.1}% mem={:.1}%",
                chrono::Utc::now().to_rfc3339(),
                status,
                sample.cpu_percent,
                sample.memory_percent
            );
            if let Err(e) = self.log_store.append(&name, &line).await {
                log_warn!(
                    LogContext::new("daemon", "log_append_failure").with_entity_id(&name),
                    "Failed to append debug log for '{}': {}",
                    name,
                    e
                );
            }
        }

        self.auto_restart_sweep().await;

        if self.config.cleanup_logs {
            match self.log_store.gc(self.config.log_retention_days).await {
                Ok(removed) if removed > 0 => {
                    log_debug!(LogContext::new("daemon", "log_gc"), "Removed {} expired log files", removed);
                }
                Err(e) => {
                    log_warn!(LogContext::new("daemon", "log_gc_failure"), "Log gc failed: {}", e);
                }
                _ => {}
            }
        }

        self.crash_engine.cleanup_expired_quarantines().await;

        Ok(())
    }

    async fn sample_host(&self) -> SystemMetrics {
        let direct = self.collector.lock().await.collect_system_metrics();
        if self.host_overlay_available {
            host_overlay::apply_overlay(direct)
        } else {
            direct
        }
    }

    async fn evaluate_host_alerts(&self, metrics: &SystemMetrics) {
        if metrics.cpu_percent > HOST_ALERT_THRESHOLD_PERCENT {
            self.alert_manager
                .create_alert(
                    "system_high_cpu",
                    crate::monitoring::AlertSeverity::Critical,
                    "High host CPU usage",
                    &format!("Host CPU at {:.1}%", metrics.cpu_percent),
                    None,
                    std::collections::HashMap::new(),
                )
                .await;
        }
        if metrics.memory_percent > HOST_ALERT_THRESHOLD_PERCENT {
            self.alert_manager
                .create_alert(
                    "system_high_memory",
                    crate::monitoring::AlertSeverity::Critical,
                    "High host memory usage",
                    &format!("Host memory at {:.1}%", metrics.memory_percent),
                    None,
                    std::collections::HashMap::new(),
                )
                .await;
        }
        for disk in &metrics.disks {
            if disk.percent > HOST_ALERT_THRESHOLD_PERCENT {
                let mut metadata = std::collections::HashMap::new();
                metadata.insert(
                    "mount_point".to_string(),
                    serde_json::Value::String(disk.mount_point.clone()),
                );
                self.alert_manager
                    .create_alert(
                        "disk_full",
                        crate::monitoring::AlertSeverity::Critical,
                        "Disk nearly full",
                        &format!("{} at {:.1}% used", disk.mount_point, disk.percent),
                        None,
                        metadata,
                    )
                    .await;
            }
        }
    }

    async fn evaluate_process_alerts(&self, name: &str, sample: &ProcessMetrics) {
        let Some(process) = self.supervisor.get(name).await else {
            return;
        };
        let config = &process.config;

        if sample.status == ProcessStatus::Failed && config.alert_on_failure {
            self.alert_manager
                .create_alert(
                    "process_failed",
                    crate::monitoring::AlertSeverity::Critical,
                    &format!("Process '{name}' failed"),
                    &format!("Process '{name}' is in FAILED state"),
                    Some(name),
                    std::collections::HashMap::new(),
                )
                .await;
        }
        if sample.cpu_percent > config.cpu_threshold && config.alert_on_high_cpu {
            self.alert_manager
                .create_alert(
                    "high_cpu",
                    crate::monitoring::AlertSeverity::Warning,
                    &format!("High CPU on '{name}'"),
                    &format!("CPU at {:.1}% (threshold {:.1}%)", sample.cpu_percent, config.cpu_threshold),
                    Some(name),
                    std::collections::HashMap::new(),
                )
                .await;
        }
        if sample.memory_percent > config.memory_threshold && config.alert_on_high_memory {
            self.alert_manager
                .create_alert(
                    "high_memory",
                    crate::monitoring::AlertSeverity::Warning,
                    &format!("High memory on '{name}'"),
                    &format!(
                        "Memory at {:.1}% (threshold {:.1}%)",
                        sample.memory_percent, config.memory_threshold
                    ),
                    Some(name),
                    std::collections::HashMap::new(),
                )
                .await;
        }
    }

    async fn auto_restart_sweep(&self) {
        for name in self.supervisor.names().await {
            let Some(process) = self.supervisor.get(&name).await else {
                continue;
            };
            if process.status != ProcessStatus::Failed || !process.config.auto_restart {
                continue;
            }
            if process.restart_count >= process.config.max_restarts {
                continue;
            }

            let (allowed, reason) = self.crash_engine.can_restart(&name).await;
            if !allowed {
                log_debug!(
                    LogContext::new("daemon", "restart_skipped").with_entity_id(&name),
                    "Skipping restart of '{}': {}",
                    name,
                    reason.unwrap_or_default()
                );
                continue;
            }

            if let Err(e) = self.supervisor.restart(&name).await {
                log_warn!(
                    LogContext::new("daemon", "restart_failure").with_entity_id(&name),
                    "Auto-restart of '{}' failed: {}",
                    name,
                    e
                );
            }
        }
    }

    async fn handle_event(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::Crashed { name, exit_code } => {
                let action = self
                    .crash_engine
                    .record_crash(&name, "unexpected_exit", exit_code)
                    .await;
                log_info!(
                    LogContext::new("daemon", "crash_recorded").with_entity_id(&name),
                    "Process '{}' crashed (exit={:?}), policy action: {:?}",
                    name,
                    exit_code,
                    action
                );
                if matches!(action, CrashAction::Disable | CrashAction::KillDependencies) {
                    self.alert_manager
                        .create_alert(
                            "process_disabled",
                            crate::monitoring::AlertSeverity::Critical,
                            &format!("Process '{name}' disabled"),
                            &format!("Crash policy disabled '{name}' after repeated crashes"),
                            Some(&name),
                            std::collections::HashMap::new(),
                        )
                        .await;
                }
            }
            ProcessEvent::OutputLine { name, line, is_stderr } => {
                let level = if is_stderr { "ERROR" } else { "INFO" };
                let formatted = format!("[{}] [{}] {}", chrono::Utc::now().to_rfc3339(), level, line);
                let _ = self.log_store.append(&name, &formatted).await;
            }
            ProcessEvent::Started { name, pid } => {
                process_log::log_process_start(&name, &format!("pid {pid}"));
            }
            ProcessEvent::Stopped { name, exit_code } => {
                process_log::log_process_stop(&name, exit_code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessConfig;

    #[tokio::test]
    async fn test_bootstrap_registers_configured_processes() {
        let mut config = Config::default();
        config.auto_start_processes = false;
        config.processes = vec![ProcessConfig::for_testing("worker", vec!["echo", "hi"])];

        let (guard, _events) = ProcessGuard::new(config).await;
        guard.bootstrap().await.unwrap();

        let processes = guard.list_processes().await;
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].config.name, "worker");
    }

    #[tokio::test]
    async fn test_restart_blocked_when_disabled() {
        let config = Config::default();
        let (guard, _events) = ProcessGuard::new(config).await;
        guard
            .create_process(ProcessConfig::for_testing("flapper", vec!["echo", "hi"]))
            .await
            .unwrap();
        guard.crash_engine.force_enable("flapper").await;
        guard
            .crash_engine
            .set_policy(
                "flapper",
                crate::crash::CrashPolicy {
                    max_crashes: 0,
                    ..crate::crash::CrashPolicy::default()
                },
            )
            .await;
        guard.crash_engine.record_crash("flapper", "unexpected_exit", Some(1)).await;

        let err = guard.restart_process("flapper").await.unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::CrashPolicyError);
    }
}
