// ProcessGuard - Supervisor
//
// Owns the process registry (name -> ManagedProcess) and, separately, the
// live subprocess handles (name -> Child). Both maps are written only from
// here; every other component reaches processes through Supervisor methods.

use crate::error::{Result, UserError};
use crate::logging::enhancer::process as process_log;
use crate::logging::LogContext;
use crate::process::{ManagedProcess, ProcessConfig, ProcessMetrics, ProcessStatus};
use crate::{log_debug, log_error, log_info, log_warn};
use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;

/// Deadline for a graceful SIGTERM to take effect before SIGKILL is sent.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { name: String, pid: u32 },
    Stopped { name: String, exit_code: Option<i32> },
    Crashed { name: String, exit_code: Option<i32> },
    OutputLine { name: String, line: String, is_stderr: bool },
}

/// Process registry plus subprocess lifecycle operations. One instance is
/// shared (via `Arc`) across the daemon loop, the alert manager and the
/// crash policy engine.
pub struct Supervisor {
    registry: RwLock<HashMap<String, ManagedProcess>>,
    handles: RwLock<HashMap<String, Child>>,
    output_monitors: RwLock<HashMap<String, tokio::task::JoinHandle<()>>>,
    event_sender: mpsc::UnboundedSender<ProcessEvent>,
}

impl Supervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        (
            Self {
                registry: RwLock::new(HashMap::new()),
                handles: RwLock::new(HashMap::new()),
                output_monitors: RwLock::new(HashMap::new()),
                event_sender,
            },
            event_receiver,
        )
    }

    pub async fn register(&self, config: ProcessConfig) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(&config.name) {
            return Err(UserError::process_already_registered(&config.name));
        }
        let name = config.name.clone();
        registry.insert(name.clone(), ManagedProcess::new(config));
        let context = LogContext::new("process", "register").with_entity_id(&name);
        log_info!(context, "Registered process '{}'", name);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        let process = registry
            .get(name)
            .ok_or_else(|| UserError::process_not_found(name))?;
        if matches!(process.status, ProcessStatus::Running | ProcessStatus::Starting) {
            return Err(UserError::spawn_failed(
                name,
                "process is still running; stop it before unregistering",
            ));
        }
        registry.remove(name);
        let context = LogContext::new("process", "unregister").with_entity_id(name);
        log_info!(context, "Unregistered process '{}'", name);
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        let config = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .ok_or_else(|| UserError::process_not_found(name))?
                .config
                .clone()
        };

        self.set_status(name, ProcessStatus::Starting).await;

        let command_string = config.command.join(" ");
        process_log::log_process_start(name, &command_string);
        let context = LogContext::new("process", "spawn")
            .with_entity_id(name)
            .with_metadata("command", serde_json::json!(command_string));
        log_info!(context, "Spawning process '{}'", name);

        let mut cmd = Command::new(&config.command[0]);
        cmd.args(&config.command[1..]);
        cmd.current_dir(&config.working_dir);
        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }
        if config.redirect_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }
        cmd.kill_on_drop(false);

        // Spawn into its own process group so a stop/kill reaches every
        // descendant the child forks, not just the direct pid.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                process_log::log_process_error(name, &format!("spawn failed: {e}"));
                self.set_status(name, ProcessStatus::Failed).await;
                let _ = self.event_sender.send(ProcessEvent::Crashed {
                    name: name.to_string(),
                    exit_code: None,
                });
                return Err(UserError::spawn_failed(name, &e.to_string()));
            }
        };

        let pid = child.id().unwrap_or(0);

        if config.redirect_output {
            let monitor = self.spawn_output_monitor(name, &mut child);
            self.output_monitors.write().await.insert(name.to_string(), monitor);
        }

        self.handles.write().await.insert(name.to_string(), child);

        {
            let mut registry = self.registry.write().await;
            if let Some(process) = registry.get_mut(name) {
                process.status = ProcessStatus::Running;
                process.pid = Some(pid);
                process.started_at = Some(Utc::now());
            }
        }

        let _ = self.event_sender.send(ProcessEvent::Started {
            name: name.to_string(),
            pid,
        });

        let context = LogContext::new("process", "spawn_success")
            .with_entity_id(name)
            .with_metadata("pid", serde_json::json!(pid));
        log_info!(context, "Process '{}' running with pid {}", name, pid);

        Ok(())
    }

    /// Send SIGTERM to the process group, wait up to the graceful deadline,
    /// then SIGKILL if it hasn't exited.
    pub async fn stop(&self, name: &str) -> Result<()> {
        if !self.registry.read().await.contains_key(name) {
            return Err(UserError::process_not_found(name));
        }

        self.set_status(name, ProcessStatus::Stopping).await;

        let pid = {
            let handles = self.handles.read().await;
            handles.get(name).and_then(|c| c.id())
        };

        let Some(pid) = pid else {
            // No live handle: nothing to signal, just reconcile state.
            self.set_status(name, ProcessStatus::Stopped).await;
            return Ok(());
        };

        self.send_signal(name, pid, Signal::SIGTERM)?;

        let exit_code = {
            let mut handles = self.handles.write().await;
            if let Some(child) = handles.get_mut(name) {
                match timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                    Ok(Ok(status)) => status.code(),
                    Ok(Err(e)) => {
                        log_warn!(
                            LogContext::new("process", "wait_error").with_entity_id(name),
                            "Error waiting on process '{}': {}",
                            name,
                            e
                        );
                        None
                    }
                    Err(_) => {
                        log_warn!(
                            LogContext::new("process", "force_kill").with_entity_id(name),
                            "Process '{}' did not exit within the graceful deadline, sending SIGKILL",
                            name
                        );
                        self.send_signal(name, pid, Signal::SIGKILL)?;
                        child.wait().await.ok().and_then(|s| s.code())
                    }
                }
            } else {
                None
            }
        };

        self.handles.write().await.remove(name);
        if let Some(monitor) = self.output_monitors.write().await.remove(name) {
            monitor.abort();
        }

        self.set_status(name, ProcessStatus::Stopped).await;
        process_log::log_process_stop(name, exit_code);
        let _ = self.event_sender.send(ProcessEvent::Stopped {
            name: name.to_string(),
            exit_code,
        });

        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        if self.handles.read().await.contains_key(name) {
            self.stop(name).await?;
        }

        let delay = {
            let registry = self.registry.read().await;
            registry
                .get(name)
                .ok_or_else(|| UserError::process_not_found(name))?
                .config
                .restart_delay_seconds
        };
        tokio::time::sleep(Duration::from_secs(delay)).await;

        self.start(name).await?;

        let mut registry = self.registry.write().await;
        if let Some(process) = registry.get_mut(name) {
            process.restart_count += 1;
            process.last_restart = Some(Utc::now());
        }
        Ok(())
    }

    /// Reconciles the registry's status for `name` against the real process
    /// state via a non-blocking wait; returns the resulting status.
    pub async fn health_check(&self, name: &str) -> Result<ProcessStatus> {
        let exited = {
            let mut handles = self.handles.write().await;
            match handles.get_mut(name) {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => Some(status.code()),
                    Ok(None) => None,
                    Err(e) => {
                        log_error!(
                            LogContext::new("process", "health_check_error").with_entity_id(name),
                            "Error checking process '{}' status: {}",
                            name,
                            e
                        );
                        Some(None)
                    }
                },
                None => {
                    return self
                        .registry
                        .read()
                        .await
                        .get(name)
                        .map(|p| p.status)
                        .ok_or_else(|| UserError::process_not_found(name));
                }
            }
        };

        let Some(exit_code) = exited else {
            return Ok(ProcessStatus::Running);
        };

        self.handles.write().await.remove(name);
        if let Some(monitor) = self.output_monitors.write().await.remove(name) {
            monitor.abort();
        }

        let new_status = if exit_code == Some(0) {
            ProcessStatus::Stopped
        } else {
            ProcessStatus::Failed
        };
        self.set_status(name, new_status).await;

        log_debug!(
            LogContext::new("process", "health_check").with_entity_id(name),
            "Process '{}' exited with code {:?}",
            name,
            exit_code
        );

        if new_status == ProcessStatus::Failed {
            let _ = self.event_sender.send(ProcessEvent::Crashed {
                name: name.to_string(),
                exit_code,
            });
        }

        Ok(new_status)
    }

    /// Samples resource usage for the process via the system telemetry
    /// source, appends it to the history ring and returns it.
    pub async fn sample_metrics(&self, name: &str, sample: ProcessMetrics) -> Result<()> {
        let mut registry = self.registry.write().await;
        let process = registry
            .get_mut(name)
            .ok_or_else(|| UserError::process_not_found(name))?;
        process.push_metrics(sample);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<ManagedProcess> {
        self.registry.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<ManagedProcess> {
        self.registry.read().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    pub async fn pid_of(&self, name: &str) -> Option<u32> {
        self.registry.read().await.get(name).and_then(|p| p.pid)
    }

    /// Stops every running process; used during daemon shutdown.
    pub async fn shutdown_all(&self) {
        log_info!(LogContext::new("process", "shutdown_all"), "Stopping all processes");
        let names = self.names().await;
        for name in names {
            if let Err(e) = self.stop(&name).await {
                log_warn!(
                    LogContext::new("process", "shutdown_stop_failure").with_entity_id(&name),
                    "Failed to stop process '{}' during shutdown: {}",
                    name,
                    e
                );
            }
        }
    }

    /// Updates the registry's status for `name`. `pid` and `started_at` are
    /// only meaningful while a process is RUNNING or STOPPING (invariant
    /// #1: `pid != nil <=> status in {RUNNING, STOPPING}`), so any other
    /// transition clears both.
    async fn set_status(&self, name: &str, status: ProcessStatus) {
        let mut registry = self.registry.write().await;
        if let Some(process) = registry.get_mut(name) {
            process.status = status;
            if !matches!(status, ProcessStatus::Running | ProcessStatus::Stopping) {
                process.pid = None;
                process.started_at = None;
            }
        }
    }

    fn send_signal(&self, name: &str, pid: u32, signal: Signal) -> Result<()> {
        // Negative pid targets the whole process group created by
        // process_group(0) at spawn time.
        signal::kill(NixPid::from_raw(-(pid as i32)), signal)
            .map_err(|e| UserError::signal_failed(name, &e.to_string()))
    }

    fn spawn_output_monitor(&self, name: &str, child: &mut Child) -> tokio::task::JoinHandle<()> {
        let name = name.to_string();
        let event_sender = self.event_sender.clone();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            let mut stdout_reader = stdout.map(|s| BufReader::new(s).lines());
            let mut stderr_reader = stderr.map(|s| BufReader::new(s).lines());

            loop {
                tokio::select! {
                    line = async {
                        match stdout_reader.as_mut() {
                            Some(r) => r.next_line().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match line {
                            Ok(Some(line)) => {
                                log_debug!(
                                    LogContext::new("process", "stdout").with_entity_id(&name),
                                    "{}: {}", name, line
                                );
                                let _ = event_sender.send(ProcessEvent::OutputLine {
                                    name: name.clone(),
                                    line,
                                    is_stderr: false,
                                });
                            }
                            Ok(None) | Err(_) => break,
                        }
                    }
                    line = async {
                        match stderr_reader.as_mut() {
                            Some(r) => r.next_line().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        match line {
                            Ok(Some(line)) => {
                                log_debug!(
                                    LogContext::new("process", "stderr").with_entity_id(&name),
                                    "{}: {}", name, line
                                );
                                let _ = event_sender.send(ProcessEvent::OutputLine {
                                    name: name.clone(),
                                    line,
                                    is_stderr: true,
                                });
                            }
                            Ok(None) | Err(_) => break,
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessConfig;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (supervisor, _rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("echoer", vec!["echo", "hello"]);
        supervisor.register(config).await.unwrap();
        assert!(supervisor.get("echoer").await.is_some());
        supervisor.unregister("echoer").await.unwrap();
        assert!(supervisor.get("echoer").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_errors() {
        let (supervisor, _rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("echoer", vec!["echo", "hello"]);
        supervisor.register(config.clone()).await.unwrap();
        let err = supervisor.register(config).await.unwrap_err();
        assert_eq!(err.error_code, "PROC_002");
    }

    #[tokio::test]
    async fn test_start_and_health_check() {
        let (supervisor, mut rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("echoer", vec!["echo", "hello"]);
        supervisor.register(config).await.unwrap();
        supervisor.start("echoer").await.unwrap();

        match rx.recv().await {
            Some(ProcessEvent::Started { name, .. }) => assert_eq!(name, "echoer"),
            other => panic!("expected Started event, got {other:?}"),
        }

        // Give the short-lived `echo` process time to exit.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = supervisor.health_check("echoer").await.unwrap();
        assert_eq!(status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_sends_terminate_and_reaps() {
        let (supervisor, _rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("sleeper", vec!["sleep", "30"]);
        supervisor.register(config).await.unwrap();
        supervisor.start("sleeper").await.unwrap();

        supervisor.stop("sleeper").await.unwrap();
        let process = supervisor.get("sleeper").await.unwrap();
        assert_eq!(process.status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_missing_binary_marks_failed() {
        let (supervisor, _rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("ghost", vec!["/no/such/binary"]);
        supervisor.register(config).await.unwrap();
        let err = supervisor.start("ghost").await.unwrap_err();
        assert_eq!(err.error_code, "PROC_003");

        let process = supervisor.get("ghost").await.unwrap();
        assert_eq!(process.status, ProcessStatus::Failed);
        assert!(process.pid.is_none());
        assert!(process.started_at.is_none());
    }

    #[tokio::test]
    async fn test_unregister_running_process_errors() {
        let (supervisor, _rx) = Supervisor::new();
        let config = ProcessConfig::for_testing("sleeper", vec!["sleep", "30"]);
        supervisor.register(config).await.unwrap();
        supervisor.start("sleeper").await.unwrap();

        let err = supervisor.unregister("sleeper").await.unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::ProcessError);

        supervisor.stop("sleeper").await.unwrap();
        supervisor.unregister("sleeper").await.unwrap();
    }
}
