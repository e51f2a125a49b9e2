use processguard::config::Config;
use processguard::process::{ProcessConfig, ProcessKind};
use processguard::ProcessGuard;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

fn echo_process(name: &str) -> ProcessConfig {
    ProcessConfig {
        name: name.to_string(),
        command: vec!["sh".to_string(), "-c".to_string(), "echo hello; sleep 5".to_string()],
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
        cpu_threshold: 90.0,
        memory_threshold: 90.0,
    }
}

#[tokio::test]
async fn test_bootstrap_start_and_list_process() {
    let mut config = Config::default();
    config.auto_start_processes = true;
    config.processes = vec![echo_process("e2e-echo")];

    let (guard, _events) = ProcessGuard::new(config).await;
    guard.bootstrap().await.unwrap();

    sleep(Duration::from_millis(200)).await;

    let processes = guard.list_processes().await;
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].config.name, "e2e-echo");
    assert!(processes[0].pid.is_some());

    guard.stop_process("e2e-echo").await.unwrap();
}

#[tokio::test]
async fn test_system_metrics_and_info_are_available() {
    let config = Config::default();
    let (guard, _events) = ProcessGuard::new(config).await;

    let info = guard.system_info().await;
    assert!(info.cpu_count > 0);

    let metrics = guard.system_metrics().await;
    assert!(metrics.memory_total_bytes > 0);
}

#[tokio::test]
async fn test_delete_process_removes_it_from_registry() {
    let mut config = Config::default();
    config.auto_start_processes = false;
    config.processes = vec![echo_process("e2e-delete")];

    let (guard, _events) = ProcessGuard::new(config).await;
    guard.bootstrap().await.unwrap();
    assert!(guard.get_process("e2e-delete").await.is_some());

    guard.delete_process("e2e-delete").await.unwrap();
    assert!(guard.get_process("e2e-delete").await.is_none());
}

#[tokio::test]
async fn test_alerts_start_empty() {
    let config = Config::default();
    let (guard, _events) = ProcessGuard::new(config).await;
    assert!(guard.list_alerts(true).await.is_empty());
}
