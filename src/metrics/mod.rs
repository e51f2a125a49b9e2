// ProcessGuard - Host Probe data model
//
// System-wide telemetry, sampled either directly via sysinfo (collector.rs)
// or, inside a container, overlaid with the host's real /proc data
// (host_overlay.rs) when HOST_PROC/HOST_SYS/HOST_ROOT point at a mounted
// host filesystem.

pub mod collector;
pub mod host_overlay;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkIoStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub rx_rate_bytes_per_sec: f64,
    pub tx_rate_bytes_per_sec: f64,
}

impl Default for NetworkIoStats {
    fn default() -> Self {
        Self {
            bytes_received: 0,
            bytes_sent: 0,
            packets_received: 0,
            packets_sent: 0,
            rx_rate_bytes_per_sec: 0.0,
            tx_rate_bytes_per_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: String,
    pub process_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub cpu_percent: f64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_percent: f64,
    pub disks: Vec<DiskInfo>,
    pub load_average: [f64; 3],
    pub process_count: usize,
    pub network_io: NetworkIoStats,
    pub open_ports: Vec<OpenPort>,
    /// True when any field above was sourced from the host overlay rather
    /// than sysinfo's direct (container-local) view.
    pub host_overlay_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os_name: String,
    pub kernel_version: String,
    pub cpu_count: usize,
    pub is_container: bool,
}
