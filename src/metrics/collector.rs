// ProcessGuard - Host Probe, Direct mode
//
// Samples system and per-process telemetry straight from sysinfo, with no
// container awareness.

use super::{DiskInfo, NetworkIoStats, OpenPort, SystemInfo, SystemMetrics};
use crate::process::{Connection, ProcessMetrics, ProcessStatus};
use chrono::Utc;
use std::fs;
use sysinfo::{CpuExt, DiskExt, NetworkExt, PidExt, ProcessExt, System, SystemExt};

pub struct DirectCollector {
    system: System,
    previous_network: Option<NetworkIoStats>,
    previous_sample_at: Option<std::time::Instant>,
}

impl DirectCollector {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system,
            previous_network: None,
            previous_sample_at: None,
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            hostname: self.system.host_name().unwrap_or_else(|| "unknown".to_string()),
            os_name: self.system.name().unwrap_or_else(|| "unknown".to_string()),
            kernel_version: self
                .system
                .kernel_version()
                .unwrap_or_else(|| "unknown".to_string()),
            cpu_count: self.system.cpus().len(),
            is_container: std::path::Path::new("/.dockerenv").exists(),
        }
    }

    pub fn collect_system_metrics(&mut self) -> SystemMetrics {
        self.system.refresh_all();

        let memory_total_bytes = self.system.total_memory() * 1024;
        let memory_used_bytes = self.system.used_memory() * 1024;
        let memory_percent = if memory_total_bytes > 0 {
            memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0
        } else {
            0.0
        };

        SystemMetrics {
            timestamp: Utc::now(),
            cpu_percent: self.system.global_cpu_info().cpu_usage() as f64,
            memory_total_bytes,
            memory_used_bytes,
            memory_percent,
            disks: self.collect_disks(),
            load_average: self.collect_load_average(),
            process_count: self.system.processes().len(),
            network_io: self.collect_network(),
            open_ports: collect_open_ports(),
            host_overlay_active: false,
        }
    }

    fn collect_disks(&self) -> Vec<DiskInfo> {
        self.system
            .disks()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let available = disk.available_space();
                let used = total.saturating_sub(available);
                let percent = if total > 0 {
                    used as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                DiskInfo {
                    mount_point: disk.mount_point().to_string_lossy().to_string(),
                    total_bytes: total,
                    used_bytes: used,
                    percent,
                }
            })
            .collect()
    }

    #[cfg(unix)]
    fn collect_load_average(&self) -> [f64; 3] {
        let load = self.system.load_average();
        [load.one, load.five, load.fifteen]
    }

    #[cfg(not(unix))]
    fn collect_load_average(&self) -> [f64; 3] {
        [0.0, 0.0, 0.0]
    }

    fn collect_network(&mut self) -> NetworkIoStats {
        let mut bytes_received = 0;
        let mut bytes_sent = 0;
        let mut packets_received = 0;
        let mut packets_sent = 0;

        for (_name, data) in self.system.networks() {
            bytes_received += data.received();
            bytes_sent += data.transmitted();
            packets_received += data.packets_received();
            packets_sent += data.packets_transmitted();
        }

        let now = std::time::Instant::now();
        let (rx_rate, tx_rate) = match (&self.previous_network, self.previous_sample_at) {
            (Some(prev), Some(prev_at)) => {
                let elapsed = now.duration_since(prev_at).as_secs_f64().max(0.001);
                (
                    (bytes_received.saturating_sub(prev.bytes_received)) as f64 / elapsed,
                    (bytes_sent.saturating_sub(prev.bytes_sent)) as f64 / elapsed,
                )
            }
            _ => (0.0, 0.0),
        };

        let stats = NetworkIoStats {
            bytes_received,
            bytes_sent,
            packets_received,
            packets_sent,
            rx_rate_bytes_per_sec: rx_rate,
            tx_rate_bytes_per_sec: tx_rate,
        };

        self.previous_network = Some(stats.clone());
        self.previous_sample_at = Some(now);
        stats
    }

    /// Samples one managed process by pid. Returns a synthesized FAILED
    /// sample if the OS no longer reports the pid.
    pub fn sample_process(&mut self, pid: u32) -> ProcessMetrics {
        self.system.refresh_all();

        let Some(process) = self.system.process(sysinfo::Pid::from_u32(pid)) else {
            return ProcessMetrics::failed(Utc::now());
        };

        let memory_mb = process.memory() as f64 / 1024.0;
        let memory_percent = if self.system.total_memory() > 0 {
            process.memory() as f64 / self.system.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        let uptime_seconds = process.run_time();

        ProcessMetrics {
            timestamp: Utc::now(),
            pid: Some(pid),
            cpu_percent: process.cpu_usage() as f64,
            memory_percent,
            memory_mb,
            open_files: get_fd_count(pid).unwrap_or(0),
            connections: collect_process_connections(pid),
            threads: get_thread_count(pid).unwrap_or(1),
            status: ProcessStatus::Running,
            uptime_seconds,
        }
    }
}

impl Default for DirectCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn get_fd_count(pid: u32) -> Option<u32> {
    fs::read_dir(format!("/proc/{pid}/fd"))
        .ok()
        .map(|entries| entries.count() as u32)
}

#[cfg(not(unix))]
fn get_fd_count(_pid: u32) -> Option<u32> {
    None
}

#[cfg(target_os = "linux")]
fn get_thread_count(pid: u32) -> Option<u32> {
    let contents = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn get_thread_count(_pid: u32) -> Option<u32> {
    None
}

/// A process's open sockets, grounded on the same `/proc/<pid>/fd` scanning
/// idiom `get_fd_count` uses: each `socket:[inode]` symlink under the
/// process's fd directory is matched against `/proc/net/{tcp,udp}[6]` to
/// recover the address pair and connection state.
#[cfg(target_os = "linux")]
fn collect_process_connections(pid: u32) -> Vec<Connection> {
    let Ok(entries) = fs::read_dir(format!("/proc/{pid}/fd")) else {
        return Vec::new();
    };

    let mut inodes = std::collections::HashSet::new();
    for entry in entries.flatten() {
        if let Ok(link) = fs::read_link(entry.path()) {
            let link = link.to_string_lossy();
            if let Some(inode) = link.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
                inodes.insert(inode.to_string());
            }
        }
    }
    if inodes.is_empty() {
        return Vec::new();
    }

    let mut connections = Vec::new();
    for (path, transport) in [
        ("/proc/net/tcp", "tcp"),
        ("/proc/net/tcp6", "tcp"),
        ("/proc/net/udp", "udp"),
        ("/proc/net/udp6", "udp"),
    ] {
        let Ok(contents) = fs::read_to_string(path) else {
            continue;
        };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || !inodes.contains(fields[9]) {
                continue;
            }
            let (Some(local), Some(remote)) =
                (parse_hex_address(fields[1]), parse_hex_address(fields[2]))
            else {
                continue;
            };
            connections.push(Connection {
                local_address: local,
                remote_address: remote,
                status: tcp_state_name(fields[3]).to_string(),
                transport: transport.to_string(),
            });
        }
    }
    connections
}

#[cfg(not(target_os = "linux"))]
fn collect_process_connections(_pid: u32) -> Vec<Connection> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn parse_hex_address(field: &str) -> Option<String> {
    let mut parts = field.split(':');
    let ip = parse_hex_ip(parts.next()?)?;
    let port = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some(format!("{ip}:{port}"))
}

#[cfg(target_os = "linux")]
fn parse_hex_ip(hex: &str) -> Option<String> {
    if hex.len() == 8 {
        let bytes = u32::from_str_radix(hex, 16).ok()?.to_le_bytes();
        Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
    } else if hex.len() == 32 {
        let mut bytes = Vec::with_capacity(16);
        for chunk in hex.as_bytes().chunks(8) {
            let word = std::str::from_utf8(chunk).ok()?;
            bytes.extend_from_slice(&u32::from_str_radix(word, 16).ok()?.to_le_bytes());
        }
        let segments: Vec<String> =
            bytes.chunks(2).map(|c| format!("{:02x}{:02x}", c[0], c[1])).collect();
        Some(segments.join(":"))
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn tcp_state_name(code: &str) -> &'static str {
    match code {
        "01" => "ESTABLISHED",
        "02" => "SYN_SENT",
        "03" => "SYN_RECV",
        "04" => "FIN_WAIT1",
        "05" => "FIN_WAIT2",
        "06" => "TIME_WAIT",
        "07" => "CLOSE",
        "08" => "CLOSE_WAIT",
        "09" => "LAST_ACK",
        "0A" => "LISTEN",
        "0B" => "CLOSING",
        _ => "UNKNOWN",
    }
}

/// Best-effort listening-port inventory with a reverse pid lookup, grounded
/// on the same `/proc/<pid>/fd` scanning idiom `get_fd_count` uses: a
/// listening socket's inode (from `/proc/net/tcp`) is matched against
/// `socket:[inode]` symlinks under each process's fd directory.
#[cfg(target_os = "linux")]
fn collect_open_ports() -> Vec<OpenPort> {
    let mut ports = Vec::new();
    for (path, protocol) in [("/proc/net/tcp", "tcp"), ("/proc/net/tcp6", "tcp")] {
        let Ok(contents) = fs::read_to_string(path) else {
            continue;
        };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            // field 1: "local_address:port" in hex, field 3: state (0A = LISTEN)
            if fields[3] != "0A" {
                continue;
            }
            let Some(port_hex) = fields[1].split(':').nth(1) else {
                continue;
            };
            let Ok(port) = u16::from_str_radix(port_hex, 16) else {
                continue;
            };
            let inode = fields[9];
            ports.push(OpenPort {
                port,
                protocol: protocol.to_string(),
                process_name: find_pid_owning_inode(inode).and_then(process_name_for_pid),
            });
        }
    }
    ports
}

#[cfg(target_os = "linux")]
fn find_pid_owning_inode(inode: &str) -> Option<u32> {
    let target = format!("socket:[{inode}]");
    let proc_dir = fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let fd_dir = format!("/proc/{pid}/fd");
        let Ok(fds) = fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = fs::read_link(fd.path()) {
                if link.to_string_lossy() == target {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn process_name_for_pid(pid: u32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn collect_open_ports() -> Vec<OpenPort> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_system_metrics_has_sane_shape() {
        let mut collector = DirectCollector::new();
        let metrics = collector.collect_system_metrics();
        assert!(metrics.memory_percent >= 0.0);
        assert!(metrics.cpu_percent >= 0.0);
    }

    #[test]
    fn test_sample_process_missing_pid_is_failed() {
        let mut collector = DirectCollector::new();
        let sample = collector.sample_process(u32::MAX);
        assert_eq!(sample.status, ProcessStatus::Failed);
    }

    #[test]
    fn test_system_info_detects_container_indicator() {
        let collector = DirectCollector::new();
        let info = collector.system_info();
        assert_eq!(info.is_container, std::path::Path::new("/.dockerenv").exists());
    }
}
