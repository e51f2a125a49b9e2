// ProcessGuard - Host Probe, host-overlay mode
//
// When ProcessGuard runs inside a container, sysinfo only sees the
// container's own cgroup-scoped view. This module overlays real host
// numbers by reading /proc directly from wherever the host's filesystem is
// bind-mounted, resolved through HOST_PROC/HOST_SYS/HOST_ROOT (falling back
// to /proc, /sys, / when unset) with /.dockerenv as the container
// indicator. Any field that can't be read from the host falls back to the
// Direct-mode (sysinfo) value it's overlaying, so a partially-mounted host
// filesystem degrades gracefully instead of producing a half-built struct.

use super::{DiskInfo, SystemMetrics};
use std::path::PathBuf;

fn host_proc() -> PathBuf {
    std::env::var("HOST_PROC").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/proc"))
}

fn host_sys() -> PathBuf {
    std::env::var("HOST_SYS").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/sys"))
}

fn host_root() -> PathBuf {
    std::env::var("HOST_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/"))
}

/// Whether the overlay should even be attempted: either HOST_PROC is
/// explicitly set, or we can detect we're inside a container and the
/// default /proc mount is in fact the host's (i.e. --pid=host was used).
pub fn overlay_available() -> bool {
    std::env::var("HOST_PROC").is_ok() || std::path::Path::new("/.dockerenv").exists()
}

/// Applies the host overlay on top of an already-collected Direct-mode
/// snapshot, overwriting only the fields that were read successfully.
pub fn apply_overlay(mut direct: SystemMetrics) -> SystemMetrics {
    let proc_dir = host_proc();
    let sys_dir = host_sys();
    let root_dir = host_root();

    let mut overlaid_any = false;

    if let Some((cpu_percent,)) = read_cpu_percent(&proc_dir) {
        direct.cpu_percent = cpu_percent;
        overlaid_any = true;
    }

    if let Some((total, used, percent)) = read_meminfo(&proc_dir) {
        direct.memory_total_bytes = total;
        direct.memory_used_bytes = used;
        direct.memory_percent = percent;
        overlaid_any = true;
    }

    if let Some(load) = read_loadavg(&proc_dir) {
        direct.load_average = load;
        overlaid_any = true;
    }

    if let Some(disks) = read_mounts(&proc_dir, &root_dir) {
        if !disks.is_empty() {
            direct.disks = disks;
            overlaid_any = true;
        }
    }

    let _ = &sys_dir; // reserved for future thermal/cgroup reads, unused today

    direct.host_overlay_active = overlaid_any;
    direct
}

fn read_cpu_percent(proc_dir: &std::path::Path) -> Option<(f64,)> {
    // /proc/stat needs two samples to compute a percentage; a single read of
    // the "cpu " aggregate line only gives us cumulative jiffies, so this
    // takes two snapshots a short interval apart.
    let first = read_stat_cpu_line(proc_dir)?;
    std::thread::sleep(std::time::Duration::from_millis(100));
    let second = read_stat_cpu_line(proc_dir)?;

    let idle_delta = second.3.saturating_sub(first.3);
    let total_delta = second.0.saturating_sub(first.0);
    if total_delta == 0 {
        return None;
    }
    let busy = total_delta.saturating_sub(idle_delta);
    Some(((busy as f64 / total_delta as f64) * 100.0,))
}

/// Returns (total, user+nice+system+irq+softirq+steal, idle, iowait-inclusive idle).
fn read_stat_cpu_line(proc_dir: &std::path::Path) -> Option<(u64, u64, u64, u64)> {
    let contents = std::fs::read_to_string(proc_dir.join("stat")).ok()?;
    let line = contents.lines().next()?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse::<u64>().ok())
        .collect();
    if fields.len() < 5 {
        return None;
    }
    let user = fields[0];
    let nice = fields[1];
    let system = fields[2];
    let idle = fields[3];
    let iowait = fields.get(4).copied().unwrap_or(0);
    let irq = fields.get(5).copied().unwrap_or(0);
    let softirq = fields.get(6).copied().unwrap_or(0);
    let steal = fields.get(7).copied().unwrap_or(0);

    let idle_all = idle + iowait;
    let total = user + nice + system + idle_all + irq + softirq + steal;
    Some((total, user + nice + system + irq + softirq + steal, idle_all, idle_all))
}

fn read_meminfo(proc_dir: &std::path::Path) -> Option<(u64, u64, f64)> {
    let contents = std::fs::read_to_string(proc_dir.join("meminfo")).ok()?;
    let mut total_kb = None;
    let mut available_kb = None;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb_field(rest);
        }
    }

    let total_kb = total_kb?;
    let available_kb = available_kb.unwrap_or(0);
    let used_kb = total_kb.saturating_sub(available_kb);

    let total_bytes = total_kb * 1024;
    let used_bytes = used_kb * 1024;
    let percent = if total_bytes > 0 {
        used_bytes as f64 / total_bytes as f64 * 100.0
    } else {
        0.0
    };
    Some((total_bytes, used_bytes, percent))
}

fn parse_kb_field(field: &str) -> Option<u64> {
    field.trim().split_whitespace().next()?.parse().ok()
}

fn read_loadavg(proc_dir: &std::path::Path) -> Option<[f64; 3]> {
    let contents = std::fs::read_to_string(proc_dir.join("loadavg")).ok()?;
    let fields: Vec<&str> = contents.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    Some([
        fields[0].parse().ok()?,
        fields[1].parse().ok()?,
        fields[2].parse().ok()?,
    ])
}

/// Reads host mountpoints from /proc/mounts (or /proc/self/mounts if present
/// under the overlay root) and statfs's each through the host_root bind
/// mount, skipping pseudo filesystems.
fn read_mounts(proc_dir: &std::path::Path, root_dir: &std::path::Path) -> Option<Vec<DiskInfo>> {
    let contents = std::fs::read_to_string(proc_dir.join("mounts")).ok()?;
    let mut disks = Vec::new();

    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let mount_point = fields[1];
        let fs_type = fields[2];
        if is_pseudo_fs(fs_type) {
            continue;
        }

        let resolved = if mount_point == "/" {
            root_dir.to_path_buf()
        } else {
            root_dir.join(mount_point.trim_start_matches('/'))
        };

        if let Some((total, used, percent)) = statvfs_usage(&resolved) {
            disks.push(DiskInfo {
                mount_point: mount_point.to_string(),
                total_bytes: total,
                used_bytes: used,
                percent,
            });
        }
    }

    Some(disks)
}

fn is_pseudo_fs(fs_type: &str) -> bool {
    matches!(
        fs_type,
        "proc" | "sysfs" | "tmpfs" | "devtmpfs" | "devpts" | "cgroup" | "cgroup2" | "overlay"
            | "squashfs" | "mqueue" | "debugfs" | "tracefs" | "securityfs" | "pstore"
    )
}

#[cfg(unix)]
fn statvfs_usage(path: &std::path::Path) -> Option<(u64, u64, f64)> {
    let stats = nix::sys::statvfs::statvfs(path).ok()?;
    let block_size = stats.fragment_size();
    let total = stats.blocks() as u64 * block_size;
    let free = stats.blocks_available() as u64 * block_size;
    let used = total.saturating_sub(free);
    let percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Some((total, used, percent))
}

#[cfg(not(unix))]
fn statvfs_usage(_path: &std::path::Path) -> Option<(u64, u64, f64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_meminfo_from_synthetic_proc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal:       16384000 kB\nMemAvailable:    8192000 kB\n",
        )
        .unwrap();

        let (total, used, percent) = read_meminfo(dir.path()).unwrap();
        assert_eq!(total, 16384000 * 1024);
        assert_eq!(used, (16384000 - 8192000) * 1024);
        assert!((percent - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_read_loadavg_from_synthetic_proc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.50 0.40 0.30 1/200 12345\n").unwrap();

        let load = read_loadavg(dir.path()).unwrap();
        assert_eq!(load, [0.50, 0.40, 0.30]);
    }

    #[test]
    fn test_read_meminfo_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_meminfo(dir.path()).is_none());
    }

    #[test]
    fn test_is_pseudo_fs_filters_known_virtual_filesystems() {
        assert!(is_pseudo_fs("tmpfs"));
        assert!(is_pseudo_fs("overlay"));
        assert!(!is_pseudo_fs("ext4"));
        assert!(!is_pseudo_fs("xfs"));
    }
}
