// ProcessGuard - Log Store
//
// Per-process rotating log files under `<base>/<name>/<name>.log` (the
// current file) plus `<name>_<ts>_archived.log` for everything rotated out,
// with an in-memory ring of the most recent lines for fast tailing. Grounded
// on `metrics/storage.rs`'s base-directory-plus-rotation-threshold shape
// (10MB per file, tokio::fs for I/O) and on `log_manager.py`'s
// rename-then-reopen rotation, adapted from a metrics cache to a per-line
// append log.

use crate::error::{Result, UserError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;

/// Pre-write rotation threshold.
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// In-memory tail ring cap per process.
pub const LINE_RING_CAP: usize = 1000;

struct OpenLog {
    file: File,
    path: PathBuf,
    size: u64,
    lines: VecDeque<String>,
}

/// One log file on disk for a process, as returned by `list_log_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub is_current: bool,
}

/// Per-process rotating file log, plus an in-memory tail ring for
/// `tail_log_file` without re-reading the file from disk on every poll.
pub struct LogStore {
    base_dir: PathBuf,
    open: RwLock<HashMap<String, OpenLog>>,
}

impl LogStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            open: RwLock::new(HashMap::new()),
        }
    }

    fn process_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Path of the current (not-yet-rotated) file for `name`. Stable across
    /// restarts so a reopened process resumes appending to the same file
    /// instead of fragmenting into a new one.
    fn current_file_path(&self, name: &str) -> PathBuf {
        self.process_dir(name).join(format!("{name}.log"))
    }

    async fn open_new_file(&self, name: &str) -> Result<OpenLog> {
        let dir = self.process_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;

        let path = self.current_file_path(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        let size = file
            .metadata()
            .await
            .map(|m| m.len())
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;

        Ok(OpenLog {
            file,
            path,
            size,
            lines: VecDeque::with_capacity(LINE_RING_CAP),
        })
    }

    /// Closes `old`'s handle and renames it to an `_archived.log` file so
    /// `open_new_file` can claim the current filename again.
    async fn archive_current_file(&self, name: &str, old: OpenLog) -> Result<()> {
        drop(old.file);
        let archived_path = self
            .process_dir(name)
            .join(format!("{name}_{}_archived.log", Utc::now().timestamp_millis()));
        fs::rename(&old.path, &archived_path)
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        Ok(())
    }

    /// Appends one line, archiving the current file and opening a fresh one
    /// first if the current one would exceed the size threshold.
    pub async fn append(&self, name: &str, line: &str) -> Result<()> {
        let mut open = self.open.write().await;

        if !open.contains_key(name) {
            let log = self.open_new_file(name).await?;
            open.insert(name.to_string(), log);
        } else if open.get(name).unwrap().size + line.len() as u64 + 1 > MAX_FILE_SIZE_BYTES {
            let old = open.remove(name).unwrap();
            self.archive_current_file(name, old).await?;
            let log = self.open_new_file(name).await?;
            open.insert(name.to_string(), log);
        }

        let entry = open.get_mut(name).unwrap();
        let data = format!("{line}\n");
        entry
            .file
            .write_all(data.as_bytes())
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        entry.size += data.len() as u64;

        entry.lines.push_back(line.to_string());
        if entry.lines.len() > LINE_RING_CAP {
            entry.lines.pop_front();
        }

        Ok(())
    }

    /// Returns the most recent lines held in the in-memory ring, falling
    /// back to reading the current file on disk if nothing is cached yet
    /// (e.g. right after a daemon restart, before anything new is written).
    pub async fn tail_log_file(&self, name: &str, n: usize) -> Result<Vec<String>> {
        {
            let open = self.open.read().await;
            if let Some(log) = open.get(name) {
                if !log.lines.is_empty() {
                    let start = log.lines.len().saturating_sub(n);
                    return Ok(log.lines.iter().skip(start).cloned().collect());
                }
            }
        }

        let path = self.current_file_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        let mut reader = BufReader::new(file).lines();
        let mut all = Vec::new();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?
        {
            all.push(line);
        }
        let start = all.len().saturating_sub(n);
        Ok(all.split_off(start))
    }

    /// All log files for a process, newest first by modification time.
    pub async fn list_log_files(&self, name: &str) -> Result<Vec<LogFileInfo>> {
        let dir = self.process_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let current_path = self.current_file_path(name);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UserError::log_store_error(name, &e.to_string()))?
        {
            let path = entry.path();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
            let mtime: DateTime<Utc> = metadata
                .modified()
                .map_err(|e| UserError::log_store_error(name, &e.to_string()))?
                .into();

            files.push(LogFileInfo {
                name: name.to_string(),
                is_current: path == current_path,
                size: metadata.len(),
                mtime,
                path,
            });
        }
        files.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        Ok(files)
    }

    /// Drops the open handle and deletes every log file for a process, e.g.
    /// when it's unregistered.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.open.write().await.remove(name);
        let dir = self.process_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .await
                .map_err(|e| UserError::log_store_error(name, &e.to_string()))?;
        }
        Ok(())
    }

    /// Deletes log files older than `retention_days`, returning the count
    /// removed.
    pub async fn gc(&self, retention_days: i64) -> Result<usize> {
        if !self.base_dir.exists() {
            return Ok(0);
        }

        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut removed = 0;

        let mut process_dirs = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| UserError::log_store_error("*", &e.to_string()))?;
        while let Some(process_dir) = process_dirs
            .next_entry()
            .await
            .map_err(|e| UserError::log_store_error("*", &e.to_string()))?
        {
            if !process_dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = fs::read_dir(process_dir.path())
                .await
                .map_err(|e| UserError::log_store_error("*", &e.to_string()))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| UserError::log_store_error("*", &e.to_string()))?
            {
                if let Ok(metadata) = file.metadata().await {
                    if let Ok(modified) = metadata.modified() {
                        let modified: chrono::DateTime<Utc> = modified.into();
                        if modified < cutoff {
                            if fs::remove_file(file.path()).await.is_ok() {
                                removed += 1;
                            }
                        }
                    }
                }
            }
        }

        Ok(removed)
    }
}

/// Resolves the current (unrotated-yet) log file path for `name`, used by
/// external tail consumers that want a stable handle rather than going
/// through `tail_log_file`.
pub fn current_log_path(base_dir: &Path, name: &str) -> Option<PathBuf> {
    let path = base_dir.join(name).join(format!("{name}.log"));
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_append_and_tail() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());

        store.append("worker", "line one").await.unwrap();
        store.append("worker", "line two").await.unwrap();

        let tail = store.tail_log_file("worker", 10).await.unwrap();
        assert_eq!(tail, vec!["line one".to_string(), "line two".to_string()]);
    }

    #[tokio::test]
    async fn test_list_log_files_empty_for_unknown_process() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let files = store.list_log_files("ghost").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_directory() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        store.append("worker", "line one").await.unwrap();
        store.remove("worker").await.unwrap();
        assert!(store.list_log_files("worker").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_creates_new_file_past_threshold() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());

        // Force a rotation by writing past the threshold directly on the
        // in-memory size counter rather than generating 10MB of test data.
        {
            let mut open = store.open.write().await;
            let log = store.open_new_file("worker").await.unwrap();
            open.insert("worker".to_string(), log);
            open.get_mut("worker").unwrap().size = MAX_FILE_SIZE_BYTES;
        }
        store.append("worker", "overflow").await.unwrap();

        let files = store.list_log_files("worker").await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.path.ends_with("worker.log") && f.is_current));
        assert!(files
            .iter()
            .any(|f| f.path.to_string_lossy().ends_with("_archived.log") && !f.is_current));
    }
}
