//! Run directory lock file.

use crate::constants::LOCK_FILE_NAME;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Lock file content for debugging.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process ID that holds the lock.
    pub pid: u32,
    /// Hostname of the machine.
    pub hostname: String,
    /// When the lock was acquired.
    pub started: DateTime<Utc>,
    /// Run directory the lock guards.
    pub run_dir: PathBuf,
}

/// RAII guard giving one process exclusive append access to a run's logs.
pub struct RunLock {
    lock_path: PathBuf,
}

impl RunLock {
    /// Acquire the lock for `run_dir`, failing fast if it is already held.
    pub fn acquire(run_dir: &Path) -> Result<Self> {
        let lock_path = Self::lock_path_for(run_dir);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path);

        match file {
            Ok(mut f) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    hostname: current_hostname(),
                    started: Utc::now(),
                    run_dir: run_dir.to_path_buf(),
                };

                let json = serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string());
                let _ = f.write_all(json.as_bytes());

                register_lock(&lock_path);

                Ok(Self { lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::RunLocked { path: lock_path })
            }
            Err(e) => Err(Error::LockCreate {
                path: lock_path,
                source: e,
            }),
        }
    }

    /// Acquire the lock, first taking over one left behind by a process
    /// that is gone or that is older than `stale_after`.
    pub fn acquire_or_reclaim(run_dir: &Path, stale_after: Option<Duration>) -> Result<Self> {
        Self::clear_stale(run_dir, stale_after)?;
        Self::acquire(run_dir)
    }

    /// Fail with [`Error::RunLocked`] if a live lock guards `run_dir`.
    ///
    /// A stale lock is removed. Nothing is left behind in the directory.
    pub fn clear_stale(run_dir: &Path, stale_after: Option<Duration>) -> Result<()> {
        let lock_path = Self::lock_path_for(run_dir);
        if !lock_path.exists() {
            return Ok(());
        }
        match Self::stale_reason(run_dir, stale_after) {
            Some(reason) => {
                warn!("Removing stale lock {} ({reason})", lock_path.display());
                Self::remove_stale(run_dir)
            }
            None => Err(Error::RunLocked { path: lock_path }),
        }
    }

    /// Why an existing lock may be taken over, or `None` if its holder
    /// may still be running.
    pub fn stale_reason(run_dir: &Path, stale_after: Option<Duration>) -> Option<String> {
        if let Some(info) = Self::holder(run_dir)
            && info.hostname == current_hostname()
            && !process_alive(info.pid)
        {
            return Some(format!(
                "pid {} on {} is not running, started {}",
                info.pid, info.hostname, info.started
            ));
        }
        if let Some(max_age) = stale_after
            && Self::is_stale(run_dir, max_age)
        {
            return Some(format!("older than {}s", max_age.as_secs()));
        }
        None
    }

    /// Whether the lock file was last modified more than `max_age` ago.
    pub fn is_stale(run_dir: &Path, max_age: Duration) -> bool {
        let lock_path = Self::lock_path_for(run_dir);
        if let Ok(metadata) = fs::metadata(&lock_path)
            && let Ok(modified) = metadata.modified()
        {
            return modified.elapsed().unwrap_or_default() > max_age;
        }
        false
    }

    /// Lock file path for a run directory.
    pub fn lock_path_for(run_dir: &Path) -> PathBuf {
        run_dir.join(LOCK_FILE_NAME)
    }

    /// Whether `run_dir` is currently locked.
    pub fn is_locked(run_dir: &Path) -> bool {
        Self::lock_path_for(run_dir).exists()
    }

    /// Read the holder of an existing lock.
    pub fn holder(run_dir: &Path) -> Option<LockInfo> {
        let contents = fs::read_to_string(Self::lock_path_for(run_dir)).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Remove a lock left behind by a crashed process. A missing lock is not an error.
    pub fn remove_stale(run_dir: &Path) -> Result<()> {
        let lock_path = Self::lock_path_for(run_dir);
        match fs::remove_file(&lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::LockRemove {
                path: lock_path,
                source: e,
            }),
        }
    }
}

fn current_hostname() -> String {
    hostname::get().map_or_else(
        |_| "unknown".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness check the holder is assumed alive; only the age rule applies.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        unregister_lock(&self.lock_path);
    }
}

/// Global registry of active lock paths for cleanup on signal.
static ACTIVE_LOCKS: std::sync::LazyLock<std::sync::Mutex<Vec<PathBuf>>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(Vec::new()));

fn register_lock(path: &Path) {
    if let Ok(mut locks) = ACTIVE_LOCKS.lock() {
        locks.push(path.to_path_buf());
    }
}

fn unregister_lock(path: &Path) {
    if let Ok(mut locks) = ACTIVE_LOCKS.lock() {
        locks.retain(|p| p != path);
    }
}

/// Remove every lock held by this process. Called from the Ctrl+C handler.
pub fn cleanup_all_locks() {
    if let Ok(locks) = ACTIVE_LOCKS.lock() {
        for lock_path in locks.iter() {
            let _ = fs::remove_file(lock_path);
        }
    }
}
