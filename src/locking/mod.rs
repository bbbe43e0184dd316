//! Single-writer locking for run directories.

mod file_lock;

pub use file_lock::{LockInfo, RunLock, cleanup_all_locks};
