//! Object storage transfers at run boundaries.

use crate::error::{Error, Result};
use std::future::Future;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Copies local paths to and from a bucket-style remote.
pub trait ObjectStore: Send + Sync {
    /// Copy a local file or directory to `remote`.
    fn upload(&self, local: &Path, remote: &str) -> impl Future<Output = Result<()>> + Send;

    /// Copy `remote` to a local path.
    fn download(&self, remote: &str, local: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Object store driven by an external copy command such as `gsutil`.
///
/// Runs `<command> -m cp -r <src> <dst>`.
#[derive(Debug, Clone)]
pub struct CommandObjectStore {
    command: String,
}

impl CommandObjectStore {
    /// Store using `command` as the copy tool.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Arguments passed to the copy command.
    pub fn copy_args(src: &str, dst: &str) -> Vec<String> {
        vec![
            "-m".to_string(),
            "cp".to_string(),
            "-r".to_string(),
            src.to_string(),
            dst.to_string(),
        ]
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let args = Self::copy_args(src, dst);
        let command_line = format!("{} {}", self.command, args.join(" "));
        debug!("Running: {command_line}");

        let output = Command::new(&self.command)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::StorageCommand {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::StorageCommand {
                command: command_line,
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        info!("Copied {src} -> {dst}");
        Ok(())
    }
}

/// Remote directory holding runs: `<bucket>/runs`.
pub fn remote_runs_path(bucket: &str) -> String {
    format!(
        "{}/{}",
        bucket.trim_end_matches('/'),
        crate::constants::layout::RUNS_DIR
    )
}

/// Remote path of one run: `<bucket>/runs/<run_id>`.
pub fn remote_run_path(bucket: &str, run_id: &str) -> String {
    format!("{}/{run_id}", remote_runs_path(bucket))
}

impl ObjectStore for CommandObjectStore {
    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.copy(&local.to_string_lossy(), remote).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        self.copy(remote, &local.to_string_lossy()).await
    }
}
