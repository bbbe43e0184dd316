//! Resume checkpoints derived from append-only logs.
//!
//! A checkpoint is the set of identifiers already present in a log. Stages
//! take one snapshot before scheduling work and drop every item whose
//! identifier is in it, which is what keeps each identifier to at most one
//! row per log across restarts.

use crate::error::{Error, Result};
use crate::output::read_log;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Snapshot of processed identifiers.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    done: HashSet<String>,
}

impl CheckpointStore {
    /// Load identifiers from `column` of the log at `path`.
    ///
    /// A missing or empty log is an empty checkpoint.
    pub fn load(path: &Path, column: &str) -> Result<Self> {
        let contents = read_log(path)?;
        let mut done = HashSet::new();

        if !contents.header.is_empty() {
            let idx = contents.column(column).ok_or_else(|| Error::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            })?;
            done.extend(
                contents
                    .rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(ToString::to_string),
            );
        }

        debug!(
            "Checkpoint {}: {} processed identifier(s)",
            path.display(),
            done.len()
        );

        Ok(Self { done })
    }

    /// Whether `id` has already been processed.
    pub fn contains(&self, id: &str) -> bool {
        self.done.contains(id)
    }

    /// Number of processed identifiers.
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Whether nothing has been processed yet.
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Keep only the items whose key is not in the checkpoint, preserving order.
    pub fn pending<T, F>(&self, items: Vec<T>, key: F) -> Vec<T>
    where
        F: Fn(&T) -> String,
    {
        items
            .into_iter()
            .filter(|item| !self.done.contains(&key(item)))
            .collect()
    }
}
