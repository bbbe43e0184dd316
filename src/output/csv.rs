//! Append-only CSV logs.
//!
//! Logs are opened in append mode and written with the `csv` crate. The header
//! is written only when the file is new; an existing header must match the
//! expected columns. A partial trailing row left by a crash is cut off before
//! appending so every row on disk is complete.

use crate::error::{Error, Result};
use crate::output::LogRecord;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only CSV log with a fixed header.
pub struct CsvAppendLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    columns: usize,
}

impl CsvAppendLog {
    /// Open (or create) a log at `path` with the given header.
    pub fn open(path: &Path, header: &[String]) -> Result<Self> {
        if file_len(path) > 0 {
            repair_tail(path)?;
        }

        let has_content = file_len(path) > 0;
        if has_content {
            let found = read_header(path)?;
            if found != header {
                return Err(Error::LogSchemaMismatch {
                    path: path.to_path_buf(),
                    expected: header.join(","),
                    found: found.join(","),
                });
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !has_content {
            writer
                .write_record(header)
                .map_err(|e| log_write_err(path, e))?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            columns: header.len(),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record (buffered until [`Self::sync`]).
    pub fn append<R: LogRecord>(&mut self, record: &R) -> Result<()> {
        let row = record.to_row();
        if row.len() != self.columns {
            return Err(Error::Internal {
                message: format!(
                    "row has {} fields, log '{}' expects {}",
                    row.len(),
                    self.path.display(),
                    self.columns
                ),
            });
        }
        self.writer
            .write_record(&row)
            .map_err(|e| log_write_err(&self.path, e))
    }

    /// Flush buffered rows and force them to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Header and rows of a CSV log.
#[derive(Debug, Clone, Default)]
pub struct LogContents {
    /// Header fields.
    pub header: Vec<String>,
    /// Complete rows (rows with a wrong field count are dropped).
    pub rows: Vec<csv::StringRecord>,
}

impl LogContents {
    /// Index of a named column.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

/// Read a whole log. A missing file yields empty contents.
pub fn read_log(path: &Path) -> Result<LogContents> {
    if !path.exists() {
        return Ok(LogContents::default());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| log_read_err(path, e))?;

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| log_read_err(path, e))?
        .iter()
        .map(ToString::to_string)
        .collect();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        match result {
            Ok(record) if record.len() == header.len() => rows.push(record),
            Ok(record) => warn!(
                "{}: skipping incomplete row {} ({} of {} fields)",
                path.display(),
                line + 2,
                record.len(),
                header.len()
            ),
            Err(e) => warn!("{}: skipping unreadable row {}: {e}", path.display(), line + 2),
        }
    }

    Ok(LogContents { header, rows })
}

/// Write a complete log, replacing any existing file.
pub fn write_log<'a, I>(path: &Path, header: &[String], rows: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a csv::StringRecord>,
{
    let mut writer = csv::Writer::from_path(path).map_err(|e| log_write_err(path, e))?;
    writer
        .write_record(header)
        .map_err(|e| log_write_err(path, e))?;

    let mut count = 0;
    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| log_write_err(path, e))?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| log_read_err(path, e))?;
    Ok(reader
        .headers()
        .map_err(|e| log_read_err(path, e))?
        .iter()
        .map(ToString::to_string)
        .collect())
}

/// Cut a trailing partial line left by an interrupted write.
fn repair_tail(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    if bytes.last() == Some(&b'\n') {
        return Ok(());
    }

    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    warn!(
        "{}: discarding {} bytes of incomplete trailing row",
        path.display(),
        bytes.len() - keep
    );

    // A torn header leaves an empty file, which gets a fresh header.
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    Ok(())
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

fn log_read_err(path: &Path, source: csv::Error) -> Error {
    Error::LogRead {
        path: path.to_path_buf(),
        source,
    }
}

fn log_write_err(path: &Path, source: csv::Error) -> Error {
    Error::LogWrite {
        path: path.to_path_buf(),
        source,
    }
}
