//! Persisted pipeline artifacts: append-only logs and progress reporting.

mod csv;
pub mod progress;
mod types;
mod writer;

pub use csv::{CsvAppendLog, LogContents, read_log, write_log};
pub use types::{FetchRecord, PredictionRecord, probability_column};
pub use writer::LogRecord;
