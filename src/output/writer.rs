//! Log record trait definition.

/// A row that can be appended to a CSV log.
pub trait LogRecord {
    /// Field values in header order.
    fn to_row(&self) -> Vec<String>;
}
