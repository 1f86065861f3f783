//! Conversion from raw records into caller-defined value types

use crate::record::Record;

/// A lightweight value type that can be built from a record.
///
/// Returning `None` means the record does not carry what the type needs;
/// fetches skip such records instead of failing.
///
/// ```
/// use dataservice::{FromRecord, Record};
///
/// struct Title(String);
///
/// impl FromRecord for Title {
///     fn from_record(record: &Record) -> Option<Self> {
///         record.get_str("title").map(|t| Title(t.to_string()))
///     }
/// }
/// ```
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> Option<Self>;
}

impl FromRecord for Record {
    fn from_record(record: &Record) -> Option<Self> {
        Some(record.clone())
    }
}

/// Result of a fetch that also reports how many records failed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    /// Converted values in query order
    pub values: Vec<T>,
    /// Records the query matched but conversion rejected
    pub dropped: usize,
}

impl<T> FetchOutcome<T> {
    /// Convert `records` with `convert`, keeping order and counting rejects
    pub fn convert<F>(records: &[Record], convert: F) -> Self
    where
        F: Fn(&Record) -> Option<T>,
    {
        let mut values = Vec::with_capacity(records.len());
        let mut dropped = 0;
        for record in records {
            match convert(record) {
                Some(value) => values.push(value),
                None => dropped += 1,
            }
        }
        Self { values, dropped }
    }

    pub fn is_complete(&self) -> bool {
        self.dropped == 0
    }
}
