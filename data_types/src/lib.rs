//! Shared data types used across the ingestion engine.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt;

/// Maximum byte length of a canonical series name.
pub const MAX_SERIES_NAME_LEN: usize = 1024;

/// Unique identifier of a series within a database lifetime.
///
/// Ids are allocated monotonically starting at 1 and are never reused;
/// 0 is never handed out, so it remains usable as an on-the-wire "no match"
/// sentinel by front ends that cannot carry an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(u64);

impl SeriesId {
    /// Wrap a raw id.
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// The raw id value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of an ingestion session for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id.
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// The raw id value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a block in the block store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicAddr(u64);

impl LogicAddr {
    /// Wrap a raw address.
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// The raw address value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payload carried by a [`Sample`].
///
/// Only [`FieldValue::Float`] is accepted by the write path; the remaining
/// variants exist so the front end can hand over whatever it parsed and get
/// a well-defined rejection back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// A 64-bit float value.
    Float(f64),
    /// A 64-bit signed integer value.
    Integer(i64),
    /// A boolean value.
    Boolean(bool),
}

/// A single measurement addressed to a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The series this sample belongs to.
    pub series_id: SeriesId,
    /// Timestamp, nanoseconds since the epoch.
    pub timestamp: i64,
    /// The sample payload.
    pub value: FieldValue,
}

impl Sample {
    /// Construct a float sample.
    pub const fn float(series_id: SeriesId, timestamp: i64, value: f64) -> Self {
        Self {
            series_id,
            timestamp,
            value: FieldValue::Float(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip_and_display() {
        let id = SeriesId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");

        let addr = LogicAddr::new(7);
        assert_eq!(addr.get(), 7);
        assert_eq!(addr.to_string(), "7");
    }

    #[test]
    fn float_sample_constructor() {
        let s = Sample::float(SeriesId::new(1), 100, 1.5);
        assert_eq!(s.timestamp, 100);
        assert_eq!(s.value, FieldValue::Float(1.5));
    }
}
