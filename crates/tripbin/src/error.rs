//! Error type shared by every stage of the pipeline.
//!
//! All of these are fatal: the pipeline has no per-row recovery mode. Rows
//! dropped by sampling or filtering never reach this type.

use thiserror::Error;

use crate::schema::DataType;

#[derive(Error, Debug)]
pub enum Error {
    /// The stream ended in the middle of a record.
    #[error("truncated stream: record at float {offset} needs {needed} floats, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A byte buffer whose length is not a whole number of f32 values.
    #[error("stream length {0} is not a multiple of 4 bytes")]
    Misaligned(usize),

    /// A record header that cannot be a point count or id.
    #[error("bad record header at float {offset}: {reason}")]
    BadHeader { offset: usize, reason: String },

    /// Wrong column count, unparseable number, and similar input problems.
    #[error("malformed input on line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// A column's value function returned a different type than declared.
    #[error("value returned for {column} is of dataType {found}, not the expected dataType {expected}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: DataType,
    },

    #[error("invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    /// No row ever produced a value for this column.
    #[error("dataType is unresolved for {0}; every value returned was null")]
    UnresolvedColumn(String),

    #[error("unknown time zone {0:?}")]
    UnknownTimeZone(String),

    #[error("trajectory {0:?} has no points")]
    EmptyTrajectory(Option<u32>),

    #[error("layout {0} requires a trajectory id")]
    MissingId(&'static str),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    GeoJson(#[from] geojson::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            line,
            reason: reason.into(),
        }
    }

    pub fn invalid_value(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            column: column.into(),
            reason: reason.into(),
        }
    }
}
