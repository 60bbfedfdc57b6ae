//! Schema-driven streaming column encoder.
//!
//! Every row is turned into the same fixed number of f32 values, column after
//! column, so the output needs no per-row headers. Column metadata (types,
//! string dictionaries, running statistics) goes to a JSON side file once the
//! input ends.

mod encoder;
mod stats;
mod transform;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::encoder::{encode_stream, write_schema, ColumnSchema, SchemaEncoder, NULL_SENTINEL};
pub use self::stats::{Accumulator, ColumnStats, Counts, Numeric};
pub use self::transform::{
    load_transforms, parse_transforms, ColumnSpec, Header, Row, Source, TransformDef, ValueFn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    String,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Datetime,
}

impl DataType {
    /// Floats this type occupies in a row.
    pub fn width(self) -> usize {
        match self {
            DataType::Vec2 => 2,
            DataType::Vec3 => 3,
            DataType::Vec4 => 4,
            DataType::Boolean | DataType::String | DataType::Float | DataType::Datetime => 1,
        }
    }

    /// Float, vectors and datetimes keep sums and extents; the rest keep
    /// histograms.
    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Boolean | DataType::String)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::String => "string",
            DataType::Float => "float",
            DataType::Vec2 => "vec2",
            DataType::Vec3 => "vec3",
            DataType::Vec4 => "vec4",
            DataType::Datetime => "datetime",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column value for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    String(String),
    Float(f64),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Vec4([f64; 4]),
    Datetime(DateTime<Utc>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) => DataType::String,
            Value::Float(_) => DataType::Float,
            Value::Vec2(_) => DataType::Vec2,
            Value::Vec3(_) => DataType::Vec3,
            Value::Vec4(_) => DataType::Vec4,
            Value::Datetime(_) => DataType::Datetime,
        }
    }

    /// Components of a numeric-family value; datetimes are unix seconds.
    pub fn components(&self) -> Option<&[f64]> {
        match self {
            Value::Float(v) => Some(std::slice::from_ref(v)),
            Value::Vec2(v) => Some(&v[..]),
            Value::Vec3(v) => Some(&v[..]),
            Value::Vec4(v) => Some(&v[..]),
            Value::Boolean(_) | Value::String(_) | Value::Datetime(_) => None,
        }
    }

    pub fn unix_seconds(&self) -> Option<i64> {
        match self {
            Value::Datetime(dt) => Some(dt.timestamp()),
            _ => None,
        }
    }
}
