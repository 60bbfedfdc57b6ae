//! Column transforms: how a keyed input row becomes one column value.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::StringRecord;
use serde::Deserialize;

use super::{DataType, Value};
use crate::error::{Error, Result};

/// Input column names from the header row.
#[derive(Debug, Clone, Default)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Pair a data record with this header. The column count must match.
    pub fn row<'a>(&'a self, record: &'a StringRecord, line: u64) -> Result<Row<'a>> {
        if record.len() != self.len() {
            return Err(Error::malformed(
                line,
                format!("expected {} columns, found {}", self.len(), record.len()),
            ));
        }
        Ok(Row {
            header: self,
            record,
            line,
        })
    }
}

/// One input row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    header: &'a Header,
    record: &'a StringRecord,
    line: u64,
}

impl<'a> Row<'a> {
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.header
            .position(name)
            .and_then(|i| self.record.get(i))
    }

    pub fn require(&self, name: &str) -> Result<&'a str> {
        self.get(name)
            .ok_or_else(|| Error::malformed(self.line, format!("no column named {name:?}")))
    }

    pub fn line(&self) -> u64 {
        self.line
    }
}

pub type ValueFn = Box<dyn Fn(&Row<'_>) -> Result<Option<Value>> + Send + Sync>;

/// A named, typed output column and the function that computes it.
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub value: ValueFn,
}

impl ColumnSpec {
    pub fn new<F>(name: impl Into<String>, data_type: DataType, value: F) -> Self
    where
        F: Fn(&Row<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            data_type,
            value: Box::new(value),
        }
    }
}

impl std::fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Source {
    One(String),
    Many(Vec<String>),
}

impl Source {
    pub fn columns(&self) -> &[String] {
        match self {
            Source::One(name) => std::slice::from_ref(name),
            Source::Many(names) => names,
        }
    }
}

fn default_null_if() -> Vec<String> {
    vec![String::new()]
}

/// Declarative column definition, as read from a transform file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformDef {
    pub name: String,
    pub data_type: DataType,
    pub source: Source,
    /// Source texts that make the value null.
    #[serde(default = "default_null_if")]
    pub null_if: Vec<String>,
    /// Datetime input format: a chrono format string, `unix`, or `unix_ms`.
    /// RFC 3339 when absent.
    #[serde(default)]
    pub format: Option<String>,
}

impl TransformDef {
    pub fn into_column(self) -> Result<ColumnSpec> {
        let arity = self.source.columns().len();
        if arity != self.data_type.width() {
            return Err(Error::invalid_value(
                &self.name,
                format!(
                    "{} needs {} source column(s), got {}",
                    self.data_type,
                    self.data_type.width(),
                    arity
                ),
            ));
        }
        if self.format.is_some() && self.data_type != DataType::Datetime {
            return Err(Error::invalid_value(
                &self.name,
                "format only applies to datetime columns",
            ));
        }

        let TransformDef {
            name,
            data_type,
            source,
            null_if,
            format,
        } = self;
        let sources = source.columns().to_vec();
        let column = name.clone();

        Ok(ColumnSpec::new(name, data_type, move |row| {
            let mut raw = Vec::with_capacity(sources.len());
            for source in &sources {
                let text = row.require(source)?;
                if null_if.iter().any(|n| n == text) {
                    return Ok(None);
                }
                raw.push(text);
            }
            parse_value(&column, data_type, &raw, format.as_deref(), row.line()).map(Some)
        }))
    }
}

fn parse_number(column: &str, text: &str, line: u64) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::malformed(line, format!("{column}: {text:?} is not a number")))
}

fn parse_bool(column: &str, text: &str, line: u64) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Ok(true),
        "0" | "false" | "f" | "no" | "n" => Ok(false),
        _ => Err(Error::malformed(
            line,
            format!("{column}: {text:?} is not a boolean"),
        )),
    }
}

fn parse_datetime(column: &str, text: &str, format: Option<&str>, line: u64) -> Result<DateTime<Utc>> {
    let text = text.trim();
    let bad = || Error::malformed(line, format!("{column}: {text:?} is not a valid datetime"));

    match format {
        None => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| bad()),
        Some("unix") => text
            .parse::<i64>()
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .ok_or_else(bad),
        Some("unix_ms") => text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(bad),
        Some(fmt) => NaiveDateTime::parse_from_str(text, fmt)
            .map(|naive| naive.and_utc())
            .map_err(|_| bad()),
    }
}

fn parse_value(
    column: &str,
    data_type: DataType,
    raw: &[&str],
    format: Option<&str>,
    line: u64,
) -> Result<Value> {
    let number = |i: usize| parse_number(column, raw[i], line);

    Ok(match data_type {
        DataType::Boolean => Value::Boolean(parse_bool(column, raw[0], line)?),
        DataType::String => Value::String(raw[0].to_owned()),
        DataType::Float => Value::Float(number(0)?),
        DataType::Vec2 => Value::Vec2([number(0)?, number(1)?]),
        DataType::Vec3 => Value::Vec3([number(0)?, number(1)?, number(2)?]),
        DataType::Vec4 => Value::Vec4([number(0)?, number(1)?, number(2)?, number(3)?]),
        DataType::Datetime => Value::Datetime(parse_datetime(column, raw[0], format, line)?),
    })
}

pub fn parse_transforms(json: &str) -> Result<Vec<ColumnSpec>> {
    let defs: Vec<TransformDef> = serde_json::from_str(json)?;
    defs.into_iter().map(TransformDef::into_column).collect()
}

pub fn load_transforms<P: AsRef<Path>>(path: P) -> Result<Vec<ColumnSpec>> {
    parse_transforms(&fs::read_to_string(path)?)
}
