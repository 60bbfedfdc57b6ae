use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use csv::StringRecord;
use log::{debug, info};
use serde::Serialize;

use super::stats::{Accumulator, ColumnStats};
use super::transform::{ColumnSpec, Header};
use super::{DataType, Value};
use crate::error::{Error, Result};
use crate::format::floats_to_bytes;

/// Written in place of every float of a null value. Real data can never take
/// this value.
pub const NULL_SENTINEL: f32 = f32::MAX;

/// Final per-column metadata, serialized into the schema side file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub stats: ColumnStats,
    /// Dictionary for string columns, in first-seen order. The binary stream
    /// stores indices into it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<Vec<String>>,
}

struct ColumnState {
    stats: Accumulator,
    value_set: Vec<String>,
    value_index: HashMap<String, usize>,
}

impl ColumnState {
    fn new(data_type: DataType) -> Self {
        Self {
            stats: Accumulator::new(data_type),
            value_set: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    fn intern(&mut self, value: &str) -> usize {
        if let Some(&index) = self.value_index.get(value) {
            return index;
        }
        let index = self.value_set.len();
        self.value_set.push(value.to_owned());
        self.value_index.insert(value.to_owned(), index);
        index
    }
}

/// Single-pass encoder: rows in, fixed-width f32 rows out, statistics on the
/// side.
pub struct SchemaEncoder<W: Write> {
    columns: Vec<ColumnSpec>,
    state: Vec<ColumnState>,
    header: Option<Header>,
    out: W,
    scratch: Vec<f32>,
    rows: u64,
}

impl<W: Write> SchemaEncoder<W> {
    pub fn new(columns: Vec<ColumnSpec>, out: W) -> Self {
        let state = columns
            .iter()
            .map(|c| ColumnState::new(c.data_type))
            .collect();
        Self {
            columns,
            state,
            header: None,
            out,
            scratch: Vec::new(),
            rows: 0,
        }
    }

    /// Floats written per row.
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(|c| c.data_type.width()).sum()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn set_header(&mut self, header: Header) {
        debug!("input columns: {:?}", header.names());
        self.header = Some(header);
    }

    /// Feed one raw record. The first record is taken as the header.
    pub fn push_record(&mut self, record: &StringRecord, line: u64) -> Result<()> {
        match self.header.take() {
            None => {
                self.set_header(Header::new(record.iter()));
                Ok(())
            }
            Some(header) => {
                let result = header
                    .row(record, line)
                    .and_then(|row| self.encode_row_values(&row));
                self.header = Some(header);
                result
            }
        }
    }

    fn encode_row_values(&mut self, row: &super::Row<'_>) -> Result<()> {
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = (column.value)(row)?;
            if let Some(v) = &value {
                check_value(column, v)?;
            }
            values.push(value);
        }
        self.write_values(values)
    }

    /// Encode values for one row that were computed elsewhere. They are
    /// checked against the declared types before anything is written.
    pub fn encode_values(&mut self, values: Vec<Option<Value>>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::invalid_value(
                "<row>",
                format!("expected {} values, got {}", self.columns.len(), values.len()),
            ));
        }
        for (column, value) in self.columns.iter().zip(&values) {
            if let Some(v) = value {
                check_value(column, v)?;
            }
        }
        self.write_values(values)
    }

    fn write_values(&mut self, values: Vec<Option<Value>>) -> Result<()> {
        self.scratch.clear();

        for ((column, state), value) in self.columns.iter().zip(&mut self.state).zip(values) {
            let Some(value) = value else {
                self.scratch
                    .extend(std::iter::repeat(NULL_SENTINEL).take(column.data_type.width()));
                continue;
            };

            state.stats.observe(&value);
            match value {
                Value::Boolean(b) => self.scratch.push(if b { 1.0 } else { 0.0 }),
                Value::String(s) => self.scratch.push(state.intern(&s) as f32),
                Value::Datetime(dt) => self.scratch.push(dt.timestamp() as f32),
                other => {
                    let components = other.components().unwrap_or_default();
                    self.scratch.extend(components.iter().map(|&c| c as f32));
                }
            }
        }

        debug_assert_eq!(self.scratch.len(), self.row_width());
        self.out.write_all(&floats_to_bytes(&self.scratch))?;
        self.rows += 1;
        Ok(())
    }

    /// Finalize statistics and hand back the sink. Fails if any column never
    /// saw a value.
    pub fn finish(mut self) -> Result<(Vec<ColumnSchema>, W)> {
        self.out.flush()?;
        let row_width = self.row_width();

        let mut schema = Vec::with_capacity(self.columns.len());
        for (column, state) in self.columns.iter().zip(self.state) {
            if state.stats.nonnull() == 0 {
                return Err(Error::UnresolvedColumn(column.name.clone()));
            }
            schema.push(ColumnSchema {
                name: column.name.clone(),
                data_type: column.data_type,
                stats: state.stats.finish(),
                value_set: (column.data_type == DataType::String).then_some(state.value_set),
            });
        }

        info!("encoded {} rows of {} floats", self.rows, row_width);
        Ok((schema, self.out))
    }
}

/// Type and range checks for one non-null value.
fn check_value(column: &ColumnSpec, value: &Value) -> Result<()> {
    let found = value.data_type();
    if found != column.data_type {
        return Err(Error::TypeMismatch {
            column: column.name.clone(),
            expected: column.data_type,
            found,
        });
    }

    if let Some(components) = value.components() {
        for &c in components {
            if !c.is_finite() {
                return Err(Error::invalid_value(
                    &column.name,
                    format!("number is not finite: {c}"),
                ));
            }
            if c as f32 == NULL_SENTINEL || (c as f32).is_infinite() {
                return Err(Error::invalid_value(
                    &column.name,
                    format!("{c} does not fit below the null sentinel"),
                ));
            }
        }
    }

    Ok(())
}

/// Run the encoder over delimited text. `keep` is asked once per data row;
/// rows it rejects are skipped without touching statistics.
pub fn encode_stream<R, W, K>(
    input: R,
    delimiter: u8,
    columns: Vec<ColumnSpec>,
    out: W,
    mut keep: K,
) -> Result<(Vec<ColumnSchema>, W)>
where
    R: Read,
    W: Write,
    K: FnMut() -> bool,
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input);

    let mut encoder = SchemaEncoder::new(columns, out);
    let mut record = StringRecord::new();
    let mut skipped = 0u64;

    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        if encoder.header().is_some() && !keep() {
            skipped += 1;
            continue;
        }
        encoder.push_record(&record, line)?;
    }

    debug!("sampling skipped {skipped} rows");
    encoder.finish()
}

pub fn write_schema<P: AsRef<Path>>(path: P, schema: &[ColumnSchema]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut file, schema)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::floats_from_bytes;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        floats_from_bytes(bytes).unwrap()
    }

    #[test]
    fn rows_are_fixed_width_in_column_order() {
        let columns = vec![
            ColumnSpec::new("flag", DataType::Boolean, |row| {
                Ok(Some(Value::Boolean(row.require("f")? == "1")))
            }),
            ColumnSpec::new("pos", DataType::Vec2, |row| {
                Ok(Some(Value::Vec2([
                    row.require("x")?.parse().unwrap_or(0.0),
                    row.require("y")?.parse().unwrap_or(0.0),
                ])))
            }),
            ColumnSpec::new("kind", DataType::String, |row| {
                Ok(Some(Value::String(row.require("k")?.to_owned())))
            }),
        ];

        let input = "f,x,y,k\n1,2.5,3,bus\n0,4,5,tram\n1,6,7,bus\n";
        let (schema, out) = encode_stream(input.as_bytes(), b',', columns, Vec::new(), || true)
            .unwrap();

        assert_eq!(
            floats(&out),
            vec![
                1.0, 2.5, 3.0, 0.0, //
                0.0, 4.0, 5.0, 1.0, //
                1.0, 6.0, 7.0, 0.0,
            ]
        );
        assert_eq!(
            schema[2].value_set,
            Some(vec!["bus".to_owned(), "tram".to_owned()])
        );
        assert_eq!(schema[0].value_set, None);
    }

    #[test]
    fn nulls_fill_the_whole_width_with_the_sentinel() {
        let columns = vec![ColumnSpec::new("p", DataType::Vec3, |row| {
            Ok(match row.require("a")? {
                "" => None,
                _ => Some(Value::Vec3([1.0, 2.0, 3.0])),
            })
        })];
        let (_, out) =
            encode_stream("a\n\"\"\nz\n".as_bytes(), b',', columns, Vec::new(), || true).unwrap();
        assert_eq!(
            floats(&out),
            vec![NULL_SENTINEL, NULL_SENTINEL, NULL_SENTINEL, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn type_mismatch_fails_before_the_row_is_written() {
        let columns = vec![
            ColumnSpec::new("ok", DataType::Float, |_| Ok(Some(Value::Float(1.0)))),
            ColumnSpec::new("fare", DataType::Float, |row| {
                Ok(Some(Value::String(row.require("fare")?.to_owned())))
            }),
        ];
        let mut encoder = SchemaEncoder::new(columns, Vec::new());
        encoder
            .push_record(&StringRecord::from(vec!["fare"]), 1)
            .unwrap();
        let err = encoder
            .push_record(&StringRecord::from(vec!["12"]), 2)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TypeMismatch { ref column, expected: DataType::Float, found: DataType::String }
                if column == "fare"
        ));
        assert_eq!(encoder.rows_written(), 0);
        assert!(encoder.out.is_empty());
    }

    #[test]
    fn null_rows_are_left_out_of_statistics() {
        let columns = vec![ColumnSpec::new("p", DataType::Float, |row| {
            let p: f64 = row.require("p")?.parse().unwrap_or(0.0);
            Ok((p != 0.0).then_some(Value::Float(p)))
        })];
        let input = "p,s,f\n10,100,5\n0,0,0\n";
        let (schema, _) = encode_stream(input.as_bytes(), b',', columns, Vec::new(), || true)
            .unwrap();

        let json = serde_json::to_value(&schema[0].stats).unwrap();
        assert_eq!(json["counts"]["nonnull"], 1);
        assert_eq!(json["counts"]["sum"], 10.0);
        assert_eq!(json["extent"], serde_json::json!([10.0, 10.0]));
        assert_eq!(json["mean"], 10.0);
    }

    #[test]
    fn all_null_column_is_fatal_at_finish() {
        let columns = vec![ColumnSpec::new("never", DataType::Float, |_| Ok(None))];
        let err = encode_stream("a\n1\n2\n".as_bytes(), b',', columns, Vec::new(), || true)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedColumn(name) if name == "never"));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let columns = vec![ColumnSpec::new("x", DataType::Float, |_| {
            Ok(Some(Value::Float(f64::NAN)))
        })];
        let err = encode_stream("a\n1\n".as_bytes(), b',', columns, Vec::new(), || true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn sampling_skips_rows_but_never_the_header() {
        let columns = vec![ColumnSpec::new("a", DataType::Float, |row| {
            Ok(Some(Value::Float(row.require("a")?.parse().unwrap_or(0.0))))
        })];
        let mut n = 0;
        let (schema, out) = encode_stream(
            "a\n1\n2\n3\n4\n".as_bytes(),
            b',',
            columns,
            Vec::new(),
            || {
                n += 1;
                n % 2 == 0
            },
        )
        .unwrap();
        assert_eq!(floats(&out), vec![2.0, 4.0]);
        let json = serde_json::to_value(&schema[0].stats).unwrap();
        assert_eq!(json["counts"]["nonnull"], 2);
    }

    #[test]
    fn tab_delimited_input() {
        let columns = vec![ColumnSpec::new("b", DataType::Float, |row| {
            Ok(Some(Value::Float(row.require("b")?.parse().unwrap_or(0.0))))
        })];
        let (_, out) =
            encode_stream("a\tb\nx\t7\n".as_bytes(), b'\t', columns, Vec::new(), || true)
                .unwrap();
        assert_eq!(floats(&out), vec![7.0]);
    }

    #[test]
    fn schema_file_round_trips_through_json() {
        let columns = vec![ColumnSpec::new("kind", DataType::String, |row| {
            Ok(Some(Value::String(row.require("k")?.to_owned())))
        })];
        let (schema, _) =
            encode_stream("k\nbus\nbus\n".as_bytes(), b',', columns, Vec::new(), || true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        write_schema(&path, &schema).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "kind",
                "dataType": "string",
                "stats": { "counts": { "bus": 2 } },
                "valueSet": ["bus"]
            }])
        );
    }
}
