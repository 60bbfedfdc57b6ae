//! The packed trajectory stream.
//!
//! Stream layout (little-endian f32 throughout, no magic, no version tag):
//!   [id]?   : f32   trajectory id           (only if the layout has ids)
//!   count   : f32   number of points N (> 0)
//!   N times : f32 x fields_per_point        (field order fixed by the layout)
//!
//! Records are concatenated with no separator. The reader finds the next
//! record only by skipping `count * fields_per_point` floats, so writer and
//! reader must agree on the [`RecordLayout`] out of band. Integers (ids,
//! counts, booleans) are stored as f32 too and are exact up to 2^24.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::direction::NO_DIRECTION;
use crate::error::{Error, Result};

/// Bytes per stored value.
pub const VALUE_BYTES: usize = 4;

/// Largest integer an f32 holds exactly.
const F32_EXACT_INT: f32 = 16_777_216.0;

/// One per-point value slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Minutes or seconds elapsed in the week (or since day zero).
    Timestamp,
    /// 1.0 when occupied, 0.0 otherwise.
    Occupied,
    /// Radians in [0, 2π), or -1 for "no direction".
    Direction,
    Lng,
    Lat,
}

/// Header shape plus per-point field order. This is the "format version".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: &'static str,
    pub has_id: bool,
    pub fields: &'static [Field],
}

impl RecordLayout {
    /// Cab points without directions.
    pub const CAB_V1: Self = Self {
        name: "cab-v1",
        has_id: true,
        fields: &[Field::Timestamp, Field::Occupied, Field::Lng, Field::Lat],
    };

    /// Cab points with directions.
    pub const CAB_V2: Self = Self {
        name: "cab-v2",
        has_id: true,
        fields: &[
            Field::Timestamp,
            Field::Occupied,
            Field::Direction,
            Field::Lng,
            Field::Lat,
        ],
    };

    /// Plain timestamped positions keyed by id.
    pub const POINTS: Self = Self {
        name: "points",
        has_id: true,
        fields: &[Field::Timestamp, Field::Lng, Field::Lat],
    };

    /// Anonymous trips: one record per trip, no id.
    pub const TRIPS: Self = Self {
        name: "trips",
        has_id: false,
        fields: &[Field::Timestamp, Field::Direction, Field::Lng, Field::Lat],
    };

    pub const ALL: [Self; 4] = [Self::CAB_V1, Self::CAB_V2, Self::POINTS, Self::TRIPS];

    pub fn by_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|layout| layout.name == name)
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        if self.has_id {
            2
        } else {
            1
        }
    }

    #[inline]
    pub fn fields_per_point(&self) -> usize {
        self.fields.len()
    }

    /// Total floats for a record of `points` points.
    #[inline]
    pub fn record_len(&self, points: usize) -> usize {
        self.header_size() + points * self.fields_per_point()
    }

    #[inline]
    pub fn has(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: f64,
    pub occupied: bool,
    pub direction: f32,
    /// `[lng, lat]` in degrees.
    pub position: [f64; 2],
}

impl Point {
    pub fn new(timestamp: f64, position: [f64; 2]) -> Self {
        Self {
            timestamp,
            occupied: false,
            direction: NO_DIRECTION,
            position,
        }
    }

    pub fn with_occupied(mut self, occupied: bool) -> Self {
        self.occupied = occupied;
        self
    }

    pub fn with_direction(mut self, direction: f32) -> Self {
        self.direction = direction;
        self
    }

    #[inline]
    fn field(&self, field: Field) -> f32 {
        match field {
            Field::Timestamp => self.timestamp as f32,
            Field::Occupied => {
                if self.occupied {
                    1.0
                } else {
                    0.0
                }
            }
            Field::Direction => self.direction,
            Field::Lng => self.position[0] as f32,
            Field::Lat => self.position[1] as f32,
        }
    }

    #[inline]
    fn set_field(&mut self, field: Field, value: f32) {
        match field {
            Field::Timestamp => self.timestamp = value as f64,
            Field::Occupied => self.occupied = value == 1.0,
            Field::Direction => self.direction = value,
            Field::Lng => self.position[0] = value as f64,
            Field::Lat => self.position[1] = value as f64,
        }
    }
}

/// An ordered, non-empty run of points for one entity. Points are written in
/// the order given; callers sort or reverse beforehand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    pub id: Option<u32>,
    pub points: Vec<Point>,
}

impl Trajectory {
    pub fn new(id: Option<u32>, points: Vec<Point>) -> Self {
        Self { id, points }
    }

    /// Append this record to `out`: header first, then every point's fields in
    /// layout order.
    pub fn encode_into(&self, layout: &RecordLayout, out: &mut Vec<f32>) -> Result<()> {
        if self.points.is_empty() {
            return Err(Error::EmptyTrajectory(self.id));
        }

        out.reserve(layout.record_len(self.points.len()));

        let start = out.len();
        let count = exact_header(
            self.points.len(),
            start + usize::from(layout.has_id),
            "point count",
        )?;
        if layout.has_id {
            let id = self.id.ok_or(Error::MissingId(layout.name))?;
            out.push(exact_header(id as usize, start, "id")?);
        }
        out.push(count);

        for point in &self.points {
            out.extend(layout.fields.iter().map(|&field| point.field(field)));
        }

        Ok(())
    }

    pub fn encode(&self, layout: &RecordLayout) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(layout.record_len(self.points.len()));
        self.encode_into(layout, &mut out)?;
        Ok(out)
    }

    /// Encode straight to little-endian bytes, ready for a sink.
    pub fn encode_bytes(&self, layout: &RecordLayout) -> Result<Vec<u8>> {
        Ok(floats_to_bytes(&self.encode(layout)?))
    }
}

pub fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    #[cfg(target_endian = "little")]
    {
        bytemuck::cast_slice::<f32, u8>(floats).to_vec()
    }

    #[cfg(not(target_endian = "little"))]
    {
        floats.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Reinterpret a little-endian byte buffer as f32 values. Copies, so the
/// input slice may have any alignment.
pub fn floats_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % VALUE_BYTES != 0 {
        return Err(Error::Misaligned(bytes.len()));
    }

    #[cfg(target_endian = "little")]
    {
        Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
    }

    #[cfg(not(target_endian = "little"))]
    {
        Ok(bytes
            .chunks_exact(VALUE_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Sequential record reader over a decoded float buffer.
///
/// Yields one [`Trajectory`] per stored record. After the first error the
/// iterator is exhausted.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    floats: &'a [f32],
    layout: RecordLayout,
    offset: usize,
}

pub fn decode<'a>(floats: &'a [f32], layout: &RecordLayout) -> Records<'a> {
    Records {
        floats,
        layout: *layout,
        offset: 0,
    }
}

/// Header floats are small non-negative integers; anything else means the
/// reader and writer disagree on the layout.
/// A header integer as f32, refused when f32 cannot hold it exactly.
fn exact_header(value: usize, offset: usize, what: &str) -> Result<f32> {
    if value as f64 > F32_EXACT_INT as f64 {
        return Err(Error::BadHeader {
            offset,
            reason: format!("{what} {value} does not fit exactly in an f32"),
        });
    }
    Ok(value as f32)
}

fn header_int(value: f32, offset: usize, what: &str) -> Result<u32> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > F32_EXACT_INT {
        return Err(Error::BadHeader {
            offset,
            reason: format!("{what} {value} is not a non-negative integer"),
        });
    }
    Ok(value as u32)
}

impl<'a> Records<'a> {
    fn read_record(&mut self) -> Result<Trajectory> {
        let start = self.offset;
        let available = self.floats.len() - start;
        let header = self.layout.header_size();

        if available < header {
            return Err(Error::Truncated {
                offset: start,
                needed: header,
                available,
            });
        }

        let mut p = start;
        let id = if self.layout.has_id {
            let id = header_int(self.floats[p], p, "id")?;
            p += 1;
            Some(id)
        } else {
            None
        };

        let count = header_int(self.floats[p], p, "point count")? as usize;
        p += 1;
        if count == 0 {
            return Err(Error::BadHeader {
                offset: start,
                reason: "record has zero points".into(),
            });
        }

        let fields = self.layout.fields_per_point();
        let needed = count * fields;
        if self.floats.len() - p < needed {
            return Err(Error::Truncated {
                offset: start,
                needed: header + needed,
                available,
            });
        }

        let points = self.floats[p..p + needed]
            .chunks_exact(fields)
            .map(|chunk| {
                let mut point = Point::new(0.0, [0.0, 0.0]);
                for (&field, &value) in self.layout.fields.iter().zip(chunk) {
                    point.set_field(field, value);
                }
                point
            })
            .collect();

        self.offset = p + needed;
        Ok(Trajectory { id, points })
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Trajectory>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.floats.len() {
            return None;
        }

        let record = self.read_record();
        if record.is_err() {
            self.offset = self.floats.len();
        }
        Some(record)
    }
}

/// Writes encoded records to any byte sink. Exactly one writer owns the sink.
pub struct TrajectoryWriter<W: Write> {
    inner: W,
    layout: RecordLayout,
    scratch: Vec<f32>,
    records: u64,
    bytes: u64,
}

impl<W: Write> TrajectoryWriter<W> {
    pub fn new(inner: W, layout: RecordLayout) -> Self {
        Self {
            inner,
            layout,
            scratch: Vec::new(),
            records: 0,
            bytes: 0,
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn write(&mut self, trajectory: &Trajectory) -> Result<()> {
        self.scratch.clear();
        trajectory.encode_into(&self.layout, &mut self.scratch)?;
        let bytes = floats_to_bytes(&self.scratch);
        self.write_encoded(&bytes)
    }

    /// Pass through a record that was already encoded elsewhere (e.g. by a
    /// worker). The bytes must hold whole records for this writer's layout.
    pub fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.records += 1;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    floats_from_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    floats_from_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(
    path: P,
    layout: &RecordLayout,
    trajectories: &[Trajectory],
) -> Result<()> {
    let mut writer = TrajectoryWriter::new(io::BufWriter::new(File::create(path)?), *layout);
    for trajectory in trajectories {
        writer.write(trajectory)?;
    }
    writer.finish()?;
    Ok(())
}
