//! `trips`: a trip table with GeoJSON routes on stdin to one record per trip.
//!
//! The table has a header row naming at least `start_time`, `end_time` (unix
//! milliseconds) and the route column. Each sampled row with a route becomes
//! one pool job.

use anyhow::{Context, Result};
use log::{debug, info};
use rand::Rng;
use std::io::{self, Read};

use tripbin::{
    directions, route::line_string_positions, time::interpolate_millis, Error, Point, PoolConfig,
    RecordLayout, Trajectory, TrajectoryWriter, WeekClock, WorkerPool,
};

use crate::{stdout_writer, LoggedFlow, Tick};

#[derive(Debug, Clone)]
pub struct TripOptions {
    pub sample: f64,
    pub timezone: String,
    pub lookahead: usize,
    pub route_column: String,
    pub pool: PoolConfig,
}

/// One retained input row, as handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRow {
    pub start_ms: i64,
    pub end_ms: i64,
    pub route: String,
}

struct Columns {
    start: usize,
    end: usize,
    route: usize,
}

impl Columns {
    fn find(headers: &csv::StringRecord, route_column: &str) -> tripbin::Result<Self> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| Error::malformed(1, format!("no column named {name:?}")))
        };
        Ok(Self {
            start: position("start_time")?,
            end: position("end_time")?,
            route: position(route_column)?,
        })
    }

    fn row(&self, record: &csv::StringRecord, route: &str, line: u64) -> tripbin::Result<TripRow> {
        Ok(TripRow {
            start_ms: parse_millis(record.get(self.start).unwrap_or(""), line)?,
            end_ms: parse_millis(record.get(self.end).unwrap_or(""), line)?,
            route: route.to_owned(),
        })
    }
}

fn parse_millis(text: &str, line: u64) -> tripbin::Result<i64> {
    text.trim()
        .parse()
        .map_err(|_| Error::malformed(line, format!("{text:?} is not a unix time in ms")))
}

/// Sampled rows with a non-empty route, in input order.
pub fn read_rows<R: Read>(
    input: R,
    route_column: &str,
    mut keep: impl FnMut() -> bool,
) -> tripbin::Result<impl Iterator<Item = tripbin::Result<TripRow>>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let headers = reader.headers()?;
    let width = headers.len();
    let columns = Columns::find(headers, route_column)?;

    Ok(reader.into_records().filter_map(move |record| {
        let record = match record {
            Ok(record) => record,
            Err(err) => return Some(Err(err.into())),
        };
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != width {
            return Some(Err(Error::malformed(
                line,
                format!("expected {width} columns, found {}", record.len()),
            )));
        }
        if !keep() {
            return None;
        }

        let route = record.get(columns.route).unwrap_or("");
        if route.trim().is_empty() {
            debug!("line {line}: no route");
            return None;
        }

        Some(columns.row(&record, route, line))
    }))
}

/// Encode one trip. Each path point gets a time interpolated by its index
/// between the trip's start and end. Empty routes produce no bytes.
pub fn encode_trip(
    row: &TripRow,
    clock: &WeekClock,
    lookahead: usize,
) -> tripbin::Result<Vec<u8>> {
    let positions = line_string_positions(&row.route)?;
    if positions.is_empty() {
        return Ok(Vec::new());
    }

    let times = interpolate_millis(row.start_ms, row.end_ms, positions.len());
    let headings = directions(&positions, lookahead);

    let mut points = Vec::with_capacity(positions.len());
    for ((&position, millis), heading) in positions.iter().zip(times).zip(headings) {
        let minutes = clock.from_unix_millis(millis)?;
        points.push(Point::new(minutes as f64, position).with_direction(heading));
    }

    Trajectory::new(None, points).encode_bytes(&RecordLayout::TRIPS)
}

pub fn run(options: &TripOptions) -> Result<()> {
    let clock = WeekClock::new(&options.timezone)?;
    let pool = WorkerPool::new(options.pool)?;
    let lookahead = options.lookahead;

    let mut rng = rand::thread_rng();
    let sample = options.sample;
    let rows = read_rows(io::stdin().lock(), &options.route_column, move || {
        rng.gen::<f64>() < sample
    })
    .context("reading trip table header")?;

    let mut writer = TrajectoryWriter::new(stdout_writer(), RecordLayout::TRIPS);
    let mut tick = Tick::new(1_000);
    let mut written = 0u64;

    info!(
        "sampling {:.1}% of trips with {} workers",
        sample * 100.0,
        pool.config().workers
    );
    let report = pool
        .run_with_flow(
            rows,
            move |row: TripRow| encode_trip(&row, &clock, lookahead),
            |bytes| {
                if bytes.is_empty() {
                    return Ok(());
                }
                writer.write_encoded(&bytes)?;
                written += 1;
                if tick.should(written) {
                    info!("{written} trips ({:.1} k/s)", tick.rate_kps(written));
                }
                Ok(())
            },
            &mut LoggedFlow::default(),
        )
        .context("encoding trips")?;

    info!(
        "wrote {} trips, {} bytes; input paused {} times",
        writer.records_written(),
        writer.bytes_written(),
        report.pauses
    );
    writer.finish().context("flushing stdout")?;
    Ok(())
}
