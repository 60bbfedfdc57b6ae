//! `points`: a flat, id-sorted point dump on stdin to trajectory records.
//!
//! Rows are `id,YYYY-MM-DD HH:MM:SS,lng,lat` with an optional fifth
//! `occupied` column. Timestamps become seconds since midnight of day zero.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use log::info;
use std::io::{self, Read, Write};

use tripbin::{
    directions, format::Field, DayZero, Error, Point, RecordLayout, Segmenter, Trajectory,
    TrajectoryWriter,
};

use crate::{stdout_writer, Tick};

fn parse_row(
    record: &StringRecord,
    line: u64,
    day_zero: &DayZero,
) -> tripbin::Result<(u32, Point)> {
    if !(4..=5).contains(&record.len()) {
        return Err(Error::malformed(
            line,
            format!("expected 4 or 5 columns, found {}", record.len()),
        ));
    }

    let field = |i: usize| record.get(i).map_or("", str::trim);
    let number = |i: usize| {
        field(i)
            .parse::<f64>()
            .map_err(|_| Error::malformed(line, format!("{:?} is not a number", field(i))))
    };

    let id = field(0)
        .parse::<u32>()
        .map_err(|_| Error::malformed(line, format!("{:?} is not an id", field(0))))?;
    let seconds = day_zero
        .parse_elapsed(field(1))
        .map_err(|e| Error::malformed(line, format!("{:?}: {e}", field(1))))?;
    let occupied = record.len() == 5 && field(4) != "0";

    Ok((
        id,
        Point::new(seconds as f64, [number(2)?, number(3)?]).with_occupied(occupied),
    ))
}

struct RecordSink<W: Write> {
    writer: TrajectoryWriter<W>,
    lookahead: usize,
}

impl<W: Write> RecordSink<W> {
    fn write(&mut self, mut trajectory: Trajectory) -> tripbin::Result<()> {
        if self.writer.layout().has(Field::Direction) {
            let positions: Vec<[f64; 2]> = trajectory.points.iter().map(|p| p.position).collect();
            for (point, heading) in trajectory
                .points
                .iter_mut()
                .zip(directions(&positions, self.lookahead))
            {
                point.direction = heading;
            }
        }
        self.writer.write(&trajectory)
    }
}

/// Convert a whole point dump. Returns the sink and the number of points read.
pub fn convert<R: Read, W: Write>(
    input: R,
    out: W,
    day_zero: NaiveDate,
    layout: RecordLayout,
    lookahead: usize,
) -> tripbin::Result<(TrajectoryWriter<W>, u64)> {
    let day_zero = DayZero(day_zero);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    // Without an occupancy field there is nothing to split on.
    let mut segmenter = Segmenter::new(layout.has(Field::Occupied));
    let mut sink = RecordSink {
        writer: TrajectoryWriter::new(out, layout),
        lookahead,
    };
    let mut tick = Tick::new(100_000);
    let mut points = 0u64;

    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let (id, point) = parse_row(&record, line, &day_zero)?;
        points += 1;

        if let Some(done) = segmenter.push(id, point) {
            sink.write(done)?;
        }
        if tick.should(points) {
            info!("{points} points ({:.1} k/s)", tick.rate_kps(points));
        }
    }
    if let Some(done) = segmenter.flush() {
        sink.write(done)?;
    }

    Ok((sink.writer, points))
}

pub fn run(day_zero: NaiveDate, layout: RecordLayout, lookahead: usize) -> Result<()> {
    let (writer, points) = convert(
        io::stdin().lock(),
        stdout_writer(),
        day_zero,
        layout,
        lookahead,
    )
    .context("converting points from stdin")?;

    info!(
        "{points} points in {} {} records",
        writer.records_written(),
        layout.name
    );
    writer.finish().context("flushing stdout")?;
    Ok(())
}
