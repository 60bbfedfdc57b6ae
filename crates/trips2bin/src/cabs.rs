//! `cab-files`: one record per cab from a directory of per-cab traces.
//!
//! Each `new_<name>.txt` holds space-separated `lat lng occupied unix_seconds`
//! rows, newest first. Files are numbered in name order and that number is
//! the cab id.

use anyhow::{Context, Result};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use tripbin::{
    directions, Error, Point, PoolConfig, RecordLayout, Trajectory, TrajectoryWriter, WeekClock,
    WorkerPool,
};

use crate::{stdout_writer, LoggedFlow, Tick};

const FILE_PREFIX: &str = "new_";

#[derive(Debug, Clone)]
pub struct CabOptions {
    pub input_dir: PathBuf,
    pub timezone: String,
    pub lookahead: usize,
    pub layout: RecordLayout,
    pub pool: PoolConfig,
}

/// Cab trace files under `dir`, sorted by file name.
fn list_cab_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let is_trace = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(FILE_PREFIX));
        if entry.file_type().is_file() && is_trace {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one trace, oldest point first.
fn parse_trace(contents: &str, clock: &WeekClock) -> tripbin::Result<Vec<Point>> {
    let mut points = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line_no = index as u64 + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [lat, lng, occupied, seconds] = fields[..] else {
            return Err(Error::malformed(
                line_no,
                format!("expected 4 fields, found {}", fields.len()),
            ));
        };

        let number = |text: &str| {
            text.parse::<f64>()
                .map_err(|_| Error::malformed(line_no, format!("{text:?} is not a number")))
        };
        let seconds: i64 = seconds
            .parse()
            .map_err(|_| Error::malformed(line_no, format!("{seconds:?} is not a unix time")))?;

        let minutes = clock.from_unix_seconds(seconds)?;
        let position = [number(lng)?, number(lat)?];
        points.push(Point::new(minutes as f64, position).with_occupied(occupied != "0"));
    }

    points.reverse();
    Ok(points)
}

/// Encode one cab's trace as a single record. Empty traces produce no bytes.
pub fn encode_cab(
    id: u32,
    contents: &str,
    clock: &WeekClock,
    lookahead: usize,
    layout: &RecordLayout,
) -> tripbin::Result<Vec<u8>> {
    let mut points = parse_trace(contents, clock)?;
    if points.is_empty() {
        warn!("cab {id}: no points");
        return Ok(Vec::new());
    }

    if layout.has(tripbin::format::Field::Direction) {
        let positions: Vec<[f64; 2]> = points.iter().map(|p| p.position).collect();
        for (point, heading) in points.iter_mut().zip(directions(&positions, lookahead)) {
            point.direction = heading;
        }
    }

    Trajectory::new(Some(id), points).encode_bytes(layout)
}

pub fn run(options: &CabOptions) -> Result<()> {
    let clock = WeekClock::new(&options.timezone)?;
    let files = list_cab_files(&options.input_dir)?;
    info!(
        "{} cab files in {}; writing {}",
        files.len(),
        options.input_dir.display(),
        options.layout.name
    );

    let pool = WorkerPool::new(options.pool)?;
    let layout = options.layout;
    let lookahead = options.lookahead;

    let mut writer = TrajectoryWriter::new(stdout_writer(), layout);
    let mut tick = Tick::new(100);
    let mut written = 0u64;

    let report = pool.run_with_flow(
        files
            .into_iter()
            .enumerate()
            .map(|(i, path)| Ok((i as u32, path))),
        move |(id, path): (u32, PathBuf)| {
            fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|contents| encode_cab(id, &contents, &clock, lookahead, &layout))
                .map_err(|e| Error::Worker(format!("{}: {e}", path.display())))
        },
        |bytes| {
            if bytes.is_empty() {
                return Ok(());
            }
            writer.write_encoded(&bytes)?;
            written += 1;
            if tick.should(written) {
                info!("{written} cabs ({:.2} k/s)", tick.rate_kps(written));
            }
            Ok(())
        },
        &mut LoggedFlow::default(),
    )?;

    info!(
        "wrote {} of {} cabs, {} bytes",
        writer.records_written(),
        report.completed,
        writer.bytes_written()
    );
    writer.finish()?;
    Ok(())
}
