use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info};
use std::{
    io::{self, BufWriter, StdoutLock},
    path::PathBuf,
    time::{Duration, Instant},
};

use tripbin::{FlowControl, OutputOrder, PoolConfig, RecordLayout, DEFAULT_LOOKAHEAD};

mod cabs;
mod columns;
mod inspect;
mod points;
mod trips;

/// Record layout of a binary trajectory stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// id, count, `[timestamp, occupied, lng, lat]` per point.
    CabV1,
    /// id, count, `[timestamp, occupied, direction, lng, lat]` per point.
    CabV2,
    /// id, count, `[timestamp, lng, lat]` per point.
    Points,
    /// count, `[timestamp, direction, lng, lat]` per point.
    Trips,
}

impl Layout {
    fn record_layout(self) -> RecordLayout {
        match self {
            Layout::CabV1 => RecordLayout::CAB_V1,
            Layout::CabV2 => RecordLayout::CAB_V2,
            Layout::Points => RecordLayout::POINTS,
            Layout::Trips => RecordLayout::TRIPS,
        }
    }
}

/// Worker pool settings shared by the parallel tools.
#[derive(Args, Debug, Clone)]
struct PoolArgs {
    /// Worker threads. Defaults to the number of CPUs.
    #[arg(long, env = "TRIPS2BIN_WORKERS")]
    workers: Option<usize>,

    /// Pause input once more than this many jobs are in flight.
    #[arg(long, default_value_t = tripbin::pool::DEFAULT_HIGH_WATER_MARK)]
    high_water_mark: usize,

    /// Write records in input order instead of completion order.
    #[arg(long, default_value_t = false)]
    ordered: bool,
}

impl PoolArgs {
    fn config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            high_water_mark: self.high_water_mark.max(1),
            order: if self.ordered {
                OutputOrder::Dispatch
            } else {
                OutputOrder::Completion
            },
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "trips2bin", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Directory of per-cab `new_*.txt` traces to one record per cab.
    CabFiles {
        /// Directory holding the `new_<name>.txt` files.
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long, env = "TRIPS2BIN_TIMEZONE", default_value = "America/Los_Angeles")]
        timezone: String,

        /// Points averaged ahead of each point for its direction.
        #[arg(long, default_value_t = DEFAULT_LOOKAHEAD, value_parser = parse_lookahead)]
        direction_lookahead: usize,

        /// Write cab-v1 records, without directions.
        #[arg(long, default_value_t = false)]
        no_direction: bool,

        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Headerless `id,timestamp,lng,lat[,occupied]` CSV on stdin to records.
    Points {
        /// First day of the data set; timestamps become seconds since its midnight.
        #[arg(long, default_value = "2008-02-02")]
        day_zero: chrono::NaiveDate,

        #[arg(long, value_enum, default_value_t = Layout::Points)]
        layout: Layout,

        /// Lookahead for directions, used when the layout carries them.
        #[arg(long, default_value_t = DEFAULT_LOOKAHEAD, value_parser = parse_lookahead)]
        direction_lookahead: usize,
    },

    /// Trip CSV with GeoJSON routes on stdin to one record per trip.
    Trips {
        /// Fraction of rows to keep, in (0, 1].
        #[arg(long, value_parser = parse_rate)]
        sample: f64,

        #[arg(long, env = "TRIPS2BIN_TIMEZONE")]
        timezone: String,

        #[arg(long, default_value_t = DEFAULT_LOOKAHEAD, value_parser = parse_lookahead)]
        direction_lookahead: usize,

        /// Column holding the route as a GeoJSON LineString.
        #[arg(long, default_value = "ST_ASGEOJSON(route)")]
        route_column: String,

        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Delimited text on stdin to fixed-width f32 rows plus a JSON schema.
    Columns {
        /// JSON array of column definitions.
        #[arg(long)]
        transform: PathBuf,

        /// Where to write the schema side file.
        #[arg(long)]
        out_schema: PathBuf,

        /// Field delimiter; `tab` for tab-separated input.
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: u8,

        /// Fraction of data rows to keep, in (0, 1].
        #[arg(long, value_parser = parse_rate)]
        sample: Option<f64>,
    },

    /// Print a JSON summary of a binary trajectory file.
    Inspect {
        path: PathBuf,

        #[arg(long, value_enum, default_value_t = Layout::CabV2)]
        layout: Layout,
    },
}

fn parse_rate(s: &str) -> Result<f64> {
    let rate: f64 = s.parse().with_context(|| format!("{s:?} is not a number"))?;
    if !(rate > 0.0 && rate <= 1.0) {
        bail!("rate must be in (0, 1], got {rate}");
    }
    Ok(rate)
}

fn parse_lookahead(s: &str) -> Result<usize> {
    let points: usize = s.parse().with_context(|| format!("{s:?} is not a count"))?;
    if points == 0 {
        bail!("direction lookahead must be at least 1");
    }
    Ok(points)
}

fn parse_delimiter(s: &str) -> Result<u8> {
    match s {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ => match s.as_bytes() {
            [byte] => Ok(*byte),
            _ => bail!("delimiter must be a single byte or `tab`, got {s:?}"),
        },
    }
}

fn stdout_writer() -> BufWriter<StdoutLock<'static>> {
    BufWriter::with_capacity(1 << 20, io::stdout().lock())
}

/// Helper that periodically logs progress.
#[derive(Debug, Clone, Copy)]
struct Tick {
    start: Instant,
    last: Instant,
    every: u64,
}

impl Tick {
    /// Create a new `Tick` that will trigger at most once per `every` items.
    #[inline]
    fn new(every: u64) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            every: every.max(1),
        }
    }

    /// `true` when `count` is a multiple of `every` and at least 200 ms have
    /// passed since the previous log. Records the log time when it fires.
    #[inline]
    fn should(&mut self, count: u64) -> bool {
        const MIN_INTERVAL: Duration = Duration::from_millis(200);
        let fire = count % self.every == 0 && self.last.elapsed() >= MIN_INTERVAL;
        if fire {
            self.last = Instant::now();
        }
        fire
    }

    /// Processing rate in thousands of items per second.
    #[inline]
    fn rate_kps(&self, count: u64) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        count as f64 / 1_000.0 / elapsed
    }
}

/// Logs the pool's pause/resume signals. Input is pulled by the pool itself,
/// so there is nothing else to stop.
#[derive(Debug, Default)]
struct LoggedFlow {
    paused_at: Option<Instant>,
}

impl FlowControl for LoggedFlow {
    fn pause(&mut self) {
        debug!("input paused");
        self.paused_at = Some(Instant::now());
    }

    fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            debug!("input resumed after {:.1?}", at.elapsed());
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let started = Instant::now();

    match cli.command {
        Command::CabFiles {
            input_dir,
            timezone,
            direction_lookahead,
            no_direction,
            pool,
        } => cabs::run(&cabs::CabOptions {
            input_dir,
            timezone,
            lookahead: direction_lookahead,
            layout: if no_direction {
                RecordLayout::CAB_V1
            } else {
                RecordLayout::CAB_V2
            },
            pool: pool.config(),
        })?,
        Command::Points {
            day_zero,
            layout,
            direction_lookahead,
        } => points::run(day_zero, layout.record_layout(), direction_lookahead)?,
        Command::Trips {
            sample,
            timezone,
            direction_lookahead,
            route_column,
            pool,
        } => trips::run(&trips::TripOptions {
            sample,
            timezone,
            lookahead: direction_lookahead,
            route_column,
            pool: pool.config(),
        })?,
        Command::Columns {
            transform,
            out_schema,
            delimiter,
            sample,
        } => columns::run(&transform, &out_schema, delimiter, sample)?,
        Command::Inspect { path, layout } => inspect::run(&path, layout.record_layout())?,
    }

    info!("done in {:.2?}", started.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters() {
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\t").unwrap(), b'\t');
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn rates() {
        assert_eq!(parse_rate("0.05").unwrap(), 0.05);
        assert_eq!(parse_rate("1").unwrap(), 1.0);
        assert!(parse_rate("0").is_err());
        assert!(parse_rate("1.5").is_err());
        assert!(parse_rate("x").is_err());
    }

    #[test]
    fn lookahead_must_be_positive() {
        assert_eq!(parse_lookahead("3").unwrap(), 3);
        assert!(parse_lookahead("-1").is_err());

        let err = Cli::try_parse_from([
            "trips2bin",
            "points",
            "--direction-lookahead",
            "0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn trips_requires_sample_and_timezone() {
        let err = Cli::try_parse_from(["trips2bin", "trips", "--sample", "0.1"]);
        // The timezone may come from the environment.
        if std::env::var_os("TRIPS2BIN_TIMEZONE").is_none() {
            assert_eq!(
                err.unwrap_err().kind(),
                clap::error::ErrorKind::MissingRequiredArgument
            );
        }

        let err = Cli::try_parse_from(["trips2bin", "trips", "--timezone", "UTC"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn pool_flags() {
        let cli = Cli::try_parse_from([
            "trips2bin",
            "cab-files",
            "--input-dir",
            "data",
            "--workers",
            "3",
            "--ordered",
        ])
        .unwrap();
        let Command::CabFiles { pool, .. } = cli.command else {
            panic!("wrong subcommand");
        };
        let config = pool.config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.high_water_mark, 10_000);
        assert_eq!(config.order, OutputOrder::Dispatch);
    }

    #[test]
    fn layout_names() {
        let cli = Cli::try_parse_from(["trips2bin", "inspect", "out.bin", "--layout", "cab-v1"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Inspect {
                layout: Layout::CabV1,
                ..
            }
        ));
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
