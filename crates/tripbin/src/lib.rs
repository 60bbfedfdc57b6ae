//! tripbin: packed f32 trajectory streams and the offline pipeline that
//! produces them.
//!
//! - [`format`]: record layouts, encoder, sequential decoder, file IO.
//! - [`direction`]: smoothed heading per point, `-1` when stationary.
//! - [`time`]: minutes/seconds of week in a named zone, day-zero offsets,
//!   trip-time interpolation.
//! - [`segment`]: id/occupancy boundary detection, both when encoding flat
//!   point streams and when re-segmenting decoded records into trips.
//! - [`soa`]: fixed-capacity structure-of-arrays buffers for upload.
//! - [`pool`]: bounded worker pool with pause/resume admission.
//! - [`route`]: GeoJSON LineString routes to positions.
//! - [`schema`]: generic CSV-to-f32 column encoder with running statistics.
//!
//! ```
//! use tripbin::format::{decode, Point, RecordLayout, Trajectory};
//!
//! let trip = Trajectory::new(Some(3), vec![
//!     Point::new(600.0, [-122.41, 37.77]).with_occupied(true),
//!     Point::new(601.0, [-122.40, 37.78]).with_occupied(true),
//! ]);
//! let floats = trip.encode(&RecordLayout::CAB_V1)?;
//! let back = decode(&floats, &RecordLayout::CAB_V1).next().unwrap()?;
//! assert_eq!(back.points.len(), 2);
//! # Ok::<(), tripbin::Error>(())
//! ```

pub mod direction;
pub mod error;
pub mod format;
pub mod pool;
pub mod route;
pub mod schema;
pub mod segment;
pub mod soa;
pub mod time;

pub use direction::{directions, DEFAULT_LOOKAHEAD, NO_DIRECTION};
pub use error::{Error, Result};
pub use format::{decode, Point, RecordLayout, Records, Trajectory, TrajectoryWriter};
pub use pool::{FlowControl, OutputOrder, PoolConfig, PoolReport, WorkerPool};
pub use segment::{Segmenter, Trip, Trips};
pub use soa::{FillOrder, TripBuffers};
pub use time::{DayZero, TimeUnit, WeekClock};
