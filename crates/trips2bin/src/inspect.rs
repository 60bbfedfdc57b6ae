//! `inspect`: summary statistics of a binary trajectory file.

use anyhow::{Context, Result};
use serde::Serialize;
use std::{io::Write, path::Path};

use tripbin::{decode, format, RecordLayout, Trips, NO_DIRECTION};

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub layout: &'static str,
    pub records: u64,
    pub trips: u64,
    pub points: u64,
    /// `[min, max]` of the timestamp field.
    pub timestamps: Option<[f64; 2]>,
    /// `[min_lng, min_lat, max_lng, max_lat]`.
    pub bbox: Option<[f64; 4]>,
    /// Points carrying the no-direction sentinel, for layouts with directions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_direction: Option<u64>,
}

pub fn summarize(floats: &[f32], layout: &RecordLayout) -> tripbin::Result<Summary> {
    let has_direction = layout.has(format::Field::Direction);
    let mut summary = Summary {
        layout: layout.name,
        no_direction: has_direction.then_some(0),
        ..Summary::default()
    };

    for record in decode(floats, layout) {
        let record = record?;
        summary.records += 1;

        for point in &record.points {
            summary.points += 1;

            let t = point.timestamp;
            summary.timestamps = Some(match summary.timestamps {
                None => [t, t],
                Some([lo, hi]) => [lo.min(t), hi.max(t)],
            });

            let [lng, lat] = point.position;
            summary.bbox = Some(match summary.bbox {
                None => [lng, lat, lng, lat],
                Some([x0, y0, x1, y1]) => [x0.min(lng), y0.min(lat), x1.max(lng), y1.max(lat)],
            });

            if let Some(n) = summary.no_direction.as_mut() {
                if point.direction == NO_DIRECTION {
                    *n += 1;
                }
            }
        }
    }

    let split_on_occupancy = layout.has(format::Field::Occupied);
    for trip in Trips::new(decode(floats, layout), split_on_occupancy) {
        trip?;
        summary.trips += 1;
    }

    Ok(summary)
}

pub fn run(path: &Path, layout: RecordLayout) -> Result<()> {
    let floats =
        format::read_file(path).with_context(|| format!("reading {}", path.display()))?;
    let summary = summarize(&floats, &layout)
        .with_context(|| format!("decoding {} as {}", path.display(), layout.name))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &summary)?;
    writeln!(stdout)?;
    Ok(())
}
