//! Route geometry stored as GeoJSON text.

use geojson::GeoJson;

use crate::error::{Error, Result};

const COLUMN: &str = "route";

/// `[lng, lat]` positions of a GeoJSON LineString, given either as a bare
/// geometry or as a feature. Extra coordinates (altitude) are ignored.
pub fn line_string_positions(text: &str) -> Result<Vec<[f64; 2]>> {
    let geometry = match text.parse::<GeoJson>()? {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| Error::invalid_value(COLUMN, "feature has no geometry"))?,
        GeoJson::FeatureCollection(_) => {
            return Err(Error::invalid_value(COLUMN, "expected a LineString"))
        }
    };

    let geojson::Value::LineString(line) = geometry.value else {
        return Err(Error::invalid_value(COLUMN, "expected a LineString"));
    };

    line.iter()
        .map(|position| match position[..] {
            [lng, lat, ..] => Ok([lng, lat]),
            _ => Err(Error::invalid_value(COLUMN, "position needs lng and lat")),
        })
        .collect()
}
