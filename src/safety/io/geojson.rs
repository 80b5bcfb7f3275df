use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use serde_json::{Value, json};
use tracing::info;

use crate::safety::criteria::SafetyCriteria;
use crate::safety::error::SafetyError;
use crate::safety::geometry;
use crate::safety::models::RoadSegment;

/// One LineString feature per segment with the full risk property bag,
/// coordinates in GeoJSON (lon, lat) order.
pub fn feature_collection(
    segments: &[RoadSegment],
    route: Option<&[(f64, f64)]>,
    criteria: &SafetyCriteria,
) -> Value {
    let mut features = Vec::with_capacity(segments.len() + 1);

    if let Some(route) = route {
        features.push(json!({
            "type": "Feature",
            "geometry": line_string(route),
            "properties": {
                "name": "Analyzed Route",
                "color": "#0000FF",
                "length_km": round2(geometry::route_length_km(route)),
            },
        }));
    }

    for segment in segments {
        features.push(json!({
            "type": "Feature",
            "geometry": line_string(&segment.coordinates),
            "properties": {
                "name": segment.name,
                "osm_id": segment.id,
                "highway_type": segment.highway_type,
                "risk_score": round2(segment.risk_score),
                "risk_level": segment.risk_level(criteria).name(),
                "risk_factors": segment.risk_factors,
                "maxspeed": segment.max_speed_kph,
                "lanes": segment.lane_count,
                "has_cycleway": segment.has_cycleway,
                "has_shoulder": segment.has_shoulder,
                "color": segment.color(criteria),
                "length_km": round2(segment.length_km()),
            },
        }));
    }

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

pub fn write_geojson(
    segments: &[RoadSegment],
    route: Option<&[(f64, f64)]>,
    criteria: &SafetyCriteria,
    path: &Path,
) -> Result<(), SafetyError> {
    if let Some(prefix) = path.parent() {
        fs::create_dir_all(prefix).map_err(|e| SafetyError::io(prefix, e))?;
    }
    let collection = feature_collection(segments, route, criteria);
    let file = File::create(path).map_err(|e| SafetyError::io(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &collection).map_err(|e| {
        SafetyError::io(path, std::io::Error::other(e))
    })?;
    info!(
        "Exported {} road segment(s) to GeoJSON: {path:?}",
        segments.len()
    );
    Ok(())
}

fn line_string(coords: &[(f64, f64)]) -> Value {
    json!({
        "type": "LineString",
        "coordinates": coords.iter().map(|&(lat, lon)| [lon, lat]).collect::<Vec<_>>(),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
