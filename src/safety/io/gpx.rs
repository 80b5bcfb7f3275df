use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::safety::criteria::SafetyCriteria;
use crate::safety::error::SafetyError;
use crate::safety::models::RoadSegment;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const GPX_STYLE_NS: &str = "http://www.topografix.com/GPX/gpx_style/0/2";
const CREATOR: &str = "route_safety";

/// Fixed color of the source route track, independent of risk coloring.
const ROUTE_COLOR: &str = "#0000FF";

// The track color hint lives in the gpx_style extension namespace and is a
// first-class part of the document; no post-hoc XML manipulation.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename = "gpx", default)]
pub struct IOGpx {
    #[serde(rename = "@version")]
    pub version: String,
    #[serde(rename = "@creator")]
    pub creator: String,
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "@xmlns:gpx_style")]
    pub xmlns_gpx_style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IOMetadata>,
    #[serde(rename = "wpt")]
    pub waypoints: Vec<IOTrackPoint>,
    #[serde(rename = "trk")]
    pub tracks: Vec<IOTrack>,
}

impl Default for IOGpx {
    fn default() -> Self {
        IOGpx {
            version: "1.1".to_string(),
            creator: CREATOR.to_string(),
            xmlns: GPX_NS.to_string(),
            xmlns_gpx_style: GPX_STYLE_NS.to_string(),
            metadata: None,
            waypoints: Vec::new(),
            tracks: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IOTrackExtensions>,
    #[serde(rename = "trkseg")]
    pub segments: Vec<IOTrackSegment>,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOTrackExtensions {
    #[serde(
        rename(serialize = "gpx_style:line", deserialize = "line"),
        skip_serializing_if = "Option::is_none"
    )]
    pub line: Option<IOLine>,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOLine {
    /// RRGGBB without the leading hash, per the gpx_style schema.
    #[serde(rename(serialize = "gpx_style:color", deserialize = "color"))]
    pub color: String,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOTrackSegment {
    #[serde(rename = "trkpt")]
    pub points: Vec<IOTrackPoint>,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IOTrackPoint {
    #[serde(rename = "@lat")]
    pub lat: f64,
    #[serde(rename = "@lon")]
    pub lon: f64,
}

/// Read an ordered (lat, lon) sequence from a GPX file: all track points in
/// order, falling back to waypoints for files that only carry those.
pub fn read_route(path: &Path) -> Result<Vec<(f64, f64)>, SafetyError> {
    let gpx = read_gpx(path)?;

    let mut points: Vec<(f64, f64)> = gpx
        .tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter())
        .map(|p| (p.lat, p.lon))
        .collect();
    if points.is_empty() {
        points = gpx.waypoints.iter().map(|p| (p.lat, p.lon)).collect();
    }
    if points.is_empty() {
        return Err(SafetyError::EmptyRoute(path.to_path_buf()));
    }
    Ok(points)
}

fn read_gpx(path: &Path) -> Result<IOGpx, SafetyError> {
    let file = File::open(path).map_err(|e| SafetyError::io(path, e))?;
    let buffered_reader = BufReader::new(file);

    let reader: Box<dyn BufRead> = if path.to_string_lossy().ends_with(".gpx.gz") {
        Box::new(BufReader::new(flate2::read::GzDecoder::new(buffered_reader)))
    } else {
        Box::new(buffered_reader)
    };

    let mut deserializer = quick_xml::de::Deserializer::from_reader(reader);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| SafetyError::InvalidGpx {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Render the scored segments (plus optionally the source route as first,
/// fixed-blue track) into a GPX document with per-track color hints.
pub fn unsafe_roads_document(
    segments: &[RoadSegment],
    route: Option<&[(f64, f64)]>,
    criteria: &SafetyCriteria,
) -> IOGpx {
    let mut tracks = Vec::with_capacity(segments.len() + 1);

    if let Some(route) = route {
        tracks.push(IOTrack {
            name: Some("Analyzed Route".to_string()),
            desc: Some("Source route of the safety analysis".to_string()),
            r#type: None,
            extensions: Some(line_extension(ROUTE_COLOR)),
            segments: vec![track_segment(route)],
        });
    }

    for segment in segments {
        let level = segment.risk_level(criteria);
        tracks.push(IOTrack {
            name: Some(format!("{} (Risk: {:.1})", segment.name, segment.risk_score)),
            desc: Some(format!(
                "Highway: {} | Risk: {} ({:.1}/10) | Factors: {}",
                segment.highway_type,
                level,
                segment.risk_score,
                segment.risk_factors.iter().join(", ")
            )),
            r#type: Some(level.name().to_string()),
            extensions: Some(line_extension(&segment.color(criteria))),
            segments: vec![track_segment(&segment.coordinates)],
        });
    }

    IOGpx {
        metadata: Some(IOMetadata {
            name: Some("Unsafe Roads Analysis".to_string()),
            desc: Some(format!(
                "Safety analysis of {} road segment(s). Import to GPX Studio or a similar tool for visualization.",
                segments.len()
            )),
        }),
        tracks,
        ..IOGpx::default()
    }
}

pub fn write_gpx(
    segments: &[RoadSegment],
    route: Option<&[(f64, f64)]>,
    criteria: &SafetyCriteria,
    path: &Path,
) -> Result<(), SafetyError> {
    let document = unsafe_roads_document(segments, route, criteria);
    write_document(&document, path)?;
    info!(
        "Exported {} unsafe road segment(s) to {path:?}",
        segments.len()
    );
    Ok(())
}

fn write_document(document: &IOGpx, path: &Path) -> Result<(), SafetyError> {
    if let Some(prefix) = path.parent() {
        fs::create_dir_all(prefix).map_err(|e| SafetyError::io(prefix, e))?;
    }
    let body = quick_xml::se::to_string(document).map_err(|e| SafetyError::InvalidGpx {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let file = File::create(path).map_err(|e| SafetyError::io(path, e))?;
    let mut writer: Box<dyn Write> = if path.extension().is_some_and(|ext| ext.eq("gz")) {
        Box::new(flate2::write::GzEncoder::new(
            BufWriter::new(file),
            Compression::fast(),
        ))
    } else {
        Box::new(BufWriter::new(file))
    };
    writer
        .write_all(XML_DECLARATION.as_bytes())
        .and_then(|()| writer.write_all(body.as_bytes()))
        .and_then(|()| writer.flush())
        .map_err(|e| SafetyError::io(path, e))
}

fn track_segment(coords: &[(f64, f64)]) -> IOTrackSegment {
    IOTrackSegment {
        points: coords
            .iter()
            .map(|&(lat, lon)| IOTrackPoint { lat, lon })
            .collect(),
    }
}

fn line_extension(color: &str) -> IOTrackExtensions {
    IOTrackExtensions {
        line: Some(IOLine {
            color: color.trim_start_matches('#').to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn segment(name: &str, risk_score: f64) -> RoadSegment {
        RoadSegment {
            id: 1,
            name: name.to_string(),
            coordinates: vec![(48.0, 11.0), (48.01, 11.01)],
            highway_type: "primary".to_string(),
            max_speed_kph: 90,
            has_cycleway: false,
            has_shoulder: false,
            lane_count: 4,
            surface: None,
            bicycle_access: None,
            risk_score,
            risk_factors: vec!["high_speed".to_string(), "multi_lane".to_string()],
        }
    }

    #[test]
    fn document_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("unsafe_roads.gpx");
        let criteria = SafetyCriteria::default();
        let segments = vec![segment("Hauptstraße", 9.5)];

        write_gpx(&segments, None, &criteria, &path).unwrap();
        let gpx = read_gpx(&path).unwrap();

        assert_eq!(gpx.tracks.len(), 1);
        let track = &gpx.tracks[0];
        assert_eq!(track.name.as_deref(), Some("Hauptstraße (Risk: 9.5)"));
        assert_eq!(track.r#type.as_deref(), Some("critical"));
        assert_eq!(
            track.extensions.as_ref().unwrap().line.as_ref().unwrap().color,
            "FF0000"
        );
        assert_eq!(track.segments[0].points.len(), 2);
    }

    #[test]
    fn route_track_is_first_and_blue() {
        let criteria = SafetyCriteria::default();
        let route = vec![(48.0, 11.0), (48.5, 11.5)];
        let document = unsafe_roads_document(&[segment("A", 8.0)], Some(&route), &criteria);
        assert_eq!(document.tracks.len(), 2);
        assert_eq!(document.tracks[0].name.as_deref(), Some("Analyzed Route"));
        assert_eq!(
            document.tracks[0]
                .extensions
                .as_ref()
                .unwrap()
                .line
                .as_ref()
                .unwrap()
                .color,
            "0000FF"
        );
    }

    #[test]
    fn empty_segment_list_still_produces_a_wellformed_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.gpx");
        let criteria = SafetyCriteria::default();
        let route = vec![(48.0, 11.0), (48.5, 11.5)];

        write_gpx(&[], Some(&route), &criteria, &path).unwrap();
        let gpx = read_gpx(&path).unwrap();
        assert_eq!(gpx.tracks.len(), 1);
        assert_eq!(gpx.tracks[0].name.as_deref(), Some("Analyzed Route"));
    }

    #[test]
    fn read_route_prefers_track_points() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("route.gpx");
        fs::write(
            &path,
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
              <wpt lat="1.0" lon="1.0"/>
              <trk><trkseg>
                <trkpt lat="48.0" lon="11.0"><ele>512.0</ele></trkpt>
                <trkpt lat="48.1" lon="11.1"/>
              </trkseg></trk>
            </gpx>"#,
        )
        .unwrap();
        let route = read_route(&path).unwrap();
        assert_eq!(route, vec![(48.0, 11.0), (48.1, 11.1)]);
    }

    #[test]
    fn read_route_falls_back_to_waypoints() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waypoints.gpx");
        fs::write(
            &path,
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
              <wpt lat="48.0" lon="11.0"/>
              <wpt lat="48.1" lon="11.1"/>
            </gpx>"#,
        )
        .unwrap();
        let route = read_route(&path).unwrap();
        assert_eq!(route.len(), 2);
    }

    #[test]
    fn empty_gpx_is_a_fatal_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty_route.gpx");
        fs::write(
            &path,
            r#"<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1"></gpx>"#,
        )
        .unwrap();
        assert!(matches!(
            read_route(&path),
            Err(SafetyError::EmptyRoute(_))
        ));
    }
}
