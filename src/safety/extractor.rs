use std::path::Path;
#[cfg(feature = "pbf")]
use std::path::PathBuf;

use ahash::HashMap;
use geo::Polygon;
use tracing::info;

use crate::safety::error::SafetyError;
use crate::safety::geometry;

/// Highway classes that are irrelevant for motor-traffic risk to a cyclist
/// sharing the carriageway.
const EXCLUDED_HIGHWAYS: [&str; 9] = [
    "footway",
    "path",
    "cycleway",
    "service",
    "track",
    "steps",
    "pedestrian",
    "bridleway",
    "corridor",
];

/// One way-like feature as delivered by a [`RoadSource`]: tags plus the
/// ordered, resolved node coordinates (lat, lon). Nodes whose location could
/// not be resolved are already dropped from the sequence.
#[derive(Debug, Clone)]
pub struct RawWay {
    pub id: i64,
    pub tags: HashMap<String, String>,
    pub coordinates: Vec<(f64, f64)>,
}

impl RawWay {
    pub fn new(
        id: i64,
        tags: impl IntoIterator<Item = (String, String)>,
        coordinates: Vec<(f64, f64)>,
    ) -> Self {
        RawWay {
            id,
            tags: tags.into_iter().collect(),
            coordinates,
        }
    }
}

/// A road extracted from the raw data, attributes still unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRoad {
    pub id: i64,
    pub name: String,
    pub highway: String,
    pub maxspeed: Option<String>,
    pub lanes: Option<String>,
    pub surface: Option<String>,
    pub cycleway: Option<String>,
    pub shoulder: Option<String>,
    pub bicycle: Option<String>,
    pub coordinates: Vec<(f64, f64)>,
}

/// Capability over the raw geographic data: stream every way-like feature with
/// its tags and resolved node coordinates, independent of the underlying
/// binary layout.
pub trait RoadSource {
    fn for_each_way(&self, f: &mut dyn FnMut(RawWay)) -> Result<(), SafetyError>;
}

/// Open the configured road source implementation for a local file. Fails fast
/// when the crate was built without one.
#[cfg(feature = "pbf")]
pub fn open_source(path: &Path) -> Result<Box<dyn RoadSource>, SafetyError> {
    Ok(Box::new(PbfRoadSource::new(path)?))
}

#[cfg(not(feature = "pbf"))]
pub fn open_source(_path: &Path) -> Result<Box<dyn RoadSource>, SafetyError> {
    Err(SafetyError::CapabilityUnavailable("pbf"))
}

/// Stream `source` and keep the road-like features intersecting the buffer
/// polygon. Malformed individual features are skipped and counted, never
/// fatal.
pub fn extract_roads(
    source: &dyn RoadSource,
    buffer: &Polygon<f64>,
) -> Result<Vec<RawRoad>, SafetyError> {
    let mut roads = Vec::new();
    let mut processed = 0_usize;
    let mut skipped_geometry = 0_usize;

    source.for_each_way(&mut |way| {
        let Some(highway) = way.tags.get("highway") else {
            return;
        };
        if EXCLUDED_HIGHWAYS.contains(&highway.as_str()) {
            return;
        }
        processed += 1;

        // a line needs at least two resolvable points
        if way.coordinates.len() < 2 {
            skipped_geometry += 1;
            return;
        }
        if !geometry::intersects_buffer(&way.coordinates, buffer) {
            return;
        }

        let tag = |key: &str| way.tags.get(key).cloned();
        roads.push(RawRoad {
            id: way.id,
            name: tag("name").unwrap_or_else(|| "Unnamed Road".to_string()),
            highway: highway.clone(),
            maxspeed: tag("maxspeed"),
            lanes: tag("lanes"),
            surface: tag("surface"),
            cycleway: tag("cycleway"),
            shoulder: tag("shoulder"),
            bicycle: tag("bicycle"),
            coordinates: way.coordinates,
        });
    })?;

    info!(
        "Processed {} highway ways ({} with unresolvable geometry), {} within buffer",
        processed,
        skipped_geometry,
        roads.len()
    );
    Ok(roads)
}

/// Road source over an OSM PBF extract. The pbf format stores way geometry as
/// node references, so reading takes two streaming passes: one to index node
/// locations, one over the ways.
#[cfg(feature = "pbf")]
pub struct PbfRoadSource {
    path: PathBuf,
}

#[cfg(feature = "pbf")]
impl PbfRoadSource {
    pub fn new(path: &Path) -> Result<Self, SafetyError> {
        if !path.is_file() {
            return Err(SafetyError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            ));
        }
        Ok(PbfRoadSource {
            path: path.to_path_buf(),
        })
    }

    fn index_node_locations(&self) -> Result<HashMap<i64, (f64, f64)>, SafetyError> {
        let reader = osmpbf::ElementReader::from_path(&self.path)
            .map_err(|e| self.read_error(e))?;
        let mut locations = HashMap::default();
        reader
            .for_each(|element| match element {
                osmpbf::Element::Node(node) => {
                    locations.insert(node.id(), (node.lat(), node.lon()));
                }
                osmpbf::Element::DenseNode(node) => {
                    locations.insert(node.id(), (node.lat(), node.lon()));
                }
                _ => {}
            })
            .map_err(|e| self.read_error(e))?;
        info!(
            "Indexed {} node locations from {:?}",
            locations.len(),
            self.path
        );
        Ok(locations)
    }

    fn read_error(&self, e: osmpbf::Error) -> SafetyError {
        SafetyError::OsmRead {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "pbf")]
impl RoadSource for PbfRoadSource {
    fn for_each_way(&self, f: &mut dyn FnMut(RawWay)) -> Result<(), SafetyError> {
        let locations = self.index_node_locations()?;
        let reader = osmpbf::ElementReader::from_path(&self.path)
            .map_err(|e| self.read_error(e))?;
        reader
            .for_each(|element| {
                if let osmpbf::Element::Way(way) = element {
                    let tags = way.tags().map(|(k, v)| (k.to_string(), v.to_string()));
                    // unresolvable refs are dropped here; the extractor skips
                    // ways that end up with fewer than two points
                    let coordinates: Vec<(f64, f64)> = way
                        .refs()
                        .filter_map(|r| locations.get(&r).copied())
                        .collect();
                    f(RawWay::new(way.id(), tags, coordinates));
                }
            })
            .map_err(|e| self.read_error(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::geometry::BoundingBox;

    pub(crate) struct FakeSource {
        pub ways: Vec<RawWay>,
    }

    impl RoadSource for FakeSource {
        fn for_each_way(&self, f: &mut dyn FnMut(RawWay)) -> Result<(), SafetyError> {
            for way in &self.ways {
                f(way.clone());
            }
            Ok(())
        }
    }

    fn way(id: i64, tags: &[(&str, &str)], coordinates: Vec<(f64, f64)>) -> RawWay {
        RawWay {
            id,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            coordinates,
        }
    }

    fn buffer() -> Polygon<f64> {
        BoundingBox::around_route(&[(48.0, 11.0), (48.1, 11.1)], 5.0).to_polygon()
    }

    #[test]
    fn keeps_only_road_like_ways_in_buffer() {
        let source = FakeSource {
            ways: vec![
                way(1, &[("highway", "primary")], vec![(48.0, 11.0), (48.01, 11.01)]),
                // no highway tag
                way(2, &[("waterway", "river")], vec![(48.0, 11.0), (48.01, 11.01)]),
                // excluded class
                way(3, &[("highway", "footway")], vec![(48.0, 11.0), (48.01, 11.01)]),
                // outside the buffer
                way(4, &[("highway", "primary")], vec![(50.0, 13.0), (50.01, 13.01)]),
            ],
        };
        let roads = extract_roads(&source, &buffer()).unwrap();
        assert_eq!(roads.len(), 1);
        assert_eq!(roads[0].id, 1);
    }

    #[test]
    fn way_with_single_resolvable_point_is_skipped() {
        let source = FakeSource {
            ways: vec![way(1, &[("highway", "primary")], vec![(48.0, 11.0)])],
        };
        let roads = extract_roads(&source, &buffer()).unwrap();
        assert!(roads.is_empty());
    }

    #[test]
    fn attributes_are_carried_over_raw() {
        let source = FakeSource {
            ways: vec![way(
                7,
                &[
                    ("highway", "secondary"),
                    ("maxspeed", "80 km/h"),
                    ("lanes", "2-3"),
                    ("surface", "gravel"),
                    ("cycleway", "lane"),
                ],
                vec![(48.0, 11.0), (48.01, 11.01)],
            )],
        };
        let roads = extract_roads(&source, &buffer()).unwrap();
        assert_eq!(roads[0].name, "Unnamed Road");
        assert_eq!(roads[0].maxspeed.as_deref(), Some("80 km/h"));
        assert_eq!(roads[0].lanes.as_deref(), Some("2-3"));
        assert_eq!(roads[0].surface.as_deref(), Some("gravel"));
        assert_eq!(roads[0].cycleway.as_deref(), Some("lane"));
        assert_eq!(roads[0].shoulder, None);
    }
}
