use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use geo::{Coord, Intersects, LineString, Polygon};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::safety::error::SafetyError;
use crate::safety::geometry::BoundingBox;
use crate::safety::http::RemoteFetch;

pub const DEFAULT_CATALOG_URL: &str = "https://download.geofabrik.de/index-v1.json";
const CATALOG_BASE_URL: &str = "https://download.geofabrik.de";
const CATALOG_CACHE_FILE: &str = "region_index.json";

/// Catalog freshness window. Advisory: a stale cache is still used when the
/// index service is unreachable.
pub const CATALOG_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Continent-scale catalog entries, dropped whenever a more specific region
/// also matches. Downloading a continent for a route corridor wastes bandwidth
/// and scan time out of all proportion.
const CONTINENTS: [&str; 8] = [
    "africa",
    "antarctica",
    "asia",
    "australia-oceania",
    "central-america",
    "europe",
    "north-america",
    "south-america",
];

/// Known oversized multi-country aggregates, dropped when narrower
/// alternatives remain.
const OVERSIZED_AGGREGATES: [&str; 1] = ["dach"];

/// One catalog region with a downloadable raw extract.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub pbf_url: String,
    /// Byte-size estimate from the catalog, 0 when absent. Only used for
    /// selection tie-breaking.
    pub size_hint: u64,
    pub boundary: Polygon<f64>,
}

// Geofabrik-style index document: a GeoJSON feature collection whose
// properties carry the download urls.
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    features: Vec<CatalogFeature>,
}

#[derive(Debug, Deserialize)]
struct CatalogFeature {
    properties: CatalogProperties,
    geometry: Option<CatalogGeometry>,
}

#[derive(Debug, Deserialize)]
struct CatalogProperties {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    urls: CatalogUrls,
    size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogUrls {
    pbf: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CatalogGeometry {
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
    #[serde(other)]
    Other,
}

impl CatalogGeometry {
    /// Outer ring of the (first) polygon; fine-grained holes are irrelevant
    /// for bbox intersection tests.
    fn outer_ring(&self) -> Option<&[[f64; 2]]> {
        match self {
            CatalogGeometry::Polygon { coordinates } => coordinates.first().map(Vec::as_slice),
            CatalogGeometry::MultiPolygon { coordinates } => coordinates
                .first()
                .and_then(|p| p.first())
                .map(Vec::as_slice),
            CatalogGeometry::Other => None,
        }
    }

    fn to_polygon(&self) -> Option<Polygon<f64>> {
        let ring = self.outer_ring()?;
        if ring.len() < 3 {
            return None;
        }
        let exterior: LineString<f64> = ring
            .iter()
            .map(|&[lon, lat]| Coord { x: lon, y: lat })
            .collect();
        Some(Polygon::new(exterior, Vec::new()))
    }
}

/// Cached catalog with an explicit freshness stamp inside the file, so tests
/// never have to fake filesystem timestamps.
#[derive(Debug, Serialize, Deserialize)]
struct CachedCatalog {
    fetched_at_unix: u64,
    index: serde_json::Value,
}

/// On-disk catalog cache. Path and freshness window are explicit parameters;
/// nothing here is process-global.
pub struct CatalogCache {
    path: PathBuf,
    max_age: Duration,
}

impl CatalogCache {
    pub fn new(cache_dir: &Path, max_age: Duration) -> Self {
        CatalogCache {
            path: cache_dir.join(CATALOG_CACHE_FILE),
            max_age,
        }
    }

    fn read_envelope(&self) -> Option<CachedCatalog> {
        let bytes = fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("Ignoring unreadable catalog cache {:?}: {e}", self.path);
                None
            }
        }
    }

    fn load_fresh(&self, now: SystemTime) -> Option<serde_json::Value> {
        let envelope = self.read_envelope()?;
        let now_unix = now.duration_since(UNIX_EPOCH).ok()?.as_secs();
        let age = now_unix.checked_sub(envelope.fetched_at_unix)?;
        if Duration::from_secs(age) < self.max_age {
            Some(envelope.index)
        } else {
            None
        }
    }

    fn load_any(&self) -> Option<serde_json::Value> {
        self.read_envelope().map(|envelope| envelope.index)
    }

    fn store(&self, index: &serde_json::Value, now: SystemTime) -> Result<(), SafetyError> {
        let envelope = CachedCatalog {
            fetched_at_unix: now
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
            index: index.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).expect("catalog envelope is always serializable");
        fs::write(&self.path, bytes).map_err(|e| SafetyError::io(&self.path, e))
    }
}

/// Maps a route corridor to locally cached extract files: catalog lookup,
/// spatial candidate search, selection optimization, download-on-miss.
pub struct RegionResolver<'a> {
    cache_dir: PathBuf,
    catalog: CatalogCache,
    catalog_url: String,
    fetcher: &'a dyn RemoteFetch,
}

impl<'a> RegionResolver<'a> {
    pub fn new(
        cache_dir: &Path,
        fetcher: &'a dyn RemoteFetch,
        max_age: Duration,
    ) -> Result<Self, SafetyError> {
        fs::create_dir_all(cache_dir).map_err(|e| SafetyError::io(cache_dir, e))?;
        Ok(RegionResolver {
            cache_dir: cache_dir.to_path_buf(),
            catalog: CatalogCache::new(cache_dir, max_age),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            fetcher,
        })
    }

    pub fn with_catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = url.into();
        self
    }

    /// Resolve the minimal set of locally available extract files covering the
    /// route plus buffer. Deterministic for an unchanged catalog snapshot.
    pub fn resolve(
        &self,
        route: &[(f64, f64)],
        buffer_km: f64,
    ) -> Result<Vec<PathBuf>, SafetyError> {
        let index = self.load_catalog()?;
        let bbox = BoundingBox::around_route(route, buffer_km);
        info!(
            "Route bounding box: {:.4}°N to {:.4}°N, {:.4}°E to {:.4}°E",
            bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
        );

        let candidates = find_intersecting_regions(&index, &bbox);
        if candidates.is_empty() {
            return Err(SafetyError::NoRegionMatch {
                min_lon: bbox.min_lon,
                min_lat: bbox.min_lat,
                max_lon: bbox.max_lon,
                max_lat: bbox.max_lat,
            });
        }
        info!(
            "Route intersects {} region(s): {}",
            candidates.len(),
            candidates.iter().map(|r| r.name.as_str()).join(", ")
        );

        let selected = optimize_selection(candidates);
        selected.iter().map(|region| self.acquire(region)).collect()
    }

    fn load_catalog(&self) -> Result<CatalogDocument, SafetyError> {
        let now = SystemTime::now();
        if let Some(index) = self.catalog.load_fresh(now) {
            return parse_catalog(index);
        }

        info!("Fetching region catalog from {}", self.catalog_url);
        match self.fetcher.fetch(&self.catalog_url) {
            Ok(bytes) => {
                let index: serde_json::Value =
                    serde_json::from_slice(&bytes).map_err(|e| {
                        SafetyError::CatalogUnavailable(format!("invalid catalog document: {e}"))
                    })?;
                self.catalog.store(&index, now)?;
                parse_catalog(index)
            }
            Err(e) => match self.catalog.load_any() {
                // freshness is advisory: offline beats unusable
                Some(index) => {
                    warn!("Catalog fetch failed ({e}), using stale cached catalog");
                    parse_catalog(index)
                }
                None => Err(SafetyError::CatalogUnavailable(e.to_string())),
            },
        }
    }

    /// Cache hit by expected filename, download otherwise. Partial files are
    /// removed before the failure propagates.
    fn acquire(&self, region: &Region) -> Result<PathBuf, SafetyError> {
        let filename = region
            .pbf_url
            .rsplit('/')
            .next()
            .expect("rsplit yields at least one element");
        let dest = self.cache_dir.join(filename);

        if dest.is_file() {
            info!("Using cached extract: {filename}");
            return Ok(dest);
        }

        info!("Downloading {} ({})", region.name, region.pbf_url);
        match self.fetcher.download(&region.pbf_url, &dest) {
            Ok(bytes) => {
                info!("Downloaded {filename} ({:.1} MB)", bytes as f64 / 1e6);
                Ok(dest)
            }
            Err(e) => {
                if dest.exists() {
                    let _ = fs::remove_file(&dest);
                }
                Err(SafetyError::Download {
                    url: region.pbf_url.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

fn parse_catalog(index: serde_json::Value) -> Result<CatalogDocument, SafetyError> {
    serde_json::from_value(index)
        .map_err(|e| SafetyError::CatalogUnavailable(format!("invalid catalog document: {e}")))
}

fn find_intersecting_regions(index: &CatalogDocument, bbox: &BoundingBox) -> Vec<Region> {
    let rect = bbox.to_rect();
    index
        .features
        .iter()
        .filter_map(|feature| {
            // entries without a raw extract are of no use here
            let pbf_url = feature.properties.urls.pbf.as_ref()?;
            // invalid or missing boundary geometry: skip, not fatal
            let boundary = feature.geometry.as_ref()?.to_polygon()?;
            if !rect.intersects(&boundary) {
                return None;
            }
            Some(Region {
                id: feature
                    .properties
                    .id
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                name: feature
                    .properties
                    .name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                pbf_url: absolute_url(pbf_url),
                size_hint: feature.properties.size.unwrap_or(0),
                boundary,
            })
        })
        .collect()
}

fn absolute_url(url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else if url.starts_with('/') {
        format!("{CATALOG_BASE_URL}{url}")
    } else {
        format!("{CATALOG_BASE_URL}/{url}")
    }
}

/// Prefer small, specific regions: drop continents when anything more specific
/// matched, drop known oversized aggregates when narrower options remain, and
/// finally keep only the smallest candidate by size hint.
fn optimize_selection(mut regions: Vec<Region>) -> Vec<Region> {
    if regions.len() <= 1 {
        return regions;
    }

    let non_continent: Vec<Region> = regions
        .iter()
        .filter(|r| !CONTINENTS.contains(&r.id.as_str()))
        .cloned()
        .collect();
    if !non_continent.is_empty() && non_continent.len() < regions.len() {
        info!(
            "Dropped {} continent-level region(s)",
            regions.len() - non_continent.len()
        );
        regions = non_continent;
    }

    if regions.len() > 1 {
        let narrow: Vec<Region> = regions
            .iter()
            .filter(|r| !OVERSIZED_AGGREGATES.contains(&r.id.as_str()))
            .cloned()
            .collect();
        if !narrow.is_empty() {
            regions = narrow;
        }
    }

    if regions.len() > 1 {
        let smallest = regions
            .into_iter()
            .min_by_key(|r| if r.size_hint == 0 { u64::MAX } else { r.size_hint })
            .expect("at least two candidates");
        info!("Selected smallest region: {}", smallest.name);
        return vec![smallest];
    }
    regions
}

/// Cache maintenance: drop extract files older than the given age. Uses file
/// modification times, which is fine for housekeeping.
pub fn clear_stale_downloads(cache_dir: &Path, older_than: Duration) -> Result<usize, SafetyError> {
    let entries = fs::read_dir(cache_dir).map_err(|e| SafetyError::io(cache_dir, e))?;
    let now = SystemTime::now();
    let mut removed = 0_usize;
    let mut freed = 0_u64;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.to_string_lossy().ends_with(".osm.pbf") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok());
        if age.is_some_and(|age| age > older_than) {
            info!("Removing stale cached extract {:?}", path.file_name());
            fs::remove_file(&path).map_err(|e| SafetyError::io(&path, e))?;
            removed += 1;
            freed += metadata.len();
        }
    }
    if removed > 0 {
        info!("Cleared {removed} cached extract(s), freed {:.1} MB", freed as f64 / 1e6);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    /// Serves canned responses and records download targets.
    struct FakeFetch {
        catalog: Option<serde_json::Value>,
        downloads: RefCell<Vec<String>>,
        fail_downloads: bool,
    }

    impl FakeFetch {
        fn with_catalog(catalog: serde_json::Value) -> Self {
            FakeFetch {
                catalog: Some(catalog),
                downloads: RefCell::new(Vec::new()),
                fail_downloads: false,
            }
        }

        fn offline() -> Self {
            FakeFetch {
                catalog: None,
                downloads: RefCell::new(Vec::new()),
                fail_downloads: false,
            }
        }
    }

    impl RemoteFetch for FakeFetch {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, SafetyError> {
            match &self.catalog {
                Some(catalog) => Ok(serde_json::to_vec(catalog).unwrap()),
                None => Err(SafetyError::Fetch {
                    url: url.to_string(),
                    message: "offline".to_string(),
                }),
            }
        }

        fn download(&self, url: &str, dest: &Path) -> Result<u64, SafetyError> {
            self.downloads.borrow_mut().push(url.to_string());
            if self.fail_downloads {
                // leave a partial file behind, the resolver must clean it up
                fs::write(dest, b"partial").unwrap();
                return Err(SafetyError::Download {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            fs::write(dest, b"pbf-bytes").unwrap();
            Ok(9)
        }
    }

    fn region_feature(id: &str, name: &str, size: u64, bbox: [f64; 4]) -> serde_json::Value {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        json!({
            "type": "Feature",
            "properties": {
                "id": id,
                "name": name,
                "size": size,
                "urls": { "pbf": format!("/{id}-latest.osm.pbf") },
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [min_lon, min_lat],
                    [max_lon, min_lat],
                    [max_lon, max_lat],
                    [min_lon, max_lat],
                    [min_lon, min_lat],
                ]],
            },
        })
    }

    fn catalog(features: Vec<serde_json::Value>) -> serde_json::Value {
        json!({ "type": "FeatureCollection", "features": features })
    }

    // route through southern Germany
    const ROUTE: [(f64, f64); 2] = [(48.0, 11.0), (48.5, 11.5)];

    #[test]
    fn prefers_country_over_continent() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![
            region_feature("europe", "Europe", 30_000, [-10.0, 35.0, 30.0, 70.0]),
            region_feature("germany", "Germany", 4_000, [5.0, 47.0, 15.0, 55.0]),
        ]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("germany-latest.osm.pbf"));
    }

    #[test]
    fn prefers_country_over_oversized_aggregate() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![
            region_feature("dach", "DACH", 6_000, [5.0, 45.0, 17.0, 56.0]),
            region_feature("germany", "Germany", 4_000, [5.0, 47.0, 15.0, 55.0]),
        ]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("germany-latest.osm.pbf"));
    }

    #[test]
    fn picks_smallest_of_remaining_candidates() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![
            region_feature("germany", "Germany", 4_000, [5.0, 47.0, 15.0, 55.0]),
            region_feature("bayern", "Bayern", 1_000, [9.0, 47.0, 14.0, 51.0]),
        ]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("bayern-latest.osm.pbf"));
    }

    #[test]
    fn entries_without_pbf_or_with_broken_geometry_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut no_pbf = region_feature("no-pbf", "No Pbf", 10, [5.0, 47.0, 15.0, 55.0]);
        no_pbf["properties"]["urls"] = json!({});
        let mut broken = region_feature("broken", "Broken", 10, [5.0, 47.0, 15.0, 55.0]);
        broken["geometry"] = json!({ "type": "Point", "coordinates": [11.0, 48.0] });
        let fetch = FakeFetch::with_catalog(catalog(vec![
            no_pbf,
            broken,
            region_feature("germany", "Germany", 4_000, [5.0, 47.0, 15.0, 55.0]),
        ]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("germany-latest.osm.pbf"));
    }

    #[test]
    fn no_matching_region_is_a_descriptive_error() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![region_feature(
            "iceland",
            "Iceland",
            100,
            [-25.0, 63.0, -13.0, 67.0],
        )]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let result = resolver.resolve(&ROUTE, 10.0);
        assert!(matches!(result, Err(SafetyError::NoRegionMatch { .. })));
    }

    #[test]
    fn cached_extract_skips_download() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("germany-latest.osm.pbf"), b"cached").unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![region_feature(
            "germany",
            "Germany",
            4_000,
            [5.0, 47.0, 15.0, 55.0],
        )]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(fetch.downloads.borrow().is_empty());
    }

    #[test]
    fn failed_download_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let mut fetch = FakeFetch::with_catalog(catalog(vec![region_feature(
            "germany",
            "Germany",
            4_000,
            [5.0, 47.0, 15.0, 55.0],
        )]));
        fetch.fail_downloads = true;
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let result = resolver.resolve(&ROUTE, 10.0);
        assert!(matches!(result, Err(SafetyError::Download { .. })));
        assert!(!dir.path().join("germany-latest.osm.pbf").exists());
    }

    #[test]
    fn fresh_cache_avoids_catalog_fetch() {
        let dir = TempDir::new().unwrap();
        let cache = CatalogCache::new(dir.path(), CATALOG_MAX_AGE);
        let index = catalog(vec![region_feature(
            "germany",
            "Germany",
            4_000,
            [5.0, 47.0, 15.0, 55.0],
        )]);
        cache.store(&index, SystemTime::now()).unwrap();

        // offline fetcher: resolution must still work from the fresh cache
        let fetch = FakeFetch::offline();
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn stale_cache_is_used_when_offline() {
        let dir = TempDir::new().unwrap();
        let cache = CatalogCache::new(dir.path(), CATALOG_MAX_AGE);
        let index = catalog(vec![region_feature(
            "germany",
            "Germany",
            4_000,
            [5.0, 47.0, 15.0, 55.0],
        )]);
        let two_weeks_ago = SystemTime::now() - Duration::from_secs(14 * 24 * 60 * 60);
        cache.store(&index, two_weeks_ago).unwrap();

        let fetch = FakeFetch::offline();
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let files = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn no_cache_and_no_network_is_fatal() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::offline();
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let result = resolver.resolve(&ROUTE, 10.0);
        assert!(matches!(result, Err(SafetyError::CatalogUnavailable(_))));
    }

    #[test]
    fn relative_pbf_urls_are_resolved_against_the_catalog_base() {
        assert_eq!(
            absolute_url("/europe/germany-latest.osm.pbf"),
            "https://download.geofabrik.de/europe/germany-latest.osm.pbf"
        );
        assert_eq!(
            absolute_url("europe/germany-latest.osm.pbf"),
            "https://download.geofabrik.de/europe/germany-latest.osm.pbf"
        );
        assert_eq!(absolute_url("https://example.org/x.pbf"), "https://example.org/x.pbf");
    }

    #[test]
    fn resolution_is_deterministic_for_a_catalog_snapshot() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::with_catalog(catalog(vec![
            region_feature("germany", "Germany", 4_000, [5.0, 47.0, 15.0, 55.0]),
            region_feature("bayern", "Bayern", 1_000, [9.0, 47.0, 14.0, 51.0]),
            region_feature("europe", "Europe", 30_000, [-10.0, 35.0, 30.0, 70.0]),
        ]));
        let resolver = RegionResolver::new(dir.path(), &fetch, CATALOG_MAX_AGE).unwrap();
        let first = resolver.resolve(&ROUTE, 10.0).unwrap();
        let second = resolver.resolve(&ROUTE, 10.0).unwrap();
        assert_eq!(first, second);
    }
}
