use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors of the analysis pipeline. Per-feature problems (unparseable
/// tag values, ways with broken geometry, missing criteria sections) never
/// show up here, they degrade to defaults and counters instead.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no points found in route file {0}")]
    EmptyRoute(PathBuf),

    #[error("could not parse {path}: {message}")]
    InvalidGpx { path: PathBuf, message: String },

    #[error("could not parse criteria file {path}: {message}")]
    InvalidCriteria { path: PathBuf, message: String },

    #[error(
        "region catalog unavailable: {0}. Check your internet connection, or seed the cache directory with a previously downloaded catalog."
    )]
    CatalogUnavailable(String),

    #[error(
        "no region in the catalog covers the route (bounding box lat {min_lat:.4}..{max_lat:.4}, lon {min_lon:.4}..{max_lon:.4}). \
         Download an extract for the area manually and pass it with --osm-file."
    )]
    NoRegionMatch {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    },

    #[error("fetching {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("reading OSM data from {path} failed: {message}")]
    OsmRead { path: PathBuf, message: String },

    #[error("support for `{0}` is not compiled in. Rebuild with the `{0}` cargo feature enabled.")]
    CapabilityUnavailable(&'static str),
}

impl SafetyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SafetyError::Io {
            path: path.into(),
            source,
        }
    }
}
