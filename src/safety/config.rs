use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    /// GPX file with the route to analyze (.gpx or .gpx.gz).
    #[arg(long)]
    pub route: PathBuf,

    /// YAML file with the scoring criteria. Without it the built-in defaults
    /// apply.
    #[arg(long)]
    pub criteria: Option<PathBuf>,

    /// Corridor width around the route in kilometers.
    #[arg(long, default_value_t = 5.0)]
    pub buffer_km: f64,

    /// Segments scoring below this are not exported.
    #[arg(long, default_value_t = 7.0)]
    pub min_risk_score: f64,

    /// Directory for the cached region catalog and downloaded extracts.
    #[arg(long, default_value = "data/osm_cache")]
    pub cache_dir: PathBuf,

    /// Use these OSM extract file(s) instead of resolving and downloading
    /// regions. May be given multiple times.
    #[arg(long)]
    pub osm_file: Vec<PathBuf>,

    #[arg(long)]
    pub output_gpx: Option<PathBuf>,

    #[arg(long)]
    pub output_geojson: Option<PathBuf>,

    /// Include the analyzed route itself as the first exported track/feature.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub include_route: bool,

    /// Before the analysis, remove cached extracts older than this many days.
    #[arg(long)]
    pub clear_cache_days: Option<u64>,
}
