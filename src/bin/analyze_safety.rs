use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use route_safety::safety::analyzer::{AnalysisSummary, RoadData, RoadSafetyAnalyzer};
use route_safety::safety::config::CommandLineArgs;
use route_safety::safety::criteria::SafetyCriteria;
use route_safety::safety::error::SafetyError;
use route_safety::safety::io::{geojson, gpx};
use route_safety::safety::logging::init_std_out_logging;
use route_safety::safety::models::RoadSegment;
use route_safety::safety::{geometry, regions};
use tracing::{error, info};

const DEFAULT_OUTPUT_GPX: &str = "output/unsafe_roads.gpx";

fn main() -> ExitCode {
    let _guard = init_std_out_logging();

    let args = CommandLineArgs::parse();
    info!("Started with args: {:?}", args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CommandLineArgs) -> Result<(), SafetyError> {
    // an explicitly named criteria file must exist, the default applies otherwise
    let criteria = match &args.criteria {
        Some(path) => SafetyCriteria::from_yaml(path)?,
        None => SafetyCriteria::default(),
    };

    if let Some(days) = args.clear_cache_days {
        if args.cache_dir.is_dir() {
            regions::clear_stale_downloads(
                &args.cache_dir,
                Duration::from_secs(days * 24 * 60 * 60),
            )?;
        }
    }

    let route = gpx::read_route(&args.route)?;
    info!(
        "Loaded {} route points ({:.1} km) from {:?}",
        route.len(),
        geometry::route_length_km(&route),
        args.route
    );

    let segments = if args.osm_file.is_empty() {
        analyze_with_resolver(&args, &criteria, &route)?
    } else {
        let analyzer =
            RoadSafetyAnalyzer::new(criteria.clone(), RoadData::Manual(args.osm_file.clone()));
        analyzer.analyze_route(&route, args.buffer_km, args.min_risk_score)?
    };

    let summary = AnalysisSummary::of(&segments, &criteria);
    summary.log(&route);

    let route_export = args.include_route.then_some(route.as_slice());
    if args.output_gpx.is_none() && args.output_geojson.is_none() {
        gpx::write_gpx(
            &segments,
            route_export,
            &criteria,
            Path::new(DEFAULT_OUTPUT_GPX),
        )?;
    }
    if let Some(path) = &args.output_gpx {
        gpx::write_gpx(&segments, route_export, &criteria, path)?;
    }
    if let Some(path) = &args.output_geojson {
        geojson::write_geojson(&segments, route_export, &criteria, path)?;
    }

    Ok(())
}

#[cfg(feature = "http")]
fn analyze_with_resolver(
    args: &CommandLineArgs,
    criteria: &SafetyCriteria,
    route: &[(f64, f64)],
) -> Result<Vec<RoadSegment>, SafetyError> {
    use route_safety::safety::http::{HttpFetcher, RetryPolicy};
    use route_safety::safety::regions::RegionResolver;

    let fetcher = HttpFetcher::new(RetryPolicy::default())?;
    let resolver = RegionResolver::new(&args.cache_dir, &fetcher, regions::CATALOG_MAX_AGE)?;
    let analyzer = RoadSafetyAnalyzer::new(criteria.clone(), RoadData::Resolved(resolver));
    analyzer.analyze_route(route, args.buffer_km, args.min_risk_score)
}

#[cfg(not(feature = "http"))]
fn analyze_with_resolver(
    _args: &CommandLineArgs,
    _criteria: &SafetyCriteria,
    _route: &[(f64, f64)],
) -> Result<Vec<RoadSegment>, SafetyError> {
    Err(SafetyError::CapabilityUnavailable("http"))
}
