use std::path::PathBuf;

use ahash::HashSet;
use tracing::info;

use crate::safety::criteria::SafetyCriteria;
use crate::safety::error::SafetyError;
use crate::safety::extractor::{self, RawRoad};
use crate::safety::geometry::{self, BoundingBox};
use crate::safety::models::{RiskLevel, RoadSegment};
use crate::safety::regions::RegionResolver;
use crate::safety::scoring;

/// Where the raw OSM data comes from: resolved and downloaded per region, or
/// explicit local files supplied by the caller (which bypass resolution
/// entirely).
pub enum RoadData<'a> {
    Resolved(RegionResolver<'a>),
    Manual(Vec<PathBuf>),
}

pub struct RoadSafetyAnalyzer<'a> {
    criteria: SafetyCriteria,
    data: RoadData<'a>,
}

impl<'a> RoadSafetyAnalyzer<'a> {
    pub fn new(criteria: SafetyCriteria, data: RoadData<'a>) -> Self {
        RoadSafetyAnalyzer { criteria, data }
    }

    pub fn criteria(&self) -> &SafetyCriteria {
        &self.criteria
    }

    /// Run the full pipeline: resolve data files, extract roads around the
    /// corridor, deduplicate, score, and keep everything at or above
    /// `min_risk_score`.
    pub fn analyze_route(
        &self,
        route: &[(f64, f64)],
        buffer_km: f64,
        min_risk_score: f64,
    ) -> Result<Vec<RoadSegment>, SafetyError> {
        let files = match &self.data {
            RoadData::Resolved(resolver) => resolver.resolve(route, buffer_km)?,
            RoadData::Manual(files) => {
                info!("Using manually supplied OSM file(s): {files:?}");
                files.clone()
            }
        };

        let buffer = BoundingBox::around_route(route, buffer_km).to_polygon();
        let mut all_roads = Vec::new();
        for file in &files {
            info!("Extracting roads from {file:?}");
            let source = extractor::open_source(file)?;
            let roads = extractor::extract_roads(source.as_ref(), &buffer)?;
            info!("Found {} road segments in {file:?}", roads.len());
            all_roads.extend(roads);
        }

        let total = all_roads.len();
        let unique = dedupe_roads(all_roads);
        if unique.len() < total {
            info!("Unique road segments after deduplication: {}", unique.len());
        }

        let scored = unique.len();
        let unsafe_roads: Vec<RoadSegment> = unique
            .into_iter()
            .map(|road| scoring::score_road(road, &self.criteria))
            .filter(|segment| segment.risk_score >= min_risk_score)
            .collect();

        info!(
            "Scored {scored} segments, {} at or above risk {min_risk_score:.1}",
            unsafe_roads.len()
        );
        Ok(unsafe_roads)
    }
}

/// A corridor crossing a region boundary is covered by two extracts; keep each
/// way once, in first-seen order.
pub fn dedupe_roads(roads: Vec<RawRoad>) -> Vec<RawRoad> {
    let mut seen: HashSet<i64> = HashSet::default();
    roads.into_iter().filter(|road| seen.insert(road.id)).collect()
}

/// User-visible result summary, surfaced regardless of export destination.
#[derive(Debug, PartialEq)]
pub struct AnalysisSummary {
    pub flagged: usize,
    pub total_length_km: f64,
    pub average_risk: f64,
    pub by_level: Vec<(RiskLevel, usize)>,
}

impl AnalysisSummary {
    pub fn of(segments: &[RoadSegment], criteria: &SafetyCriteria) -> Self {
        let total_length_km = segments.iter().map(RoadSegment::length_km).sum();
        let average_risk = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.risk_score).sum::<f64>() / segments.len() as f64
        };
        let by_level = RiskLevel::ALL
            .iter()
            .map(|&level| {
                let count = segments
                    .iter()
                    .filter(|s| s.risk_level(criteria) == level)
                    .count();
                (level, count)
            })
            .collect();
        AnalysisSummary {
            flagged: segments.len(),
            total_length_km,
            average_risk,
            by_level,
        }
    }

    pub fn log(&self, route: &[(f64, f64)]) {
        info!(
            "Route length: {:.1} km",
            geometry::route_length_km(route)
        );
        info!("Unsafe roads found: {}", self.flagged);
        if self.flagged == 0 {
            return;
        }
        info!("Total length: {:.1} km", self.total_length_km);
        info!("Average risk score: {:.1}/10", self.average_risk);
        for (level, count) in &self.by_level {
            info!("  {level}: {count} segment(s)");
        }
    }
}
