use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::safety::criteria::SafetyCriteria;
use crate::safety::geometry;

/// A scored road segment. Built once by the scoring engine from the raw
/// extracted attributes, immutable afterwards; only read by the exporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadSegment {
    /// OSM way id, the uniqueness key for deduplication.
    pub id: i64,
    pub name: String,
    /// Ordered (lat, lon) pairs, always at least two.
    pub coordinates: Vec<(f64, f64)>,
    pub highway_type: String,
    /// km/h, 0 means unknown.
    pub max_speed_kph: u32,
    pub has_cycleway: bool,
    pub has_shoulder: bool,
    pub lane_count: u32,
    pub surface: Option<String>,
    pub bicycle_access: Option<String>,
    /// Always within [0.0, 10.0].
    pub risk_score: f64,
    /// Insertion order is evaluation order; for audit output, never re-parsed.
    pub risk_factors: Vec<String>,
}

impl RoadSegment {
    pub fn risk_level(&self, criteria: &SafetyCriteria) -> RiskLevel {
        criteria.risk_level(self.risk_score)
    }

    pub fn color(&self, criteria: &SafetyCriteria) -> String {
        criteria.color(self.risk_level(criteria))
    }

    /// Sum of great-circle distances between consecutive coordinate pairs.
    pub fn length_km(&self) -> f64 {
        geometry::route_length_km(&self.coordinates)
    }
}

impl Display for RoadSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RoadSegment(id={}, name='{}', type={}, risk={:.1})",
            self.id, self.name, self.highway_type, self.risk_score
        )
    }
}

/// Discretized risk band, derived from the numeric score via the configured
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Minimal,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Critical,
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
        RiskLevel::Minimal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::Minimal => "minimal",
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::safety::criteria::SafetyCriteria;

    fn segment(coords: Vec<(f64, f64)>, risk_score: f64) -> RoadSegment {
        RoadSegment {
            id: 1,
            name: "Test Road".to_string(),
            coordinates: coords,
            highway_type: "primary".to_string(),
            max_speed_kph: 0,
            has_cycleway: false,
            has_shoulder: false,
            lane_count: 1,
            surface: None,
            bicycle_access: None,
            risk_score,
            risk_factors: Vec::new(),
        }
    }

    #[test]
    fn length_of_two_point_segment_matches_great_circle() {
        let s = segment(vec![(0.0, 0.0), (0.0, 1.0)], 0.0);
        assert_approx_eq!(s.length_km(), 111.19, 0.05);
    }

    #[test]
    fn level_and_color_derive_from_criteria() {
        let criteria = SafetyCriteria::default();
        let s = segment(vec![(0.0, 0.0), (0.0, 1.0)], 7.5);
        assert_eq!(s.risk_level(&criteria), RiskLevel::High);
        assert_eq!(s.color(&criteria), "#FF8800");
    }
}
