use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::safety::error::SafetyError;
use crate::safety::models::RiskLevel;

/// Scoring criteria loaded from a YAML document. Every section and key is
/// optional; missing pieces fall back to the defaults encoded in the
/// `default_*` functions below, so scoring works with a partial or absent
/// file. Loaded once per run, read-only afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SafetyCriteria {
    pub risk_thresholds: RiskThresholds,
    pub speed_limits: SpeedLimits,
    pub highway_types: HighwayTypes,
    pub scoring: Scoring,
    pub visualization: Visualization,
}

impl SafetyCriteria {
    /// Strict load. Missing or unparseable file is an error; use this when the
    /// caller explicitly named a criteria file.
    pub fn from_yaml(path: &Path) -> Result<SafetyCriteria, SafetyError> {
        let file = File::open(path).map_err(|e| SafetyError::io(path, e))?;
        serde_yaml::from_reader(BufReader::new(file)).map_err(|e| SafetyError::InvalidCriteria {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Lenient load: a missing or broken file logs a warning and yields the
    /// default criteria.
    pub fn from_yaml_or_default(path: &Path) -> SafetyCriteria {
        match Self::from_yaml(path) {
            Ok(criteria) => criteria,
            Err(e) => {
                warn!("{e}. Using default safety criteria.");
                SafetyCriteria::default()
            }
        }
    }

    pub fn is_forbidden_highway(&self, highway_type: &str) -> bool {
        self.highway_types
            .forbidden
            .iter()
            .any(|t| t == highway_type)
    }

    pub fn speed_penalty(&self, max_speed_kph: u32) -> f64 {
        let limits = &self.speed_limits;
        let penalties = &self.scoring.speed_penalties;
        if max_speed_kph >= limits.very_dangerous {
            penalties.very_high
        } else if max_speed_kph >= limits.dangerous {
            penalties.high
        } else if max_speed_kph >= limits.moderate {
            penalties.moderate
        } else if max_speed_kph >= limits.safe {
            penalties.low
        } else {
            0.0
        }
    }

    /// Penalty per concrete highway class, 0 for unlisted classes.
    pub fn highway_penalty(&self, highway_type: &str) -> f64 {
        self.scoring
            .highway_penalties
            .get(highway_type)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn infrastructure_penalty(&self, has_cycleway: bool, has_shoulder: bool) -> f64 {
        let penalties = &self.scoring.infrastructure_penalties;
        if !has_cycleway && !has_shoulder {
            penalties.no_cycleway_no_shoulder
        } else if !has_cycleway {
            penalties.no_cycleway
        } else if !has_shoulder {
            penalties.no_shoulder
        } else {
            0.0
        }
    }

    pub fn lane_penalty(&self, lane_count: u32) -> f64 {
        let penalties = &self.scoring.lane_penalties;
        if lane_count >= 4 {
            penalties.four_or_more
        } else if lane_count == 3 {
            penalties.three
        } else {
            0.0
        }
    }

    pub fn surface_penalty(&self, surface: &str) -> f64 {
        let penalties = &self.scoring.surface_penalties;
        match surface.to_lowercase().as_str() {
            "dirt" | "sand" | "mud" => penalties.very_bad,
            "gravel" | "unpaved" | "compacted" => penalties.bad,
            "fine_gravel" | "pebblestone" => penalties.unpaved,
            _ => 0.0,
        }
    }

    /// Negative adjustment for good cycling provisions; bonuses are additive.
    pub fn infrastructure_bonus(
        &self,
        cycleway: Option<&str>,
        bicycle_access: Option<&str>,
    ) -> f64 {
        let bonuses = &self.scoring.infrastructure_bonuses;
        let mut total = 0.0;
        match cycleway {
            Some("track") | Some("separate") | Some("lane") => {
                total += bonuses.dedicated_bike_lane;
            }
            Some("shared_lane") => total += bonuses.wide_shoulder,
            _ => {}
        }
        if bicycle_access == Some("designated") {
            total += bonuses.designated_bike_route;
        }
        total
    }

    pub fn risk_level(&self, risk_score: f64) -> RiskLevel {
        let t = &self.risk_thresholds;
        if risk_score >= t.critical {
            RiskLevel::Critical
        } else if risk_score >= t.high {
            RiskLevel::High
        } else if risk_score >= t.medium {
            RiskLevel::Medium
        } else if risk_score >= t.low {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn color(&self, level: RiskLevel) -> String {
        self.visualization
            .color_coding
            .get(level.name())
            .cloned()
            .unwrap_or_else(|| String::from(FALLBACK_COLOR))
    }
}

pub const FALLBACK_COLOR: &str = "#808080";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskThresholds {
    #[serde(default = "f64_value_9_0")]
    pub critical: f64,
    #[serde(default = "f64_value_7_0")]
    pub high: f64,
    #[serde(default = "f64_value_5_0")]
    pub medium: f64,
    #[serde(default = "f64_value_3_0")]
    pub low: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            critical: f64_value_9_0(),
            high: f64_value_7_0(),
            medium: f64_value_5_0(),
            low: f64_value_3_0(),
        }
    }
}

/// Speed bands in km/h. A road at or above a band's limit falls into that band.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpeedLimits {
    #[serde(default = "u32_value_100")]
    pub very_dangerous: u32,
    #[serde(default = "u32_value_80")]
    pub dangerous: u32,
    #[serde(default = "u32_value_60")]
    pub moderate: u32,
    #[serde(default = "u32_value_50")]
    pub safe: u32,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        SpeedLimits {
            very_dangerous: u32_value_100(),
            dangerous: u32_value_80(),
            moderate: u32_value_60(),
            safe: u32_value_50(),
        }
    }
}

/// Highway classes grouped into risk buckets. Only `forbidden` influences
/// scoring directly (it pins the score to the maximum); the other buckets
/// document the classification for criteria authors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HighwayTypes {
    #[serde(default = "default_forbidden_highways")]
    pub forbidden: Vec<String>,
    #[serde(default = "default_high_risk_highways")]
    pub high_risk: Vec<String>,
    #[serde(default = "default_medium_risk_highways")]
    pub medium_risk: Vec<String>,
    #[serde(default = "default_low_risk_highways")]
    pub low_risk: Vec<String>,
}

impl Default for HighwayTypes {
    fn default() -> Self {
        HighwayTypes {
            forbidden: default_forbidden_highways(),
            high_risk: default_high_risk_highways(),
            medium_risk: default_medium_risk_highways(),
            low_risk: default_low_risk_highways(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Scoring {
    pub speed_penalties: SpeedPenalties,
    #[serde(default = "default_highway_penalties")]
    pub highway_penalties: HashMap<String, f64>,
    pub infrastructure_penalties: InfrastructurePenalties,
    pub lane_penalties: LanePenalties,
    pub surface_penalties: SurfacePenalties,
    pub infrastructure_bonuses: InfrastructureBonuses,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring {
            speed_penalties: SpeedPenalties::default(),
            highway_penalties: default_highway_penalties(),
            infrastructure_penalties: InfrastructurePenalties::default(),
            lane_penalties: LanePenalties::default(),
            surface_penalties: SurfacePenalties::default(),
            infrastructure_bonuses: InfrastructureBonuses::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpeedPenalties {
    #[serde(default = "f64_value_4_0")]
    pub very_high: f64,
    #[serde(default = "f64_value_3_0")]
    pub high: f64,
    #[serde(default = "f64_value_2_0")]
    pub moderate: f64,
    #[serde(default = "f64_value_1_0")]
    pub low: f64,
}

impl Default for SpeedPenalties {
    fn default() -> Self {
        SpeedPenalties {
            very_high: f64_value_4_0(),
            high: f64_value_3_0(),
            moderate: f64_value_2_0(),
            low: f64_value_1_0(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InfrastructurePenalties {
    #[serde(default = "f64_value_2_5")]
    pub no_cycleway_no_shoulder: f64,
    #[serde(default = "f64_value_1_5")]
    pub no_cycleway: f64,
    #[serde(default = "f64_value_1_0")]
    pub no_shoulder: f64,
}

impl Default for InfrastructurePenalties {
    fn default() -> Self {
        InfrastructurePenalties {
            no_cycleway_no_shoulder: f64_value_2_5(),
            no_cycleway: f64_value_1_5(),
            no_shoulder: f64_value_1_0(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LanePenalties {
    #[serde(default = "f64_value_2_0")]
    pub four_or_more: f64,
    #[serde(default = "f64_value_1_0")]
    pub three: f64,
}

impl Default for LanePenalties {
    fn default() -> Self {
        LanePenalties {
            four_or_more: f64_value_2_0(),
            three: f64_value_1_0(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SurfacePenalties {
    #[serde(default = "f64_value_1_5")]
    pub very_bad: f64,
    #[serde(default = "f64_value_1_0")]
    pub bad: f64,
    #[serde(default = "f64_value_0_5")]
    pub unpaved: f64,
}

impl Default for SurfacePenalties {
    fn default() -> Self {
        SurfacePenalties {
            very_bad: f64_value_1_5(),
            bad: f64_value_1_0(),
            unpaved: f64_value_0_5(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InfrastructureBonuses {
    #[serde(default = "f64_value_neg_2_0")]
    pub dedicated_bike_lane: f64,
    #[serde(default = "f64_value_neg_1_5")]
    pub wide_shoulder: f64,
    #[serde(default = "f64_value_neg_1_0")]
    pub designated_bike_route: f64,
}

impl Default for InfrastructureBonuses {
    fn default() -> Self {
        InfrastructureBonuses {
            dedicated_bike_lane: f64_value_neg_2_0(),
            wide_shoulder: f64_value_neg_1_5(),
            designated_bike_route: f64_value_neg_1_0(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Visualization {
    #[serde(default = "default_color_coding")]
    pub color_coding: HashMap<String, String>,
}

impl Default for Visualization {
    fn default() -> Self {
        Visualization {
            color_coding: default_color_coding(),
        }
    }
}

fn f64_value_9_0() -> f64 {
    9.0
}

fn f64_value_7_0() -> f64 {
    7.0
}

fn f64_value_5_0() -> f64 {
    5.0
}

fn f64_value_4_0() -> f64 {
    4.0
}

fn f64_value_3_0() -> f64 {
    3.0
}

fn f64_value_2_5() -> f64 {
    2.5
}

fn f64_value_2_0() -> f64 {
    2.0
}

fn f64_value_1_5() -> f64 {
    1.5
}

fn f64_value_1_0() -> f64 {
    1.0
}

fn f64_value_0_5() -> f64 {
    0.5
}

fn f64_value_neg_2_0() -> f64 {
    -2.0
}

fn f64_value_neg_1_5() -> f64 {
    -1.5
}

fn f64_value_neg_1_0() -> f64 {
    -1.0
}

fn u32_value_100() -> u32 {
    100
}

fn u32_value_80() -> u32 {
    80
}

fn u32_value_60() -> u32 {
    60
}

fn u32_value_50() -> u32 {
    50
}

fn default_forbidden_highways() -> Vec<String> {
    vec!["motorway".to_string(), "motorway_link".to_string()]
}

fn default_high_risk_highways() -> Vec<String> {
    vec!["trunk".to_string(), "trunk_link".to_string()]
}

fn default_medium_risk_highways() -> Vec<String> {
    vec!["primary".to_string(), "primary_link".to_string()]
}

fn default_low_risk_highways() -> Vec<String> {
    vec!["secondary".to_string(), "tertiary".to_string()]
}

fn default_highway_penalties() -> HashMap<String, f64> {
    HashMap::from([
        ("motorway".to_string(), 5.0),
        ("trunk".to_string(), 3.0),
        ("primary".to_string(), 2.0),
        ("secondary".to_string(), 1.0),
    ])
}

fn default_color_coding() -> HashMap<String, String> {
    HashMap::from([
        ("critical".to_string(), "#FF0000".to_string()),
        ("high".to_string(), "#FF8800".to_string()),
        ("medium".to_string(), "#FFFF00".to_string()),
        ("low".to_string(), "#88FF00".to_string()),
        ("minimal".to_string(), "#00FF00".to_string()),
    ])
}
