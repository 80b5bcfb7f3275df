use crate::safety::criteria::SafetyCriteria;
use crate::safety::extractor::RawRoad;
use crate::safety::models::RoadSegment;

/// Additive point model over the configured criteria. Pure: same road and
/// criteria always yield the same score and factor list, and malformed
/// attribute values degrade to defaults instead of failing.
pub fn score_road(road: RawRoad, criteria: &SafetyCriteria) -> RoadSegment {
    let max_speed_kph = parse_maxspeed(road.maxspeed.as_deref());
    let lane_count = parse_lanes(road.lanes.as_deref());
    let has_cycleway = road.cycleway.as_deref().is_some_and(|v| !v.is_empty());
    let has_shoulder = road
        .shoulder
        .as_deref()
        .is_some_and(|v| !v.is_empty() && v != "no");

    let mut score = 0.0;
    let mut factors: Vec<String> = Vec::new();

    // A forbidden highway class pins the final score to the maximum. The other
    // factors are still evaluated below so the factor list stays informative.
    let forbidden = criteria.is_forbidden_highway(&road.highway);
    if forbidden {
        factors.push("forbidden_highway_type".to_string());
    }

    if max_speed_kph > 0 {
        let penalty = criteria.speed_penalty(max_speed_kph);
        if penalty > 0.0 {
            score += penalty;
            let limits = &criteria.speed_limits;
            if max_speed_kph >= limits.very_dangerous {
                factors.push("very_high_speed".to_string());
            } else if max_speed_kph >= limits.dangerous {
                factors.push("high_speed".to_string());
            } else if max_speed_kph >= limits.moderate {
                factors.push("moderate_speed".to_string());
            }
        }
    }

    let penalty = criteria.highway_penalty(&road.highway);
    if penalty > 0.0 {
        score += penalty;
        factors.push(format!("highway_{}", road.highway));
    }

    let penalty = criteria.infrastructure_penalty(has_cycleway, has_shoulder);
    if penalty > 0.0 {
        score += penalty;
        if !has_cycleway && !has_shoulder {
            factors.push("no_bike_infrastructure".to_string());
        } else if !has_cycleway {
            factors.push("no_cycleway".to_string());
        }
    }

    if lane_count > 2 {
        let penalty = criteria.lane_penalty(lane_count);
        if penalty > 0.0 {
            score += penalty;
            if lane_count >= 4 {
                factors.push("multi_lane".to_string());
            } else {
                factors.push("three_lanes".to_string());
            }
        }
    }

    if let Some(surface) = road.surface.as_deref() {
        let penalty = criteria.surface_penalty(surface);
        if penalty > 0.0 {
            score += penalty;
            factors.push("poor_surface".to_string());
        }
    }

    let bonus = criteria.infrastructure_bonus(road.cycleway.as_deref(), road.bicycle.as_deref());
    if bonus < 0.0 {
        score += bonus;
        factors.push("good_bike_infrastructure".to_string());
    }

    let risk_score = if forbidden {
        10.0
    } else {
        score.clamp(0.0, 10.0)
    };

    RoadSegment {
        id: road.id,
        name: road.name,
        coordinates: road.coordinates,
        highway_type: road.highway,
        max_speed_kph,
        has_cycleway,
        has_shoulder,
        lane_count,
        surface: road.surface,
        bicycle_access: road.bicycle,
        risk_score,
        risk_factors: factors,
    }
}

/// Parse a raw `maxspeed` tag value to km/h. Handles "50", "80 km/h" and
/// "50 mph" (converted, truncated); "none", empty and garbage map to 0.
pub(crate) fn parse_maxspeed(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else {
        return 0;
    };
    if raw == "none" {
        return 0;
    }
    let Some(value) = leading_number(raw) else {
        return 0;
    };
    if raw.to_lowercase().contains("mph") {
        (value as f64 * 1.60934) as u32
    } else {
        value
    }
}

/// Parse a raw `lanes` tag value. A range like "2-3" takes the lower bound;
/// anything unparseable defaults to 1.
pub(crate) fn parse_lanes(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else {
        return 1;
    };
    let lower = match raw.split_once('-') {
        Some((low, _)) => low,
        None => raw,
    };
    lower.trim().parse().unwrap_or(1)
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
