//! Scoring profile evaluation.
//!
//! Produces the per-document multiplicative boost applied on top of the text
//! score (surfaced as `documentBoost` in the debug subscores).
//!
//! Resolution order: explicit profile name in the request, else the index's
//! default profile, else none — all lookups case-insensitive, unknown names
//! resolving to none. Each function yields a normalized value in [0, 1],
//! reshaped by its interpolation curve and scaled by its boost coefficient.
//! A missing field contributes 0; a missing scoring parameter skips the
//! function entirely. The aggregate is added to a baseline of 1.0.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use searchsim_core::document::Document;
use searchsim_core::geo::GeoPoint;
use searchsim_core::schema::IndexSchema;
use searchsim_core::scoring::{
    FunctionAggregation, Interpolation, ScoringFunction, ScoringProfile, parse_boosting_duration,
};

/// Parse the request's `name-value` scoring parameters.
///
/// The first `-` separates name and value, so embedded dashes in the value
/// survive (`loc--47.6,-122.3`). Empty or malformed entries are skipped;
/// names are matched case-insensitively.
#[must_use]
pub fn parse_scoring_parameters(raw: &[String]) -> HashMap<String, String> {
    let mut parameters = HashMap::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once('-') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        parameters.insert(name.to_ascii_lowercase(), value.to_string());
    }
    parameters
}

/// Resolve the effective scoring profile for a request.
///
/// Explicit name wins, else the index default, else none. Unknown names
/// resolve to none.
#[must_use]
pub fn resolve_profile<'a>(
    schema: &'a IndexSchema,
    requested: Option<&str>,
) -> Option<&'a ScoringProfile> {
    if let Some(name) = requested {
        return schema.scoring_profile(name);
    }
    schema
        .default_scoring_profile
        .as_deref()
        .and_then(|name| schema.scoring_profile(name))
}

/// Evaluate a profile's functions against a document.
///
/// Returns `documentBoost` = 1.0 + the aggregated function boosts. `now`
/// anchors freshness evaluation.
#[must_use]
pub fn document_boost(
    profile: &ScoringProfile,
    document: &Document,
    parameters: &HashMap<String, String>,
    now: DateTime<FixedOffset>,
) -> f64 {
    let mut boosts: Vec<f64> = Vec::with_capacity(profile.functions.len());
    for function in &profile.functions {
        if let Some(boost) = evaluate_function(function, document, parameters, now) {
            boosts.push(boost);
        }
    }
    if boosts.is_empty() {
        return 1.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let aggregate = match profile.function_aggregation {
        FunctionAggregation::Sum => boosts.iter().sum(),
        FunctionAggregation::Average => boosts.iter().sum::<f64>() / boosts.len() as f64,
        FunctionAggregation::Minimum => boosts.iter().copied().fold(f64::INFINITY, f64::min),
        FunctionAggregation::Maximum => boosts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        FunctionAggregation::FirstMatching => boosts
            .iter()
            .copied()
            .find(|boost| *boost != 0.0)
            .unwrap_or(0.0),
    };
    1.0 + aggregate
}

/// Evaluate one function. `None` means skipped (missing parameter); `Some(0)`
/// means evaluated with no boost (missing field, out of range, no overlap).
fn evaluate_function(
    function: &ScoringFunction,
    document: &Document,
    parameters: &HashMap<String, String>,
    now: DateTime<FixedOffset>,
) -> Option<f64> {
    let field_value = document.get(function.field_name());

    let normalized: f64 = match function {
        ScoringFunction::Freshness { freshness, .. } => {
            let Some(duration) = parse_boosting_duration(&freshness.boosting_duration) else {
                return Some(0.0);
            };
            let Some(value) = field_value.and_then(date_value) else {
                return Some(0.0);
            };
            let age_secs = (now - value).num_milliseconds() as f64 / 1000.0;
            let window_secs = duration.num_milliseconds() as f64 / 1000.0;
            (1.0 - age_secs / window_secs).clamp(0.0, 1.0)
        }
        ScoringFunction::Magnitude { magnitude, .. } => {
            let Some(value) = field_value.and_then(numeric_value) else {
                return Some(0.0);
            };
            let start = magnitude.boosting_range_start;
            let end = magnitude.boosting_range_end;
            if (end - start).abs() < f64::EPSILON {
                return Some(0.0);
            }
            let raw = (value - start) / (end - start);
            if (0.0..=1.0).contains(&raw) {
                raw
            } else if magnitude.constant_boost_beyond_range {
                raw.clamp(0.0, 1.0)
            } else {
                return Some(0.0);
            }
        }
        ScoringFunction::Distance { distance, .. } => {
            let reference = parameters
                .get(&distance.reference_point_parameter.to_ascii_lowercase())
                .and_then(|raw| GeoPoint::from_param(raw))?;
            let Some(point) = field_value.and_then(GeoPoint::from_value) else {
                return Some(0.0);
            };
            if distance.boosting_distance <= 0.0 {
                return Some(0.0);
            }
            (1.0 - point.distance_km(&reference) / distance.boosting_distance).max(0.0)
        }
        ScoringFunction::Tag { tag, .. } => {
            let raw = parameters.get(&tag.tags_parameter.to_ascii_lowercase())?;
            let requested: Vec<String> = raw
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            let Some(value) = field_value else {
                return Some(0.0);
            };
            let document_tags: Vec<String> = match value {
                Value::String(s) => vec![s.to_ascii_lowercase()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_ascii_lowercase)
                    .collect(),
                _ => Vec::new(),
            };
            if requested.iter().any(|t| document_tags.contains(t)) {
                1.0
            } else {
                0.0
            }
        }
    };

    let shaped = interpolate(function.interpolation(), normalized);
    Some(shaped * function.boost())
}

/// Reshape a normalized value through the interpolation curve.
fn interpolate(curve: Interpolation, value: f64) -> f64 {
    let clamped = value.clamp(0.0, 1.0);
    match curve {
        Interpolation::Linear => clamped,
        Interpolation::Constant => {
            if clamped > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Interpolation::Quadratic => clamped * clamped,
        Interpolation::Logarithmic => (1.0 + clamped * (std::f64::consts::E - 1.0)).ln(),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn date_value(value: &Value) -> Option<DateTime<FixedOffset>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}
