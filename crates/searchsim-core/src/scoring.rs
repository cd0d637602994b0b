//! Scoring profile definitions.
//!
//! A profile bundles per-field text weights with an ordered list of boosting
//! functions and an aggregation mode. Function evaluation lives in the engine
//! crate; this module is the serde model plus the ISO-8601 boosting-duration
//! grammar (including the informal `365D` form).

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interpolation curve reshaping a normalized boost value in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Interpolation {
    /// Identity.
    #[default]
    Linear,
    /// 1.0 for any non-zero normalized value.
    Constant,
    /// Squared emphasis toward the high end.
    Quadratic,
    /// Logarithmic emphasis toward the low end.
    Logarithmic,
}

/// How per-function boosts combine into the profile aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionAggregation {
    /// Sum of all function boosts.
    #[default]
    Sum,
    /// Arithmetic mean.
    Average,
    /// Minimum.
    Minimum,
    /// Maximum.
    Maximum,
    /// First non-zero boost in declaration order.
    FirstMatching,
}

/// Freshness function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessParameters {
    /// Boosting duration, ISO-8601 (`P30D`, `PT12H`) or informal (`365D`).
    pub boosting_duration: String,
}

/// Magnitude function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagnitudeParameters {
    /// Range start.
    pub boosting_range_start: f64,
    /// Range end.
    pub boosting_range_end: f64,
    /// Outside the range: clamp to the nearest edge boost when true, zero
    /// when false.
    #[serde(default)]
    pub constant_boost_beyond_range: bool,
}

/// Distance function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceParameters {
    /// Name of the scoring parameter carrying the reference point.
    pub reference_point_parameter: String,
    /// Boosting distance in kilometers.
    pub boosting_distance: f64,
}

/// Tag function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagParameters {
    /// Name of the scoring parameter carrying the comma-separated tags.
    pub tags_parameter: String,
}

/// A boosting function attached to a scoring profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScoringFunction {
    /// Boost recent date values.
    Freshness {
        /// Target date field.
        field_name: String,
        /// Positive boost coefficient.
        boost: f64,
        /// Freshness parameters.
        freshness: FreshnessParameters,
        /// Interpolation curve.
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Boost numeric values within a range.
    Magnitude {
        /// Target numeric field.
        field_name: String,
        /// Positive boost coefficient.
        boost: f64,
        /// Magnitude parameters.
        magnitude: MagnitudeParameters,
        /// Interpolation curve.
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Boost documents close to a reference point.
    Distance {
        /// Target geography field.
        field_name: String,
        /// Positive boost coefficient.
        boost: f64,
        /// Distance parameters.
        distance: DistanceParameters,
        /// Interpolation curve.
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Boost documents whose tags overlap a parameter list.
    Tag {
        /// Target tag field (string or string collection).
        field_name: String,
        /// Positive boost coefficient.
        boost: f64,
        /// Tag parameters.
        tag: TagParameters,
        /// Interpolation curve.
        #[serde(default)]
        interpolation: Interpolation,
    },
}

impl ScoringFunction {
    /// The field this function reads.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::Freshness { field_name, .. }
            | Self::Magnitude { field_name, .. }
            | Self::Distance { field_name, .. }
            | Self::Tag { field_name, .. } => field_name,
        }
    }

    /// The boost coefficient.
    #[must_use]
    pub const fn boost(&self) -> f64 {
        match self {
            Self::Freshness { boost, .. }
            | Self::Magnitude { boost, .. }
            | Self::Distance { boost, .. }
            | Self::Tag { boost, .. } => *boost,
        }
    }

    /// The interpolation curve.
    #[must_use]
    pub const fn interpolation(&self) -> Interpolation {
        match self {
            Self::Freshness { interpolation, .. }
            | Self::Magnitude { interpolation, .. }
            | Self::Distance { interpolation, .. }
            | Self::Tag { interpolation, .. } => *interpolation,
        }
    }
}

/// A named scoring profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringProfile {
    /// Profile name, matched case-insensitively.
    pub name: String,
    /// Per-field text weight multipliers for searchable string fields.
    #[serde(default)]
    pub text_weights: HashMap<String, f64>,
    /// Ordered boosting functions.
    #[serde(default)]
    pub functions: Vec<ScoringFunction>,
    /// Aggregation mode for function boosts.
    #[serde(default)]
    pub function_aggregation: FunctionAggregation,
}

impl ScoringProfile {
    /// Create an empty profile.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text_weights: HashMap::new(),
            functions: Vec::new(),
            function_aggregation: FunctionAggregation::default(),
        }
    }
}

/// Parse a boosting duration.
///
/// Accepts the ISO-8601 duration grammar (`P10D`, `PT6H`, `P1DT12H`,
/// `PT30M`, `PT45S`) and the informal bare form (`365D`, `12H`). Returns
/// `None` for malformed input or non-positive durations.
#[must_use]
pub fn parse_boosting_duration(input: &str) -> Option<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Informal form: a number followed by a single unit letter.
    let upper = trimmed.to_ascii_uppercase();
    if !upper.starts_with('P') {
        let (digits, unit) = upper.split_at(upper.len().checked_sub(1)?);
        let value: i64 = digits.parse().ok()?;
        let duration = match unit {
            "D" => Duration::days(value),
            "H" => Duration::hours(value),
            "M" => Duration::minutes(value),
            "S" => Duration::seconds(value),
            _ => return None,
        };
        return (duration > Duration::zero()).then_some(duration);
    }

    // ISO-8601: P[nD][T[nH][nM][nS]]
    let body = &upper[1..];
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, t),
        None => (body, ""),
    };

    let mut total = Duration::zero();
    let mut number = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else if ch == 'D' {
            let value: i64 = number.parse().ok()?;
            total += Duration::days(value);
            number.clear();
        } else {
            return None;
        }
    }
    if !number.is_empty() {
        return None;
    }
    for ch in time_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let value: i64 = number.parse().ok()?;
            total += match ch {
                'H' => Duration::hours(value),
                'M' => Duration::minutes(value),
                'S' => Duration::seconds(value),
                _ => return None,
            };
            number.clear();
        }
    }
    if !number.is_empty() {
        return None;
    }

    (total > Duration::zero()).then_some(total)
}
