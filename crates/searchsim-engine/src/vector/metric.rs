//! Distance metrics and score normalization.
//!
//! Scores are normalized into [0, 1] for every metric so text and vector
//! streams are comparable: cosine maps through `(1 + cos) / 2`, Euclidean
//! through `1 / (1 + d)`, and dot product through a logistic squash.

use searchsim_core::schema::VectorMetric;

/// Distance between two vectors under a metric. Lower is closer for every
/// metric (dot product is negated).
#[must_use]
pub fn distance(metric: VectorMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        VectorMetric::Cosine => 1.0 - cosine_similarity(a, b),
        VectorMetric::Euclidean => euclidean(a, b),
        VectorMetric::DotProduct => -dot(a, b),
    }
}

/// Map a distance to a normalized score in [0, 1], higher is better.
#[must_use]
pub fn score_from_distance(metric: VectorMetric, distance: f32) -> f64 {
    let d = f64::from(distance);
    match metric {
        // distance = 1 - cos, so (1 + cos) / 2 = (2 - distance) / 2.
        VectorMetric::Cosine => ((2.0 - d) / 2.0).clamp(0.0, 1.0),
        VectorMetric::Euclidean => 1.0 / (1.0 + d.max(0.0)),
        VectorMetric::DotProduct => 1.0 / (1.0 + (d).exp()),
    }
}

/// Cosine similarity; zero vectors yield 0 (mapping the score to 0.5).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
