//! Hybrid score fusion.
//!
//! Combines a text result stream and vector result streams into one fused
//! ordering with per-document subscores preserved for the debug channel:
//! - **RRF** (default): `Σ 1/(k + rank)` over the streams a document appears
//!   in, ranks 1-based, constant k defaulting to 60. Top-k truncation happens
//!   after fusion.
//! - **Weighted**: each stream min-max normalized into [0, 1] (max == min
//!   maps every entry to 1.0), fused as
//!   `w_text · norm_text + w_vector · norm_vector`; absent streams
//!   contribute 0. Weights need not sum to 1.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use searchsim_core::config::FusionMethod;

/// Default RRF constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Per-document subscores kept alongside the fused score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    /// Raw text score, when present in the text stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f64>,
    /// 1-based rank in the text stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_rank: Option<usize>,
    /// Raw vector score, when present in a vector stream (best across
    /// streams).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    /// 1-based rank in the vector stream (best across streams).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    /// Multiplicative boost applied by the scoring profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_boost: Option<f64>,
}

/// A fused hit.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// Document key.
    pub key: String,
    /// Fused score.
    pub score: f64,
    /// Preserved stream subscores.
    pub subscores: SubScores,
}

/// Fusion inputs: ranked `(key, score)` streams, best first.
pub struct FusionInputs<'a> {
    /// Text stream.
    pub text: &'a [(String, f64)],
    /// Vector streams (one per vector query).
    pub vector: &'a [Vec<(String, f64)>],
}

/// Fusion tuning.
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// Method selection; RRF when the request names none.
    pub method: FusionMethod,
    /// RRF constant.
    pub rrf_k: f64,
    /// Weighted-method text weight.
    pub text_weight: f64,
    /// Weighted-method vector weight.
    pub vector_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::Rrf,
            rrf_k: DEFAULT_RRF_K,
            text_weight: 1.0,
            vector_weight: 1.0,
        }
    }
}

/// Fuse the streams into a single descending ordering. Ties break by key
/// ascending for determinism.
#[must_use]
pub fn fuse(inputs: &FusionInputs<'_>, config: &FusionConfig) -> Vec<FusedHit> {
    let mut merged: HashMap<String, SubScores> = HashMap::new();

    for (rank0, (key, score)) in inputs.text.iter().enumerate() {
        let entry = merged.entry(key.clone()).or_default();
        entry.text_score = Some(*score);
        entry.text_rank = Some(rank0 + 1);
    }
    for stream in inputs.vector {
        for (rank0, (key, score)) in stream.iter().enumerate() {
            let entry = merged.entry(key.clone()).or_default();
            let rank = rank0 + 1;
            // Keep the best rank/score across vector streams.
            if entry.vector_rank.is_none_or(|existing| rank < existing) {
                entry.vector_rank = Some(rank);
                entry.vector_score = Some(*score);
            }
        }
    }

    let mut hits: Vec<FusedHit> = match config.method {
        FusionMethod::Rrf => merged
            .into_iter()
            .map(|(key, subscores)| {
                let score = rrf_contribution(config.rrf_k, subscores.text_rank)
                    + rrf_contribution(config.rrf_k, subscores.vector_rank);
                FusedHit {
                    key,
                    score,
                    subscores,
                }
            })
            .collect(),
        FusionMethod::Weighted => {
            let text_norm = min_max(inputs.text.iter().map(|(_, s)| *s));
            let vector_norm = min_max(
                inputs
                    .vector
                    .iter()
                    .flat_map(|stream| stream.iter().map(|(_, s)| *s)),
            );
            merged
                .into_iter()
                .map(|(key, subscores)| {
                    let text = subscores
                        .text_score
                        .map_or(0.0, |s| text_norm.normalize(s));
                    let vector = subscores
                        .vector_score
                        .map_or(0.0, |s| vector_norm.normalize(s));
                    let score = config.text_weight * text + config.vector_weight * vector;
                    FusedHit {
                        key,
                        score,
                        subscores,
                    }
                })
                .collect()
        }
    };

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    hits
}

/// RRF contribution for a 1-based rank; absent ranks contribute 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rrf_contribution(k: f64, rank: Option<usize>) -> f64 {
    rank.map_or(0.0, |r| 1.0 / (k + r as f64))
}

/// Min-max normalization bounds over one stream.
#[derive(Debug, Clone, Copy)]
struct MinMax {
    min: f64,
    max: f64,
}

impl MinMax {
    /// Normalize into [0, 1]; a degenerate stream (max == min) maps every
    /// entry to 1.0.
    fn normalize(self, value: f64) -> f64 {
        if (self.max - self.min).abs() < f64::EPSILON {
            1.0
        } else {
            ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
        }
    }
}

fn min_max(scores: impl Iterator<Item = f64>) -> MinMax {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for score in scores {
        min = min.min(score);
        max = max.max(score);
    }
    if min > max {
        // Empty stream; normalize() never sees a value from it anyway.
        MinMax { min: 0.0, max: 0.0 }
    } else {
        MinMax { min, max }
    }
}
