//! Local on-device embedding model.
//!
//! Embedding skills whose `resourceUri` carries the `local://` scheme run
//! against this deterministic hashing model instead of an external endpoint:
//! token and bigram features are hashed into a fixed-dimension projection,
//! mean-pooled, and optionally L2-normalized. Model handles are loaded
//! lazily per name and cached for process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use searchsim_core::config::LocalEmbeddingSettings;

/// Default embedding dimension when the model name carries none.
const DEFAULT_DIMENSIONS: usize = 384;

/// A loaded local embedding model.
#[derive(Debug)]
pub struct LocalEmbeddingModel {
    name: String,
    dimensions: usize,
    maximum_tokens: usize,
    normalize: bool,
    case_sensitive: bool,
}

impl LocalEmbeddingModel {
    fn load(name: &str, settings: &LocalEmbeddingSettings) -> Self {
        // A trailing `-<digits>` in the model name selects the dimension
        // (`simhash-384`, `simhash-768`).
        let dimensions = name
            .rsplit_once('-')
            .and_then(|(_, digits)| digits.parse().ok())
            .unwrap_or(DEFAULT_DIMENSIONS);
        Self {
            name: name.to_string(),
            dimensions,
            maximum_tokens: settings.maximum_tokens,
            normalize: settings.normalize_embeddings,
            case_sensitive: settings.case_sensitive,
        }
    }

    /// Output dimension of this model.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a text into a deterministic dense vector.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let prepared = if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        };
        let tokens: Vec<&str> = prepared
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .take(self.maximum_tokens)
            .collect();

        let mut accumulator = vec![0.0f32; self.dimensions];
        let mut features = 0usize;
        for window in [1usize, 2] {
            if tokens.len() < window {
                continue;
            }
            for chunk in tokens.windows(window) {
                self.accumulate(&chunk.join(" "), &mut accumulator);
                features += 1;
            }
        }
        if features == 0 {
            return accumulator;
        }

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / features as f32;
        for component in &mut accumulator {
            *component *= scale;
        }
        if self.normalize {
            let norm: f32 = accumulator.iter().map(|c| c * c).sum::<f32>().sqrt();
            if norm > 0.0 {
                for component in &mut accumulator {
                    *component /= norm;
                }
            }
        }
        accumulator
    }

    /// Hash one feature into signed contributions across the projection.
    fn accumulate(&self, feature: &str, accumulator: &mut [f32]) {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        for pair in digest.chunks_exact(4) {
            let raw = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
            let index = (raw >> 1) as usize % self.dimensions;
            let sign = if raw & 1 == 0 { 1.0 } else { -1.0 };
            accumulator[index] += sign;
        }
    }
}

/// Process-lifetime cache of model handles, loaded lazily per name.
#[derive(Debug)]
pub struct LocalEmbeddingCache {
    settings: LocalEmbeddingSettings,
    models: RwLock<HashMap<String, Arc<LocalEmbeddingModel>>>,
}

impl LocalEmbeddingCache {
    /// Create the cache from configuration.
    #[must_use]
    pub fn new(settings: LocalEmbeddingSettings) -> Self {
        Self {
            settings,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a model by name, loading it on first use. Empty names resolve
    /// to the configured default model.
    #[must_use]
    pub fn model(&self, name: &str) -> Arc<LocalEmbeddingModel> {
        let effective = if name.is_empty() {
            self.settings.default_model.as_str()
        } else {
            name
        };
        if let Some(model) = self.models.read().expect("embed cache lock").get(effective) {
            return Arc::clone(model);
        }
        let mut models = self.models.write().expect("embed cache lock");
        Arc::clone(
            models
                .entry(effective.to_string())
                .or_insert_with(|| Arc::new(LocalEmbeddingModel::load(effective, &self.settings))),
        )
    }
}
