//! Configuration management for the simulator.
//!
//! Configuration is loaded from environment variables with typed defaults.
//! `validate()` surfaces configuration errors; production mode treats them as
//! fatal at startup while development mode logs warnings and continues.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SimulatorError, SimulatorResult};

/// Deployment environment, controlling validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppEnvironment {
    /// Warnings on invalid settings.
    #[default]
    Development,
    /// Invalid settings fail startup.
    Production,
}

/// Hybrid fusion method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion.
    #[default]
    Rrf,
    /// Weighted min-max-normalized combination.
    Weighted,
}

/// HNSW tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswSettings {
    /// Graph degree per layer.
    pub m: usize,
    /// Dynamic candidate-list size during insertion.
    pub ef_construction: usize,
    /// Dynamic candidate-list size at query time.
    pub ef_search: usize,
    /// Query enlargement factor for filtered search.
    pub oversample_multiplier: usize,
    /// Deterministic level-assignment seed; negative means entropy-seeded.
    pub random_seed: i64,
}

impl Default for HnswSettings {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            oversample_multiplier: 4,
            random_seed: 42,
        }
    }
}

/// Hybrid search defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchSettings {
    /// Fusion method when the request names none.
    pub default_fusion_method: FusionMethod,
    /// Default text-stream weight for the weighted method.
    pub default_text_weight: f64,
    /// Default vector-stream weight for the weighted method.
    pub default_vector_weight: f64,
    /// RRF constant k.
    pub rrf_k: f64,
}

impl Default for HybridSearchSettings {
    fn default() -> Self {
        Self {
            default_fusion_method: FusionMethod::Rrf,
            default_text_weight: 1.0,
            default_vector_weight: 1.0,
            rrf_k: 60.0,
        }
    }
}

/// Diagnostic logging toggles for the pipeline and engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticLogging {
    /// Master switch.
    pub enabled: bool,
    /// Log per-document detail during indexer runs.
    pub log_document_details: bool,
    /// Log each skill execution.
    pub log_skill_execution: bool,
    /// Log skill input payloads (truncated).
    pub log_skill_input_payloads: bool,
    /// Log skill output payloads (truncated).
    pub log_skill_output_payloads: bool,
    /// Log the enriched-document tree between skills.
    pub log_enriched_document_state: bool,
    /// Log field-mapping application.
    pub log_field_mappings: bool,
    /// Truncation limit for logged strings.
    pub max_string_log_length: usize,
    /// Include timing spans in diagnostics.
    pub include_timings: bool,
}

impl Default for DiagnosticLogging {
    fn default() -> Self {
        Self {
            enabled: false,
            log_document_details: false,
            log_skill_execution: false,
            log_skill_input_payloads: false,
            log_skill_output_payloads: false,
            log_enriched_document_state: false,
            log_field_mappings: false,
            max_string_log_length: 256,
            include_timings: false,
        }
    }
}

impl DiagnosticLogging {
    /// Truncate a payload string for logging.
    #[must_use]
    pub fn truncate<'a>(&self, payload: &'a str) -> &'a str {
        match payload.char_indices().nth(self.max_string_log_length) {
            Some((idx, _)) => &payload[..idx],
            None => payload,
        }
    }
}

/// Local embedding model settings for `local://` embedding skills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEmbeddingSettings {
    /// Directory holding model files.
    pub models_directory: PathBuf,
    /// Model used when the skill names none.
    pub default_model: String,
    /// Token truncation limit.
    pub maximum_tokens: usize,
    /// L2-normalize output vectors.
    pub normalize_embeddings: bool,
    /// Pooling mode ("mean" or "max").
    pub pooling_mode: String,
    /// Fetch missing models on first use.
    pub auto_download_models: bool,
    /// Case-sensitive tokenization.
    pub case_sensitive: bool,
}

impl Default for LocalEmbeddingSettings {
    fn default() -> Self {
        Self {
            models_directory: PathBuf::from("models"),
            default_model: "simhash-384".into(),
            maximum_tokens: 512,
            normalize_embeddings: true,
            pooling_mode: "mean".into(),
            auto_download_models: false,
            case_sensitive: false,
        }
    }
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Deployment environment.
    pub environment: AppEnvironment,
    /// Root directory for persisted index, vector, and status files.
    pub index_path: PathBuf,
    /// Use HNSW graphs; brute-force scan when false.
    pub use_hnsw: bool,
    /// Vector count below which brute-force is used even with HNSW on.
    pub brute_force_threshold: usize,
    /// HNSW parameters.
    pub hnsw: HnswSettings,
    /// Hybrid search defaults.
    pub hybrid: HybridSearchSettings,
    /// Diagnostic logging.
    pub diagnostics: DiagnosticLogging,
    /// Local embedding settings.
    pub local_embedding: LocalEmbeddingSettings,
    /// Per-skill timeout in seconds.
    pub skill_timeout_secs: u64,
    /// Wildcard term expansion cap.
    pub wildcard_expansion_limit: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            environment: AppEnvironment::Development,
            index_path: PathBuf::from("searchsim-data"),
            use_hnsw: true,
            brute_force_threshold: 64,
            hnsw: HnswSettings::default(),
            hybrid: HybridSearchSettings::default(),
            diagnostics: DiagnosticLogging::default(),
            local_embedding: LocalEmbeddingSettings::default(),
            skill_timeout_secs: 30,
            wildcard_expansion_limit: 128,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key).map_or(default, |v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

impl SimulatorConfig {
    /// Load configuration from `SEARCHSIM_*` environment variables, falling
    /// back to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(env_name) = env_string("SEARCHSIM_ENVIRONMENT") {
            if env_name.trim().eq_ignore_ascii_case("production") {
                config.environment = AppEnvironment::Production;
            }
        }
        if let Some(path) = env_string("SEARCHSIM_INDEX_PATH") {
            config.index_path = PathBuf::from(path);
        }
        config.use_hnsw = env_bool("SEARCHSIM_USE_HNSW", config.use_hnsw);
        if let Some(v) = env_parse("SEARCHSIM_BRUTE_FORCE_THRESHOLD") {
            config.brute_force_threshold = v;
        }

        if let Some(v) = env_parse("SEARCHSIM_HNSW_M") {
            config.hnsw.m = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_HNSW_EF_CONSTRUCTION") {
            config.hnsw.ef_construction = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_HNSW_EF_SEARCH") {
            config.hnsw.ef_search = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_HNSW_OVERSAMPLE") {
            config.hnsw.oversample_multiplier = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_HNSW_RANDOM_SEED") {
            config.hnsw.random_seed = v;
        }

        if let Some(method) = env_string("SEARCHSIM_FUSION_METHOD") {
            if method.trim().eq_ignore_ascii_case("weighted") {
                config.hybrid.default_fusion_method = FusionMethod::Weighted;
            }
        }
        if let Some(v) = env_parse("SEARCHSIM_RRF_K") {
            config.hybrid.rrf_k = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_TEXT_WEIGHT") {
            config.hybrid.default_text_weight = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_VECTOR_WEIGHT") {
            config.hybrid.default_vector_weight = v;
        }

        config.diagnostics.enabled = env_bool("SEARCHSIM_DIAG_ENABLED", false);
        config.diagnostics.log_document_details = env_bool("SEARCHSIM_DIAG_DOCUMENTS", false);
        config.diagnostics.log_skill_execution = env_bool("SEARCHSIM_DIAG_SKILLS", false);
        config.diagnostics.log_skill_input_payloads = env_bool("SEARCHSIM_DIAG_SKILL_INPUTS", false);
        config.diagnostics.log_skill_output_payloads =
            env_bool("SEARCHSIM_DIAG_SKILL_OUTPUTS", false);
        config.diagnostics.log_enriched_document_state =
            env_bool("SEARCHSIM_DIAG_ENRICHED_STATE", false);
        config.diagnostics.log_field_mappings = env_bool("SEARCHSIM_DIAG_FIELD_MAPPINGS", false);
        if let Some(v) = env_parse("SEARCHSIM_DIAG_MAX_STRING_LENGTH") {
            config.diagnostics.max_string_log_length = v;
        }
        config.diagnostics.include_timings = env_bool("SEARCHSIM_DIAG_TIMINGS", false);

        if let Some(dir) = env_string("SEARCHSIM_EMBED_MODELS_DIR") {
            config.local_embedding.models_directory = PathBuf::from(dir);
        }
        if let Some(model) = env_string("SEARCHSIM_EMBED_DEFAULT_MODEL") {
            config.local_embedding.default_model = model;
        }
        if let Some(v) = env_parse("SEARCHSIM_EMBED_MAX_TOKENS") {
            config.local_embedding.maximum_tokens = v;
        }
        config.local_embedding.normalize_embeddings =
            env_bool("SEARCHSIM_EMBED_NORMALIZE", config.local_embedding.normalize_embeddings);
        config.local_embedding.case_sensitive =
            env_bool("SEARCHSIM_EMBED_CASE_SENSITIVE", config.local_embedding.case_sensitive);

        if let Some(v) = env_parse("SEARCHSIM_SKILL_TIMEOUT_SECS") {
            config.skill_timeout_secs = v;
        }
        if let Some(v) = env_parse("SEARCHSIM_WILDCARD_EXPANSION_LIMIT") {
            config.wildcard_expansion_limit = v;
        }

        config
    }

    /// Validate settings. In production an error here fails startup; in
    /// development the caller downgrades each finding to a warning.
    pub fn validate(&self) -> SimulatorResult<()> {
        let mut findings = Vec::new();

        if self.hnsw.m < 2 {
            findings.push(format!("hnsw.m must be at least 2, got {}", self.hnsw.m));
        }
        if self.hnsw.ef_construction < self.hnsw.m {
            findings.push(format!(
                "hnsw.efConstruction ({}) must be >= hnsw.m ({})",
                self.hnsw.ef_construction, self.hnsw.m
            ));
        }
        if self.hnsw.ef_search == 0 {
            findings.push("hnsw.efSearch must be positive".into());
        }
        if self.hnsw.oversample_multiplier == 0 {
            findings.push("hnsw.oversampleMultiplier must be positive".into());
        }
        if self.hybrid.rrf_k <= 0.0 {
            findings.push(format!("hybrid.rrfK must be positive, got {}", self.hybrid.rrf_k));
        }
        if self.hybrid.default_text_weight < 0.0 || self.hybrid.default_vector_weight < 0.0 {
            findings.push("hybrid weights must be non-negative".into());
        }
        if self.skill_timeout_secs == 0 {
            findings.push("skillTimeoutSecs must be positive".into());
        }
        if self.wildcard_expansion_limit == 0 {
            findings.push("wildcardExpansionLimit must be positive".into());
        }
        if self.index_path.as_os_str().is_empty() {
            findings.push("indexPath is empty".into());
        }

        if findings.is_empty() {
            Ok(())
        } else {
            Err(SimulatorError::Configuration(findings.join("; ")))
        }
    }

    /// Validate with environment-appropriate severity: errors in production,
    /// logged warnings in development.
    pub fn validate_for_startup(&self) -> SimulatorResult<()> {
        match self.validate() {
            Ok(()) => Ok(()),
            Err(err) if self.environment == AppEnvironment::Production => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "configuration findings ignored in development mode");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SimulatorConfig::default().validate().expect("defaults pass");
    }

    #[test]
    fn bad_hnsw_m_fails() {
        let mut config = SimulatorConfig::default();
        config.hnsw.m = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_rrf_k_fails() {
        let mut config = SimulatorConfig::default();
        config.hybrid.rrf_k = 0.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_type(), "CONFIGURATION");
    }

    #[test]
    fn development_downgrades_to_warning() {
        let mut config = SimulatorConfig::default();
        config.hnsw.ef_search = 0;
        config.environment = AppEnvironment::Development;
        config.validate_for_startup().expect("development warns only");

        config.environment = AppEnvironment::Production;
        assert!(config.validate_for_startup().is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let diag = DiagnosticLogging {
            max_string_log_length: 3,
            ..DiagnosticLogging::default()
        };
        assert_eq!(diag.truncate("abcdef"), "abc");
        assert_eq!(diag.truncate("héllo"), "hél");
        assert_eq!(diag.truncate("ab"), "ab");
    }
}
