//! Search request/response assembly.
//!
//! The request mirrors the cloud service's wire shape; the response is built
//! as an order-preserving JSON object so the observable property order holds:
//! each result emits `@search.score` first, then `@search.highlights` (when
//! present), then `@search.documentDebugInfo` (when debug is on), then the
//! document fields. The response-level debug block carries the standard
//! `queryRewrites` namespace plus the `simulator.*` properties.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use searchsim_core::config::{FusionMethod, SimulatorConfig};
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_engine::fusion::FusionConfig;
use searchsim_engine::query::{QueryType, SearchMode};
use searchsim_engine::searcher::{EngineSearchResult, SearchOptions, VectorQueryInput};

/// One vector query of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorQuery {
    /// `vector` (raw floats) or `text` (embedded by the service).
    #[serde(default)]
    pub kind: VectorQueryKind,
    /// Raw query vector for `kind: vector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Query text for `kind: text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Comma-separated target vector fields.
    pub fields: String,
    /// Neighbor count.
    #[serde(default = "default_k")]
    pub k: usize,
}

const fn default_k() -> usize {
    50
}

/// Vector query kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorQueryKind {
    /// Raw vector provided by the caller.
    #[default]
    Vector,
    /// Text embedded on the service side.
    Text,
}

/// Hybrid-search tuning carried by a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchParameters {
    /// Fusion method override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_method: Option<FusionMethod>,
    /// RRF constant override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrf_k: Option<f64>,
    /// Weighted-method text weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_weight: Option<f64>,
    /// Weighted-method vector weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,
}

/// The search request wire shape (selected fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    /// Query text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// `any` | `all`.
    pub search_mode: SearchMode,
    /// `simple` | `full`.
    pub query_type: QueryType,
    /// Comma-separated searched fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<String>,
    /// OData filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Orderby clause list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderby: Option<String>,
    /// Comma-separated projection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    /// Page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
    /// Page offset.
    pub skip: usize,
    /// Emit `@odata.count`.
    pub count: bool,
    /// Facet specs.
    pub facets: Vec<String>,
    /// Comma-separated highlighted fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
    /// Highlight pre-tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_pre_tag: Option<String>,
    /// Highlight post-tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_post_tag: Option<String>,
    /// Scoring profile selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring_profile: Option<String>,
    /// `name-value` scoring parameters.
    pub scoring_parameters: Vec<String>,
    /// Vector queries.
    pub vector_queries: Vec<VectorQuery>,
    /// Hybrid fusion tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_search: Option<HybridSearchParameters>,
    /// Pipe-joined debug flags
    /// (`disabled|semantic|vector|queryRewrites|innerHits|all`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl SearchRequest {
    /// Whether any debug channel is enabled.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug
            .as_deref()
            .is_some_and(|raw| {
                !raw.split('|')
                    .map(str::trim)
                    .all(|flag| flag.is_empty() || flag.eq_ignore_ascii_case("disabled"))
            })
    }

    /// Translate the wire request into engine options. Vector queries are
    /// resolved by the caller (text embedding happens service-side).
    pub fn to_engine_options(
        &self,
        config: &SimulatorConfig,
        vector_queries: Vec<VectorQueryInput>,
    ) -> SimulatorResult<SearchOptions> {
        let hybrid = self.hybrid_search.clone().unwrap_or_default();
        let fusion = FusionConfig {
            method: hybrid
                .fusion_method
                .unwrap_or(config.hybrid.default_fusion_method),
            rrf_k: hybrid.rrf_k.unwrap_or(config.hybrid.rrf_k),
            text_weight: hybrid.text_weight.unwrap_or(config.hybrid.default_text_weight),
            vector_weight: hybrid
                .vector_weight
                .unwrap_or(config.hybrid.default_vector_weight),
        };
        if fusion.rrf_k <= 0.0 {
            return Err(SimulatorError::Validation(
                "rrfK must be positive".to_string(),
            ));
        }

        Ok(SearchOptions {
            search: self.search.clone().unwrap_or_default(),
            query_type: self.query_type,
            search_mode: self.search_mode,
            search_fields: split_csv(self.search_fields.as_deref()),
            filter: self.filter.clone(),
            orderby: self.orderby.clone(),
            top: self.top,
            skip: self.skip,
            facets: self.facets.clone(),
            highlight_fields: split_csv(self.highlight.as_deref()),
            highlight_pre_tag: self
                .highlight_pre_tag
                .clone()
                .unwrap_or_else(|| searchsim_engine::highlight::DEFAULT_PRE_TAG.to_string()),
            highlight_post_tag: self
                .highlight_post_tag
                .clone()
                .unwrap_or_else(|| searchsim_engine::highlight::DEFAULT_POST_TAG.to_string()),
            scoring_profile: self.scoring_profile.clone(),
            scoring_parameters: self.scoring_parameters.clone(),
            vector_queries,
            fusion,
            now: None,
        })
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|text| {
        text.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Assemble the wire response from the engine result.
///
/// `documents` provides the projected payload per hit key.
#[must_use]
pub fn build_response(
    request: &SearchRequest,
    result: &EngineSearchResult,
    documents: impl Fn(&str) -> Option<searchsim_core::document::Document>,
) -> Value {
    let mut response = Map::new();

    if request.count {
        response.insert("@odata.count".to_string(), json!(result.total_matched));
    }
    if !result.facets.is_empty() {
        response.insert(
            "@search.facets".to_string(),
            Value::Object(result.facets.clone()),
        );
    }
    response.insert("@search.coverage".to_string(), json!(100.0));

    let debug_enabled = request.debug_enabled();
    let values: Vec<Value> = result
        .hits
        .iter()
        .map(|hit| {
            let mut row = Map::new();
            // Property order is observable: score, highlights, debug info,
            // then document fields.
            row.insert("@search.score".to_string(), json!(hit.score));
            if let Some(highlights) = &hit.highlights {
                row.insert(
                    "@search.highlights".to_string(),
                    Value::Object(highlights.clone()),
                );
            }
            if debug_enabled {
                row.insert(
                    "@search.documentDebugInfo".to_string(),
                    json!({
                        "subScores": hit.subscores,
                    }),
                );
            }
            if let Some(document) = documents(&hit.key) {
                for (name, value) in document {
                    row.insert(name, value);
                }
            }
            Value::Object(row)
        })
        .collect();
    response.insert("value".to_string(), Value::Array(values));

    if debug_enabled {
        let debug = &result.debug;
        response.insert(
            "@search.debug".to_string(),
            json!({
                "queryRewrites": Value::Null,
                "simulator.parsedQuery": debug.parsed_query,
                "simulator.parsedFilter": debug.parsed_filter,
                "simulator.isHybridSearch": debug.is_hybrid_search,
                "simulator.textSearchTimeMs": debug.text_search_time_ms,
                "simulator.vectorSearchTimeMs": debug.vector_search_time_ms,
                "simulator.totalTimeMs": debug.total_time_ms,
                "simulator.textMatchCount": debug.text_match_count,
                "simulator.vectorMatchCount": debug.vector_match_count,
                "simulator.scoreFusionMethod": debug.score_fusion_method,
                "simulator.searchableFields": debug.searchable_fields,
            }),
        );
    }

    Value::Object(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsim_engine::fusion::SubScores;
    use searchsim_engine::searcher::{SearchDebug, SearchHit};

    fn engine_result() -> EngineSearchResult {
        EngineSearchResult {
            hits: vec![SearchHit {
                key: "a".into(),
                score: 0.5,
                highlights: Some(
                    serde_json::from_value(json!({"description": ["<em>x</em>"]})).unwrap(),
                ),
                subscores: SubScores::default(),
            }],
            total_matched: 1,
            facets: Map::new(),
            debug: SearchDebug::default(),
        }
    }

    #[test]
    fn request_parses_wire_shape() {
        let request: SearchRequest = serde_json::from_value(json!({
            "search": "luxury",
            "searchMode": "all",
            "queryType": "full",
            "top": 5,
            "count": true,
            "vectorQueries": [
                {"kind": "vector", "vector": [1.0, 0.0], "fields": "vec", "k": 3}
            ],
            "hybridSearch": {"fusionMethod": "rrf", "rrfK": 60.0},
            "debug": "vector|queryRewrites"
        }))
        .unwrap();
        assert_eq!(request.search.as_deref(), Some("luxury"));
        assert_eq!(request.search_mode, SearchMode::All);
        assert_eq!(request.query_type, QueryType::Full);
        assert_eq!(request.vector_queries.len(), 1);
        assert_eq!(request.vector_queries[0].k, 3);
        assert!(request.debug_enabled());
    }

    #[test]
    fn debug_disabled_flag() {
        let request = SearchRequest {
            debug: Some("disabled".into()),
            ..SearchRequest::default()
        };
        assert!(!request.debug_enabled());
        let request = SearchRequest {
            debug: None,
            ..SearchRequest::default()
        };
        assert!(!request.debug_enabled());
    }

    #[test]
    fn response_property_order() {
        let request = SearchRequest {
            count: true,
            ..SearchRequest::default()
        };
        let response = build_response(&request, &engine_result(), |_| {
            let mut document = searchsim_core::document::Document::new();
            document.insert("id".into(), json!("a"));
            document.insert("title".into(), json!("hello"));
            Some(document)
        });

        let row = &response["value"][0];
        let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
        assert_eq!(keys[0], "@search.score");
        assert_eq!(keys[1], "@search.highlights");
        assert_eq!(keys[2], "id");
        assert_eq!(keys[3], "title");
        assert_eq!(response["@odata.count"], json!(1));

        // Property order survives a serialize/parse round trip.
        let text = serde_json::to_string(&response).unwrap();
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        let keys_again: Vec<&String> = reparsed["value"][0].as_object().unwrap().keys().collect();
        assert_eq!(keys, keys_again);
    }

    #[test]
    fn debug_block_uses_simulator_namespace() {
        let request = SearchRequest {
            debug: Some("all".into()),
            ..SearchRequest::default()
        };
        let response = build_response(&request, &engine_result(), |_| None);
        let debug = &response["@search.debug"];
        assert!(debug.get("simulator.parsedQuery").is_some());
        assert!(debug.get("simulator.isHybridSearch").is_some());
        assert!(debug.get("queryRewrites").is_some());
        assert!(response["value"][0].get("@search.documentDebugInfo").is_some());
    }

    #[test]
    fn engine_options_pick_up_config_defaults() {
        let request = SearchRequest::default();
        let mut config = SimulatorConfig::default();
        config.hybrid.rrf_k = 42.0;
        let options = request.to_engine_options(&config, Vec::new()).unwrap();
        assert!((options.fusion.rrf_k - 42.0).abs() < 1e-12);
        assert_eq!(options.fusion.method, FusionMethod::Rrf);
    }

    #[test]
    fn bad_rrf_k_rejected() {
        let request = SearchRequest {
            hybrid_search: Some(HybridSearchParameters {
                rrf_k: Some(0.0),
                ..HybridSearchParameters::default()
            }),
            ..SearchRequest::default()
        };
        let err = request
            .to_engine_options(&SimulatorConfig::default(), Vec::new())
            .unwrap_err();
        assert_eq!(err.error_type(), "VALIDATION");
    }
}
