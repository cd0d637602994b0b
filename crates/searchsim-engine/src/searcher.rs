//! End-to-end query execution.
//!
//! A search request flows through: text candidates over the inverted index,
//! per-vector-query candidates over the vector store, filter intersection,
//! hybrid fusion, scoring-profile boost, sort, paging, highlight generation,
//! and facet aggregation over the unpaged match set. Timing and match-count
//! annotations are collected for the debug channel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use tracing::debug;

use searchsim_core::config::FusionMethod;
use searchsim_core::document::Document;
use searchsim_core::error::SimulatorResult;
use searchsim_core::schema::IndexSchema;

use crate::analysis::AnalysisRegistry;
use crate::facets;
use crate::filter::{self, FilterEvaluator};
use crate::fusion::{self, FusionConfig, FusionInputs, SubScores};
use crate::highlight;
use crate::orderby::{self, SortableRow};
use crate::query::{self, QueryType, SearchMode};
use crate::scoring;
use crate::text_index::TextIndex;
use crate::text_search::TextSearcher;
use crate::vector::VectorStore;

/// Default page size.
pub const DEFAULT_TOP: usize = 50;

/// One vector query of a request, already resolved to a raw vector.
#[derive(Debug, Clone)]
pub struct VectorQueryInput {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Target vector fields (first match wins per stream).
    pub fields: Vec<String>,
    /// Number of neighbors requested.
    pub k: usize,
}

/// Engine-level search options, assembled by the service layer.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Raw search text.
    pub search: String,
    /// Grammar selection.
    pub query_type: QueryType,
    /// Bare-term combination mode.
    pub search_mode: SearchMode,
    /// Searched fields; empty means all searchable fields.
    pub search_fields: Vec<String>,
    /// OData filter expression.
    pub filter: Option<String>,
    /// Orderby clause list.
    pub orderby: Option<String>,
    /// Page size.
    pub top: Option<usize>,
    /// Page offset.
    pub skip: usize,
    /// Facet specs.
    pub facets: Vec<String>,
    /// Highlighted fields.
    pub highlight_fields: Vec<String>,
    /// Highlight pre-tag.
    pub highlight_pre_tag: String,
    /// Highlight post-tag.
    pub highlight_post_tag: String,
    /// Requested scoring profile.
    pub scoring_profile: Option<String>,
    /// `name-value` scoring parameters.
    pub scoring_parameters: Vec<String>,
    /// Vector queries.
    pub vector_queries: Vec<VectorQueryInput>,
    /// Fusion configuration (method, k, weights).
    pub fusion: FusionConfig,
    /// Anchor for freshness evaluation; `None` uses the wall clock.
    pub now: Option<DateTime<FixedOffset>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search: String::new(),
            query_type: QueryType::Simple,
            search_mode: SearchMode::Any,
            search_fields: Vec::new(),
            filter: None,
            orderby: None,
            top: None,
            skip: 0,
            facets: Vec::new(),
            highlight_fields: Vec::new(),
            highlight_pre_tag: highlight::DEFAULT_PRE_TAG.to_string(),
            highlight_post_tag: highlight::DEFAULT_POST_TAG.to_string(),
            scoring_profile: None,
            scoring_parameters: Vec::new(),
            vector_queries: Vec::new(),
            fusion: FusionConfig::default(),
            now: None,
        }
    }
}

/// One scored hit of the engine result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Document key.
    pub key: String,
    /// Final score after fusion and boost.
    pub score: f64,
    /// Highlight fragments per requested field; `None` when none matched.
    pub highlights: Option<serde_json::Map<String, Value>>,
    /// Preserved subscores for the debug channel.
    pub subscores: SubScores,
}

/// Debug annotations collected during execution.
#[derive(Debug, Clone, Default)]
pub struct SearchDebug {
    /// Rendered parsed query.
    pub parsed_query: String,
    /// Rendered parsed filter, when present.
    pub parsed_filter: Option<String>,
    /// Whether both text and vector streams participated.
    pub is_hybrid_search: bool,
    /// Text-phase wall time in milliseconds.
    pub text_search_time_ms: f64,
    /// Vector-phase wall time in milliseconds.
    pub vector_search_time_ms: f64,
    /// Total wall time in milliseconds.
    pub total_time_ms: f64,
    /// Text-stream candidate count.
    pub text_match_count: usize,
    /// Vector-stream candidate count (all streams).
    pub vector_match_count: usize,
    /// Fusion method applied, when hybrid.
    pub score_fusion_method: Option<String>,
    /// Fields searched by the text phase.
    pub searchable_fields: Vec<String>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

/// Engine-level search result.
#[derive(Debug, Clone)]
pub struct EngineSearchResult {
    /// Paged hits in final order.
    pub hits: Vec<SearchHit>,
    /// Matched-document count before paging.
    pub total_matched: usize,
    /// Facet buckets per facet field.
    pub facets: serde_json::Map<String, Value>,
    /// Debug annotations.
    pub debug: SearchDebug,
}

/// Execute a search over one index snapshot.
///
/// `documents` is the field-value store snapshot keyed by document key.
pub fn execute(
    schema: &IndexSchema,
    registry: &AnalysisRegistry,
    text_index: &TextIndex,
    vector_store: &VectorStore,
    documents: &BTreeMap<String, Document>,
    options: &SearchOptions,
) -> SimulatorResult<EngineSearchResult> {
    let total_start = Instant::now();
    let mut debug_info = SearchDebug::default();

    let searched_fields: Vec<String> = if options.search_fields.is_empty() {
        schema
            .searchable_fields()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    } else {
        options.search_fields.clone()
    };
    debug_info.searchable_fields.clone_from(&searched_fields);

    // Filter evaluation happens once, against the full store, because both
    // streams intersect with it.
    let filter_expr = options
        .filter
        .as_deref()
        .map(filter::parse)
        .transpose()?;
    let allowed: Option<HashSet<String>> = match &filter_expr {
        Some(expr) => {
            debug_info.parsed_filter = Some(format!("{expr:?}"));
            let evaluator = FilterEvaluator::new(schema, registry);
            let mut matched = HashSet::new();
            for (key, document) in documents {
                if evaluator.matches(expr, document)? {
                    matched.insert(key.clone());
                }
            }
            Some(matched)
        }
        None => None,
    };

    let is_hybrid = !options.search.trim().is_empty() && !options.vector_queries.is_empty();
    debug_info.is_hybrid_search = is_hybrid;

    // Text phase.
    let text_start = Instant::now();
    let text_stream: Vec<(String, f64)> = if options.search.trim().is_empty()
        && !options.vector_queries.is_empty()
    {
        // Pure-vector request: the text stream stays empty.
        debug_info.parsed_query = String::from("*");
        Vec::new()
    } else {
        let node = query::parse(&options.search, options.query_type, options.search_mode)?;
        debug_info.parsed_query = node.to_string();
        let profile = scoring::resolve_profile(schema, options.scoring_profile.as_deref());
        let weights: HashMap<String, f64> = profile
            .map(|p| p.text_weights.clone())
            .unwrap_or_default();
        let mut searcher = TextSearcher::new(text_index, schema, registry);
        searcher.wildcard_expansion_limit = 128;
        let outcome = searcher.execute(&node, &searched_fields, &weights);
        let ranked = outcome
            .ranked()
            .into_iter()
            .filter(|(key, _)| allowed.as_ref().is_none_or(|set| set.contains(key)))
            .collect();
        debug_info.warnings.extend(outcome.warnings);
        ranked
    };
    debug_info.text_search_time_ms = elapsed_ms(text_start);
    debug_info.text_match_count = text_stream.len();

    // Vector phase.
    let vector_start = Instant::now();
    let mut vector_streams: Vec<Vec<(String, f64)>> = Vec::new();
    for vector_query in &options.vector_queries {
        for field in &vector_query.fields {
            let hits = match &allowed {
                Some(set) => vector_store.search_with_filter(
                    &schema.name,
                    field,
                    &vector_query.vector,
                    vector_query.k,
                    set,
                )?,
                None => vector_store.search(
                    &schema.name,
                    field,
                    &vector_query.vector,
                    vector_query.k,
                )?,
            };
            vector_streams.push(hits.into_iter().map(|h| (h.key, h.score)).collect());
        }
    }
    debug_info.vector_search_time_ms = elapsed_ms(vector_start);
    debug_info.vector_match_count = vector_streams.iter().map(Vec::len).sum();

    // Fusion or single-stream passthrough.
    let mut scored: Vec<(String, f64, SubScores)> = if is_hybrid || vector_streams.len() > 1 {
        debug_info.score_fusion_method = Some(
            match options.fusion.method {
                FusionMethod::Rrf => "rrf",
                FusionMethod::Weighted => "weighted",
            }
            .to_string(),
        );
        fusion::fuse(
            &FusionInputs {
                text: &text_stream,
                vector: &vector_streams,
            },
            &options.fusion,
        )
        .into_iter()
        .map(|hit| (hit.key, hit.score, hit.subscores))
        .collect()
    } else if let Some(stream) = vector_streams.first() {
        stream
            .iter()
            .enumerate()
            .map(|(rank0, (key, score))| {
                (
                    key.clone(),
                    *score,
                    SubScores {
                        vector_score: Some(*score),
                        vector_rank: Some(rank0 + 1),
                        ..SubScores::default()
                    },
                )
            })
            .collect()
    } else {
        text_stream
            .iter()
            .enumerate()
            .map(|(rank0, (key, score))| {
                (
                    key.clone(),
                    *score,
                    SubScores {
                        text_score: Some(*score),
                        text_rank: Some(rank0 + 1),
                        ..SubScores::default()
                    },
                )
            })
            .collect()
    };

    // Scoring-profile document boost multiplies the fused score.
    if let Some(profile) = scoring::resolve_profile(schema, options.scoring_profile.as_deref()) {
        if !profile.functions.is_empty() {
            let parameters = scoring::parse_scoring_parameters(&options.scoring_parameters);
            let now = options
                .now
                .unwrap_or_else(|| Utc::now().fixed_offset());
            for (key, score, subscores) in &mut scored {
                let boost = documents
                    .get(key)
                    .map_or(1.0, |document| {
                        scoring::document_boost(profile, document, &parameters, now)
                    });
                *score *= boost;
                subscores.document_boost = Some(boost);
            }
        }
    }

    let total_matched = scored.len();

    // Facets aggregate over the unpaged match set.
    let mut facet_results = serde_json::Map::new();
    for spec_text in &options.facets {
        let spec = facets::parse_spec(spec_text, schema)?;
        let matched_docs = scored
            .iter()
            .filter_map(|(key, _, _)| documents.get(key));
        let buckets = facets::compute(&spec, schema, registry, matched_docs)?;
        facet_results.insert(spec.field.clone(), Value::Array(buckets));
    }

    // Sort and page.
    let clauses = match &options.orderby {
        Some(raw) => orderby::parse(raw, schema)?,
        None => Vec::new(),
    };
    let empty = Document::new();
    scored.sort_by(|a, b| {
        orderby::compare_rows(
            &clauses,
            schema,
            registry,
            &SortableRow {
                key: &a.0,
                score: a.1,
                document: documents.get(&a.0).unwrap_or(&empty),
            },
            &SortableRow {
                key: &b.0,
                score: b.1,
                document: documents.get(&b.0).unwrap_or(&empty),
            },
        )
    });

    let top = options.top.unwrap_or(DEFAULT_TOP);
    let page: Vec<(String, f64, SubScores)> = scored
        .into_iter()
        .skip(options.skip)
        .take(top)
        .collect();

    // Highlights for the paged hits only.
    let highlight_terms = collect_highlight_terms(&debug_info.parsed_query, registry);
    let hits = page
        .into_iter()
        .map(|(key, score, subscores)| {
            let highlights = if options.highlight_fields.is_empty() {
                None
            } else {
                documents.get(&key).and_then(|document| {
                    build_highlights(
                        document,
                        schema,
                        registry,
                        &options.highlight_fields,
                        &highlight_terms,
                        &options.highlight_pre_tag,
                        &options.highlight_post_tag,
                    )
                })
            };
            SearchHit {
                key,
                score,
                highlights,
                subscores,
            }
        })
        .collect();

    debug_info.total_time_ms = elapsed_ms(total_start);
    debug!(
        index = %schema.name,
        matched = total_matched,
        hybrid = is_hybrid,
        "search executed"
    );

    Ok(EngineSearchResult {
        hits,
        total_matched,
        facets: facet_results,
        debug: debug_info,
    })
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Pull highlightable terms out of the rendered query: analyzed forms of
/// every term and phrase word.
fn collect_highlight_terms(parsed_query: &str, registry: &AnalysisRegistry) -> HashSet<String> {
    let analyzer = registry.analyzer(None);
    analyzer
        .analyze(
            &parsed_query
                .replace(['(', ')', '"'], " ")
                .replace(" AND ", " ")
                .replace(" OR ", " ")
                .replace("NOT ", " "),
        )
        .into_iter()
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn build_highlights(
    document: &Document,
    schema: &IndexSchema,
    registry: &AnalysisRegistry,
    requested_fields: &[String],
    terms: &HashSet<String>,
    pre_tag: &str,
    post_tag: &str,
) -> Option<serde_json::Map<String, Value>> {
    let mut highlights = serde_json::Map::new();
    for field_name in requested_fields {
        let Some(field) = schema.field(field_name) else {
            continue;
        };
        let Some(text) = document.get(field_name).and_then(Value::as_str) else {
            continue;
        };
        let analyzer = registry.analyzer(field.analyzer.as_deref());
        let fragments =
            highlight::extract_fragments(text, terms, &analyzer, pre_tag, post_tag);
        if !fragments.is_empty() {
            highlights.insert(
                field_name.clone(),
                Value::Array(fragments.into_iter().map(Value::String).collect()),
            );
        }
    }
    (!highlights.is_empty()).then_some(highlights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsim_core::schema::{
        Field, FieldType, VectorAlgorithm, VectorProfile, VectorSearchConfig,
    };
    use crate::vector::VectorStoreOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn schema() -> IndexSchema {
        let mut schema = IndexSchema::new(
            "hotels",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("title", FieldType::String).searchable(),
                Field::new("description", FieldType::String).searchable(),
                Field::new("category", FieldType::String).searchable().filterable().facetable(),
                Field::new("rating", FieldType::Double).filterable().sortable(),
                Field::new("vec", FieldType::String).vector(2, "profile"),
            ],
        );
        schema.vector_search = Some(VectorSearchConfig {
            algorithms: vec![VectorAlgorithm {
                name: "algo".into(),
                kind: searchsim_core::schema::VectorAlgorithmKind::Hnsw,
                metric: searchsim_core::schema::VectorMetric::Cosine,
                m: None,
                ef_construction: None,
                ef_search: None,
            }],
            profiles: vec![VectorProfile {
                name: "profile".into(),
                algorithm: "algo".into(),
            }],
        });
        schema
    }

    struct Fixture {
        schema: IndexSchema,
        registry: AnalysisRegistry,
        text_index: TextIndex,
        vector_store: VectorStore,
        documents: BTreeMap<String, Document>,
        _dir: TempDir,
    }

    fn fixture(docs: Vec<Value>) -> Fixture {
        let schema = schema();
        let registry = AnalysisRegistry::for_index(&schema);
        let analyzer = registry.analyzer(None);
        let dir = TempDir::new().unwrap();
        let vector_store = VectorStore::new(
            dir.path(),
            VectorStoreOptions {
                brute_force_threshold: 0,
                ..VectorStoreOptions::default()
            },
        );
        let mut text_index = TextIndex::new();
        let mut documents = BTreeMap::new();

        for raw in docs {
            let document = raw.as_object().unwrap().clone();
            let key = document["id"].as_str().unwrap().to_string();
            let mut field_tokens = HashMap::new();
            for name in ["title", "description", "category"] {
                if let Some(text) = document.get(name).and_then(Value::as_str) {
                    field_tokens.insert(name.to_string(), analyzer.analyze(text));
                }
            }
            text_index.index_document(&key, &field_tokens);
            if let Some(vector) = document.get("vec").and_then(Value::as_array) {
                #[allow(clippy::cast_possible_truncation)]
                let components: Vec<f32> = vector
                    .iter()
                    .map(|v| v.as_f64().unwrap() as f32)
                    .collect();
                vector_store
                    .add(
                        "hotels",
                        "vec",
                        &key,
                        components,
                        2,
                        searchsim_core::schema::VectorMetric::Cosine,
                    )
                    .unwrap();
            }
            documents.insert(key, document);
        }

        Fixture {
            schema,
            registry,
            text_index,
            vector_store,
            documents,
            _dir: dir,
        }
    }

    fn hybrid_fixture() -> Fixture {
        fixture(vec![
            json!({"id": "a", "title": "luxury spa resort", "vec": [1.0, 0.0]}),
            json!({"id": "b", "title": "budget hotel", "vec": [0.9, 0.1]}),
        ])
    }

    fn run(fixture: &Fixture, options: &SearchOptions) -> EngineSearchResult {
        execute(
            &fixture.schema,
            &fixture.registry,
            &fixture.text_index,
            &fixture.vector_store,
            &fixture.documents,
            options,
        )
        .expect("search executes")
    }

    #[test]
    fn hybrid_rrf_scenario() {
        let f = hybrid_fixture();
        let options = SearchOptions {
            search: "luxury".into(),
            vector_queries: vec![VectorQueryInput {
                vector: vec![1.0, 0.0],
                fields: vec!["vec".into()],
                k: 2,
            }],
            ..SearchOptions::default()
        };
        let result = run(&f, &options);

        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].key, "a");
        assert!((result.hits[0].score - 2.0 / 61.0).abs() < 1e-9);
        assert_eq!(result.hits[1].key, "b");
        assert!((result.hits[1].score - 1.0 / 62.0).abs() < 1e-9);
        assert!(result.debug.is_hybrid_search);
        assert_eq!(result.debug.score_fusion_method.as_deref(), Some("rrf"));
    }

    #[test]
    fn highlight_restricted_to_requested_fields() {
        let f = fixture(vec![json!({
            "id": "1",
            "title": "Luxury Spa Resort",
            "description": "luxury amenities and pool",
            "category": "Luxury"
        })]);
        let options = SearchOptions {
            search: "luxury".into(),
            highlight_fields: vec!["description".into()],
            ..SearchOptions::default()
        };
        let result = run(&f, &options);

        let highlights = result.hits[0].highlights.as_ref().expect("highlights present");
        assert!(highlights.contains_key("description"));
        assert!(!highlights.contains_key("title"));
        assert!(!highlights.contains_key("category"));
        let fragments = highlights["description"].as_array().unwrap();
        assert!(fragments[0].as_str().unwrap().contains("<em>luxury</em>"));
    }

    #[test]
    fn empty_search_matches_all_with_score_one() {
        let f = hybrid_fixture();
        let result = run(&f, &SearchOptions::default());
        assert_eq!(result.total_matched, 2);
        assert!(result.hits.iter().all(|h| (h.score - 1.0).abs() < 1e-12));
    }

    #[test]
    fn filter_restricts_both_streams() {
        let f = fixture(vec![
            json!({"id": "d1", "category": "a", "vec": [1.0, 0.0]}),
            json!({"id": "d2", "category": "b", "vec": [0.9, 0.1]}),
            json!({"id": "d3", "category": "b", "vec": [0.8, 0.2]}),
        ]);
        let options = SearchOptions {
            filter: Some("category eq 'b'".into()),
            vector_queries: vec![VectorQueryInput {
                vector: vec![1.0, 0.0],
                fields: vec!["vec".into()],
                k: 2,
            }],
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert_eq!(result.hits.len(), 2);
        assert!(result.hits.iter().all(|h| h.key != "d1"));
        assert_eq!(result.hits[0].key, "d2");
        assert!(result.hits[0].score > result.hits[1].score);
    }

    #[test]
    fn facets_computed_before_paging() {
        let f = fixture(vec![
            json!({"id": "1", "category": "luxury"}),
            json!({"id": "2", "category": "luxury"}),
            json!({"id": "3", "category": "budget"}),
        ]);
        let options = SearchOptions {
            facets: vec!["category".into()],
            top: Some(1),
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.total_matched, 3);
        let buckets = result.facets["category"].as_array().unwrap();
        assert_eq!(buckets[0]["count"], json!(2));
    }

    #[test]
    fn orderby_overrides_score_order() {
        let f = fixture(vec![
            json!({"id": "1", "title": "spa", "rating": 2.0}),
            json!({"id": "2", "title": "spa spa", "rating": 9.0}),
        ]);
        let options = SearchOptions {
            search: "spa".into(),
            orderby: Some("rating desc".into()),
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert_eq!(result.hits[0].key, "2");
    }

    #[test]
    fn top_zero_returns_no_hits_but_counts() {
        let f = hybrid_fixture();
        let options = SearchOptions {
            top: Some(0),
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert!(result.hits.is_empty());
        assert_eq!(result.total_matched, 2);
    }

    #[test]
    fn pure_vector_query_uses_normalized_scores() {
        let f = hybrid_fixture();
        let options = SearchOptions {
            vector_queries: vec![VectorQueryInput {
                vector: vec![1.0, 0.0],
                fields: vec!["vec".into()],
                k: 2,
            }],
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert!(!result.debug.is_hybrid_search);
        assert_eq!(result.hits[0].key, "a");
        // Cosine with itself maps to (1 + 1) / 2 = 1.
        assert!((result.hits[0].score - 1.0).abs() < 1e-6);
        assert!(result.hits[1].score < 1.0 && result.hits[1].score > 0.9);
    }

    #[test]
    fn scoring_profile_boost_applies() {
        use searchsim_core::scoring::{
            MagnitudeParameters, ScoringFunction, ScoringProfile,
        };
        let mut f = fixture(vec![
            json!({"id": "1", "title": "spa", "rating": 10.0}),
            json!({"id": "2", "title": "spa", "rating": 0.0}),
        ]);
        let mut profile = ScoringProfile::new("boosted");
        profile.functions.push(ScoringFunction::Magnitude {
            field_name: "rating".into(),
            boost: 2.0,
            magnitude: MagnitudeParameters {
                boosting_range_start: 0.0,
                boosting_range_end: 10.0,
                constant_boost_beyond_range: false,
            },
            interpolation: searchsim_core::scoring::Interpolation::Linear,
        });
        f.schema.scoring_profiles.push(profile);

        let options = SearchOptions {
            search: "spa".into(),
            scoring_profile: Some("boosted".into()),
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert_eq!(result.hits[0].key, "1");
        assert_eq!(result.hits[0].subscores.document_boost, Some(3.0));
        assert_eq!(result.hits[1].subscores.document_boost, Some(1.0));
    }

    #[test]
    fn debug_block_is_populated() {
        let f = hybrid_fixture();
        let options = SearchOptions {
            search: "luxury".into(),
            filter: Some("rating eq null".into()),
            vector_queries: vec![VectorQueryInput {
                vector: vec![1.0, 0.0],
                fields: vec!["vec".into()],
                k: 2,
            }],
            ..SearchOptions::default()
        };
        let result = run(&f, &options);
        assert_eq!(result.debug.parsed_query, "luxury");
        assert!(result.debug.parsed_filter.is_some());
        assert!(result.debug.total_time_ms >= 0.0);
        assert!(!result.debug.searchable_fields.is_empty());
    }
}
