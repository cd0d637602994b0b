//! End-to-end scenarios over the full service surface: index lifecycle,
//! bulk actions, hybrid search, and the enrichment-driven indexer path.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tempfile::TempDir;

use searchsim_core::config::SimulatorConfig;
use searchsim_core::indexer::{
    ChangeDetectionPolicy, DataSourceDefinition, ExecutionStatus, FieldMapping, IndexerDefinition,
    IndexerParameters, SkillsetDefinition,
};
use searchsim_core::schema::{
    Field, FieldType, IndexSchema, VectorAlgorithm, VectorAlgorithmKind, VectorMetric,
    VectorProfile, VectorSearchConfig,
};
use searchsim_core::scoring::{
    FunctionAggregation, Interpolation, MagnitudeParameters, ScoringFunction, ScoringProfile,
};
use searchsim_pipeline::InMemoryDataSource;
use searchsim_service::{ManagementRegistry, SearchRequest, SearchService, VectorQuery, VectorQueryKind};

fn config(dir: &TempDir) -> SimulatorConfig {
    SimulatorConfig {
        index_path: dir.path().to_path_buf(),
        brute_force_threshold: 0,
        ..SimulatorConfig::default()
    }
}

fn hotels_schema() -> IndexSchema {
    let mut schema = IndexSchema::new(
        "hotels",
        vec![
            Field::new("id", FieldType::String).as_key(),
            Field::new("title", FieldType::String).searchable(),
            Field::new("description", FieldType::String).searchable(),
            Field::new("category", FieldType::String)
                .searchable()
                .filterable()
                .facetable()
                .with_normalizer("lowercase"),
            Field::new("rating", FieldType::Double).filterable().sortable().facetable(),
            Field::new("vec", FieldType::String).vector(2, "profile"),
        ],
    );
    schema.vector_search = Some(VectorSearchConfig {
        algorithms: vec![VectorAlgorithm {
            name: "algo".into(),
            kind: VectorAlgorithmKind::Hnsw,
            metric: VectorMetric::Cosine,
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

fn upload(service: &SearchService, index: &str, docs: &[Value]) {
    let actions: Vec<Value> = docs
        .iter()
        .map(|doc| {
            let mut action = doc.as_object().unwrap().clone();
            action.insert("@search.action".into(), json!("upload"));
            Value::Object(action)
        })
        .collect();
    let results = service.index_documents(index, &actions).unwrap();
    assert!(results.iter().all(|r| r.status), "uploads failed: {results:?}");
}

fn seeded_service(dir: &TempDir) -> SearchService {
    let service = SearchService::new(config(dir));
    service.create_index(hotels_schema()).unwrap();
    upload(
        &service,
        "hotels",
        &[
            json!({"id": "a", "title": "luxury spa resort", "description": "luxury amenities and pool", "category": "Luxury", "rating": 4.5, "vec": [1.0, 0.0]}),
            json!({"id": "b", "title": "budget hotel", "description": "simple rooms", "category": "Budget", "rating": 3.1, "vec": [0.9, 0.1]}),
            json!({"id": "c", "title": "luxury downtown suite", "description": "city views", "category": "Luxury", "rating": 4.9, "vec": [0.2, 0.98]}),
        ],
    );
    service
}

#[test]
fn hybrid_rrf_ranks_intersection_first() {
    let dir = TempDir::new().unwrap();
    let service = SearchService::new(config(&dir));
    service.create_index(hotels_schema()).unwrap();
    upload(
        &service,
        "hotels",
        &[
            json!({"id": "a", "title": "luxury spa resort", "vec": [1.0, 0.0]}),
            json!({"id": "b", "title": "budget hotel", "vec": [0.9, 0.1]}),
        ],
    );

    let request = SearchRequest {
        search: Some("luxury".into()),
        vector_queries: vec![VectorQuery {
            kind: VectorQueryKind::Vector,
            vector: Some(vec![1.0, 0.0]),
            text: None,
            fields: "vec".into(),
            k: 2,
        }],
        debug: Some("all".into()),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    let values = response["value"].as_array().unwrap();

    assert_eq!(values[0]["id"], json!("a"));
    assert!((values[0]["@search.score"].as_f64().unwrap() - 2.0 / 61.0).abs() < 1e-9);
    assert_eq!(values[1]["id"], json!("b"));
    assert!((values[1]["@search.score"].as_f64().unwrap() - 1.0 / 62.0).abs() < 1e-9);

    let debug = &response["@search.debug"];
    assert_eq!(debug["simulator.isHybridSearch"], json!(true));
    assert_eq!(debug["simulator.scoreFusionMethod"], json!("rrf"));
}

#[test]
fn highlights_limited_to_requested_fields() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let request = SearchRequest {
        search: Some("luxury".into()),
        highlight: Some("description".into()),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    let first = response["value"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["id"] == json!("a"))
        .unwrap();
    let highlights = first["@search.highlights"].as_object().unwrap();
    assert!(highlights.contains_key("description"));
    assert!(!highlights.contains_key("title"));
    assert!(!highlights.contains_key("category"));
    assert!(
        highlights["description"][0]
            .as_str()
            .unwrap()
            .contains("<em>luxury</em>")
    );

    // A document matching only in non-requested fields emits no highlights.
    let c_row = response["value"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["id"] == json!("c"))
        .unwrap();
    assert!(c_row.get("@search.highlights").is_none());
}

#[test]
fn filter_facets_orderby_and_paging() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let request = SearchRequest {
        filter: Some("category eq 'luxury' and rating gt 4".into()),
        orderby: Some("rating desc".into()),
        facets: vec!["category".into(), "rating,interval:1,sort:value".into()],
        count: true,
        top: Some(1),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();

    // Two documents match; paging keeps one, counts and facets see both.
    assert_eq!(response["@odata.count"], json!(2));
    let values = response["value"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["id"], json!("c"));

    let facets = &response["@search.facets"];
    let categories = facets["category"].as_array().unwrap();
    assert_eq!(categories[0]["value"], json!("luxury"));
    assert_eq!(categories[0]["count"], json!(2));
    let total: u64 = categories.iter().map(|b| b["count"].as_u64().unwrap()).sum();
    assert!(total <= 2);
}

#[test]
fn scoring_profile_magnitude_contract() {
    let dir = TempDir::new().unwrap();
    let service = SearchService::new(config(&dir));
    let mut schema = hotels_schema();
    let mut profile = ScoringProfile::new("rating-boost");
    profile.function_aggregation = FunctionAggregation::Sum;
    profile.functions.push(ScoringFunction::Magnitude {
        field_name: "rating".into(),
        boost: 2.0,
        magnitude: MagnitudeParameters {
            boosting_range_start: 0.0,
            boosting_range_end: 10.0,
            constant_boost_beyond_range: false,
        },
        interpolation: Interpolation::Linear,
    });
    schema.scoring_profiles.push(profile);
    service.create_index(schema).unwrap();
    upload(
        &service,
        "hotels",
        &[
            json!({"id": "five", "title": "spa", "rating": 5.0}),
            json!({"id": "ten", "title": "spa", "rating": 10.0}),
            json!({"id": "none", "title": "spa"}),
        ],
    );

    let request = SearchRequest {
        search: Some("spa".into()),
        scoring_profile: Some("RATING-BOOST".into()),
        debug: Some("all".into()),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    let boost_of = |key: &str| -> f64 {
        response["value"]
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["id"] == json!(key))
            .unwrap()["@search.documentDebugInfo"]["subScores"]["documentBoost"]
            .as_f64()
            .unwrap()
    };
    assert!((boost_of("five") - 2.0).abs() < 1e-9);
    assert!((boost_of("ten") - 3.0).abs() < 1e-9);
    assert!((boost_of("none") - 1.0).abs() < 1e-9);
}

#[test]
fn result_rows_keep_observable_property_order() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);
    let request = SearchRequest {
        search: Some("luxury".into()),
        highlight: Some("title".into()),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    let serialized = serde_json::to_string(&response).unwrap();
    let score_at = serialized.find("@search.score").unwrap();
    let highlight_at = serialized.find("@search.highlights").unwrap();
    let id_at = serialized.find("\"id\"").unwrap();
    assert!(score_at < highlight_at);
    assert!(highlight_at < id_at);
}

#[tokio::test]
async fn indexer_with_skillset_populates_vectors() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(SearchService::new(config(&dir)));
    service.create_index(hotels_schema()).unwrap();
    let registry = ManagementRegistry::new(Arc::clone(&service));

    let source = Arc::new(InMemoryDataSource::new());
    source.put(
        "hotel-1",
        b"A luxury spa resort with a garden view".to_vec(),
        None,
        Map::new(),
    );
    registry
        .create_data_source(
            DataSourceDefinition {
                name: "ds".into(),
                source_type: "memory".into(),
                container: None,
                data_change_detection_policy: ChangeDetectionPolicy::default(),
                description: None,
            },
            source,
        )
        .unwrap();

    let skillset: SkillsetDefinition = serde_json::from_value(json!({
        "name": "enrich",
        "skills": [
            {
                "@odata.type": "#Microsoft.Skills.Text.AzureOpenAIEmbeddingSkill",
                "resourceUri": "local://simhash-2",
                "inputs": [{"name": "text", "source": "/document/content"}],
                "outputs": [{"name": "embedding", "targetName": "vector"}]
            }
        ]
    }))
    .unwrap();
    registry.create_skillset(skillset).unwrap();

    registry
        .create_indexer(IndexerDefinition {
            name: "idx".into(),
            data_source_name: "ds".into(),
            target_index_name: "hotels".into(),
            skillset_name: Some("enrich".into()),
            is_disabled: false,
            parameters: IndexerParameters::default(),
            field_mappings: vec![FieldMapping {
                source_field_name: "content".into(),
                target_field_name: Some("title".into()),
                mapping_function: None,
            }],
            output_field_mappings: vec![FieldMapping {
                source_field_name: "/document/vector".into(),
                target_field_name: Some("vec".into()),
                mapping_function: None,
            }],
            description: None,
        })
        .unwrap();

    let execution = registry.run_indexer("idx").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success, "{execution:?}");
    assert_eq!(execution.items_processed, 1);

    // The enrichment output landed in the vector field and is searchable.
    let embedded = service.embedding_cache().model("simhash-2").embed(
        "A luxury spa resort with a garden view",
    );
    let request = SearchRequest {
        vector_queries: vec![VectorQuery {
            kind: VectorQueryKind::Vector,
            vector: Some(embedded),
            text: None,
            fields: "vec".into(),
            k: 1,
        }],
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    let values = response["value"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["id"], json!("hotel-1"));
    // Identical vectors score 1.0 under the cosine mapping.
    assert!((values[0]["@search.score"].as_f64().unwrap() - 1.0).abs() < 1e-6);

    // Text search over the mapped title field works too.
    let request = SearchRequest {
        search: Some("garden".into()),
        ..SearchRequest::default()
    };
    let response = service.search("hotels", &request).unwrap();
    assert_eq!(response["value"].as_array().unwrap().len(), 1);
}

#[test]
fn empty_search_matches_all_and_top_zero_returns_none() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);

    let all = service
        .search(
            "hotels",
            &SearchRequest {
                count: true,
                ..SearchRequest::default()
            },
        )
        .unwrap();
    assert_eq!(all["@odata.count"], json!(3));
    assert!(
        all["value"]
            .as_array()
            .unwrap()
            .iter()
            .all(|row| (row["@search.score"].as_f64().unwrap() - 1.0).abs() < 1e-12)
    );

    let none = service
        .search(
            "hotels",
            &SearchRequest {
                top: Some(0),
                count: true,
                ..SearchRequest::default()
            },
        )
        .unwrap();
    assert_eq!(none["@odata.count"], json!(3));
    assert!(none["value"].as_array().unwrap().is_empty());
}

#[test]
fn facet_on_non_facetable_field_fails() {
    let dir = TempDir::new().unwrap();
    let service = seeded_service(&dir);
    let request = SearchRequest {
        facets: vec!["title".into()],
        ..SearchRequest::default()
    };
    let err = service.search("hotels", &request).unwrap_err();
    assert_eq!(err.error_type(), "VALIDATION");
}
