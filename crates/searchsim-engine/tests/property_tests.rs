//! Property-based invariants over the engine: analyzer stability, filter
//! purity, fusion dominance, and ordering determinism.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use searchsim_core::schema::{Field, FieldType, IndexSchema, VectorMetric};
use searchsim_engine::analysis::{Analyzer, AnalysisRegistry};
use searchsim_engine::fusion::{FusionConfig, FusionInputs, fuse};
use searchsim_engine::query::{QueryType, SearchMode, parse};
use searchsim_engine::text_index::TextIndex;
use searchsim_engine::text_search::TextSearcher;
use searchsim_engine::vector::{VectorStore, VectorStoreOptions};
use searchsim_engine::{filter, searcher};

fn schema() -> IndexSchema {
    IndexSchema::new(
        "props",
        vec![
            Field::new("id", FieldType::String).as_key(),
            Field::new("body", FieldType::String).searchable(),
            Field::new("rating", FieldType::Double).filterable(),
        ],
    )
}

proptest! {
    /// Applying the analyzer to its own (re-joined) output changes nothing.
    #[test]
    fn analyzer_stable_on_normalized_input(text in "[a-zA-ZÀ-ÿ0-9 .,!-]{0,120}") {
        let analyzer = Analyzer::default();
        let once = analyzer.analyze(&text);
        let twice = analyzer.analyze(&once.join(" "));
        prop_assert_eq!(once, twice);
    }

    /// Filter evaluation is a pure function of (document, expression).
    #[test]
    fn filter_evaluation_is_pure(rating in -100.0f64..100.0, threshold in -100.0f64..100.0) {
        let schema = schema();
        let registry = AnalysisRegistry::default();
        let expr = filter::parse(&format!("rating gt {threshold}")).unwrap();
        let evaluator = filter::FilterEvaluator::new(&schema, &registry);
        let mut document = searchsim_core::document::Document::new();
        document.insert("rating".into(), json!(rating));

        let first = evaluator.matches(&expr, &document).unwrap();
        for _ in 0..5 {
            prop_assert_eq!(evaluator.matches(&expr, &document).unwrap(), first);
        }
        prop_assert_eq!(first, rating > threshold);
    }

    /// A document present in both streams out-scores any document present in
    /// exactly one stream at an otherwise-equal rank.
    #[test]
    fn rrf_intersection_dominates(rank in 1usize..40, k in 1.0f64..300.0) {
        let text: Vec<(String, f64)> = (0..40)
            .map(|i| (format!("t{i}"), 1.0 / f64::from(i + 1)))
            .collect();
        let mut vector_entries: Vec<(String, f64)> = (0..40)
            .map(|i| (format!("v{i}"), 1.0 / f64::from(i + 1)))
            .collect();
        // Make one text document share the same vector rank.
        vector_entries[rank - 1] = (format!("t{}", rank - 1), 0.5);
        let vector = vec![vector_entries];

        let hits = fuse(
            &FusionInputs { text: &text, vector: &vector },
            &FusionConfig { rrf_k: k, ..FusionConfig::default() },
        );
        let both = hits.iter().find(|h| h.key == format!("t{}", rank - 1)).unwrap();
        // A single-stream document at the same rank scores exactly 1/(k+rank).
        #[allow(clippy::cast_precision_loss)]
        let single_stream_score = 1.0 / (k + rank as f64);
        prop_assert!(both.score > single_stream_score);
    }

    /// The scored set equals the posting-driven match set: every result
    /// contains the term, every absence lacks it.
    #[test]
    fn scored_set_matches_postings(present in 0usize..30) {
        let schema = schema();
        let registry = AnalysisRegistry::default();
        let analyzer = registry.analyzer(None);
        let mut index = TextIndex::new();
        for i in 0..30 {
            let body = if i <= present { "needle haystack" } else { "haystack only" };
            let mut tokens = HashMap::new();
            tokens.insert("body".to_string(), analyzer.analyze(body));
            index.index_document(&format!("doc{i:02}"), &tokens);
        }
        let node = parse("needle", QueryType::Simple, SearchMode::Any).unwrap();
        let outcome = TextSearcher::new(&index, &schema, &registry)
            .execute(&node, &[], &HashMap::new());
        prop_assert_eq!(outcome.scores.len(), present + 1);
        for key in outcome.scores.keys() {
            let posting = index.field("body").unwrap().postings("needle").unwrap();
            prop_assert!(posting.contains_key(key));
        }
    }
}

/// Search over a frozen snapshot is deterministic across repeated runs.
#[test]
fn repeated_searches_are_identical() {
    let dir = TempDir::new().unwrap();
    let schema = schema();
    let registry = AnalysisRegistry::default();
    let analyzer = registry.analyzer(None);
    let vectors = VectorStore::new(dir.path(), VectorStoreOptions::default());
    let mut index = TextIndex::new();
    let mut documents = BTreeMap::new();

    for i in 0..25 {
        let key = format!("doc{i:02}");
        let body = format!("shared term body number {i}");
        let mut tokens = HashMap::new();
        tokens.insert("body".to_string(), analyzer.analyze(&body));
        index.index_document(&key, &tokens);
        let mut document = searchsim_core::document::Document::new();
        document.insert("id".into(), json!(key.clone()));
        document.insert("body".into(), json!(body));
        #[allow(clippy::cast_precision_loss)]
        document.insert("rating".into(), json!(i as f64 / 3.0));
        documents.insert(key, document);
    }

    let options = searcher::SearchOptions {
        search: "shared body".into(),
        filter: Some("rating gt 1".into()),
        ..searcher::SearchOptions::default()
    };
    let baseline: Vec<String> = searcher::execute(&schema, &registry, &index, &vectors, &documents, &options)
        .unwrap()
        .hits
        .into_iter()
        .map(|hit| hit.key)
        .collect();
    for _ in 0..5 {
        let again: Vec<String> =
            searcher::execute(&schema, &registry, &index, &vectors, &documents, &options)
                .unwrap()
                .hits
                .into_iter()
                .map(|hit| hit.key)
                .collect();
        assert_eq!(baseline, again);
    }
}

/// HNSW filtered search returns only allowed candidates, ordered by score.
#[test]
fn filtered_vector_search_scenario() {
    let dir = TempDir::new().unwrap();
    let store = VectorStore::new(
        dir.path(),
        VectorStoreOptions {
            brute_force_threshold: 0,
            ..VectorStoreOptions::default()
        },
    );
    for (key, vector) in [
        ("d1", vec![1.0, 0.0]),
        ("d2", vec![0.9, 0.1]),
        ("d3", vec![0.8, 0.2]),
    ] {
        store
            .add("props", "vec", key, vector, 2, VectorMetric::Cosine)
            .unwrap();
    }
    let allowed = ["d2", "d3"].iter().map(ToString::to_string).collect();
    let hits = store
        .search_with_filter("props", "vec", &[1.0, 0.0], 2, &allowed)
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.key != "d1"));
    assert_eq!(hits[0].key, "d2");
    assert!(hits[0].score > hits[1].score);
}
