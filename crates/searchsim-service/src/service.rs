//! The service facade: index lifecycle, document operations, and search.
//!
//! Owns the per-index states, the vector store, and the local embedding
//! cache. Index creation validates the schema; deletion cascades to the
//! documents, the inverted index, and every vector field. Search resolves
//! text vector queries through the embedding cache, executes the engine
//! query path against a read snapshot, and assembles the wire response.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tracing::info;

use searchsim_core::config::SimulatorConfig;
use searchsim_core::document::Document;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::schema::IndexSchema;
use searchsim_engine::searcher::{self, VectorQueryInput};
use searchsim_engine::vector::{VectorStore, VectorStoreOptions};
use searchsim_pipeline::LocalEmbeddingCache;

use crate::documents::{self, ActionResult};
use crate::search::{SearchRequest, VectorQueryKind, build_response};
use crate::store::{IndexState, SegmentStore};

/// The simulator's typed operation surface for indexes, documents, and
/// queries.
pub struct SearchService {
    config: SimulatorConfig,
    segments: SegmentStore,
    vectors: Arc<VectorStore>,
    embed_cache: Arc<LocalEmbeddingCache>,
    indexes: RwLock<HashMap<String, Arc<IndexState>>>,
}

impl SearchService {
    /// Build the service from configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let vector_options = VectorStoreOptions {
            use_hnsw: config.use_hnsw,
            brute_force_threshold: config.brute_force_threshold,
            hnsw: config.hnsw,
        };
        let segments = SegmentStore::new(&config.index_path);
        let vectors = Arc::new(VectorStore::new(&config.index_path, vector_options));
        let embed_cache = Arc::new(LocalEmbeddingCache::new(config.local_embedding.clone()));
        Self {
            config,
            segments,
            vectors,
            embed_cache,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Service configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Shared vector store.
    #[must_use]
    pub fn vector_store(&self) -> Arc<VectorStore> {
        Arc::clone(&self.vectors)
    }

    /// Shared local embedding cache.
    #[must_use]
    pub fn embedding_cache(&self) -> Arc<LocalEmbeddingCache> {
        Arc::clone(&self.embed_cache)
    }

    // ── Index lifecycle ─────────────────────────────────────────────────────

    /// Resolve an index state, lazily opening a persisted segment.
    pub(crate) fn state(&self, name: &str) -> SimulatorResult<Arc<IndexState>> {
        if let Some(state) = self.indexes.read().expect("index table lock").get(name) {
            return Ok(Arc::clone(state));
        }
        if let Some(loaded) = self.segments.load(name)? {
            let mut table = self.indexes.write().expect("index table lock");
            let entry = table
                .entry(name.to_string())
                .or_insert_with(|| Arc::clone(&loaded));
            return Ok(Arc::clone(entry));
        }
        Err(SimulatorError::not_found("index", name))
    }

    /// Whether an index exists (in memory or persisted).
    #[must_use]
    pub fn index_exists(&self, name: &str) -> bool {
        self.state(name).is_ok()
    }

    /// Create an index. Existing names conflict.
    pub fn create_index(&self, schema: IndexSchema) -> SimulatorResult<()> {
        schema.validate()?;
        if self.index_exists(&schema.name) {
            return Err(SimulatorError::conflict("index", &schema.name));
        }
        let name = schema.name.clone();
        let state = Arc::new(IndexState::new(schema));
        self.segments.save(&state)?;
        self.indexes
            .write()
            .expect("index table lock")
            .insert(name.clone(), state);
        info!(index = %name, "index created");
        Ok(())
    }

    /// Create or update an index. Updates may only append fields.
    pub fn create_or_update_index(&self, schema: IndexSchema) -> SimulatorResult<bool> {
        schema.validate()?;
        match self.state(&schema.name) {
            Err(_) => {
                self.create_index(schema)?;
                Ok(true)
            }
            Ok(state) => {
                {
                    let mut inner = state.write();
                    inner.schema.validate_update(&schema)?;
                    inner.registry =
                        searchsim_engine::analysis::AnalysisRegistry::for_index(&schema);
                    inner.schema = schema;
                }
                self.segments.save(&state)?;
                Ok(false)
            }
        }
    }

    /// Fetch an index definition.
    pub fn get_index(&self, name: &str) -> SimulatorResult<IndexSchema> {
        Ok(self.state(name)?.read().schema.clone())
    }

    /// List all index definitions.
    #[must_use]
    pub fn list_indexes(&self) -> Vec<IndexSchema> {
        let mut names: Vec<String> = self
            .indexes
            .read()
            .expect("index table lock")
            .keys()
            .cloned()
            .collect();
        for persisted in self.segments.list() {
            if !names.contains(&persisted) {
                names.push(persisted);
            }
        }
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.get_index(&name).ok())
            .collect()
    }

    /// Delete an index, cascading to documents and vectors.
    pub fn delete_index(&self, name: &str) -> SimulatorResult<()> {
        if !self.index_exists(name) {
            return Err(SimulatorError::not_found("index", name));
        }
        self.indexes.write().expect("index table lock").remove(name);
        self.segments.delete(name)?;
        self.vectors.drop_index(name)?;
        info!(index = %name, "index deleted");
        Ok(())
    }

    /// Basic index statistics.
    pub fn index_statistics(&self, name: &str) -> SimulatorResult<Value> {
        let state = self.state(name)?;
        let inner = state.read();
        Ok(json!({
            "documentCount": inner.documents.len(),
            "fieldCount": inner.schema.fields.len(),
        }))
    }

    // ── Documents ───────────────────────────────────────────────────────────

    /// Apply a bulk action batch and persist the segment.
    pub fn index_documents(
        &self,
        index: &str,
        actions: &[Value],
    ) -> SimulatorResult<Vec<ActionResult>> {
        let state = self.state(index)?;
        let results = documents::apply_actions(&state, &self.vectors, actions);
        // Best-effort persistence after the bulk commit.
        self.segments.save(&state)?;
        self.vectors.save_index(index)?;
        Ok(results)
    }

    /// Look up one document with an optional `$select` projection.
    pub fn lookup_document(
        &self,
        index: &str,
        key: &str,
        select: Option<&str>,
    ) -> SimulatorResult<Document> {
        let state = self.state(index)?;
        documents::lookup(&state, key, select)
    }

    /// Count stored documents.
    pub fn document_count(&self, index: &str) -> SimulatorResult<usize> {
        let state = self.state(index)?;
        Ok(documents::count(&state))
    }

    // ── Search ──────────────────────────────────────────────────────────────

    /// Execute a search request and assemble the wire response.
    pub fn search(&self, index: &str, request: &SearchRequest) -> SimulatorResult<Value> {
        let state = self.state(index)?;
        let inner = state.read();

        let vector_queries = self.resolve_vector_queries(&inner.schema, request)?;
        let options = request.to_engine_options(&self.config, vector_queries)?;

        let result = searcher::execute(
            &inner.schema,
            &inner.registry,
            &inner.text_index,
            &self.vectors,
            &inner.documents,
            &options,
        )?;

        Ok(build_response(request, &result, |key| {
            inner
                .documents
                .get(key)
                .map(|document| documents::project(&inner.schema, document, request.select.as_deref()))
        }))
    }

    /// Resolve the request's vector queries: validate target fields and embed
    /// `kind: text` queries with a dimension-matched local model.
    fn resolve_vector_queries(
        &self,
        schema: &IndexSchema,
        request: &SearchRequest,
    ) -> SimulatorResult<Vec<VectorQueryInput>> {
        let mut resolved = Vec::with_capacity(request.vector_queries.len());
        for query in &request.vector_queries {
            let fields: Vec<String> = query
                .fields
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(ToString::to_string)
                .collect();
            if fields.is_empty() {
                return Err(SimulatorError::Validation(
                    "vector query names no fields".to_string(),
                ));
            }
            let mut dimensions = None;
            for field_name in &fields {
                let field = schema.field(field_name).ok_or_else(|| {
                    SimulatorError::Validation(format!(
                        "vector query targets unknown field '{field_name}'"
                    ))
                })?;
                if !field.field_type.is_vector() {
                    return Err(SimulatorError::Validation(format!(
                        "vector query targets non-vector field '{field_name}'"
                    )));
                }
                dimensions.get_or_insert(field.dimensions.unwrap_or_default());
            }

            let vector = match query.kind {
                VectorQueryKind::Vector => query.vector.clone().ok_or_else(|| {
                    SimulatorError::Validation("vector query carries no vector".to_string())
                })?,
                VectorQueryKind::Text => {
                    let text = query.text.as_deref().ok_or_else(|| {
                        SimulatorError::Validation("text vector query carries no text".to_string())
                    })?;
                    let dims = dimensions.unwrap_or_default();
                    self.embed_cache
                        .model(&format!("simhash-{dims}"))
                        .embed(text)
                }
            };
            resolved.push(VectorQueryInput {
                vector,
                fields,
                k: query.k,
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsim_core::schema::{
        Field, FieldType, VectorAlgorithm, VectorAlgorithmKind, VectorMetric, VectorProfile,
        VectorSearchConfig,
    };
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SimulatorConfig {
        SimulatorConfig {
            index_path: dir.path().to_path_buf(),
            brute_force_threshold: 0,
            ..SimulatorConfig::default()
        }
    }

    fn hotel_schema() -> IndexSchema {
        let mut schema = IndexSchema::new(
            "hotels",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("title", FieldType::String).searchable(),
                Field::new("description", FieldType::String).searchable(),
                Field::new("category", FieldType::String).filterable().facetable(),
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

    fn service(dir: &TempDir) -> SearchService {
        let service = SearchService::new(config(dir));
        service.create_index(hotel_schema()).unwrap();
        service
    }

    fn upload(service: &SearchService, docs: &[Value]) {
        let actions: Vec<Value> = docs
            .iter()
            .map(|doc| {
                let mut action = doc.as_object().unwrap().clone();
                action.insert("@search.action".into(), json!("upload"));
                Value::Object(action)
            })
            .collect();
        let results = service.index_documents("hotels", &actions).unwrap();
        assert!(results.iter().all(|r| r.status), "uploads succeed: {results:?}");
    }

    #[test]
    fn create_conflict_and_delete_cascade() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc.create_index(hotel_schema()).unwrap_err();
        assert_eq!(err.error_type(), "CONFLICT");

        upload(&svc, &[json!({"id": "a", "title": "x", "vec": [1.0, 0.0]})]);
        svc.delete_index("hotels").unwrap();
        assert!(!svc.index_exists("hotels"));

        // Re-creating starts empty: documents and vectors are gone.
        svc.create_index(hotel_schema()).unwrap();
        assert_eq!(svc.document_count("hotels").unwrap(), 0);
        let response = svc
            .search(
                "hotels",
                &SearchRequest {
                    vector_queries: vec![crate::search::VectorQuery {
                        kind: VectorQueryKind::Vector,
                        vector: Some(vec![1.0, 0.0]),
                        text: None,
                        fields: "vec".into(),
                        k: 5,
                    }],
                    ..SearchRequest::default()
                },
            )
            .unwrap();
        assert_eq!(response["value"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn update_appends_field() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut updated = hotel_schema();
        updated
            .fields
            .push(Field::new("rating", FieldType::Double).sortable());
        assert!(!svc.create_or_update_index(updated).unwrap());
        assert!(svc.get_index("hotels").unwrap().field("rating").is_some());

        let mut breaking = hotel_schema();
        breaking.fields.retain(|f| f.name != "title");
        assert!(svc.create_or_update_index(breaking).is_err());
    }

    #[test]
    fn hybrid_search_end_to_end() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        upload(
            &svc,
            &[
                json!({"id": "a", "title": "luxury spa resort", "vec": [1.0, 0.0]}),
                json!({"id": "b", "title": "budget hotel", "vec": [0.9, 0.1]}),
            ],
        );

        let request = SearchRequest {
            search: Some("luxury".into()),
            count: true,
            vector_queries: vec![crate::search::VectorQuery {
                kind: VectorQueryKind::Vector,
                vector: Some(vec![1.0, 0.0]),
                text: None,
                fields: "vec".into(),
                k: 2,
            }],
            ..SearchRequest::default()
        };
        let response = svc.search("hotels", &request).unwrap();
        let values = response["value"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["id"], json!("a"));
        let a_score = values[0]["@search.score"].as_f64().unwrap();
        let b_score = values[1]["@search.score"].as_f64().unwrap();
        assert!((a_score - 2.0 / 61.0).abs() < 1e-9);
        assert!((b_score - 1.0 / 62.0).abs() < 1e-9);
    }

    #[test]
    fn text_vector_query_embeds_service_side() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        upload(
            &svc,
            &[json!({"id": "a", "title": "doc", "vec": [1.0, 0.0]})],
        );
        let request = SearchRequest {
            vector_queries: vec![crate::search::VectorQuery {
                kind: VectorQueryKind::Text,
                vector: None,
                text: Some("some query".into()),
                fields: "vec".into(),
                k: 1,
            }],
            ..SearchRequest::default()
        };
        // The embedded query has the field's declared dimensions, so the
        // search executes without a dimension error.
        let response = svc.search("hotels", &request).unwrap();
        assert_eq!(response["value"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn unknown_vector_field_rejected() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let request = SearchRequest {
            vector_queries: vec![crate::search::VectorQuery {
                kind: VectorQueryKind::Vector,
                vector: Some(vec![1.0, 0.0]),
                text: None,
                fields: "nope".into(),
                k: 2,
            }],
            ..SearchRequest::default()
        };
        assert!(svc.search("hotels", &request).is_err());
    }

    #[test]
    fn search_missing_index_is_not_found() {
        let dir = TempDir::new().unwrap();
        let svc = SearchService::new(config(&dir));
        let err = svc.search("ghost", &SearchRequest::default()).unwrap_err();
        assert_eq!(err.error_type(), "NOT_FOUND");
    }

    #[test]
    fn state_survives_service_restart() {
        let dir = TempDir::new().unwrap();
        {
            let svc = service(&dir);
            upload(&svc, &[json!({"id": "a", "title": "persisted doc"})]);
        }
        let svc = SearchService::new(config(&dir));
        assert!(svc.index_exists("hotels"));
        assert_eq!(svc.document_count("hotels").unwrap(), 1);
        let request = SearchRequest {
            search: Some("persisted".into()),
            ..SearchRequest::default()
        };
        let response = svc.search("hotels", &request).unwrap();
        assert_eq!(response["value"].as_array().unwrap().len(), 1);
    }
}
