//! Per-(index, field) vector stores.
//!
//! Each searchable vector field gets an isolated store holding the raw
//! vectors, the label↔key maps (two parallel maps behind one lock), the
//! tombstone set, and an optional HNSW graph. Searches fall back to a
//! brute-force scan when HNSW is disabled or the live vector count is below
//! the configured threshold; the behavioral contract is identical either way.
//!
//! Persistence writes two sibling files per field:
//! `<root>/hnsw/<index>/<field>.hnsw` (graph + vectors) and `.mapping`
//! (label↔key maps and tombstones). Opening is lazy and idempotent.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use searchsim_core::config::HnswSettings;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::schema::VectorMetric;

use super::hnsw::{DistanceOracle, HnswGraph, Label};
use super::metric;

/// A scored vector search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    /// Document key.
    pub key: String,
    /// Raw metric distance (lower is closer).
    pub distance: f32,
    /// Normalized score in [0, 1], higher is better.
    pub score: f64,
}

/// Store-wide tuning knobs, derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct VectorStoreOptions {
    /// Maintain HNSW graphs; brute-force only when false.
    pub use_hnsw: bool,
    /// Live-vector count below which searches scan directly.
    pub brute_force_threshold: usize,
    /// HNSW parameters.
    pub hnsw: HnswSettings,
}

impl Default for VectorStoreOptions {
    fn default() -> Self {
        Self {
            use_hnsw: true,
            brute_force_threshold: 64,
            hnsw: HnswSettings::default(),
        }
    }
}

impl VectorStoreOptions {
    #[allow(clippy::cast_sign_loss)]
    fn seed(&self) -> Option<u64> {
        (self.hnsw.random_seed >= 0).then_some(self.hnsw.random_seed as u64)
    }
}

// ── Per-field index ─────────────────────────────────────────────────────────

/// Graph-side persisted state (`.hnsw` file).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphFile {
    dimensions: usize,
    metric: VectorMetric,
    vectors: HashMap<Label, Vec<f32>>,
    graph: Option<HnswGraph>,
}

/// Mapping-side persisted state (`.mapping` file).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingFile {
    key_to_label: HashMap<String, Label>,
    removed: HashSet<Label>,
    next_label: Label,
}

/// The in-memory index of one (index, field) pair.
#[derive(Debug)]
pub struct FieldVectorIndex {
    dimensions: usize,
    metric: VectorMetric,
    vectors: HashMap<Label, Vec<f32>>,
    key_to_label: HashMap<String, Label>,
    label_to_key: HashMap<Label, String>,
    removed: HashSet<Label>,
    next_label: Label,
    graph: Option<HnswGraph>,
    options: VectorStoreOptions,
}

struct StoredOracle<'a> {
    vectors: &'a HashMap<Label, Vec<f32>>,
    metric: VectorMetric,
}

impl DistanceOracle for StoredOracle<'_> {
    fn between(&self, a: Label, b: Label) -> f32 {
        metric::distance(self.metric, &self.vectors[&a], &self.vectors[&b])
    }
}

impl FieldVectorIndex {
    fn new(dimensions: usize, metric: VectorMetric, options: VectorStoreOptions) -> Self {
        let graph = options.use_hnsw.then(|| {
            HnswGraph::new(options.hnsw.m, options.hnsw.ef_construction, options.seed())
        });
        Self {
            dimensions,
            metric,
            vectors: HashMap::new(),
            key_to_label: HashMap::new(),
            label_to_key: HashMap::new(),
            removed: HashSet::new(),
            next_label: 0,
            graph,
            options,
        }
    }

    /// Count of live (non-tombstoned) vectors.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.key_to_label.len()
    }

    fn validate_vector(&self, vector: &[f32]) -> SimulatorResult<()> {
        if vector.len() != self.dimensions {
            return Err(SimulatorError::Validation(format!(
                "vector has {} dimensions, field declares {}",
                vector.len(),
                self.dimensions
            )));
        }
        if vector.iter().any(|component| !component.is_finite()) {
            return Err(SimulatorError::Validation(
                "vector contains a non-finite component".into(),
            ));
        }
        Ok(())
    }

    /// Add or replace the vector for a key. Replacement tombstones the old
    /// label and assigns a fresh one.
    pub fn add(&mut self, key: &str, vector: Vec<f32>) -> SimulatorResult<()> {
        self.validate_vector(&vector)?;
        if let Some(old_label) = self.key_to_label.remove(key) {
            self.label_to_key.remove(&old_label);
            self.removed.insert(old_label);
        }
        let label = self.next_label;
        self.next_label += 1;
        self.vectors.insert(label, vector);
        self.key_to_label.insert(key.to_string(), label);
        self.label_to_key.insert(label, key.to_string());
        if let Some(graph) = &mut self.graph {
            let oracle = StoredOracle {
                vectors: &self.vectors,
                metric: self.metric,
            };
            graph.insert(label, &oracle);
        }
        Ok(())
    }

    /// Tombstone a key. Unknown keys succeed silently.
    pub fn remove(&mut self, key: &str) {
        if let Some(label) = self.key_to_label.remove(key) {
            self.label_to_key.remove(&label);
            self.removed.insert(label);
        }
    }

    fn hit(&self, label: Label, distance: f32) -> Option<VectorHit> {
        self.label_to_key.get(&label).map(|key| VectorHit {
            key: key.clone(),
            distance,
            score: metric::score_from_distance(self.metric, distance),
        })
    }

    fn brute_force(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&HashSet<Label>>,
    ) -> Vec<VectorHit> {
        let mut scored: Vec<(Label, f32)> = self
            .key_to_label
            .values()
            .filter(|label| allowed.is_none_or(|set| set.contains(label)))
            .map(|&label| (label, metric::distance(self.metric, query, &self.vectors[&label])))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored
            .into_iter()
            .take(k)
            .filter_map(|(label, distance)| self.hit(label, distance))
            .collect()
    }

    fn use_brute_force(&self) -> bool {
        self.graph.is_none() || self.live_count() < self.options.brute_force_threshold
    }

    /// k-NN search over live vectors.
    pub fn search(&self, query: &[f32], k: usize) -> SimulatorResult<Vec<VectorHit>> {
        self.validate_vector(query)?;
        if k == 0 || self.live_count() == 0 {
            return Ok(Vec::new());
        }
        if self.use_brute_force() {
            return Ok(self.brute_force(query, k, None));
        }
        let graph = self.graph.as_ref().expect("checked by use_brute_force");
        let hits = graph.search(
            |label| metric::distance(self.metric, query, &self.vectors[&label]),
            k,
            self.options.hnsw.ef_search,
            &self.removed,
            None,
        );
        Ok(hits
            .into_iter()
            .filter_map(|(label, distance)| self.hit(label, distance))
            .collect())
    }

    /// k-NN search restricted to a precomputed candidate key set.
    ///
    /// Oversamples by the configured multiplier and falls back to a direct
    /// scan of the allowed set when the graph yields too few hits.
    pub fn search_with_filter(
        &self,
        query: &[f32],
        k: usize,
        allowed_keys: &HashSet<String>,
    ) -> SimulatorResult<Vec<VectorHit>> {
        self.validate_vector(query)?;
        if k == 0 || allowed_keys.is_empty() || self.live_count() == 0 {
            return Ok(Vec::new());
        }
        let allowed: HashSet<Label> = allowed_keys
            .iter()
            .filter_map(|key| self.key_to_label.get(key).copied())
            .collect();
        if allowed.is_empty() {
            return Ok(Vec::new());
        }
        if self.use_brute_force() {
            return Ok(self.brute_force(query, k, Some(&allowed)));
        }
        let graph = self.graph.as_ref().expect("checked by use_brute_force");
        let oversampled_k = k.saturating_mul(self.options.hnsw.oversample_multiplier);
        let hits = graph.search(
            |label| metric::distance(self.metric, query, &self.vectors[&label]),
            oversampled_k,
            self.options.hnsw.ef_search.max(oversampled_k),
            &self.removed,
            Some(&allowed),
        );
        if hits.len() >= k.min(allowed.len()) {
            return Ok(hits
                .into_iter()
                .take(k)
                .filter_map(|(label, distance)| self.hit(label, distance))
                .collect());
        }
        // Oversampling missed candidates; scan the allowed set directly.
        Ok(self.brute_force(query, k, Some(&allowed)))
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    fn save(&self, dir: &Path, field: &str) -> SimulatorResult<()> {
        fs::create_dir_all(dir)?;
        let graph_file = GraphFile {
            dimensions: self.dimensions,
            metric: self.metric,
            vectors: self.vectors.clone(),
            graph: self.graph.clone(),
        };
        let mapping_file = MappingFile {
            key_to_label: self.key_to_label.clone(),
            removed: self.removed.clone(),
            next_label: self.next_label,
        };
        write_atomic(&dir.join(format!("{field}.hnsw")), &graph_file)?;
        write_atomic(&dir.join(format!("{field}.mapping")), &mapping_file)?;
        Ok(())
    }

    fn load(dir: &Path, field: &str, options: VectorStoreOptions) -> SimulatorResult<Option<Self>> {
        let graph_path = dir.join(format!("{field}.hnsw"));
        let mapping_path = dir.join(format!("{field}.mapping"));
        if !graph_path.exists() || !mapping_path.exists() {
            return Ok(None);
        }
        let graph_file: GraphFile = serde_json::from_slice(&fs::read(&graph_path)?)?;
        let mapping_file: MappingFile = serde_json::from_slice(&fs::read(&mapping_path)?)?;
        let label_to_key = mapping_file
            .key_to_label
            .iter()
            .map(|(key, label)| (*label, key.clone()))
            .collect();
        Ok(Some(Self {
            dimensions: graph_file.dimensions,
            metric: graph_file.metric,
            vectors: graph_file.vectors,
            key_to_label: mapping_file.key_to_label,
            label_to_key,
            removed: mapping_file.removed,
            next_label: mapping_file.next_label,
            graph: graph_file.graph,
            options,
        }))
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> SimulatorResult<()> {
    let payload = serde_json::to_vec(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ── Store ───────────────────────────────────────────────────────────────────

type FieldKey = (String, String);

/// The process-wide vector store: one [`FieldVectorIndex`] per
/// (index, field), each behind its own lock.
pub struct VectorStore {
    options: VectorStoreOptions,
    root: PathBuf,
    fields: RwLock<HashMap<FieldKey, Arc<RwLock<FieldVectorIndex>>>>,
}

impl VectorStore {
    /// Create a store rooted at `<root>/hnsw/`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, options: VectorStoreOptions) -> Self {
        Self {
            options,
            root: root.into(),
            fields: RwLock::new(HashMap::new()),
        }
    }

    fn field_dir(&self, index: &str) -> PathBuf {
        self.root.join("hnsw").join(index)
    }

    /// Fetch the per-field index, lazily loading a persisted one or creating
    /// a fresh one with the declared dimensions.
    fn entry(
        &self,
        index: &str,
        field: &str,
        dimensions: usize,
        metric: VectorMetric,
    ) -> SimulatorResult<Arc<RwLock<FieldVectorIndex>>> {
        let key = (index.to_string(), field.to_string());
        if let Some(existing) = self.fields.read().expect("vector store lock").get(&key) {
            return Ok(Arc::clone(existing));
        }
        let mut fields = self.fields.write().expect("vector store lock");
        if let Some(existing) = fields.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let loaded = FieldVectorIndex::load(&self.field_dir(index), field, self.options)?;
        let created = loaded
            .unwrap_or_else(|| FieldVectorIndex::new(dimensions, metric, self.options));
        let entry = Arc::new(RwLock::new(created));
        fields.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Existing entry, if the pair has been touched or persisted.
    fn existing(&self, index: &str, field: &str) -> Option<Arc<RwLock<FieldVectorIndex>>> {
        let key = (index.to_string(), field.to_string());
        if let Some(entry) = self.fields.read().expect("vector store lock").get(&key) {
            return Some(Arc::clone(entry));
        }
        // Lazy open of a persisted field.
        let loaded = FieldVectorIndex::load(&self.field_dir(index), field, self.options).ok()??;
        let mut fields = self.fields.write().expect("vector store lock");
        let entry = fields
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(loaded)));
        Some(Arc::clone(entry))
    }

    /// Add or replace a vector. Auto-initializes new (index, field) pairs
    /// with the declared dimensions.
    pub fn add(
        &self,
        index: &str,
        field: &str,
        key: &str,
        vector: Vec<f32>,
        dimensions: usize,
        metric: VectorMetric,
    ) -> SimulatorResult<()> {
        let entry = self.entry(index, field, dimensions, metric)?;
        let mut guard = entry.write().expect("field index lock");
        guard.add(key, vector)
    }

    /// Tombstone a key in one field. Unknown keys succeed silently.
    pub fn remove(&self, index: &str, field: &str, key: &str) {
        if let Some(entry) = self.existing(index, field) {
            entry.write().expect("field index lock").remove(key);
        }
    }

    /// Remove a key from every vector field of an index.
    pub fn remove_document(&self, index: &str, key: &str) {
        let entries: Vec<Arc<RwLock<FieldVectorIndex>>> = self
            .fields
            .read()
            .expect("vector store lock")
            .iter()
            .filter(|((idx, _), _)| idx == index)
            .map(|(_, entry)| Arc::clone(entry))
            .collect();
        for entry in entries {
            entry.write().expect("field index lock").remove(key);
        }
    }

    /// k-NN search over one field. Unknown fields return empty.
    pub fn search(
        &self,
        index: &str,
        field: &str,
        query: &[f32],
        k: usize,
    ) -> SimulatorResult<Vec<VectorHit>> {
        match self.existing(index, field) {
            Some(entry) => entry.read().expect("field index lock").search(query, k),
            None => Ok(Vec::new()),
        }
    }

    /// Filtered k-NN search restricted to `allowed_keys`.
    pub fn search_with_filter(
        &self,
        index: &str,
        field: &str,
        query: &[f32],
        k: usize,
        allowed_keys: &HashSet<String>,
    ) -> SimulatorResult<Vec<VectorHit>> {
        match self.existing(index, field) {
            Some(entry) => entry
                .read()
                .expect("field index lock")
                .search_with_filter(query, k, allowed_keys),
            None => Ok(Vec::new()),
        }
    }

    /// Persist every loaded field of an index.
    pub fn save_index(&self, index: &str) -> SimulatorResult<()> {
        let dir = self.field_dir(index);
        let entries: Vec<(String, Arc<RwLock<FieldVectorIndex>>)> = self
            .fields
            .read()
            .expect("vector store lock")
            .iter()
            .filter(|((idx, _), _)| idx == index)
            .map(|((_, field), entry)| (field.clone(), Arc::clone(entry)))
            .collect();
        for (field, entry) in entries {
            entry.read().expect("field index lock").save(&dir, &field)?;
        }
        Ok(())
    }

    /// Drop an index's vector state, in memory and on disk.
    pub fn drop_index(&self, index: &str) -> SimulatorResult<()> {
        self.fields
            .write()
            .expect("vector store lock")
            .retain(|(idx, _), _| idx != index);
        let dir = self.field_dir(index);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> VectorStoreOptions {
        VectorStoreOptions {
            use_hnsw: true,
            // Exercise the graph path even for tiny test sets.
            brute_force_threshold: 0,
            hnsw: HnswSettings::default(),
        }
    }

    fn store(dir: &TempDir) -> VectorStore {
        VectorStore::new(dir.path(), options())
    }

    #[test]
    fn add_then_search_returns_self_first() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "vec", "b", vec![0.9, 0.1], 2, VectorMetric::Cosine)
            .unwrap();

        let hits = s.search("idx", "vec", &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].key, "a");
        assert!(hits[0].score >= hits[1].score);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        let err = s
            .add("idx", "vec", "b", vec![1.0, 0.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap_err();
        assert_eq!(err.error_type(), "VALIDATION");
        assert!(s.search("idx", "vec", &[1.0], 1).is_err());
    }

    #[test]
    fn nan_component_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let err = s
            .add("idx", "vec", "a", vec![f32::NAN, 0.0], 2, VectorMetric::Cosine)
            .unwrap_err();
        assert_eq!(err.error_type(), "VALIDATION");
    }

    #[test]
    fn replace_tombstones_old_vector() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "vec", "a", vec![0.0, 1.0], 2, VectorMetric::Cosine)
            .unwrap();

        let hits = s.search("idx", "vec", &[0.0, 1.0], 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remove_is_silent_for_unknown_and_hides_results() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.remove("idx", "vec", "ghost");
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.remove("idx", "vec", "a");
        let hits = s.search("idx", "vec", &[1.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn remove_document_touches_all_fields() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "v1", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "v2", "a", vec![0.0, 1.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.remove_document("idx", "a");
        assert!(s.search("idx", "v1", &[1.0, 0.0], 5).unwrap().is_empty());
        assert!(s.search("idx", "v2", &[0.0, 1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn empty_index_and_k_zero_return_empty() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.search("idx", "vec", &[1.0, 0.0], 5).unwrap().is_empty());
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        assert!(s.search("idx", "vec", &[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn filtered_search_excludes_outside_candidates() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "d1", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "vec", "d2", vec![0.9, 0.1], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "vec", "d3", vec![0.8, 0.2], 2, VectorMetric::Cosine)
            .unwrap();

        let allowed: HashSet<String> = ["d2", "d3"].iter().map(ToString::to_string).collect();
        let hits = s
            .search_with_filter("idx", "vec", &[1.0, 0.0], 2, &allowed)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.key != "d1"));
        assert_eq!(hits[0].key, "d2");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn empty_allowed_set_returns_empty() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        let hits = s
            .search_with_filter("idx", "vec", &[1.0, 0.0], 3, &HashSet::new())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn save_reopen_preserves_topk() {
        let dir = TempDir::new().unwrap();
        let query = [0.7f32, 0.3];
        let before = {
            let s = store(&dir);
            for i in 0..40 {
                #[allow(clippy::cast_precision_loss)]
                let v = vec![(i as f32) / 40.0, 1.0 - (i as f32) / 40.0];
                s.add("idx", "vec", &format!("doc{i}"), v, 2, VectorMetric::Cosine)
                    .unwrap();
            }
            s.save_index("idx").unwrap();
            s.search("idx", "vec", &query, 5).unwrap()
        };

        // A fresh store lazily opens the persisted files.
        let reopened = store(&dir);
        let after = reopened.search("idx", "vec", &query, 5).unwrap();
        let before_keys: Vec<&str> = before.iter().map(|h| h.key.as_str()).collect();
        let after_keys: Vec<&str> = after.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(before_keys, after_keys);
    }

    #[test]
    fn drop_index_clears_disk_state() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.save_index("idx").unwrap();
        s.drop_index("idx").unwrap();

        let reopened = store(&dir);
        assert!(reopened.search("idx", "vec", &[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn brute_force_mode_matches_contract() {
        let dir = TempDir::new().unwrap();
        let s = VectorStore::new(
            dir.path(),
            VectorStoreOptions {
                use_hnsw: false,
                ..options()
            },
        );
        s.add("idx", "vec", "a", vec![1.0, 0.0], 2, VectorMetric::Cosine)
            .unwrap();
        s.add("idx", "vec", "b", vec![0.0, 1.0], 2, VectorMetric::Cosine)
            .unwrap();
        let hits = s.search("idx", "vec", &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].key, "a");
        assert_eq!(hits.len(), 2);
    }
}
