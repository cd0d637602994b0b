//! Per-index state and its persistence.
//!
//! One [`IndexState`] per index holds the schema, the compiled analysis
//! registry, the positional inverted index, and the field-value payloads
//! keyed by document key. Readers take read leases; writers (bulk commits,
//! schema updates) take the write lock for the duration of the commit.
//! Persistence is a best-effort JSON segment per index under
//! `<root>/indexes/<name>/segment.json`, written atomically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use searchsim_core::document::Document;
use searchsim_core::error::SimulatorResult;
use searchsim_core::schema::IndexSchema;
use searchsim_engine::analysis::AnalysisRegistry;
use searchsim_engine::text_index::TextIndex;

/// Mutable state of one index.
#[derive(Debug)]
pub struct IndexInner {
    /// The schema (updates may append fields).
    pub schema: IndexSchema,
    /// Compiled normalizer/char-filter registry for the schema.
    pub registry: AnalysisRegistry,
    /// Positional inverted index over analyzed tokens.
    pub text_index: TextIndex,
    /// Field-value payloads keyed by document key, ascending.
    pub documents: BTreeMap<String, Document>,
}

/// One index behind a single-writer multi-reader lock.
#[derive(Debug)]
pub struct IndexState {
    inner: RwLock<IndexInner>,
}

impl IndexState {
    /// Create fresh state for a validated schema.
    #[must_use]
    pub fn new(schema: IndexSchema) -> Self {
        let registry = AnalysisRegistry::for_index(&schema);
        Self {
            inner: RwLock::new(IndexInner {
                schema,
                registry,
                text_index: TextIndex::new(),
                documents: BTreeMap::new(),
            }),
        }
    }

    /// Take a read lease.
    pub fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().expect("index lock")
    }

    /// Take the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().expect("index lock")
    }
}

/// Serialized segment layout.
#[derive(Debug, Serialize, Deserialize)]
struct Segment {
    schema: IndexSchema,
    text_index: TextIndex,
    documents: BTreeMap<String, Document>,
}

/// On-disk layout manager for index segments.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    /// Store rooted at `<root>/indexes/`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join("indexes"),
        }
    }

    fn segment_path(&self, index: &str) -> PathBuf {
        self.root.join(index).join("segment.json")
    }

    /// Persist one index's state.
    pub fn save(&self, state: &IndexState) -> SimulatorResult<()> {
        let inner = state.read();
        let segment = Segment {
            schema: inner.schema.clone(),
            text_index: inner.text_index.clone(),
            documents: inner.documents.clone(),
        };
        let path = self.segment_path(&segment.schema.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec(&segment)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load one index by name, if a segment exists.
    pub fn load(&self, index: &str) -> SimulatorResult<Option<Arc<IndexState>>> {
        let path = self.segment_path(index);
        if !path.exists() {
            return Ok(None);
        }
        let segment: Segment = serde_json::from_slice(&fs::read(&path)?)?;
        let registry = AnalysisRegistry::for_index(&segment.schema);
        Ok(Some(Arc::new(IndexState {
            inner: RwLock::new(IndexInner {
                schema: segment.schema,
                registry,
                text_index: segment.text_index,
                documents: segment.documents,
            }),
        })))
    }

    /// Enumerate persisted index names.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| entry.path().join("segment.json").exists())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delete one index's on-disk state.
    pub fn delete(&self, index: &str) -> SimulatorResult<()> {
        let dir = self.root.join(index);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
