//! Data source connectors.
//!
//! The orchestrator pulls document metadata (cheap) and bodies (on demand)
//! through [`DataSourceConnector`]. The in-memory connector backs the
//! simulator's registry and tests; additional connector types plug in behind
//! the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use searchsim_core::error::{SimulatorError, SimulatorResult};

/// Metadata of one source document, enumerated without its body.
#[derive(Debug, Clone)]
pub struct SourceDocumentMeta {
    /// Source-side identifier (becomes the document key unless mapped).
    pub id: String,
    /// Last-modified timestamp, feeding high-water-mark change detection.
    pub last_modified: Option<DateTime<FixedOffset>>,
    /// Source metadata fields exposed to field mappings.
    pub metadata: Map<String, Value>,
}

/// A pull-based data source.
#[async_trait]
pub trait DataSourceConnector: Send + Sync {
    /// Enumerate documents modified since the high-water-mark (`None` means
    /// everything). Metadata only, no bodies.
    async fn enumerate_since(
        &self,
        high_water_mark: Option<&str>,
    ) -> SimulatorResult<Vec<SourceDocumentMeta>>;

    /// Download one document body.
    async fn fetch_body(&self, id: &str) -> SimulatorResult<Vec<u8>>;
}

/// In-memory data source used by the simulator registry and tests.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    documents: RwLock<Vec<(SourceDocumentMeta, Vec<u8>)>>,
}

impl InMemoryDataSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document.
    pub fn put(
        &self,
        id: &str,
        body: Vec<u8>,
        last_modified: Option<DateTime<FixedOffset>>,
        metadata: Map<String, Value>,
    ) {
        let mut documents = self.documents.write().expect("data source lock");
        documents.retain(|(meta, _)| meta.id != id);
        documents.push((
            SourceDocumentMeta {
                id: id.to_string(),
                last_modified,
                metadata,
            },
            body,
        ));
    }

    /// Remove a document.
    pub fn delete(&self, id: &str) {
        self.documents
            .write()
            .expect("data source lock")
            .retain(|(meta, _)| meta.id != id);
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().expect("data source lock").len()
    }

    /// Whether the source is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataSourceConnector for InMemoryDataSource {
    async fn enumerate_since(
        &self,
        high_water_mark: Option<&str>,
    ) -> SimulatorResult<Vec<SourceDocumentMeta>> {
        let watermark = high_water_mark
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| SimulatorError::Validation(format!("invalid high-water-mark: {e}")))?;
        let documents = self.documents.read().expect("data source lock");
        Ok(documents
            .iter()
            .filter(|(meta, _)| match (watermark, meta.last_modified) {
                (Some(mark), Some(modified)) => modified > mark,
                // Documents without timestamps are always re-enumerated.
                _ => true,
            })
            .map(|(meta, _)| meta.clone())
            .collect())
    }

    async fn fetch_body(&self, id: &str) -> SimulatorResult<Vec<u8>> {
        let documents = self.documents.read().expect("data source lock");
        documents
            .iter()
            .find(|(meta, _)| meta.id == id)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| SimulatorError::not_found("source document", id))
    }
}

/// Registry of live connectors keyed by data source name.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, std::sync::Arc<dyn DataSourceConnector>>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under a data source name.
    pub fn register(&self, name: &str, connector: std::sync::Arc<dyn DataSourceConnector>) {
        self.connectors
            .write()
            .expect("connector registry lock")
            .insert(name.to_string(), connector);
    }

    /// Resolve a connector by name.
    pub fn get(&self, name: &str) -> SimulatorResult<std::sync::Arc<dyn DataSourceConnector>> {
        self.connectors
            .read()
            .expect("connector registry lock")
            .get(name)
            .cloned()
            .ok_or_else(|| SimulatorError::not_found("data source connector", name))
    }

    /// Remove a connector.
    pub fn remove(&self, name: &str) {
        self.connectors
            .write()
            .expect("connector registry lock")
            .remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_free(id: &str, modified: &str) -> (String, Option<DateTime<FixedOffset>>) {
        (
            id.to_string(),
            Some(DateTime::parse_from_rfc3339(modified).unwrap()),
        )
    }

    #[tokio::test]
    async fn enumerate_respects_watermark() {
        let source = InMemoryDataSource::new();
        for (id, modified) in [
            meta_free("old", "2024-01-01T00:00:00+00:00"),
            meta_free("new", "2024-06-01T00:00:00+00:00"),
        ] {
            source.put(&id, b"body".to_vec(), modified, Map::new());
        }

        let all = source.enumerate_since(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let recent = source
            .enumerate_since(Some("2024-03-01T00:00:00+00:00"))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "new");
    }

    #[tokio::test]
    async fn documents_without_timestamps_always_enumerate() {
        let source = InMemoryDataSource::new();
        source.put("untimed", b"body".to_vec(), None, Map::new());
        let listed = source
            .enumerate_since(Some("2030-01-01T00:00:00+00:00"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn fetch_body_round_trip() {
        let source = InMemoryDataSource::new();
        source.put("doc", b"payload".to_vec(), None, Map::new());
        assert_eq!(source.fetch_body("doc").await.unwrap(), b"payload");
        assert!(source.fetch_body("missing").await.is_err());
    }

    #[tokio::test]
    async fn put_replaces_existing() {
        let source = InMemoryDataSource::new();
        source.put("doc", b"v1".to_vec(), None, Map::new());
        source.put("doc", b"v2".to_vec(), None, Map::new());
        assert_eq!(source.len(), 1);
        assert_eq!(source.fetch_body("doc").await.unwrap(), b"v2");
    }

    #[test]
    fn registry_resolution() {
        let registry = ConnectorRegistry::new();
        registry.register("ds", std::sync::Arc::new(InMemoryDataSource::new()));
        assert!(registry.get("ds").is_ok());
        assert!(registry.get("missing").is_err());
        registry.remove("ds");
        assert!(registry.get("ds").is_err());
    }
}
