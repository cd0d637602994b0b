//! Management registries for data sources, skillsets, and indexers, plus the
//! wiring that runs an indexer against the document store.
//!
//! Each registry exposes create/createOrUpdate/get/list/delete/exists with
//! conflict semantics on create. Indexers additionally expose run, reset,
//! and status, delegating to the pipeline orchestrator with this service's
//! document store as the bulk sink.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::indexer::{
    DataSourceDefinition, IndexerDefinition, IndexerExecutionResult, IndexerStatus,
    SkillsetDefinition,
};
use searchsim_pipeline::datasource::ConnectorRegistry;
use searchsim_pipeline::indexer::{BulkOutcome, IndexSink, IndexerRuntime, RunContext};
use searchsim_pipeline::skills::SkillExecutionContext;
use searchsim_pipeline::{CancelFlag, DataSourceConnector};

use crate::service::SearchService;

/// A named-definition registry with conflict-on-create semantics.
#[derive(Debug)]
struct DefinitionTable<T: Clone> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Default for DefinitionTable<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> DefinitionTable<T> {
    fn create(&self, resource: &'static str, name: &str, value: T) -> SimulatorResult<()> {
        let mut entries = self.entries.write().expect("registry lock");
        if entries.contains_key(name) {
            return Err(SimulatorError::conflict(resource, name));
        }
        entries.insert(name.to_string(), value);
        Ok(())
    }

    fn create_or_update(&self, name: &str, value: T) -> bool {
        self.entries
            .write()
            .expect("registry lock")
            .insert(name.to_string(), value)
            .is_none()
    }

    fn get(&self, resource: &'static str, name: &str) -> SimulatorResult<T> {
        self.entries
            .read()
            .expect("registry lock")
            .get(name)
            .cloned()
            .ok_or_else(|| SimulatorError::not_found(resource, name))
    }

    fn list(&self) -> Vec<T> {
        let entries = self.entries.read().expect("registry lock");
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        names.into_iter().map(|name| entries[name].clone()).collect()
    }

    fn delete(&self, resource: &'static str, name: &str) -> SimulatorResult<()> {
        self.entries
            .write()
            .expect("registry lock")
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SimulatorError::not_found(resource, name))
    }

    fn exists(&self, name: &str) -> bool {
        self.entries.read().expect("registry lock").contains_key(name)
    }
}

/// Bulk sink adapter: the orchestrator writes through the document store.
struct ServiceSink {
    service: Arc<SearchService>,
}

#[async_trait]
impl IndexSink for ServiceSink {
    async fn merge_or_upload(
        &self,
        index: &str,
        documents: Vec<searchsim_core::document::Document>,
    ) -> SimulatorResult<BulkOutcome> {
        let actions: Vec<Value> = documents
            .into_iter()
            .map(|mut document| {
                document.insert("@search.action".to_string(), json!("mergeOrUpload"));
                Value::Object(document)
            })
            .collect();
        let results = self.service.index_documents(index, &actions)?;
        let mut outcome = BulkOutcome::default();
        for result in results {
            if result.status {
                outcome.succeeded += 1;
            } else {
                outcome.failures.push((
                    result.key,
                    result.error_message.unwrap_or_else(|| "action failed".to_string()),
                ));
            }
        }
        Ok(outcome)
    }

    async fn stored_field(
        &self,
        index: &str,
        key: &str,
        field: &str,
    ) -> SimulatorResult<Option<Value>> {
        match self.service.lookup_document(index, key, None) {
            Ok(document) => Ok(document.get(field).cloned()),
            Err(SimulatorError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// The management surface for data sources, skillsets, and indexers.
pub struct ManagementRegistry {
    service: Arc<SearchService>,
    datasources: DefinitionTable<DataSourceDefinition>,
    skillsets: DefinitionTable<SkillsetDefinition>,
    indexers: DefinitionTable<IndexerDefinition>,
    connectors: ConnectorRegistry,
    runtime: IndexerRuntime,
    skills: Arc<SkillExecutionContext>,
}

impl ManagementRegistry {
    /// Build the registry over a service instance.
    #[must_use]
    pub fn new(service: Arc<SearchService>) -> Self {
        let config = service.config();
        let mut skills = SkillExecutionContext::new(service.embedding_cache());
        skills.diagnostics = config.diagnostics.clone();
        skills.skill_timeout = Duration::from_secs(config.skill_timeout_secs);
        let runtime = IndexerRuntime::new(&config.index_path);
        Self {
            service,
            datasources: DefinitionTable::default(),
            skillsets: DefinitionTable::default(),
            indexers: DefinitionTable::default(),
            connectors: ConnectorRegistry::new(),
            runtime,
            skills: Arc::new(skills),
        }
    }

    // ── Data sources ────────────────────────────────────────────────────────

    /// Create a data source (conflict on existing) and bind its connector.
    pub fn create_data_source(
        &self,
        definition: DataSourceDefinition,
        connector: Arc<dyn DataSourceConnector>,
    ) -> SimulatorResult<()> {
        let name = definition.name.clone();
        self.datasources.create("data source", &name, definition)?;
        self.connectors.register(&name, connector);
        Ok(())
    }

    /// Create or replace a data source and its connector.
    pub fn create_or_update_data_source(
        &self,
        definition: DataSourceDefinition,
        connector: Arc<dyn DataSourceConnector>,
    ) -> bool {
        let name = definition.name.clone();
        let created = self.datasources.create_or_update(&name, definition);
        self.connectors.register(&name, connector);
        created
    }

    /// Fetch a data source definition.
    pub fn get_data_source(&self, name: &str) -> SimulatorResult<DataSourceDefinition> {
        self.datasources.get("data source", name)
    }

    /// List data sources, name-ordered.
    #[must_use]
    pub fn list_data_sources(&self) -> Vec<DataSourceDefinition> {
        self.datasources.list()
    }

    /// Delete a data source and its connector.
    pub fn delete_data_source(&self, name: &str) -> SimulatorResult<()> {
        self.datasources.delete("data source", name)?;
        self.connectors.remove(name);
        Ok(())
    }

    /// Whether a data source exists.
    #[must_use]
    pub fn data_source_exists(&self, name: &str) -> bool {
        self.datasources.exists(name)
    }

    // ── Skillsets ───────────────────────────────────────────────────────────

    /// Create a skillset (conflict on existing).
    pub fn create_skillset(&self, definition: SkillsetDefinition) -> SimulatorResult<()> {
        let name = definition.name.clone();
        self.skillsets.create("skillset", &name, definition)
    }

    /// Create or replace a skillset.
    pub fn create_or_update_skillset(&self, definition: SkillsetDefinition) -> bool {
        let name = definition.name.clone();
        self.skillsets.create_or_update(&name, definition)
    }

    /// Fetch a skillset.
    pub fn get_skillset(&self, name: &str) -> SimulatorResult<SkillsetDefinition> {
        self.skillsets.get("skillset", name)
    }

    /// List skillsets, name-ordered.
    #[must_use]
    pub fn list_skillsets(&self) -> Vec<SkillsetDefinition> {
        self.skillsets.list()
    }

    /// Delete a skillset.
    pub fn delete_skillset(&self, name: &str) -> SimulatorResult<()> {
        self.skillsets.delete("skillset", name)
    }

    /// Whether a skillset exists.
    #[must_use]
    pub fn skillset_exists(&self, name: &str) -> bool {
        self.skillsets.exists(name)
    }

    // ── Indexers ────────────────────────────────────────────────────────────

    /// Create an indexer (conflict on existing).
    pub fn create_indexer(&self, definition: IndexerDefinition) -> SimulatorResult<()> {
        let name = definition.name.clone();
        self.indexers.create("indexer", &name, definition)
    }

    /// Create or replace an indexer.
    pub fn create_or_update_indexer(&self, definition: IndexerDefinition) -> bool {
        let name = definition.name.clone();
        self.indexers.create_or_update(&name, definition)
    }

    /// Fetch an indexer.
    pub fn get_indexer(&self, name: &str) -> SimulatorResult<IndexerDefinition> {
        self.indexers.get("indexer", name)
    }

    /// List indexers, name-ordered.
    #[must_use]
    pub fn list_indexers(&self) -> Vec<IndexerDefinition> {
        self.indexers.list()
    }

    /// Delete an indexer and its status record.
    pub fn delete_indexer(&self, name: &str) -> SimulatorResult<()> {
        self.indexers.delete("indexer", name)?;
        self.runtime.delete(name);
        Ok(())
    }

    /// Whether an indexer exists.
    #[must_use]
    pub fn indexer_exists(&self, name: &str) -> bool {
        self.indexers.exists(name)
    }

    /// Current status of an indexer.
    pub fn indexer_status(&self, name: &str) -> SimulatorResult<IndexerStatus> {
        if !self.indexers.exists(name) {
            return Err(SimulatorError::not_found("indexer", name));
        }
        Ok(self.runtime.status(name))
    }

    /// Reset an indexer's tracking state.
    pub fn reset_indexer(&self, name: &str) -> SimulatorResult<IndexerStatus> {
        if !self.indexers.exists(name) {
            return Err(SimulatorError::not_found("indexer", name));
        }
        self.runtime.reset(name)
    }

    /// Run an indexer to completion.
    pub async fn run_indexer(&self, name: &str) -> SimulatorResult<IndexerExecutionResult> {
        let indexer = self.get_indexer(name)?;
        let data_source = self.get_data_source(&indexer.data_source_name)?;
        let skillset = indexer
            .skillset_name
            .as_deref()
            .map(|skillset_name| self.get_skillset(skillset_name))
            .transpose()?;
        if !self.service.index_exists(&indexer.target_index_name) {
            return Err(SimulatorError::not_found(
                "index",
                &indexer.target_index_name,
            ));
        }
        let schema = self.service.get_index(&indexer.target_index_name)?;
        let connector = self.connectors.get(&indexer.data_source_name)?;

        let ctx = RunContext {
            indexer: Arc::new(indexer),
            data_source: Arc::new(data_source),
            skillset: skillset.map(Arc::new),
            schema: Arc::new(schema),
            connector,
            sink: Arc::new(ServiceSink {
                service: Arc::clone(&self.service),
            }),
            skills: Arc::clone(&self.skills),
            cancel: CancelFlag::new(),
        };
        self.runtime.run(ctx).await
    }
}
