//! Indexer orchestration: the pull-based batch pipeline.
//!
//! A run enumerates source metadata since the stored high-water-mark, then
//! processes batches of `batch_size`: each document is prepared concurrently
//! under a semaphore (permits = min(batch size, logical CPUs)) — change
//! detection, body download, key validation, cracking by parsing mode, skill
//! pipeline, field and output-field mappings — and the batch's successes are
//! submitted as one bulk `mergeOrUpload` request. Failure budgets apply per
//! batch and globally; live counters persist at batch boundaries; execution
//! history is capped at the ten most recent entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use searchsim_core::document::{Document, validate_key};
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::indexer::{
    DataSourceDefinition, ExecutionStatus, IndexerDefinition, IndexerExecutionError,
    IndexerExecutionResult, IndexerStatus, IndexerStatusValue, ParsingMode, SkillsetDefinition,
};
use searchsim_core::schema::IndexSchema;

use crate::datasource::{DataSourceConnector, SourceDocumentMeta};
use crate::enriched::EnrichedDocument;
use crate::mappings;
use crate::skills::{self, SkillExecutionContext};

/// Result of one bulk submission.
#[derive(Debug, Clone, Default)]
pub struct BulkOutcome {
    /// Actions committed.
    pub succeeded: usize,
    /// Per-action failures as (key, message).
    pub failures: Vec<(String, String)>,
}

/// The index the orchestrator writes into.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Submit one batch of `mergeOrUpload` documents.
    async fn merge_or_upload(
        &self,
        index: &str,
        documents: Vec<Document>,
    ) -> SimulatorResult<BulkOutcome>;

    /// Change-detection probe: the stored value of `field` for `key`.
    async fn stored_field(
        &self,
        index: &str,
        key: &str,
        field: &str,
    ) -> SimulatorResult<Option<Value>>;
}

/// Cooperative cancellation flag checked at suspension points.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one run needs, shared across preparation tasks.
pub struct RunContext {
    /// The indexer definition.
    pub indexer: Arc<IndexerDefinition>,
    /// Its data source definition.
    pub data_source: Arc<DataSourceDefinition>,
    /// The optional skillset.
    pub skillset: Option<Arc<SkillsetDefinition>>,
    /// Target index schema.
    pub schema: Arc<IndexSchema>,
    /// Live connector.
    pub connector: Arc<dyn DataSourceConnector>,
    /// Bulk sink.
    pub sink: Arc<dyn IndexSink>,
    /// Skill execution dependencies.
    pub skills: Arc<SkillExecutionContext>,
    /// Cancellation flag.
    pub cancel: CancelFlag,
}

/// Per-indexer status persistence (one JSON blob per indexer).
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    /// Store rooted at `<root>/indexers/`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("indexers"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load a status record, defaulting to idle when absent or unreadable.
    #[must_use]
    pub fn load(&self, name: &str) -> IndexerStatus {
        std::fs::read(self.path(name))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    /// Persist a status record (best-effort write-then-rename).
    pub fn save(&self, name: &str, status: &IndexerStatus) -> SimulatorResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let payload = serde_json::to_vec_pretty(status)?;
        let tmp = self.path(name).with_extension("tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, self.path(name))?;
        Ok(())
    }

    /// Delete a status record.
    pub fn delete(&self, name: &str) {
        let _ = std::fs::remove_file(self.path(name));
    }
}

/// The orchestrator: serializes runs per indexer and drives the batch loop.
pub struct IndexerRuntime {
    status_store: StatusStore,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Outcome of preparing one source document.
enum Prepared {
    Ready(Vec<Document>),
    Skipped,
    Failed(IndexerExecutionError),
}

impl IndexerRuntime {
    /// Runtime persisting status under `<root>/indexers/`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            status_store: StatusStore::new(root),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("indexer lock table");
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Current status of an indexer.
    #[must_use]
    pub fn status(&self, name: &str) -> IndexerStatus {
        self.status_store.load(name)
    }

    /// Reset an indexer: synthetic reset record, cleared high-water-mark, no
    /// document deletion.
    pub fn reset(&self, name: &str) -> SimulatorResult<IndexerStatus> {
        let mut status = self.status_store.load(name);
        let now = Utc::now().fixed_offset();
        status.record_execution(IndexerExecutionResult {
            status: ExecutionStatus::Reset,
            error_message: None,
            start_time: now,
            end_time: Some(now),
            items_processed: 0,
            items_failed: 0,
            items_skipped: 0,
            errors: Vec::new(),
            initial_tracking_state: status.tracking_state.clone(),
            final_tracking_state: None,
        });
        status.tracking_state = None;
        status.status = IndexerStatusValue::Idle;
        self.status_store.save(name, &status)?;
        Ok(status)
    }

    /// Drop an indexer's persisted status.
    pub fn delete(&self, name: &str) {
        self.status_store.delete(name);
        self.locks.lock().expect("indexer lock table").remove(name);
    }

    /// Execute one run to completion.
    pub async fn run(&self, ctx: RunContext) -> SimulatorResult<IndexerExecutionResult> {
        if ctx.indexer.is_disabled {
            return Err(SimulatorError::InvalidOperation(format!(
                "indexer '{}' is disabled",
                ctx.indexer.name
            )));
        }
        let lock = self.lock_for(&ctx.indexer.name);
        let _guard = lock.lock().await;

        let name = ctx.indexer.name.clone();
        let mut status = self.status_store.load(&name);
        let initial_tracking = status.tracking_state.clone();
        let run_start = Utc::now().fixed_offset();
        status.status = IndexerStatusValue::Running;
        self.status_store.save(&name, &status)?;
        info!(indexer = %name, "indexer run starting");

        let result = self
            .run_inner(&ctx, &mut status, run_start, initial_tracking.clone())
            .await;

        let execution = match result {
            Ok(execution) => execution,
            Err(err) => IndexerExecutionResult {
                status: ExecutionStatus::TransientFailure,
                error_message: Some(err.to_string()),
                start_time: run_start,
                end_time: Some(Utc::now().fixed_offset()),
                items_processed: 0,
                items_failed: 0,
                items_skipped: 0,
                errors: Vec::new(),
                initial_tracking_state: initial_tracking,
                final_tracking_state: None,
            },
        };

        status.status = if execution.status == ExecutionStatus::Success {
            IndexerStatusValue::Idle
        } else {
            IndexerStatusValue::Error
        };
        if let Some(mark) = execution.final_tracking_state.clone() {
            status.tracking_state = Some(mark);
        }
        status.record_execution(execution.clone());
        self.status_store.save(&name, &status)?;
        Ok(execution)
    }

    async fn run_inner(
        &self,
        ctx: &RunContext,
        status: &mut IndexerStatus,
        run_start: DateTime<FixedOffset>,
        initial_tracking: Option<String>,
    ) -> SimulatorResult<IndexerExecutionResult> {
        let metas = ctx
            .connector
            .enumerate_since(initial_tracking.as_deref())
            .await?;
        debug!(indexer = %ctx.indexer.name, candidates = metas.len(), "enumerated source");

        let batch_size = ctx.indexer.parameters.batch_size.max(1);
        let permits = batch_size.min(
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
        );
        let per_batch_budget = ctx.indexer.parameters.max_failed_items_per_batch;
        let global_budget = ctx.indexer.parameters.max_failed_items;

        let mut processed = 0u64;
        let mut failed = 0u64;
        let mut skipped = 0u64;
        let mut errors: Vec<IndexerExecutionError> = Vec::new();
        let mut run_error: Option<String> = None;

        'batches: for batch in metas.chunks(batch_size) {
            if ctx.cancel.is_cancelled() {
                run_error = Some("run cancelled".to_string());
                break;
            }

            // Parallel preparation bounded by the semaphore.
            let semaphore = Arc::new(Semaphore::new(permits));
            let mut tasks: JoinSet<Prepared> = JoinSet::new();
            for meta in batch.iter().cloned() {
                let semaphore = Arc::clone(&semaphore);
                let indexer = Arc::clone(&ctx.indexer);
                let data_source = Arc::clone(&ctx.data_source);
                let skillset = ctx.skillset.clone();
                let schema = Arc::clone(&ctx.schema);
                let connector = Arc::clone(&ctx.connector);
                let sink = Arc::clone(&ctx.sink);
                let skill_ctx = Arc::clone(&ctx.skills);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore open");
                    prepare_document(
                        &meta,
                        &indexer,
                        &data_source,
                        skillset.as_deref(),
                        &schema,
                        connector.as_ref(),
                        sink.as_ref(),
                        &skill_ctx,
                    )
                    .await
                });
            }

            let mut staged: Vec<Document> = Vec::new();
            let mut batch_failed = 0u64;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Prepared::Ready(documents)) => staged.extend(documents),
                    Ok(Prepared::Skipped) => skipped += 1,
                    Ok(Prepared::Failed(error)) => {
                        warn!(indexer = %ctx.indexer.name, key = ?error.key, "document preparation failed");
                        batch_failed += 1;
                        errors.push(error);
                    }
                    Err(join_error) => {
                        batch_failed += 1;
                        errors.push(IndexerExecutionError {
                            key: None,
                            error_message: format!("preparation task panicked: {join_error}"),
                            status_code: 500,
                            name: Some("prepare".to_string()),
                            documentation_link: None,
                        });
                    }
                }
            }

            // Bulk submit the staged successes; sibling successes commit even
            // when other actions failed.
            if !staged.is_empty() {
                let staged_count = staged.len() as u64;
                match ctx
                    .sink
                    .merge_or_upload(&ctx.indexer.target_index_name, staged)
                    .await
                {
                    Ok(outcome) => {
                        processed += outcome.succeeded as u64;
                        batch_failed += outcome.failures.len() as u64;
                        for (key, message) in outcome.failures {
                            errors.push(IndexerExecutionError {
                                key: Some(key),
                                error_message: message,
                                status_code: 400,
                                name: Some("index".to_string()),
                                documentation_link: None,
                            });
                        }
                    }
                    Err(err) => {
                        // Bulk infrastructure failure: every staged action
                        // counts as failed.
                        batch_failed += staged_count;
                        errors.push(IndexerExecutionError {
                            key: None,
                            error_message: format!("bulk upload failed: {err}"),
                            status_code: 503,
                            name: Some("bulkUpload".to_string()),
                            documentation_link: None,
                        });
                    }
                }
            }
            failed += batch_failed;

            // Persist live counters at the batch boundary.
            status.last_result = Some(IndexerExecutionResult {
                status: ExecutionStatus::InProgress,
                error_message: None,
                start_time: run_start,
                end_time: None,
                items_processed: processed,
                items_failed: failed,
                items_skipped: skipped,
                errors: errors.clone(),
                initial_tracking_state: initial_tracking.clone(),
                final_tracking_state: None,
            });
            self.status_store.save(&ctx.indexer.name, status)?;

            if per_batch_budget >= 0 && batch_failed > per_batch_budget.unsigned_abs() {
                run_error = Some(format!(
                    "batch failure budget exceeded ({batch_failed} > {per_batch_budget})"
                ));
                break 'batches;
            }
            if global_budget >= 0 && failed > global_budget.unsigned_abs() {
                run_error = Some(format!(
                    "global failure budget exceeded ({failed} > {global_budget})"
                ));
                break 'batches;
            }
        }

        let final_status = if run_error.is_none() && failed == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::TransientFailure
        };
        info!(
            indexer = %ctx.indexer.name,
            processed, failed, skipped,
            status = ?final_status,
            "indexer run finished"
        );
        Ok(IndexerExecutionResult {
            status: final_status,
            error_message: run_error,
            start_time: run_start,
            end_time: Some(Utc::now().fixed_offset()),
            items_processed: processed,
            items_failed: failed,
            items_skipped: skipped,
            errors,
            initial_tracking_state: initial_tracking,
            final_tracking_state: Some(run_start.to_rfc3339()),
        })
    }
}

// ── Document preparation ────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn prepare_document(
    meta: &SourceDocumentMeta,
    indexer: &IndexerDefinition,
    data_source: &DataSourceDefinition,
    skillset: Option<&SkillsetDefinition>,
    schema: &IndexSchema,
    connector: &dyn DataSourceConnector,
    sink: &dyn IndexSink,
    skill_ctx: &SkillExecutionContext,
) -> Prepared {
    let key_field = schema.key_field().map_or("id", |field| field.name.as_str());

    // The key candidate comes from metadata-level field mappings so change
    // detection can probe before the body downloads.
    let mut metadata_doc = Map::new();
    metadata_doc.insert("id".to_string(), Value::String(meta.id.clone()));
    for (name, value) in &meta.metadata {
        metadata_doc.insert(name.clone(), value.clone());
    }
    let key = match mapped_key(indexer, &metadata_doc, key_field) {
        Ok(key) => key,
        Err(message) => {
            return Prepared::Failed(prep_error(Some(meta.id.clone()), &message, 400, "keyMapping"));
        }
    };
    if let Err(err) = validate_key(&key) {
        return Prepared::Failed(IndexerExecutionError {
            key: Some(key),
            error_message: err.to_string(),
            status_code: 400,
            name: Some("keyValidation".to_string()),
            documentation_link: Some(
                "https://learn.microsoft.com/azure/search/search-indexer-troubleshooting".to_string(),
            ),
        });
    }

    // Change detection against the stored high-water-mark column.
    if let Some(column) = &data_source.data_change_detection_policy.high_water_mark_column {
        if let Some(source_stamp) = source_stamp(meta, column) {
            let stored = sink
                .stored_field(&indexer.target_index_name, &key, column)
                .await
                .ok()
                .flatten()
                .and_then(|value| value.as_str().map(ToString::to_string))
                .and_then(|text| DateTime::parse_from_rfc3339(&text).ok());
            if stored.is_some_and(|existing| source_stamp <= existing) {
                debug!(key = %key, "change detection skipped unchanged document");
                return Prepared::Skipped;
            }
        }
    }

    let body = match connector.fetch_body(&meta.id).await {
        Ok(body) => body,
        Err(err) => {
            return Prepared::Failed(prep_error(
                Some(key),
                &format!("body download failed: {err}"),
                503,
                "download",
            ));
        }
    };

    // Crack by parsing mode into one or many base documents.
    let base_documents = match crack(indexer, meta, &body, skill_ctx) {
        Ok(documents) => documents,
        Err(message) => {
            return Prepared::Failed(prep_error(Some(key), &message, 400, "crack"));
        }
    };

    let mut prepared = Vec::with_capacity(base_documents.len());
    for (ordinal, base) in base_documents.into_iter().enumerate() {
        match enrich_and_map(
            &base, meta, indexer, skillset, schema, key_field, &key, ordinal, skill_ctx,
        )
        .await
        {
            Ok(document) => prepared.push(document),
            Err(error) => return Prepared::Failed(error),
        }
    }
    Prepared::Ready(prepared)
}

fn prep_error(
    key: Option<String>,
    message: &str,
    status_code: u16,
    stage: &str,
) -> IndexerExecutionError {
    IndexerExecutionError {
        key,
        error_message: message.to_string(),
        status_code,
        name: Some(stage.to_string()),
        documentation_link: None,
    }
}

/// Apply the key-relevant field mapping to derive the document key from
/// source metadata. Falls back to the raw source id.
fn mapped_key(
    indexer: &IndexerDefinition,
    metadata_doc: &Map<String, Value>,
    key_field: &str,
) -> Result<String, String> {
    for mapping in &indexer.field_mappings {
        if mapping.effective_target() != key_field {
            continue;
        }
        let Some(value) = metadata_doc.get(&mapping.source_field_name) else {
            continue;
        };
        let mapped = match &mapping.mapping_function {
            Some(function) => mappings::apply_function(function, value)?,
            None => value.clone(),
        };
        if let Some(text) = mapped.as_str() {
            return Ok(text.to_string());
        }
    }
    metadata_doc
        .get(key_field)
        .and_then(Value::as_str)
        .map_or_else(
            || {
                metadata_doc
                    .get("id")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| "source document carries no key".to_string())
            },
            |text| Ok(text.to_string()),
        )
}

fn source_stamp(meta: &SourceDocumentMeta, column: &str) -> Option<DateTime<FixedOffset>> {
    if let Some(value) = meta.metadata.get(column) {
        if let Some(text) = value.as_str() {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed);
            }
        }
    }
    meta.last_modified
}

/// Crack the body into base documents per the parsing mode. Base documents
/// carry the raw source id; key mappings apply later so they run exactly
/// once.
fn crack(
    indexer: &IndexerDefinition,
    meta: &SourceDocumentMeta,
    body: &[u8],
    skill_ctx: &SkillExecutionContext,
) -> Result<Vec<Map<String, Value>>, String> {
    let mode = indexer.parameters.configuration.parsing_mode;
    let make_base = |content: String| {
        let mut base = Map::new();
        base.insert("id".to_string(), Value::String(meta.id.clone()));
        base.insert("content".to_string(), Value::String(content));
        for (name, value) in &meta.metadata {
            base.insert(name.clone(), value.clone());
        }
        base
    };

    match mode {
        ParsingMode::Text => Ok(vec![make_base(String::from_utf8_lossy(body).into_owned())]),
        ParsingMode::Json => {
            let parsed: Value =
                serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {e}"))?;
            let object = parsed
                .as_object()
                .ok_or_else(|| "JSON body is not an object".to_string())?;
            let mut base = make_base(String::new());
            for (name, value) in object {
                base.insert(name.clone(), value.clone());
            }
            Ok(vec![base])
        }
        ParsingMode::JsonArray => {
            let parsed: Value =
                serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {e}"))?;
            let items = parsed
                .as_array()
                .ok_or_else(|| "JSON body is not an array".to_string())?;
            let mut documents = Vec::with_capacity(items.len());
            for (ordinal, item) in items.iter().enumerate() {
                let object = item
                    .as_object()
                    .ok_or_else(|| format!("JSON array element {ordinal} is not an object"))?;
                let mut base = make_base(String::new());
                base.insert(
                    "id".to_string(),
                    Value::String(format!("{}_{ordinal}", meta.id)),
                );
                for (name, value) in object {
                    base.insert(name.clone(), value.clone());
                }
                documents.push(base);
            }
            Ok(documents)
        }
        ParsingMode::Default => {
            let content_type = skills::extraction::detect_content_type(body);
            let cracked = skills::extraction::crack_text(
                content_type,
                body,
                skill_ctx.binary_cracker.as_ref(),
            );
            let mut base = make_base(cracked.text);
            base.insert(
                "metadata_content_type".to_string(),
                Value::String(content_type.to_string()),
            );
            Ok(vec![base])
        }
    }
}

/// Run the skill pipeline and apply field + output-field mappings.
#[allow(clippy::too_many_arguments)]
async fn enrich_and_map(
    base: &Map<String, Value>,
    meta: &SourceDocumentMeta,
    indexer: &IndexerDefinition,
    skillset: Option<&SkillsetDefinition>,
    schema: &IndexSchema,
    key_field: &str,
    fallback_key: &str,
    ordinal: usize,
    skill_ctx: &SkillExecutionContext,
) -> Result<Document, IndexerExecutionError> {
    let mut enriched = EnrichedDocument::new(Value::Object(base.clone()));
    if let Some(skillset) = skillset {
        match skills::run_skillset(skillset, &mut enriched, skill_ctx).await {
            Ok(outcome) => {
                for warning in outcome.warnings {
                    debug!(source = %meta.id, warning, "skill warning");
                }
            }
            Err(err) => {
                return Err(IndexerExecutionError {
                    key: Some(fallback_key.to_string()),
                    error_message: err.to_string(),
                    status_code: 500,
                    name: Some("skillset".to_string()),
                    documentation_link: None,
                });
            }
        }
    }

    let mut document = Document::new();

    // Implicit name-matched copies first, then explicit mappings override.
    for field in &schema.fields {
        if let Some(value) = base.get(&field.name) {
            document.insert(field.name.clone(), value.clone());
        }
    }
    for mapping in &indexer.field_mappings {
        let Some(value) = base.get(&mapping.source_field_name) else {
            continue;
        };
        let mapped = match &mapping.mapping_function {
            Some(function) => mappings::apply_function(function, value).map_err(|message| {
                mapping_error(fallback_key, &mapping.source_field_name, &message)
            })?,
            None => value.clone(),
        };
        document.insert(mapping.effective_target().to_string(), mapped);
    }

    // Output field mappings read enrichment paths.
    for mapping in &indexer.output_field_mappings {
        let Some(value) = enriched.get(&mapping.source_field_name) else {
            continue;
        };
        let value = value.clone();
        let mapped = match &mapping.mapping_function {
            Some(function) => mappings::apply_function(function, &value).map_err(|message| {
                mapping_error(fallback_key, &mapping.source_field_name, &message)
            })?,
            None => value,
        };
        document.insert(mapping.effective_target().to_string(), mapped);
    }

    // Guarantee a valid key.
    let effective_key = document
        .get(key_field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| {
            if ordinal == 0 {
                fallback_key.to_string()
            } else {
                format!("{fallback_key}_{ordinal}")
            }
        });
    if let Err(err) = validate_key(&effective_key) {
        return Err(IndexerExecutionError {
            key: Some(effective_key),
            error_message: err.to_string(),
            status_code: 400,
            name: Some("keyValidation".to_string()),
            documentation_link: None,
        });
    }
    document.insert(key_field.to_string(), Value::String(effective_key));

    // Trim fields the schema does not know; the sink would reject them.
    document.retain(|name, _| schema.field(name).is_some());
    Ok(document)
}

fn mapping_error(key: &str, source: &str, message: &str) -> IndexerExecutionError {
    IndexerExecutionError {
        key: Some(key.to_string()),
        error_message: format!("field mapping from '{source}' failed: {message}"),
        status_code: 400,
        name: Some("fieldMapping".to_string()),
        documentation_link: None,
    }
}
