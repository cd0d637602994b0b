//! Indexer, data source, and skillset definitions plus execution status
//! records.
//!
//! The mutable status record keeps the current status value, the last
//! execution result, and a bounded history of the most recent executions
//! (newest first, capped at [`EXECUTION_HISTORY_LIMIT`]).

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum retained execution-history entries.
pub const EXECUTION_HISTORY_LIMIT: usize = 10;

/// Default batch size for indexer runs.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ── Data sources ────────────────────────────────────────────────────────────

/// Change-detection policy of a data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetectionPolicy {
    /// Monotone source column (typically last-modified) used to skip
    /// unchanged documents across runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water_mark_column: Option<String>,
}

/// A data source the indexer pulls from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDefinition {
    /// Unique data source name.
    pub name: String,
    /// Connector type identifier (e.g. "memory", "blob").
    #[serde(rename = "type")]
    pub source_type: String,
    /// Container or collection within the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Change detection policy.
    #[serde(default)]
    pub data_change_detection_policy: ChangeDetectionPolicy,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Skillsets ───────────────────────────────────────────────────────────────

/// One input binding of a skill: a name plus either a source path into the
/// enriched tree or a constant expression (`= …`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInput {
    /// Input name the executor looks up.
    pub name: String,
    /// Source path (`/document/content`) or constant (`= 'value'`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One output binding of a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillOutput {
    /// Output name produced by the executor.
    pub name: String,
    /// Target node name under the skill context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl SkillOutput {
    /// Effective target name (defaults to the output name).
    #[must_use]
    pub fn effective_target(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }
}

/// A skill declaration inside a skillset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDefinition {
    /// Discriminator selecting the executor.
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    /// Optional skill name for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Context path inputs/outputs resolve against; `/document` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Input bindings.
    #[serde(default)]
    pub inputs: Vec<SkillInput>,
    /// Output bindings.
    #[serde(default)]
    pub outputs: Vec<SkillOutput>,
    /// Executor-specific parameters (kept as raw JSON).
    #[serde(flatten)]
    pub parameters: serde_json::Map<String, Value>,
}

impl SkillDefinition {
    /// Display name: declared name or the `@odata.type` discriminator.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.odata_type)
    }

    /// Effective context path.
    #[must_use]
    pub fn effective_context(&self) -> &str {
        self.context.as_deref().unwrap_or("/document")
    }

    /// Read a string parameter.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Read an integer parameter.
    #[must_use]
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }
}

/// An ordered skill pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsetDefinition {
    /// Unique skillset name.
    pub name: String,
    /// Skills in execution order.
    pub skills: Vec<SkillDefinition>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Indexer definitions ─────────────────────────────────────────────────────

/// Parsing mode applied when cracking source documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParsingMode {
    /// Content-type sniffing + cracker dispatch.
    #[default]
    Default,
    /// Treat the body as plain text.
    Text,
    /// Parse the body as one JSON document.
    Json,
    /// Parse the body as a JSON array producing one action per element.
    JsonArray,
}

/// What to extract during document cracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataToExtract {
    /// Content plus metadata.
    #[default]
    ContentAndMetadata,
    /// All metadata, no content.
    AllMetadata,
    /// Storage metadata only.
    StorageMetadata,
}

/// Image handling during document extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageAction {
    /// No image output.
    #[default]
    None,
    /// Emit normalized image descriptors.
    GenerateNormalizedImages,
}

/// Nested execution configuration of an indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerConfiguration {
    /// Parsing mode.
    #[serde(default)]
    pub parsing_mode: ParsingMode,
    /// Extraction mode.
    #[serde(default)]
    pub data_to_extract: DataToExtract,
    /// Image handling.
    #[serde(default)]
    pub image_action: ImageAction,
}

/// Indexer execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerParameters {
    /// Documents per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Global failed-item budget; `-1` disables the budget.
    #[serde(default)]
    pub max_failed_items: i64,
    /// Per-batch failed-item budget; `-1` disables the budget.
    #[serde(default)]
    pub max_failed_items_per_batch: i64,
    /// Nested configuration.
    #[serde(default)]
    pub configuration: IndexerConfiguration,
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for IndexerParameters {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_failed_items: 0,
            max_failed_items_per_batch: 0,
            configuration: IndexerConfiguration::default(),
        }
    }
}

/// A mapping function applied while copying a source field to a target field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingFunction {
    /// Function name (`base64Encode`, `base64Decode`, `urlEncode`,
    /// `urlDecode`, `extractTokenAtPosition`).
    pub name: String,
    /// Function parameters (`delimiter`, `position`).
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

/// A source → target field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Source field name, or `/document/...` path for output mappings.
    pub source_field_name: String,
    /// Target index field; defaults to the source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field_name: Option<String>,
    /// Optional mapping function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_function: Option<MappingFunction>,
}

impl FieldMapping {
    /// Effective target field name.
    #[must_use]
    pub fn effective_target(&self) -> &str {
        self.target_field_name
            .as_deref()
            .unwrap_or(&self.source_field_name)
    }
}

/// An indexer definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerDefinition {
    /// Unique indexer name.
    pub name: String,
    /// Source data source name.
    pub data_source_name: String,
    /// Target index name.
    pub target_index_name: String,
    /// Optional skillset applied during preparation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skillset_name: Option<String>,
    /// Disabled indexers refuse to run.
    #[serde(default)]
    pub is_disabled: bool,
    /// Execution parameters.
    #[serde(default)]
    pub parameters: IndexerParameters,
    /// Source-to-index field mappings.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    /// Enrichment-output-to-index field mappings (`/document/...` sources).
    #[serde(default)]
    pub output_field_mappings: Vec<FieldMapping>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Execution status ────────────────────────────────────────────────────────

/// Current status value of an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexerStatusValue {
    /// Never run or finished.
    #[default]
    Idle,
    /// A run is in flight.
    Running,
    /// The last run failed.
    Error,
}

/// Outcome of one indexer execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// All items processed without failures.
    Success,
    /// Failures occurred; a re-run may succeed.
    TransientFailure,
    /// Synthetic record inserted by a reset.
    Reset,
    /// Run still in progress.
    InProgress,
}

/// A structured per-document error captured during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerExecutionError {
    /// Document key, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Human-readable cause.
    pub error_message: String,
    /// Internal error code.
    pub status_code: u16,
    /// Skill or stage that produced the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Link to remediation documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_link: Option<String>,
}

/// The result record of one indexer execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerExecutionResult {
    /// Outcome.
    pub status: ExecutionStatus,
    /// Summary error message for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Run start time.
    pub start_time: DateTime<FixedOffset>,
    /// Run end time; unset while in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<FixedOffset>>,
    /// Documents processed successfully.
    pub items_processed: u64,
    /// Documents failed.
    pub items_failed: u64,
    /// Documents skipped by change detection.
    pub items_skipped: u64,
    /// Structured per-document errors.
    #[serde(default)]
    pub errors: Vec<IndexerExecutionError>,
    /// High-water-mark at run start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_tracking_state: Option<String>,
    /// High-water-mark persisted at run end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_tracking_state: Option<String>,
}

/// The mutable status record of an indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerStatus {
    /// Current status value.
    pub status: IndexerStatusValue,
    /// Most recent execution result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<IndexerExecutionResult>,
    /// Bounded execution history, newest first.
    #[serde(default)]
    pub execution_history: Vec<IndexerExecutionResult>,
    /// Persisted high-water-mark for change detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_state: Option<String>,
}

impl IndexerStatus {
    /// Push an execution result, keeping history newest-first and bounded.
    pub fn record_execution(&mut self, result: IndexerExecutionResult) {
        self.last_result = Some(result.clone());
        self.execution_history.insert(0, result);
        self.execution_history.truncate(EXECUTION_HISTORY_LIMIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result_at(minute: u32) -> IndexerExecutionResult {
        IndexerExecutionResult {
            status: ExecutionStatus::Success,
            error_message: None,
            start_time: chrono::FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 0, minute, 0)
                .unwrap(),
            end_time: None,
            items_processed: u64::from(minute),
            items_failed: 0,
            items_skipped: 0,
            errors: Vec::new(),
            initial_tracking_state: None,
            final_tracking_state: None,
        }
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let mut status = IndexerStatus::default();
        for minute in 0..15 {
            status.record_execution(result_at(minute));
        }
        assert_eq!(status.execution_history.len(), EXECUTION_HISTORY_LIMIT);
        assert_eq!(status.execution_history[0].items_processed, 14);
        assert_eq!(status.execution_history[9].items_processed, 5);
        assert_eq!(status.last_result.as_ref().unwrap().items_processed, 14);
    }

    #[test]
    fn skill_definition_parameter_access() {
        let json = serde_json::json!({
            "@odata.type": "#Microsoft.Skills.Text.SplitSkill",
            "context": "/document",
            "textSplitMode": "pages",
            "maximumPageLength": 4000,
            "inputs": [{"name": "text", "source": "/document/content"}],
            "outputs": [{"name": "textItems", "targetName": "pages"}]
        });
        let skill: SkillDefinition = serde_json::from_value(json).expect("parses");
        assert_eq!(skill.param_str("textSplitMode"), Some("pages"));
        assert_eq!(skill.param_u64("maximumPageLength"), Some(4000));
        assert_eq!(skill.outputs[0].effective_target(), "pages");
        assert_eq!(skill.effective_context(), "/document");
    }

    #[test]
    fn indexer_defaults() {
        let indexer: IndexerDefinition = serde_json::from_value(serde_json::json!({
            "name": "idx",
            "dataSourceName": "ds",
            "targetIndexName": "target"
        }))
        .expect("minimal indexer");
        assert_eq!(indexer.parameters.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!indexer.is_disabled);
        assert_eq!(
            indexer.parameters.configuration.parsing_mode,
            ParsingMode::Default
        );
    }

    #[test]
    fn field_mapping_target_defaults_to_source() {
        let mapping: FieldMapping = serde_json::from_value(serde_json::json!({
            "sourceFieldName": "title"
        }))
        .expect("parses");
        assert_eq!(mapping.effective_target(), "title");
    }
}
