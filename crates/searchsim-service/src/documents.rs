//! Bulk document actions and lookups.
//!
//! Request shape: `{"value": [{"@search.action": "...", <key+fields>}]}`.
//! Per-action status codes match the cloud service: upload-new 201,
//! upload-existing 200, merge-existing 200, merge-missing 404,
//! mergeOrUpload 201/200, delete 200. `errorMessage` is always serialized,
//! as the JSON literal `null` on success. Successful sibling actions commit
//! even when other actions in the batch fail.

use serde_json::{Map, Value, json};
use tracing::debug;

use searchsim_core::document::{Document, coerce_value, extract_key, vector_components};
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::schema::{Field, IndexSchema, VectorMetric};
use searchsim_engine::vector::VectorStore;

use crate::store::{IndexInner, IndexState};

/// Bulk action discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Replace the whole document.
    Upload,
    /// Merge fields into an existing document.
    Merge,
    /// Merge when present, upload when new.
    MergeOrUpload,
    /// Remove the document.
    Delete,
}

impl ActionType {
    fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.unwrap_or("upload") {
            "upload" => Ok(Self::Upload),
            "merge" => Ok(Self::Merge),
            "mergeOrUpload" => Ok(Self::MergeOrUpload),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown @search.action '{other}'")),
        }
    }
}

/// Result of one bulk action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// Document key (empty when the key could not be determined).
    pub key: String,
    /// Whether the action succeeded.
    pub status: bool,
    /// Failure message; `None` serializes as JSON `null`.
    pub error_message: Option<String>,
    /// Per-action status code.
    pub status_code: u16,
}

impl ActionResult {
    fn success(key: String, status_code: u16) -> Self {
        Self {
            key,
            status: true,
            error_message: None,
            status_code,
        }
    }

    fn failure(key: String, message: String, status_code: u16) -> Self {
        Self {
            key,
            status: false,
            error_message: Some(message),
            status_code,
        }
    }

    /// Wire shape with `errorMessage` always present.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "key": self.key,
            "status": self.status,
            "errorMessage": self.error_message,
            "statusCode": self.status_code,
        })
    }
}

/// Wrap per-action results in the bulk response envelope:
/// `{"value": [{key, status, errorMessage, statusCode}]}`.
#[must_use]
pub fn build_bulk_response(results: &[ActionResult]) -> Value {
    json!({
        "value": results.iter().map(ActionResult::to_value).collect::<Vec<Value>>(),
    })
}

/// Apply a batch of raw actions against one index.
///
/// The write lock is held for the whole batch (single-writer bulk commit);
/// each action succeeds or fails independently.
pub fn apply_actions(
    state: &IndexState,
    vectors: &VectorStore,
    actions: &[Value],
) -> Vec<ActionResult> {
    let mut inner = state.write();
    actions
        .iter()
        .map(|raw| apply_one(&mut inner, vectors, raw))
        .collect()
}

fn apply_one(inner: &mut IndexInner, vectors: &VectorStore, raw: &Value) -> ActionResult {
    let Some(object) = raw.as_object() else {
        return ActionResult::failure(String::new(), "action is not an object".into(), 400);
    };
    let action = match ActionType::parse(object.get("@search.action").and_then(Value::as_str)) {
        Ok(action) => action,
        Err(message) => return ActionResult::failure(String::new(), message, 400),
    };

    let mut payload: Document = object.clone();
    payload.remove("@search.action");

    let key = match extract_key(&inner.schema, &payload) {
        Ok(key) => key,
        Err(err) => return ActionResult::failure(String::new(), err.to_string(), 400),
    };

    match action {
        ActionType::Delete => {
            delete_document(inner, vectors, &key);
            ActionResult::success(key, 200)
        }
        ActionType::Upload => match put_document(inner, vectors, &key, payload, true) {
            Ok(was_new) => ActionResult::success(key, if was_new { 201 } else { 200 }),
            Err(message) => ActionResult::failure(key, message, 400),
        },
        ActionType::Merge => {
            if !inner.documents.contains_key(&key) {
                return ActionResult::failure(
                    key.clone(),
                    format!("document '{key}' was not found for merge"),
                    404,
                );
            }
            match put_document(inner, vectors, &key, payload, false) {
                Ok(_) => ActionResult::success(key, 200),
                Err(message) => ActionResult::failure(key, message, 400),
            }
        }
        ActionType::MergeOrUpload => {
            let existed = inner.documents.contains_key(&key);
            match put_document(inner, vectors, &key, payload, !existed) {
                Ok(_) => ActionResult::success(key, if existed { 200 } else { 201 }),
                Err(message) => ActionResult::failure(key, message, 400),
            }
        }
    }
}

/// Validate, coerce, and commit one document write. `replace` substitutes the
/// whole document; merge keeps unmentioned stored fields and removes fields
/// merged with an explicit null. Collections replace wholesale.
fn put_document(
    inner: &mut IndexInner,
    vectors: &VectorStore,
    key: &str,
    payload: Document,
    replace: bool,
) -> Result<bool, String> {
    // Coerce every incoming field first so a type error leaves no state.
    let mut coerced = Map::with_capacity(payload.len());
    for (name, value) in &payload {
        let field = inner
            .schema
            .field(name)
            .ok_or_else(|| format!("unknown field '{name}'"))?;
        let value = coerce_value(field, value)?;
        if field.field_type.is_vector() && !value.is_null() {
            validate_vector_payload(field, &value)?;
        }
        coerced.insert(name.clone(), value);
    }

    let was_new = !inner.documents.contains_key(key);
    let merged = if replace || was_new {
        coerced
    } else {
        let mut stored = inner.documents.get(key).cloned().unwrap_or_default();
        for (name, value) in coerced {
            if value.is_null() {
                stored.remove(&name);
            } else {
                stored.insert(name, value);
            }
        }
        stored
    };

    // Vector upkeep: replaced documents drop vectors for fields no longer
    // present; incoming vector fields re-add (tombstoning the old label).
    let schema_name = inner.schema.name.clone();
    let vector_fields: Vec<Field> = inner
        .schema
        .vector_fields()
        .into_iter()
        .cloned()
        .collect();
    for field in &vector_fields {
        match merged.get(&field.name) {
            Some(value) if !value.is_null() => {
                let components = vector_components(value)
                    .ok_or_else(|| format!("field '{}' is not a float vector", field.name))?;
                let metric = vector_metric(&inner.schema, field);
                vectors
                    .add(
                        &schema_name,
                        &field.name,
                        key,
                        components,
                        field.dimensions.unwrap_or_default(),
                        metric,
                    )
                    .map_err(|err| err.to_string())?;
            }
            _ => vectors.remove(&schema_name, &field.name, key),
        }
    }

    reindex_text(inner, key, &merged);
    inner.documents.insert(key.to_string(), merged);
    debug!(index = %schema_name, key = %key, new = was_new, "document committed");
    Ok(was_new)
}

fn validate_vector_payload(field: &Field, value: &Value) -> Result<(), String> {
    let components = vector_components(value)
        .ok_or_else(|| format!("field '{}' is not a float vector", field.name))?;
    let declared = field.dimensions.unwrap_or_default();
    if components.len() != declared {
        return Err(format!(
            "field '{}' has {} dimensions, schema declares {declared}",
            field.name,
            components.len()
        ));
    }
    Ok(())
}

fn vector_metric(schema: &IndexSchema, field: &Field) -> VectorMetric {
    field
        .vector_profile
        .as_deref()
        .and_then(|profile| {
            schema
                .vector_search
                .as_ref()
                .and_then(|vs| vs.algorithm_for_profile(profile))
        })
        .map_or(VectorMetric::Cosine, |algorithm| algorithm.metric)
}

fn delete_document(inner: &mut IndexInner, vectors: &VectorStore, key: &str) {
    inner.documents.remove(key);
    inner.text_index.remove_document(key);
    vectors.remove_document(&inner.schema.name, key);
}

/// Rebuild the inverted-index entry of one document from its searchable
/// fields.
fn reindex_text(inner: &mut IndexInner, key: &str, document: &Document) {
    let mut field_tokens = std::collections::HashMap::new();
    for field in inner.schema.searchable_fields() {
        let analyzer = inner.registry.analyzer(field.analyzer.as_deref());
        let tokens: Vec<String> = match document.get(&field.name) {
            Some(Value::String(text)) => analyzer.analyze(text),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(|text| analyzer.analyze(text))
                .collect(),
            _ => continue,
        };
        if !tokens.is_empty() {
            field_tokens.insert(field.name.clone(), tokens);
        }
    }
    inner.text_index.index_document(key, &field_tokens);
}

/// Look up one document by key with an optional `$select` projection.
pub fn lookup(
    state: &IndexState,
    key: &str,
    select: Option<&str>,
) -> SimulatorResult<Document> {
    let inner = state.read();
    let document = inner
        .documents
        .get(key)
        .ok_or_else(|| SimulatorError::not_found("document", key))?;
    Ok(project(&inner.schema, document, select))
}

/// Count of stored documents.
#[must_use]
pub fn count(state: &IndexState) -> usize {
    state.read().documents.len()
}

/// Project a document through `$select` (comma-separated) and the
/// retrievable flags.
#[must_use]
pub fn project(schema: &IndexSchema, document: &Document, select: Option<&str>) -> Document {
    let selected: Option<Vec<&str>> = select
        .map(|raw| raw.split(',').map(str::trim).filter(|f| !f.is_empty()).collect());
    let mut projected = Document::new();
    for (name, value) in document {
        let Some(field) = schema.field(name) else {
            continue;
        };
        if !field.is_retrievable() {
            continue;
        }
        if let Some(selected) = &selected {
            if !selected.contains(&name.as_str()) {
                continue;
            }
        }
        projected.insert(name.clone(), value.clone());
    }
    projected
}
