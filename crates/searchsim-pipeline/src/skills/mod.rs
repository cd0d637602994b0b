//! Skill pipeline execution.
//!
//! Skills run strictly in declared order over the shared enriched-document
//! tree. The executor set is closed and keyed by the `@odata.type`
//! discriminator from a static table: Split, Merge, Shaper, Conditional,
//! Document-extraction, embedding, and the custom web-API skill.
//!
//! A context ending in `/*` fans the skill out over the referenced sequence;
//! fan-out errors are per-element and collected into the aggregate result.
//! A skill that produces none of its declared outputs marks the document
//! unchanged for downstream skills, which the pipeline treats as
//! success-with-warning. Any skill error fails the whole document's
//! enrichment.

pub mod extraction;
mod remote;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use tracing::debug;

use searchsim_core::config::DiagnosticLogging;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::indexer::{SkillDefinition, SkillsetDefinition};

use crate::enriched::EnrichedDocument;
use crate::local_embed::LocalEmbeddingCache;
use self::extraction::{BinaryCracker, NoopBinaryCracker};

/// Default per-skill timeout.
pub const DEFAULT_SKILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared dependencies handed to skill executors.
pub struct SkillExecutionContext {
    /// Outbound HTTP client for remote skills.
    pub http: reqwest::Client,
    /// Local embedding model cache (`local://` resource URIs).
    pub embed_cache: Arc<LocalEmbeddingCache>,
    /// Diagnostic logging toggles.
    pub diagnostics: DiagnosticLogging,
    /// Per-skill timeout.
    pub skill_timeout: Duration,
    /// Cracker for binary document formats.
    pub binary_cracker: Arc<dyn BinaryCracker>,
}

impl SkillExecutionContext {
    /// Context with default settings and the no-op binary cracker.
    #[must_use]
    pub fn new(embed_cache: Arc<LocalEmbeddingCache>) -> Self {
        Self {
            http: reqwest::Client::new(),
            embed_cache,
            diagnostics: DiagnosticLogging::default(),
            skill_timeout: DEFAULT_SKILL_TIMEOUT,
            binary_cracker: Arc::new(NoopBinaryCracker),
        }
    }
}

/// Aggregate outcome of one skillset run over one document.
#[derive(Debug, Clone, Default)]
pub struct SkillsetOutcome {
    /// Accumulated warnings from every skill.
    pub warnings: Vec<String>,
}

/// Output of one executor invocation.
pub(crate) struct ExecOutput {
    /// Produced values keyed by output name.
    pub outputs: HashMap<String, Value>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

/// The closed executor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorKind {
    Split,
    Merge,
    Shaper,
    Conditional,
    DocumentExtraction,
    Embedding,
    WebApi,
}

/// Static discriminator table: `@odata.type` suffix → executor.
fn resolve_executor(odata_type: &str) -> Option<ExecutorKind> {
    let lower = odata_type.to_ascii_lowercase();
    if lower.ends_with("splitskill") {
        Some(ExecutorKind::Split)
    } else if lower.ends_with("mergeskill") {
        Some(ExecutorKind::Merge)
    } else if lower.ends_with("shaperskill") {
        Some(ExecutorKind::Shaper)
    } else if lower.ends_with("conditionalskill") {
        Some(ExecutorKind::Conditional)
    } else if lower.ends_with("documentextractionskill") {
        Some(ExecutorKind::DocumentExtraction)
    } else if lower.ends_with("embeddingskill") {
        Some(ExecutorKind::Embedding)
    } else if lower.ends_with("webapiskill") {
        Some(ExecutorKind::WebApi)
    } else {
        None
    }
}

/// Run a skillset over an enriched document, strictly in declared order.
pub async fn run_skillset(
    skillset: &SkillsetDefinition,
    enriched: &mut EnrichedDocument,
    ctx: &SkillExecutionContext,
) -> SimulatorResult<SkillsetOutcome> {
    let mut outcome = SkillsetOutcome::default();
    for skill in &skillset.skills {
        run_skill(skill, enriched, ctx, &mut outcome).await?;
    }
    Ok(outcome)
}

async fn run_skill(
    skill: &SkillDefinition,
    enriched: &mut EnrichedDocument,
    ctx: &SkillExecutionContext,
    outcome: &mut SkillsetOutcome,
) -> SimulatorResult<()> {
    let Some(kind) = resolve_executor(&skill.odata_type) else {
        return Err(SimulatorError::SkillFailure {
            skill: skill.display_name().to_string(),
            message: format!("unknown skill discriminator '{}'", skill.odata_type),
        });
    };
    if ctx.diagnostics.enabled && ctx.diagnostics.log_skill_execution {
        debug!(skill = skill.display_name(), context = skill.effective_context(), "running skill");
    }

    let bindings = enriched.expand_context(skill.effective_context());
    if bindings.is_empty() {
        outcome.warnings.push(format!(
            "skill '{}' context '{}' matched no elements",
            skill.display_name(),
            skill.effective_context()
        ));
        return Ok(());
    }

    let mut errors: Vec<String> = Vec::new();
    let mut produced_any = false;

    if kind == ExecutorKind::WebApi {
        run_web_api_skill(skill, enriched, ctx, &bindings, outcome, &mut errors, &mut produced_any)
            .await?;
    } else {
        for binding in &bindings {
            let inputs = resolve_inputs(skill, binding, enriched, &mut outcome.warnings);
            let executed = execute_one(kind, skill, &inputs, ctx).await;
            match executed {
                Ok(exec) => {
                    outcome.warnings.extend(exec.warnings);
                    produced_any |= write_outputs(skill, binding, enriched, &exec.outputs, &mut errors);
                }
                Err(message) => errors.push(format!("{binding}: {message}")),
            }
        }
    }

    if !errors.is_empty() {
        return Err(SimulatorError::SkillFailure {
            skill: skill.display_name().to_string(),
            message: errors.join("; "),
        });
    }
    if !produced_any {
        outcome.warnings.push(format!(
            "skill '{}' produced no outputs; document unchanged for downstream skills",
            skill.display_name()
        ));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_web_api_skill(
    skill: &SkillDefinition,
    enriched: &mut EnrichedDocument,
    ctx: &SkillExecutionContext,
    bindings: &[String],
    outcome: &mut SkillsetOutcome,
    errors: &mut Vec<String>,
    produced_any: &mut bool,
) -> SimulatorResult<()> {
    #[allow(clippy::cast_possible_truncation)]
    let batch_size = skill.param_u64("batchSize").unwrap_or(1000).max(1) as usize;
    let prepared: Vec<(String, HashMap<String, Value>)> = bindings
        .iter()
        .map(|binding| {
            (
                binding.clone(),
                resolve_inputs(skill, binding, enriched, &mut outcome.warnings),
            )
        })
        .collect();

    for chunk in prepared.chunks(batch_size) {
        let response = tokio::time::timeout(
            ctx.skill_timeout,
            remote::run_web_api_batch(skill, chunk, ctx),
        )
        .await
        .map_err(|_| SimulatorError::SkillFailure {
            skill: skill.display_name().to_string(),
            message: "web-API call timed out".to_string(),
        })?;
        let records = match response {
            Ok(records) => records,
            Err(message) => {
                errors.push(message);
                continue;
            }
        };
        for ((binding, _), record) in chunk.iter().zip(records) {
            outcome.warnings.extend(record.warnings);
            if let Some(error) = record.error {
                errors.push(format!("{binding}: {error}"));
                continue;
            }
            if let Some(outputs) = record.outputs {
                *produced_any |= write_outputs(skill, binding, enriched, &outputs, errors);
            }
        }
    }
    Ok(())
}

/// Resolve a skill's declared inputs for one context binding.
fn resolve_inputs(
    skill: &SkillDefinition,
    binding: &str,
    enriched: &EnrichedDocument,
    warnings: &mut Vec<String>,
) -> HashMap<String, Value> {
    let mut inputs = HashMap::new();
    for input in &skill.inputs {
        let Some(source) = input.source.as_deref() else {
            warnings.push(format!(
                "skill '{}' input '{}' declares no source",
                skill.display_name(),
                input.name
            ));
            continue;
        };
        if let Some(constant) = source.strip_prefix('=') {
            inputs.insert(input.name.clone(), parse_constant(constant));
            continue;
        }
        let path = EnrichedDocument::resolve_source(binding, source);
        match enriched.get(&path) {
            Some(value) if !value.is_null() => {
                inputs.insert(input.name.clone(), value.clone());
            }
            _ => warnings.push(format!(
                "skill '{}' input '{}' has no value at '{path}'",
                skill.display_name(),
                input.name
            )),
        }
    }
    inputs
}

/// Parse a constant-expression input (`= 'literal'`, `= 42`, `= true`).
fn parse_constant(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return Value::String(inner.to_string());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Write the declared outputs that the executor produced. Returns whether
/// anything was written.
fn write_outputs(
    skill: &SkillDefinition,
    binding: &str,
    enriched: &mut EnrichedDocument,
    produced: &HashMap<String, Value>,
    errors: &mut Vec<String>,
) -> bool {
    let mut wrote = false;
    for output in &skill.outputs {
        let Some(value) = produced.get(&output.name) else {
            continue;
        };
        let target = format!(
            "{}/{}",
            binding.trim_end_matches('/'),
            output.effective_target()
        );
        match enriched.set(&target, value.clone()) {
            Ok(()) => wrote = true,
            Err(message) => errors.push(format!("cannot write output '{target}': {message}")),
        }
    }
    wrote
}

async fn execute_one(
    kind: ExecutorKind,
    skill: &SkillDefinition,
    inputs: &HashMap<String, Value>,
    ctx: &SkillExecutionContext,
) -> Result<ExecOutput, String> {
    match kind {
        ExecutorKind::Split => Ok(split_skill(skill, inputs)),
        ExecutorKind::Merge => Ok(merge_skill(skill, inputs)),
        ExecutorKind::Shaper => Ok(shaper_skill(inputs)),
        ExecutorKind::Conditional => Ok(conditional_skill(inputs)),
        ExecutorKind::DocumentExtraction => {
            tokio::time::timeout(ctx.skill_timeout, extraction_skill(skill, inputs, ctx))
                .await
                .map_err(|_| "document extraction timed out".to_string())?
        }
        ExecutorKind::Embedding => {
            tokio::time::timeout(ctx.skill_timeout, remote::run_embedding(skill, inputs, ctx))
                .await
                .map_err(|_| "embedding call timed out".to_string())?
        }
        ExecutorKind::WebApi => unreachable!("web-API skills batch at the caller"),
    }
}

// ── Pure executors ──────────────────────────────────────────────────────────

/// Split text into pages (bounded chunks at word boundaries) or sentences.
fn split_skill(skill: &SkillDefinition, inputs: &HashMap<String, Value>) -> ExecOutput {
    let Some(text) = inputs.get("text").and_then(Value::as_str) else {
        return ExecOutput {
            outputs: HashMap::new(),
            warnings: Vec::new(),
        };
    };
    let mode = skill.param_str("textSplitMode").unwrap_or("pages");
    #[allow(clippy::cast_possible_truncation)]
    let max_length = skill.param_u64("maximumPageLength").unwrap_or(4000).max(1) as usize;

    let items: Vec<String> = if mode.eq_ignore_ascii_case("sentences") {
        split_sentences(text)
    } else {
        split_pages(text, max_length)
    };

    let mut outputs = HashMap::new();
    outputs.insert(
        "textItems".to_string(),
        Value::Array(items.into_iter().map(Value::String).collect()),
    );
    ExecOutput {
        outputs,
        warnings: Vec::new(),
    }
}

fn split_pages(text: &str, max_length: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    for word in text.split_inclusive(char::is_whitespace) {
        if !current.is_empty() && current.len() + word.len() > max_length {
            pages.push(std::mem::take(&mut current).trim_end().to_string());
        }
        current.push_str(word);
    }
    if !current.trim().is_empty() {
        pages.push(current.trim_end().to_string());
    }
    pages
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Concatenate text with inserted items, at declared offsets or appended.
fn merge_skill(skill: &SkillDefinition, inputs: &HashMap<String, Value>) -> ExecOutput {
    let text = inputs
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let items: Vec<String> = inputs
        .get("itemsToInsert")
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let offsets: Vec<usize> = inputs
        .get("offsets")
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|offset| usize::try_from(offset).ok())
                .collect()
        })
        .unwrap_or_default();
    let pre = skill.param_str("insertPreTag").unwrap_or(" ").to_string();
    let post = skill.param_str("insertPostTag").unwrap_or(" ").to_string();

    let merged = if offsets.len() == items.len() && !offsets.is_empty() {
        let mut merged = text;
        let mut pairs: Vec<(usize, &String)> = offsets.iter().copied().zip(items.iter()).collect();
        // Apply highest offset first so earlier offsets stay valid.
        pairs.sort_by(|a, b| b.0.cmp(&a.0));
        for (offset, item) in pairs {
            let at = offset.min(merged.len());
            let at = snap_char_boundary(&merged, at);
            merged.insert_str(at, &format!("{pre}{item}{post}"));
        }
        merged
    } else {
        let mut merged = text;
        for item in &items {
            merged.push_str(&pre);
            merged.push_str(item);
            merged.push_str(&post);
        }
        merged
    };

    let mut outputs = HashMap::new();
    outputs.insert("mergedText".to_string(), Value::String(merged));
    ExecOutput {
        outputs,
        warnings: Vec::new(),
    }
}

fn snap_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Build an object literal from the named inputs.
fn shaper_skill(inputs: &HashMap<String, Value>) -> ExecOutput {
    let mut object = Map::new();
    let mut names: Vec<&String> = inputs.keys().collect();
    names.sort();
    for name in names {
        object.insert(name.clone(), inputs[name].clone());
    }
    let mut outputs = HashMap::new();
    outputs.insert("output".to_string(), Value::Object(object));
    ExecOutput {
        outputs,
        warnings: Vec::new(),
    }
}

/// Return `whenTrue` or `whenFalse` depending on the condition's truthiness.
fn conditional_skill(inputs: &HashMap<String, Value>) -> ExecOutput {
    let truthy = inputs.get("condition").is_some_and(|condition| match condition {
        Value::Bool(flag) => *flag,
        Value::Null => false,
        Value::String(text) => !text.is_empty() && !text.eq_ignore_ascii_case("false"),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    });
    let branch = if truthy { "whenTrue" } else { "whenFalse" };
    let mut outputs = HashMap::new();
    if let Some(value) = inputs.get(branch) {
        outputs.insert("output".to_string(), value.clone());
    }
    ExecOutput {
        outputs,
        warnings: Vec::new(),
    }
}

/// Decode a file payload, detect its content type, and crack it.
async fn extraction_skill(
    skill: &SkillDefinition,
    inputs: &HashMap<String, Value>,
    ctx: &SkillExecutionContext,
) -> Result<ExecOutput, String> {
    let Some(file_data) = inputs.get("file_data") else {
        return Ok(ExecOutput {
            outputs: HashMap::new(),
            warnings: vec!["document extraction received no file_data".to_string()],
        });
    };

    let bytes: Vec<u8> = if let Some(data) = file_data["data"].as_str() {
        BASE64
            .decode(data)
            .map_err(|e| format!("file_data.data is not valid base64: {e}"))?
    } else if let Some(url) = file_data["url"].as_str() {
        let response = ctx
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("file_data.url fetch failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("file_data.url fetch returned {}", response.status()));
        }
        response
            .bytes()
            .await
            .map_err(|e| format!("file_data.url body read failed: {e}"))?
            .to_vec()
    } else {
        return Err("file_data carries neither data nor url".to_string());
    };

    let content_type = extraction::detect_content_type(&bytes);
    let parsing_mode = skill.param_str("parsingMode").unwrap_or("default");
    let data_to_extract = skill
        .param_str("dataToExtract")
        .unwrap_or("contentAndMetadata");

    let mut warnings = Vec::new();
    let content = if data_to_extract.eq_ignore_ascii_case("allMetadata")
        || data_to_extract.eq_ignore_ascii_case("storageMetadata")
    {
        String::new()
    } else if parsing_mode.eq_ignore_ascii_case("text") {
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        let cracked = extraction::crack_text(content_type, &bytes, ctx.binary_cracker.as_ref());
        warnings.extend(cracked.warnings);
        cracked.text
    };

    // Image handling is gated on imageAction.
    let image_action = skill
        .parameters
        .get("configuration")
        .and_then(|configuration| configuration["imageAction"].as_str())
        .or_else(|| skill.param_str("imageAction"))
        .unwrap_or("none");
    let images: Vec<Value> = if image_action.eq_ignore_ascii_case("generateNormalizedImages") {
        let max_width = skill
            .parameters
            .get("configuration")
            .and_then(|configuration| configuration["normalizedImageMaxWidth"].as_u64())
            .map_or(extraction::DEFAULT_MAX_IMAGE_EDGE, |w| w.min(u64::from(u32::MAX)) as u32);
        let max_height = skill
            .parameters
            .get("configuration")
            .and_then(|configuration| configuration["normalizedImageMaxHeight"].as_u64())
            .map_or(extraction::DEFAULT_MAX_IMAGE_EDGE, |h| h.min(u64::from(u32::MAX)) as u32);
        extraction::normalized_image(content_type, &bytes, max_width, max_height, 0)
            .into_iter()
            .collect()
    } else {
        Vec::new()
    };

    let mut outputs = HashMap::new();
    outputs.insert("content".to_string(), Value::String(content));
    outputs.insert("normalized_images".to_string(), Value::Array(images));
    outputs.insert("contentType".to_string(), json!(content_type));
    Ok(ExecOutput { outputs, warnings })
}
