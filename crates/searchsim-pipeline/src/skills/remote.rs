//! Skill executors that call out over HTTP: embedding generation and the
//! custom web-API skill.
//!
//! Embedding skills post to an external endpoint unless their `resourceUri`
//! carries the `local://` scheme, which routes to the on-device model cache.
//! Empty input text produces a warning and no output; rate-limit responses
//! are warnings rather than errors. Web-API skills batch bindings into a
//! `values[]` request and map per-record `data`/`errors`/`warnings` back to
//! the declared outputs.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::debug;

use searchsim_core::indexer::SkillDefinition;

use super::{ExecOutput, SkillExecutionContext};

/// Run an embedding skill for one binding.
#[allow(clippy::cast_possible_truncation)]
pub(crate) async fn run_embedding(
    skill: &SkillDefinition,
    inputs: &HashMap<String, Value>,
    ctx: &SkillExecutionContext,
) -> Result<ExecOutput, String> {
    let text = inputs
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if text.is_empty() {
        return Ok(ExecOutput {
            outputs: HashMap::new(),
            warnings: vec!["embedding input text is empty; no output produced".to_string()],
        });
    }

    let resource_uri = skill.param_str("resourceUri").unwrap_or_default().to_string();
    let deployment = skill.param_str("deploymentId").unwrap_or_default().to_string();

    let embedding: Vec<f32> = if let Some(model_name) = resource_uri.strip_prefix("local://") {
        let effective = if model_name.is_empty() {
            deployment.as_str()
        } else {
            model_name
        };
        ctx.embed_cache.model(effective).embed(&text)
    } else {
        if resource_uri.is_empty() {
            return Err("embedding skill requires a resourceUri".to_string());
        }
        if deployment.is_empty() {
            return Err("embedding skill requires a deploymentId for remote endpoints".to_string());
        }
        let url = format!(
            "{}/openai/deployments/{}/embeddings",
            resource_uri.trim_end_matches('/'),
            deployment
        );
        let mut request = ctx.http.post(&url).json(&json!({ "input": [text] }));
        if let Some(api_key) = skill.param_str("apiKey") {
            request = request.header("api-key", api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| format!("embedding endpoint unreachable: {e}"))?;
        if response.status().as_u16() == 429 {
            return Ok(ExecOutput {
                outputs: HashMap::new(),
                warnings: vec!["embedding endpoint rate-limited the request".to_string()],
            });
        }
        if !response.status().is_success() {
            return Err(format!(
                "embedding endpoint returned status {}",
                response.status()
            ));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| format!("invalid embedding response: {e}"))?;
        payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| "embedding response carries no data[0].embedding".to_string())?
            .iter()
            .filter_map(Value::as_f64)
            .map(|component| component as f32)
            .collect()
    };

    debug!(
        skill = skill.display_name(),
        dimensions = embedding.len(),
        "embedding produced"
    );
    let mut outputs = HashMap::new();
    outputs.insert(
        "embedding".to_string(),
        Value::Array(
            embedding
                .into_iter()
                .map(|component| json!(component))
                .collect(),
        ),
    );
    Ok(ExecOutput {
        outputs,
        warnings: Vec::new(),
    })
}

/// Outcome of one record in a web-API batch.
pub(crate) struct WebApiRecord {
    /// Outputs keyed by output name, absent on failure.
    pub outputs: Option<HashMap<String, Value>>,
    /// Per-record warnings.
    pub warnings: Vec<String>,
    /// Per-record error, when the record failed.
    pub error: Option<String>,
}

/// Run a web-API skill over a batch of bindings.
///
/// Returns one [`WebApiRecord`] per input, in input order.
pub(crate) async fn run_web_api_batch(
    skill: &SkillDefinition,
    batch: &[(String, HashMap<String, Value>)],
    ctx: &SkillExecutionContext,
) -> Result<Vec<WebApiRecord>, String> {
    let uri = skill
        .param_str("uri")
        .ok_or_else(|| "web-API skill requires a uri".to_string())?
        .to_string();

    let values: Vec<Value> = batch
        .iter()
        .map(|(record_id, inputs)| {
            let data: Map<String, Value> = inputs
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            json!({ "recordId": record_id, "data": data })
        })
        .collect();

    let mut request = ctx.http.post(&uri).json(&json!({ "values": values }));
    if let Some(Value::Object(headers)) = skill.parameters.get("httpHeaders") {
        for (name, value) in headers {
            if let Some(text) = value.as_str() {
                request = request.header(name.as_str(), text);
            }
        }
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("web-API endpoint unreachable: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("web-API endpoint returned status {}", response.status()));
    }
    let payload: Value = response
        .json()
        .await
        .map_err(|e| format!("invalid web-API response: {e}"))?;
    let returned = payload["values"]
        .as_array()
        .ok_or_else(|| "web-API response carries no values[]".to_string())?;

    let mut by_record: HashMap<&str, &Value> = HashMap::new();
    for entry in returned {
        if let Some(record_id) = entry["recordId"].as_str() {
            by_record.insert(record_id, entry);
        }
    }

    Ok(batch
        .iter()
        .map(|(record_id, _)| {
            let Some(entry) = by_record.get(record_id.as_str()) else {
                return WebApiRecord {
                    outputs: None,
                    warnings: Vec::new(),
                    error: Some(format!("response is missing record '{record_id}'")),
                };
            };
            let warnings = collect_messages(&entry["warnings"]);
            let errors = collect_messages(&entry["errors"]);
            match &entry["data"] {
                Value::Object(data) => WebApiRecord {
                    outputs: Some(
                        data.iter()
                            .map(|(name, value)| (name.clone(), value.clone()))
                            .collect(),
                    ),
                    warnings,
                    error: None,
                },
                // Null/missing data with only warnings is success-with-warnings.
                _ if errors.is_empty() => WebApiRecord {
                    outputs: Some(HashMap::new()),
                    warnings,
                    error: None,
                },
                _ => WebApiRecord {
                    outputs: None,
                    warnings,
                    error: Some(errors.join("; ")),
                },
            }
        })
        .collect())
}

/// Pull `message` properties out of an errors/warnings array.
fn collect_messages(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry["message"]
                        .as_str()
                        .map(ToString::to_string)
                        .or_else(|| entry.as_str().map(ToString::to_string))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_collection() {
        let value = json!([
            {"message": "first"},
            {"message": "second"},
            "bare string",
            {"other": "ignored"}
        ]);
        assert_eq!(collect_messages(&value), vec!["first", "second", "bare string"]);
        assert!(collect_messages(&Value::Null).is_empty());
    }
}
