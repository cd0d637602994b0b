//! Order-preserving document model.
//!
//! Documents are JSON objects validated and coerced against the index schema
//! at write time. Field order is preserved end-to-end (the `preserve_order`
//! feature of `serde_json`) because result property order is observable
//! through serialization.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{SimulatorError, SimulatorResult};
use crate::schema::{Field, FieldType, IndexSchema};

/// A document: an order-preserving mapping from field name to JSON value.
pub type Document = Map<String, Value>;

/// Allowed document-key characters.
static KEY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-=]+$").expect("key class regex"));

/// Validate a document key against the allowed character class.
///
/// Any character outside `[A-Za-z0-9_\-=]` (or an empty key) yields
/// [`SimulatorError::InvalidDocumentKey`].
pub fn validate_key(key: &str) -> SimulatorResult<()> {
    if KEY_CLASS.is_match(key) {
        Ok(())
    } else {
        Err(SimulatorError::InvalidDocumentKey(format!(
            "key '{key}' contains characters outside [A-Za-z0-9_\\-=]"
        )))
    }
}

/// Extract and validate the key value of a document under the given schema.
pub fn extract_key(schema: &IndexSchema, document: &Document) -> SimulatorResult<String> {
    let key_field = schema
        .key_field()
        .ok_or_else(|| SimulatorError::Validation(format!("index '{}' has no key field", schema.name)))?;
    let value = document.get(&key_field.name).ok_or_else(|| {
        SimulatorError::Validation(format!(
            "document is missing key field '{}'",
            key_field.name
        ))
    })?;
    let key = value.as_str().ok_or_else(|| {
        SimulatorError::Validation(format!(
            "key field '{}' must be a string",
            key_field.name
        ))
    })?;
    validate_key(key)?;
    Ok(key.to_string())
}

/// Coerce a raw JSON value to the declared type of `field`.
///
/// Returns the coerced value, or a description of the mismatch. Null is
/// accepted for any non-key field.
pub fn coerce_value(field: &Field, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        if field.key {
            return Err(format!("key field '{}' cannot be null", field.name));
        }
        return Ok(Value::Null);
    }
    coerce_typed(&field.name, &field.field_type, value)
}

fn coerce_typed(name: &str, field_type: &FieldType, value: &Value) -> Result<Value, String> {
    match field_type {
        FieldType::String => value
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| format!("field '{name}' expects a string, got {value}")),
        FieldType::Boolean => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| format!("field '{name}' expects a boolean, got {value}")),
        FieldType::Int32 => {
            let n = value
                .as_i64()
                .ok_or_else(|| format!("field '{name}' expects an int32, got {value}"))?;
            i32::try_from(n)
                .map(|v| Value::from(i64::from(v)))
                .map_err(|_| format!("field '{name}' value {n} overflows int32"))
        }
        FieldType::Int64 => value
            .as_i64()
            .map(Value::from)
            .ok_or_else(|| format!("field '{name}' expects an int64, got {value}")),
        FieldType::Double | FieldType::Single => value
            .as_f64()
            .map(|f| {
                serde_json::Number::from_f64(f)
                    .map_or(Value::Null, Value::Number)
            })
            .ok_or_else(|| format!("field '{name}' expects a number, got {value}")),
        FieldType::DateTimeOffset => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("field '{name}' expects an ISO-8601 date string"))?;
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|_| Value::String(s.to_string()))
                .map_err(|e| format!("field '{name}' has invalid date '{s}': {e}"))
        }
        FieldType::GeographyPoint => {
            crate::geo::GeoPoint::from_value(value)
                .map(|_| value.clone())
                .ok_or_else(|| format!("field '{name}' expects a geography point, got {value}"))
        }
        FieldType::Collection(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("field '{name}' expects an array, got {value}"))?;
            let mut coerced = Vec::with_capacity(items.len());
            for item in items {
                coerced.push(coerce_typed(name, inner, item)?);
            }
            // Vector payloads additionally reject non-finite components.
            if **inner == FieldType::Single {
                for item in &coerced {
                    match item.as_f64() {
                        Some(f) if f.is_finite() => {}
                        _ => {
                            return Err(format!(
                                "vector field '{name}' contains a non-finite component"
                            ));
                        }
                    }
                }
            }
            Ok(Value::Array(coerced))
        }
    }
}

/// Coerce an entire document against the schema. Unknown fields are rejected;
/// missing fields are left absent (the store treats absent as null).
pub fn coerce_document(schema: &IndexSchema, document: &Document) -> Result<Document, String> {
    let mut out = Map::with_capacity(document.len());
    for (name, value) in document {
        let field = schema
            .field(name)
            .ok_or_else(|| format!("unknown field '{name}' for index '{}'", schema.name))?;
        out.insert(name.clone(), coerce_value(field, value)?);
    }
    Ok(out)
}

/// Read the float components of a vector-field value.
#[must_use]
pub fn vector_components(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        #[allow(clippy::cast_possible_truncation)]
        out.push(item.as_f64()? as f32);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> IndexSchema {
        IndexSchema::new(
            "docs",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("count", FieldType::Int32),
                Field::new("when", FieldType::DateTimeOffset),
                Field::new("tags", FieldType::Collection(Box::new(FieldType::String))),
            ],
        )
    }

    #[test]
    fn valid_keys() {
        for key in ["a", "A-1", "x_y=z", "0042", "=="] {
            validate_key(key).expect(key);
        }
    }

    #[test]
    fn invalid_keys() {
        for key in ["", "a b", "x/y", "ünïcode", "semi;colon", "dot."] {
            assert!(validate_key(key).is_err(), "key {key:?} should be rejected");
        }
    }

    #[test]
    fn extract_key_happy_path() {
        let mut doc = Document::new();
        doc.insert("id".into(), json!("doc-1"));
        assert_eq!(extract_key(&schema(), &doc).unwrap(), "doc-1");
    }

    #[test]
    fn extract_key_missing_field() {
        let doc = Document::new();
        assert!(extract_key(&schema(), &doc).is_err());
    }

    #[test]
    fn coerce_rejects_type_mismatch() {
        let s = schema();
        let field = s.field("count").unwrap();
        assert!(coerce_value(field, &json!("ten")).is_err());
        assert!(coerce_value(field, &json!(10)).is_ok());
        assert!(coerce_value(field, &json!(i64::MAX)).is_err());
    }

    #[test]
    fn coerce_validates_dates() {
        let s = schema();
        let field = s.field("when").unwrap();
        assert!(coerce_value(field, &json!("2024-05-01T10:30:00+00:00")).is_ok());
        assert!(coerce_value(field, &json!("yesterday")).is_err());
    }

    #[test]
    fn coerce_collection_items() {
        let s = schema();
        let field = s.field("tags").unwrap();
        assert!(coerce_value(field, &json!(["a", "b"])).is_ok());
        assert!(coerce_value(field, &json!(["a", 3])).is_err());
        assert!(coerce_value(field, &json!("a")).is_err());
    }

    #[test]
    fn vector_rejects_nan() {
        let field = Field::new("vec", FieldType::String).vector(2, "p");
        let nan = Value::Array(vec![json!(1.0), Value::Null]);
        assert!(coerce_value(&field, &nan).is_err());
    }

    #[test]
    fn unknown_field_rejected() {
        let mut doc = Document::new();
        doc.insert("id".into(), json!("a"));
        doc.insert("mystery".into(), json!(1));
        assert!(coerce_document(&schema(), &doc).is_err());
    }

    proptest! {
        #[test]
        fn key_class_matches_spec(key in "[A-Za-z0-9_=-]{1,64}") {
            prop_assert!(validate_key(&key).is_ok());
        }

        #[test]
        fn keys_with_outside_chars_rejected(
            prefix in "[A-Za-z0-9_=-]{0,8}",
            bad in "[ /.:;!@#$%^&*()+]",
            suffix in "[A-Za-z0-9_=-]{0,8}",
        ) {
            let key = format!("{prefix}{bad}{suffix}");
            prop_assert!(validate_key(&key).is_err());
        }
    }
}
