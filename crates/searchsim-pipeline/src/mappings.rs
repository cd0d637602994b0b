//! Field mappings and mapping functions.
//!
//! An indexer copies cracked source fields (and, for output field mappings,
//! `/document/...` enrichment paths) into index fields, optionally through a
//! mapping function: `base64Encode`, `base64Decode`, `urlEncode`,
//! `urlDecode`, or `extractTokenAtPosition(delimiter, position)`.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE_NO_PAD, URL_SAFE};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::Value;

use searchsim_core::indexer::MappingFunction;

/// Apply a mapping function to a value. Non-string inputs pass through
/// unchanged for encode-style functions and fail for token extraction.
pub fn apply_function(function: &MappingFunction, value: &Value) -> Result<Value, String> {
    let name = function.name.as_str();
    match name {
        "base64Encode" => with_string(value, |s| {
            Ok(URL_SAFE_NO_PAD.encode(s.as_bytes()))
        }),
        "base64Decode" => with_string(value, |s| {
            decode_base64(s)
                .and_then(|bytes| {
                    String::from_utf8(bytes).map_err(|_| "decoded bytes are not UTF-8".to_string())
                })
        }),
        "urlEncode" => with_string(value, |s| {
            Ok(utf8_percent_encode(s, NON_ALPHANUMERIC).to_string())
        }),
        "urlDecode" => with_string(value, |s| {
            percent_decode_str(s)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| "percent-decoded bytes are not UTF-8".to_string())
        }),
        "extractTokenAtPosition" => {
            let delimiter = function
                .parameters
                .get("delimiter")
                .and_then(Value::as_str)
                .ok_or_else(|| "extractTokenAtPosition requires a delimiter".to_string())?;
            let position = function
                .parameters
                .get("position")
                .and_then(Value::as_u64)
                .ok_or_else(|| "extractTokenAtPosition requires a position".to_string())?;
            with_string(value, |s| {
                s.split(delimiter)
                    .nth(usize::try_from(position).map_err(|_| "position overflow".to_string())?)
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        format!("no token at position {position} splitting on '{delimiter}'")
                    })
            })
        }
        other => Err(format!("unknown mapping function '{other}'")),
    }
}

/// Base64 decoding accepts both padded standard and URL-safe unpadded forms.
fn decode_base64(input: &str) -> Result<Vec<u8>, String> {
    URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| URL_SAFE.decode(input))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(input))
        .map_err(|e| format!("invalid base64: {e}"))
}

fn with_string(
    value: &Value,
    transform: impl FnOnce(&str) -> Result<String, String>,
) -> Result<Value, String> {
    match value {
        Value::String(s) => transform(s).map(Value::String),
        Value::Null => Ok(Value::Null),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn function(name: &str, parameters: Value) -> MappingFunction {
        MappingFunction {
            name: name.to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn base64_round_trip() {
        let encode = function("base64Encode", json!({}));
        let decode = function("base64Decode", json!({}));
        let encoded = apply_function(&encode, &json!("document key with spaces!")).unwrap();
        let decoded = apply_function(&decode, &encoded).unwrap();
        assert_eq!(decoded, json!("document key with spaces!"));
    }

    #[test]
    fn base64_encoded_keys_are_key_safe() {
        let encode = function("base64Encode", json!({}));
        let encoded = apply_function(&encode, &json!("path/to/doc.pdf?v=1")).unwrap();
        searchsim_core::document::validate_key(encoded.as_str().unwrap())
            .expect("encoded keys stay inside the allowed class");
    }

    #[test]
    fn url_encode_and_decode() {
        let encode = function("urlEncode", json!({}));
        let decode = function("urlDecode", json!({}));
        let encoded = apply_function(&encode, &json!("a b/c")).unwrap();
        assert_eq!(encoded, json!("a%20b%2Fc"));
        assert_eq!(apply_function(&decode, &encoded).unwrap(), json!("a b/c"));
    }

    #[test]
    fn extract_token_at_position() {
        let f = function(
            "extractTokenAtPosition",
            json!({"delimiter": "/", "position": 2}),
        );
        let value = apply_function(&f, &json!("container/folder/file.txt")).unwrap();
        assert_eq!(value, json!("file.txt"));

        let out_of_range = function(
            "extractTokenAtPosition",
            json!({"delimiter": "/", "position": 9}),
        );
        assert!(apply_function(&out_of_range, &json!("a/b")).is_err());
    }

    #[test]
    fn unknown_function_fails() {
        let f = function("rot13", json!({}));
        assert!(apply_function(&f, &json!("x")).is_err());
    }

    #[test]
    fn null_passes_through() {
        let f = function("base64Encode", json!({}));
        assert_eq!(apply_function(&f, &Value::Null).unwrap(), Value::Null);
    }

    proptest! {
        #[test]
        fn base64_identity_on_arbitrary_strings(input in ".{0,200}") {
            let encode = function("base64Encode", json!({}));
            let decode = function("base64Decode", json!({}));
            let encoded = apply_function(&encode, &json!(input.clone())).unwrap();
            let decoded = apply_function(&decode, &encoded).unwrap();
            prop_assert_eq!(decoded, json!(input));
        }
    }
}
