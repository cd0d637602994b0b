//! Facet-spec grammar and aggregation.
//!
//! A facet spec is `fieldName[,count:N][,interval:I][,values:v1|v2|...]`
//! `[,sort:count|-count|value|-value]`. Facets aggregate over the matched
//! document set before paging. Value facets default to the top 10 buckets
//! sorted by `-count` (descending count, ties by value ascending).
//!
//! Date `interval:` rule: numeric interval values below 32 are bucket widths
//! in days; anything larger is a width in seconds.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, TimeZone};
use serde_json::{Value, json};

use searchsim_core::document::Document;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::schema::{FieldType, IndexSchema};

use crate::analysis::AnalysisRegistry;

/// Bucket ordering for facet results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacetSort {
    /// Count descending (default), ties by value ascending.
    #[default]
    CountDescending,
    /// Count ascending.
    CountAscending,
    /// Value ascending.
    ValueAscending,
    /// Value descending.
    ValueDescending,
}

/// A parsed facet specification.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetSpec {
    /// Target field.
    pub field: String,
    /// Maximum buckets returned for value facets.
    pub count: usize,
    /// Interval width for numeric/date bucketing.
    pub interval: Option<f64>,
    /// Explicit break points.
    pub values: Vec<String>,
    /// Bucket ordering.
    pub sort: FacetSort,
}

/// Parse one facet spec and validate the target field is facetable.
pub fn parse_spec(spec: &str, schema: &IndexSchema) -> SimulatorResult<FacetSpec> {
    let mut parts = spec.split(',');
    let field_name = parts
        .next()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| SimulatorError::Validation("empty facet spec".into()))?;

    let field = schema.field(field_name).ok_or_else(|| {
        SimulatorError::Validation(format!("unknown facet field '{field_name}'"))
    })?;
    if !field.facetable {
        return Err(SimulatorError::Validation(format!(
            "field '{field_name}' is not facetable"
        )));
    }

    let mut parsed = FacetSpec {
        field: field_name.to_string(),
        count: 10,
        interval: None,
        values: Vec::new(),
        sort: FacetSort::default(),
    };

    for part in parts {
        let part = part.trim();
        let Some((key, value)) = part.split_once(':') else {
            return Err(SimulatorError::Validation(format!(
                "malformed facet option '{part}' in spec '{spec}'"
            )));
        };
        match key.trim() {
            "count" => {
                parsed.count = value.trim().parse().map_err(|_| {
                    SimulatorError::Validation(format!("invalid facet count '{value}'"))
                })?;
            }
            "interval" => {
                let interval: f64 = value.trim().parse().map_err(|_| {
                    SimulatorError::Validation(format!("invalid facet interval '{value}'"))
                })?;
                if interval <= 0.0 {
                    return Err(SimulatorError::Validation(
                        "facet interval must be positive".into(),
                    ));
                }
                parsed.interval = Some(interval);
            }
            "values" => {
                parsed.values = value.split('|').map(|v| v.trim().to_string()).collect();
            }
            "sort" => {
                parsed.sort = match value.trim() {
                    "count" => FacetSort::CountAscending,
                    "-count" => FacetSort::CountDescending,
                    "value" => FacetSort::ValueAscending,
                    "-value" => FacetSort::ValueDescending,
                    other => {
                        return Err(SimulatorError::Validation(format!(
                            "invalid facet sort '{other}'"
                        )));
                    }
                };
            }
            other => {
                return Err(SimulatorError::Validation(format!(
                    "unknown facet option '{other}'"
                )));
            }
        }
    }
    Ok(parsed)
}

/// A facet bucket key that sorts naturally.
#[derive(Debug, Clone, PartialEq)]
enum BucketKey {
    Bool(bool),
    Num(f64),
    Str(String),
    Date(DateTime<FixedOffset>),
    /// Range bucket from explicit break points.
    Range(Option<f64>, Option<f64>),
}

impl BucketKey {
    fn order(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Num(a), Self::Num(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Range(a, _), Self::Range(b, _)) => a
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&b.unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        }
    }

    fn render(&self, count: u64) -> Value {
        match self {
            Self::Bool(b) => json!({"value": b, "count": count}),
            Self::Num(n) => json!({"value": n, "count": count}),
            Self::Str(s) => json!({"value": s, "count": count}),
            Self::Date(d) => json!({"value": d.to_rfc3339(), "count": count}),
            Self::Range(from, to) => {
                let mut bucket = serde_json::Map::new();
                if let Some(from) = from {
                    bucket.insert("from".into(), json!(from));
                }
                if let Some(to) = to {
                    bucket.insert("to".into(), json!(to));
                }
                bucket.insert("count".into(), json!(count));
                Value::Object(bucket)
            }
        }
    }
}

/// Compute the buckets of one facet over the matched documents. String
/// values pass through the field's normalizer before aggregation.
pub fn compute<'a>(
    spec: &FacetSpec,
    schema: &IndexSchema,
    registry: &AnalysisRegistry,
    matched: impl Iterator<Item = &'a Document>,
) -> SimulatorResult<Vec<Value>> {
    let field = schema
        .field(&spec.field)
        .ok_or_else(|| SimulatorError::Validation(format!("unknown field '{}'", spec.field)))?;
    let normalizer = field.normalizer.as_deref();
    let is_date = field.field_type == FieldType::DateTimeOffset
        || matches!(&field.field_type, FieldType::Collection(inner) if **inner == FieldType::DateTimeOffset);

    // Explicit break points take precedence over interval bucketing.
    let breakpoints: Vec<f64> = if spec.values.is_empty() {
        Vec::new()
    } else {
        let mut points = Vec::with_capacity(spec.values.len());
        for raw in &spec.values {
            let point = if is_date {
                DateTime::parse_from_rfc3339(raw)
                    .map(|d| millis_f64(d.timestamp_millis()))
                    .map_err(|_| {
                        SimulatorError::Validation(format!("invalid facet break point '{raw}'"))
                    })?
            } else {
                raw.parse().map_err(|_| {
                    SimulatorError::Validation(format!("invalid facet break point '{raw}'"))
                })?
            };
            points.push(point);
        }
        points
    };

    let mut buckets: Vec<(BucketKey, u64)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    let mut record = |key: BucketKey| {
        let tag = format!("{key:?}");
        if let Some(&idx) = positions.get(&tag) {
            buckets[idx].1 += 1;
        } else {
            positions.insert(tag, buckets.len());
            buckets.push((key, 1));
        }
    };

    for document in matched {
        let Some(value) = document.get(&spec.field) else {
            continue;
        };
        let scalars: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Null => continue,
            other => vec![other],
        };
        for scalar in scalars {
            if !breakpoints.is_empty() {
                if let Some(numeric) = scalar_numeric(scalar, is_date) {
                    record(range_bucket(&breakpoints, numeric));
                }
                continue;
            }
            if let Some(interval) = spec.interval {
                if is_date {
                    if let Some(date) = scalar
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    {
                        record(BucketKey::Date(date_bucket(date, interval)));
                    }
                } else if let Some(numeric) = scalar.as_f64() {
                    let start = (numeric / interval).floor() * interval;
                    record(BucketKey::Num(start));
                }
                continue;
            }
            match scalar {
                Value::Bool(b) => record(BucketKey::Bool(*b)),
                Value::Number(n) => {
                    if let Some(f) = n.as_f64() {
                        record(BucketKey::Num(f));
                    }
                }
                Value::String(s) => {
                    record(BucketKey::Str(registry.normalize_for_field(normalizer, s)));
                }
                _ => {}
            }
        }
    }

    buckets.sort_by(|a, b| match spec.sort {
        FacetSort::CountDescending => b.1.cmp(&a.1).then_with(|| a.0.order(&b.0)),
        FacetSort::CountAscending => a.1.cmp(&b.1).then_with(|| a.0.order(&b.0)),
        FacetSort::ValueAscending => a.0.order(&b.0),
        FacetSort::ValueDescending => b.0.order(&a.0),
    });

    // The bucket cap applies to value facets; interval and range facets
    // return every populated bucket.
    let capped: Vec<(BucketKey, u64)> = if spec.interval.is_none() && breakpoints.is_empty() {
        buckets.into_iter().take(spec.count).collect()
    } else {
        buckets
    };

    Ok(capped
        .into_iter()
        .map(|(key, count)| key.render(count))
        .collect())
}

#[allow(clippy::cast_precision_loss)]
const fn millis_f64(millis: i64) -> f64 {
    millis as f64
}

fn scalar_numeric(value: &Value, is_date: bool) -> Option<f64> {
    if is_date {
        value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| millis_f64(d.timestamp_millis()))
    } else {
        value.as_f64()
    }
}

fn range_bucket(breakpoints: &[f64], value: f64) -> BucketKey {
    let mut lower: Option<f64> = None;
    for &point in breakpoints {
        if value < point {
            return BucketKey::Range(lower, Some(point));
        }
        lower = Some(point);
    }
    BucketKey::Range(lower, None)
}

/// Bucket a date by the interval rule: values below 32 are day widths,
/// larger values are widths in seconds.
fn date_bucket(date: DateTime<FixedOffset>, interval: f64) -> DateTime<FixedOffset> {
    #[allow(clippy::cast_possible_truncation)]
    let width_secs: i64 = if interval < 32.0 {
        (interval * 86_400.0) as i64
    } else {
        interval as i64
    };
    let width = width_secs.max(1);
    let timestamp = date.timestamp();
    let start = timestamp.div_euclid(width) * width;
    date.offset().timestamp_opt(start, 0).single().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsim_core::schema::Field;
    use serde_json::json;

    fn schema() -> IndexSchema {
        IndexSchema::new(
            "hotels",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("category", FieldType::String).facetable(),
                Field::new("rating", FieldType::Double).facetable(),
                Field::new("opened", FieldType::DateTimeOffset).facetable(),
                Field::new("tags", FieldType::Collection(Box::new(FieldType::String))).facetable(),
                Field::new("title", FieldType::String),
            ],
        )
    }

    fn docs() -> Vec<Document> {
        let raw = vec![
            json!({"id": "1", "category": "luxury", "rating": 4.5, "tags": ["wifi", "pool"]}),
            json!({"id": "2", "category": "luxury", "rating": 3.2, "tags": ["wifi"]}),
            json!({"id": "3", "category": "budget", "rating": 8.9, "tags": []}),
            json!({"id": "4", "rating": 1.1}),
        ];
        raw.into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn run(spec: &str) -> Vec<Value> {
        let schema = schema();
        let registry = AnalysisRegistry::default();
        let parsed = parse_spec(spec, &schema).expect("spec parses");
        compute(&parsed, &schema, &registry, docs().iter()).expect("facets compute")
    }

    #[test]
    fn value_facet_counts_and_default_sort() {
        let buckets = run("category");
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0], json!({"value": "luxury", "count": 2}));
        assert_eq!(buckets[1], json!({"value": "budget", "count": 1}));
    }

    #[test]
    fn collection_values_count_each_element() {
        let buckets = run("tags");
        assert_eq!(buckets[0], json!({"value": "wifi", "count": 2}));
        assert_eq!(buckets[1], json!({"value": "pool", "count": 1}));
    }

    #[test]
    fn count_option_limits_buckets() {
        let buckets = run("tags,count:1");
        assert_eq!(buckets.len(), 1);
    }

    #[test]
    fn interval_facet_buckets_numbers() {
        let buckets = run("rating,interval:2,sort:value");
        assert_eq!(
            buckets,
            vec![
                json!({"value": 0.0, "count": 1}),
                json!({"value": 2.0, "count": 1}),
                json!({"value": 4.0, "count": 1}),
                json!({"value": 8.0, "count": 1}),
            ]
        );
    }

    #[test]
    fn explicit_values_make_ranges() {
        let buckets = run("rating,values:2|5,sort:value");
        assert_eq!(
            buckets,
            vec![
                json!({"to": 2.0, "count": 1}),
                json!({"from": 2.0, "to": 5.0, "count": 2}),
                json!({"from": 5.0, "count": 1}),
            ]
        );
    }

    #[test]
    fn sort_variants() {
        let ascending = run("category,sort:count");
        assert_eq!(ascending[0]["value"], json!("budget"));

        let by_value_desc = run("category,sort:-value");
        assert_eq!(by_value_desc[0]["value"], json!("luxury"));
    }

    #[test]
    fn non_facetable_field_rejected() {
        let err = parse_spec("title", &schema()).unwrap_err();
        assert!(err.to_string().contains("not facetable"));
    }

    #[test]
    fn malformed_options_rejected() {
        assert!(parse_spec("category,count:x", &schema()).is_err());
        assert!(parse_spec("category,interval:-3", &schema()).is_err());
        assert!(parse_spec("category,sort:sideways", &schema()).is_err());
        assert!(parse_spec("category,bogus", &schema()).is_err());
    }

    #[test]
    fn facet_counts_never_exceed_matched_docs() {
        let buckets = run("category");
        let total: u64 = buckets
            .iter()
            .map(|b| b["count"].as_u64().unwrap())
            .sum();
        assert!(total <= docs().len() as u64);
    }

    #[test]
    fn normalizer_applies_to_string_buckets() {
        let mut schema = schema();
        schema
            .fields
            .iter_mut()
            .find(|f| f.name == "category")
            .unwrap()
            .normalizer = Some("lowercase".into());
        let registry = AnalysisRegistry::default();
        let parsed = parse_spec("category", &schema).unwrap();
        let raw = vec![
            json!({"id": "1", "category": "Luxury"}),
            json!({"id": "2", "category": "LUXURY"}),
        ];
        let documents: Vec<Document> = raw
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        let buckets = compute(&parsed, &schema, &registry, documents.iter()).unwrap();
        assert_eq!(buckets, vec![json!({"value": "luxury", "count": 2})]);
    }

    #[test]
    fn date_interval_buckets_by_day() {
        let schema = schema();
        let parsed = parse_spec("opened,interval:1,sort:value", &schema).unwrap();
        let raw = vec![
            json!({"id": "1", "opened": "2024-03-01T08:00:00+00:00"}),
            json!({"id": "2", "opened": "2024-03-01T22:10:00+00:00"}),
            json!({"id": "3", "opened": "2024-03-02T01:00:00+00:00"}),
        ];
        let documents: Vec<Document> = raw
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();
        let registry = AnalysisRegistry::default();
        let buckets = compute(&parsed, &schema, &registry, documents.iter()).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0]["count"], json!(2));
        assert_eq!(buckets[1]["count"], json!(1));
    }
}
