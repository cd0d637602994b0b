//! Orderby clause parsing and comparison.
//!
//! A comma-separated list of `field asc|desc` clauses; `search.score() desc`
//! sorts on the current relevance score. Null values sort last ascending and
//! first descending. Remaining ties break by document key ascending.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::Value;

use searchsim_core::document::Document;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::schema::IndexSchema;

use crate::analysis::AnalysisRegistry;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending (default).
    #[default]
    Ascending,
    /// Descending.
    Descending,
}

/// One orderby clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderByClause {
    /// Sort on a field value.
    Field {
        /// Field name.
        name: String,
        /// Direction.
        direction: SortDirection,
    },
    /// Sort on the relevance score (`search.score()`).
    Score {
        /// Direction.
        direction: SortDirection,
    },
}

/// Parse an orderby string into clauses. Sortability is validated against the
/// schema.
pub fn parse(orderby: &str, schema: &IndexSchema) -> SimulatorResult<Vec<OrderByClause>> {
    let mut clauses = Vec::new();
    for part in orderby.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut words = part.split_whitespace();
        let target = words
            .next()
            .ok_or_else(|| SimulatorError::Validation("empty orderby clause".into()))?;
        let direction = match words.next() {
            None => SortDirection::Ascending,
            Some(word) if word.eq_ignore_ascii_case("asc") => SortDirection::Ascending,
            Some(word) if word.eq_ignore_ascii_case("desc") => SortDirection::Descending,
            Some(other) => {
                return Err(SimulatorError::Validation(format!(
                    "invalid sort direction '{other}' in orderby"
                )));
            }
        };
        if words.next().is_some() {
            return Err(SimulatorError::Validation(format!(
                "malformed orderby clause '{part}'"
            )));
        }

        if target.eq_ignore_ascii_case("search.score()") {
            clauses.push(OrderByClause::Score { direction });
            continue;
        }

        let field = schema.field(target).ok_or_else(|| {
            SimulatorError::Validation(format!("unknown orderby field '{target}'"))
        })?;
        if !field.sortable {
            return Err(SimulatorError::Validation(format!(
                "field '{target}' is not sortable"
            )));
        }
        clauses.push(OrderByClause::Field {
            name: target.to_string(),
            direction,
        });
    }
    Ok(clauses)
}

/// A sortable projection of one result row.
pub struct SortableRow<'a> {
    /// Document key (final tiebreak).
    pub key: &'a str,
    /// Relevance score.
    pub score: f64,
    /// Document payload.
    pub document: &'a Document,
}

/// Compare two rows under the clause list. Falls back to score descending
/// when no clauses are given, then key ascending.
#[must_use]
pub fn compare_rows(
    clauses: &[OrderByClause],
    schema: &IndexSchema,
    registry: &AnalysisRegistry,
    a: &SortableRow<'_>,
    b: &SortableRow<'_>,
) -> Ordering {
    if clauses.is_empty() {
        return b
            .score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(b.key));
    }

    for clause in clauses {
        let ordering = match clause {
            OrderByClause::Score { direction } => {
                let natural = a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal);
                apply_direction(natural, *direction)
            }
            OrderByClause::Field { name, direction } => {
                let left = sort_key(schema, registry, name, a.document);
                let right = sort_key(schema, registry, name, b.document);
                compare_sort_keys(&left, &right, *direction)
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.key.cmp(b.key)
}

const fn apply_direction(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

/// A normalized sort key: comparable scalar or null.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Null,
    Bool(bool),
    Num(f64),
    Date(i64),
    Str(String),
}

fn sort_key(
    schema: &IndexSchema,
    registry: &AnalysisRegistry,
    field_name: &str,
    document: &Document,
) -> SortKey {
    let Some(value) = document.get(field_name) else {
        return SortKey::Null;
    };
    match value {
        Value::Null => SortKey::Null,
        Value::Bool(b) => SortKey::Bool(*b),
        Value::Number(n) => n.as_f64().map_or(SortKey::Null, SortKey::Num),
        Value::String(s) => {
            let field = schema.field(field_name);
            if field.is_some_and(|f| {
                f.field_type == searchsim_core::schema::FieldType::DateTimeOffset
            }) {
                if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                    return SortKey::Date(date.timestamp_millis());
                }
            }
            let normalizer = field.and_then(|f| f.normalizer.as_deref());
            SortKey::Str(registry.normalize_for_field(normalizer, s))
        }
        // Collections and objects are not sortable; treat as null.
        Value::Array(_) | Value::Object(_) => SortKey::Null,
    }
}

/// Null sorts last ascending and first descending; the direction applies only
/// to non-null comparisons.
fn compare_sort_keys(left: &SortKey, right: &SortKey, direction: SortDirection) -> Ordering {
    match (left, right) {
        (SortKey::Null, SortKey::Null) => Ordering::Equal,
        (SortKey::Null, _) => match direction {
            SortDirection::Ascending => Ordering::Greater,
            SortDirection::Descending => Ordering::Less,
        },
        (_, SortKey::Null) => match direction {
            SortDirection::Ascending => Ordering::Less,
            SortDirection::Descending => Ordering::Greater,
        },
        (SortKey::Bool(a), SortKey::Bool(b)) => apply_direction(a.cmp(b), direction),
        (SortKey::Num(a), SortKey::Num(b)) => {
            apply_direction(a.partial_cmp(b).unwrap_or(Ordering::Equal), direction)
        }
        (SortKey::Date(a), SortKey::Date(b)) => apply_direction(a.cmp(b), direction),
        (SortKey::Str(a), SortKey::Str(b)) => apply_direction(a.cmp(b), direction),
        // Heterogeneous keys: keep a stable but arbitrary order.
        _ => Ordering::Equal,
    }
}
