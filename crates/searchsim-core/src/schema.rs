//! Index schema model.
//!
//! An index is a named, ordered list of typed fields plus optional scoring
//! profiles, vector-search configuration, custom normalizers, and suggesters.
//! Validation enforces the structural invariants:
//! - exactly one key field, of string type
//! - collection fields are never sortable
//! - analyzers/normalizers only on string(-collection) fields
//! - vector fields carry a dimension count and a vector profile reference
//!
//! Schema evolution is additive only: an update may append fields but never
//! remove or retype an existing one.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SimulatorError, SimulatorResult};
use crate::scoring::ScoringProfile;

// ── Field types ─────────────────────────────────────────────────────────────

/// Logical type of an index field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE float.
    Double,
    /// Boolean.
    Boolean,
    /// Date with offset, ISO-8601 serialized.
    DateTimeOffset,
    /// Geography point (longitude/latitude).
    GeographyPoint,
    /// Single-precision float; only valid inside `Collection` for vector
    /// fields.
    Single,
    /// Homogeneous ordered collection of an inner scalar type.
    Collection(Box<FieldType>),
}

impl FieldType {
    /// Whether values of this type are stored as collections.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Whether this type is string-valued (directly or as a collection of
    /// strings).
    #[must_use]
    pub fn is_string_like(&self) -> bool {
        match self {
            Self::String => true,
            Self::Collection(inner) => **inner == Self::String,
            _ => false,
        }
    }

    /// Whether this is the vector field type `Collection(Single)`.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        match self {
            Self::Collection(inner) => **inner == Self::Single,
            _ => false,
        }
    }

    /// Whether the type is numeric (int or double).
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Double)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "boolean"),
            Self::DateTimeOffset => write!(f, "dateTimeOffset"),
            Self::GeographyPoint => write!(f, "geographyPoint"),
            Self::Single => write!(f, "single"),
            Self::Collection(inner) => write!(f, "collection({inner})"),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(rest) = trimmed
            .strip_prefix("collection(")
            .and_then(|r| r.strip_suffix(')'))
        {
            let inner = Self::from_str(rest)?;
            if inner.is_collection() {
                return Err(format!("nested collections are not supported: {s}"));
            }
            return Ok(Self::Collection(Box::new(inner)));
        }
        match trimmed {
            "string" => Ok(Self::String),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Boolean),
            "dateTimeOffset" => Ok(Self::DateTimeOffset),
            "geographyPoint" => Ok(Self::GeographyPoint),
            "single" => Ok(Self::Single),
            other => Err(format!("unknown field type: {other}")),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ── Fields ──────────────────────────────────────────────────────────────────

/// A single index field with its attribute flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Field name, unique within the index.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Exactly one field per index carries the key flag.
    #[serde(default)]
    pub key: bool,
    /// Participates in full-text search.
    #[serde(default)]
    pub searchable: bool,
    /// Usable in filter expressions.
    #[serde(default)]
    pub filterable: bool,
    /// Usable in orderby clauses.
    #[serde(default)]
    pub sortable: bool,
    /// Usable in facet specs.
    #[serde(default)]
    pub facetable: bool,
    /// Returned in results. Defaults to `true` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrievable: Option<bool>,
    /// Analyzer name for searchable string fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    /// Normalizer name applied for filter/sort/facet comparison of strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,
    /// Vector dimension count; required for vector fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    /// Vector profile reference; required for vector fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_profile: Option<String>,
}

impl Field {
    /// Create a plain field of the given type with all flags off.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            key: false,
            searchable: false,
            filterable: false,
            sortable: false,
            facetable: false,
            retrievable: None,
            analyzer: None,
            normalizer: None,
            dimensions: None,
            vector_profile: None,
        }
    }

    /// Builder: mark as the key field.
    #[must_use]
    pub const fn as_key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Builder: mark searchable.
    #[must_use]
    pub const fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Builder: mark filterable.
    #[must_use]
    pub const fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    /// Builder: mark sortable.
    #[must_use]
    pub const fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Builder: mark facetable.
    #[must_use]
    pub const fn facetable(mut self) -> Self {
        self.facetable = true;
        self
    }

    /// Builder: set the analyzer name.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// Builder: set the normalizer name.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: impl Into<String>) -> Self {
        self.normalizer = Some(normalizer.into());
        self
    }

    /// Builder: configure as a vector field.
    #[must_use]
    pub fn vector(mut self, dimensions: usize, profile: impl Into<String>) -> Self {
        self.field_type = FieldType::Collection(Box::new(FieldType::Single));
        self.dimensions = Some(dimensions);
        self.vector_profile = Some(profile.into());
        self
    }

    /// Effective retrievable flag (defaults to true).
    #[must_use]
    pub fn is_retrievable(&self) -> bool {
        self.retrievable.unwrap_or(true)
    }
}

// ── Vector search configuration ─────────────────────────────────────────────

/// Distance metric for a vector algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorMetric {
    /// Cosine similarity, scores mapped into [0, 1].
    #[default]
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Dot product.
    DotProduct,
}

/// Algorithm kind for a vector configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorAlgorithmKind {
    /// HNSW proximity graph.
    #[default]
    Hnsw,
    /// Brute-force scan.
    ExhaustiveKnn,
}

/// A named vector algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorAlgorithm {
    /// Configuration name referenced by profiles.
    pub name: String,
    /// Algorithm kind.
    #[serde(default)]
    pub kind: VectorAlgorithmKind,
    /// Distance metric.
    #[serde(default)]
    pub metric: VectorMetric,
    /// HNSW graph degree override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<usize>,
    /// HNSW construction candidate-list size override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_construction: Option<usize>,
    /// HNSW query candidate-list size override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_search: Option<usize>,
}

/// A named vector profile binding fields to an algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorProfile {
    /// Profile name referenced by vector fields.
    pub name: String,
    /// Algorithm configuration name.
    pub algorithm: String,
}

/// Vector-search configuration block of an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchConfig {
    /// Declared algorithms.
    #[serde(default)]
    pub algorithms: Vec<VectorAlgorithm>,
    /// Declared profiles.
    #[serde(default)]
    pub profiles: Vec<VectorProfile>,
}

impl VectorSearchConfig {
    /// Resolve the algorithm configuration for a profile name.
    #[must_use]
    pub fn algorithm_for_profile(&self, profile: &str) -> Option<&VectorAlgorithm> {
        let profile = self
            .profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(profile))?;
        self.algorithms
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(&profile.algorithm))
    }
}

// ── Custom analysis components ──────────────────────────────────────────────

/// A named char filter declared on the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CharFilterDefinition {
    /// Declared mappings of the form `from=>to`.
    #[serde(rename = "mapping")]
    Mapping {
        /// Filter name referenced by normalizers.
        name: String,
        /// Mapping rules, each `from=>to`.
        mappings: Vec<String>,
    },
    /// Regex + replacement. An invalid pattern passes input through
    /// unchanged.
    #[serde(rename = "patternReplace")]
    PatternReplace {
        /// Filter name referenced by normalizers.
        name: String,
        /// Regex pattern.
        pattern: String,
        /// Replacement text.
        replacement: String,
    },
}

impl CharFilterDefinition {
    /// The declared name of this filter.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Mapping { name, .. } | Self::PatternReplace { name, .. } => name,
        }
    }
}

/// A custom normalizer: ordered char filters then token filters, applied to
/// the whole value as a single token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizerDefinition {
    /// Normalizer name, matched case-insensitively from field references.
    pub name: String,
    /// Char filter names (built-in or declared in
    /// [`IndexSchema::char_filters`]).
    #[serde(default)]
    pub char_filters: Vec<String>,
    /// Token filter names.
    #[serde(default)]
    pub token_filters: Vec<String>,
}

/// A suggester over a set of source fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggesterDefinition {
    /// Suggester name.
    pub name: String,
    /// Source field names, all must be searchable strings.
    pub source_fields: Vec<String>,
}

// ── Index ───────────────────────────────────────────────────────────────────

/// A complete index definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    /// Unique index name.
    pub name: String,
    /// Ordered field list.
    pub fields: Vec<Field>,
    /// Scoring profiles declared on the index.
    #[serde(default)]
    pub scoring_profiles: Vec<ScoringProfile>,
    /// Name of the profile applied when a request names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_scoring_profile: Option<String>,
    /// Vector-search configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearchConfig>,
    /// Custom normalizers.
    #[serde(default)]
    pub normalizers: Vec<NormalizerDefinition>,
    /// Custom char filters referenced by normalizers.
    #[serde(default)]
    pub char_filters: Vec<CharFilterDefinition>,
    /// Suggesters.
    #[serde(default)]
    pub suggesters: Vec<SuggesterDefinition>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IndexSchema {
    /// Create an index with the given name and fields.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            scoring_profiles: Vec::new(),
            default_scoring_profile: None,
            vector_search: None,
            normalizers: Vec::new(),
            char_filters: Vec::new(),
            suggesters: Vec::new(),
            description: None,
        }
    }

    /// Look up a field by name (case-sensitive, matching the wire protocol).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The key field. Valid schemas have exactly one.
    #[must_use]
    pub fn key_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.key)
    }

    /// All searchable, non-vector fields.
    #[must_use]
    pub fn searchable_fields(&self) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|f| f.searchable && !f.field_type.is_vector())
            .collect()
    }

    /// All vector fields.
    #[must_use]
    pub fn vector_fields(&self) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|f| f.field_type.is_vector())
            .collect()
    }

    /// Find a scoring profile by name, case-insensitively.
    #[must_use]
    pub fn scoring_profile(&self, name: &str) -> Option<&ScoringProfile> {
        self.scoring_profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Validate the structural invariants of this schema.
    pub fn validate(&self) -> SimulatorResult<()> {
        if self.name.trim().is_empty() {
            return Err(SimulatorError::Validation("index name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(SimulatorError::Validation(format!(
                "index '{}' has no fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SimulatorError::Validation(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }

        let key_fields: Vec<&Field> = self.fields.iter().filter(|f| f.key).collect();
        match key_fields.as_slice() {
            [key] => {
                if key.field_type != FieldType::String {
                    return Err(SimulatorError::Validation(format!(
                        "key field '{}' must be of type string, got {}",
                        key.name, key.field_type
                    )));
                }
            }
            [] => {
                return Err(SimulatorError::Validation(format!(
                    "index '{}' has no key field",
                    self.name
                )));
            }
            multiple => {
                return Err(SimulatorError::Validation(format!(
                    "index '{}' has {} key fields; exactly one is required",
                    self.name,
                    multiple.len()
                )));
            }
        }

        for field in &self.fields {
            self.validate_field(field)?;
        }

        for suggester in &self.suggesters {
            for source in &suggester.source_fields {
                let field = self.field(source).ok_or_else(|| {
                    SimulatorError::Validation(format!(
                        "suggester '{}' references unknown field '{source}'",
                        suggester.name
                    ))
                })?;
                if !field.searchable || !field.field_type.is_string_like() {
                    return Err(SimulatorError::Validation(format!(
                        "suggester '{}' source field '{source}' must be a searchable string",
                        suggester.name
                    )));
                }
            }
        }

        if let Some(default) = &self.default_scoring_profile {
            if self.scoring_profile(default).is_none() {
                return Err(SimulatorError::Validation(format!(
                    "default scoring profile '{default}' is not declared on index '{}'",
                    self.name
                )));
            }
        }

        Ok(())
    }

    fn validate_field(&self, field: &Field) -> SimulatorResult<()> {
        if field.field_type.is_collection() && field.sortable {
            return Err(SimulatorError::Validation(format!(
                "collection field '{}' cannot be sortable",
                field.name
            )));
        }
        if field.field_type == FieldType::Single {
            return Err(SimulatorError::Validation(format!(
                "field '{}' of type single is only valid inside collection(single)",
                field.name
            )));
        }
        if (field.analyzer.is_some() || field.normalizer.is_some())
            && !field.field_type.is_string_like()
        {
            return Err(SimulatorError::Validation(format!(
                "field '{}' of type {} cannot declare an analyzer or normalizer",
                field.name, field.field_type
            )));
        }
        if field.field_type.is_vector() {
            if field.dimensions.is_none_or(|d| d == 0) {
                return Err(SimulatorError::Validation(format!(
                    "vector field '{}' must declare a positive dimensions count",
                    field.name
                )));
            }
            let profile = field.vector_profile.as_deref().ok_or_else(|| {
                SimulatorError::Validation(format!(
                    "vector field '{}' must reference a vector profile",
                    field.name
                ))
            })?;
            let resolved = self
                .vector_search
                .as_ref()
                .and_then(|vs| vs.algorithm_for_profile(profile));
            if resolved.is_none() {
                return Err(SimulatorError::Validation(format!(
                    "vector field '{}' references unresolvable profile '{profile}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Validate a schema update against the existing definition. Updates may
    /// append fields; removing or retyping an existing field is rejected.
    pub fn validate_update(&self, updated: &Self) -> SimulatorResult<()> {
        updated.validate()?;
        for existing in &self.fields {
            let Some(counterpart) = updated.field(&existing.name) else {
                return Err(SimulatorError::Validation(format!(
                    "field '{}' cannot be removed from index '{}'",
                    existing.name, self.name
                )));
            };
            if counterpart.field_type != existing.field_type {
                return Err(SimulatorError::Validation(format!(
                    "field '{}' cannot change type from {} to {}",
                    existing.name, existing.field_type, counterpart.field_type
                )));
            }
            if counterpart.key != existing.key {
                return Err(SimulatorError::Validation(format!(
                    "field '{}' cannot change its key flag",
                    existing.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotel_schema() -> IndexSchema {
        IndexSchema::new(
            "hotels",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("title", FieldType::String)
                    .searchable()
                    .filterable(),
                Field::new("rating", FieldType::Double).filterable().sortable(),
                Field::new("tags", FieldType::Collection(Box::new(FieldType::String)))
                    .filterable()
                    .facetable(),
            ],
        )
    }

    fn vector_schema() -> IndexSchema {
        let mut schema = IndexSchema::new(
            "vectors",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("vec", FieldType::String).vector(4, "default-profile"),
            ],
        );
        schema.vector_search = Some(VectorSearchConfig {
            algorithms: vec![VectorAlgorithm {
                name: "hnsw-config".into(),
                kind: VectorAlgorithmKind::Hnsw,
                metric: VectorMetric::Cosine,
                m: None,
                ef_construction: None,
                ef_search: None,
            }],
            profiles: vec![VectorProfile {
                name: "default-profile".into(),
                algorithm: "hnsw-config".into(),
            }],
        });
        schema
    }

    #[test]
    fn field_type_round_trip() {
        for ty in [
            FieldType::String,
            FieldType::Int32,
            FieldType::Int64,
            FieldType::Double,
            FieldType::Boolean,
            FieldType::DateTimeOffset,
            FieldType::GeographyPoint,
            FieldType::Collection(Box::new(FieldType::String)),
            FieldType::Collection(Box::new(FieldType::Single)),
        ] {
            let text = ty.to_string();
            let parsed: FieldType = text.parse().expect("parse back");
            assert_eq!(parsed, ty, "round trip through {text}");
        }
    }

    #[test]
    fn nested_collection_rejected() {
        assert!("collection(collection(string))".parse::<FieldType>().is_err());
    }

    #[test]
    fn valid_schema_passes() {
        hotel_schema().validate().expect("schema is valid");
        vector_schema().validate().expect("vector schema is valid");
    }

    #[test]
    fn missing_key_rejected() {
        let schema = IndexSchema::new("bad", vec![Field::new("title", FieldType::String)]);
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("no key field"));
    }

    #[test]
    fn non_string_key_rejected() {
        let schema = IndexSchema::new("bad", vec![Field::new("id", FieldType::Int64).as_key()]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn multiple_keys_rejected() {
        let schema = IndexSchema::new(
            "bad",
            vec![
                Field::new("a", FieldType::String).as_key(),
                Field::new("b", FieldType::String).as_key(),
            ],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn sortable_collection_rejected() {
        let schema = IndexSchema::new(
            "bad",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("tags", FieldType::Collection(Box::new(FieldType::String))).sortable(),
            ],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn analyzer_on_numeric_rejected() {
        let schema = IndexSchema::new(
            "bad",
            vec![
                Field::new("id", FieldType::String).as_key(),
                Field::new("n", FieldType::Int32).with_analyzer("standard"),
            ],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn vector_field_requires_profile() {
        let mut schema = vector_schema();
        schema.vector_search = None;
        assert!(schema.validate().is_err());
    }

    #[test]
    fn update_cannot_remove_field() {
        let original = hotel_schema();
        let mut updated = hotel_schema();
        updated.fields.retain(|f| f.name != "rating");
        assert!(original.validate_update(&updated).is_err());
    }

    #[test]
    fn update_cannot_retype_field() {
        let original = hotel_schema();
        let mut updated = hotel_schema();
        updated
            .fields
            .iter_mut()
            .find(|f| f.name == "rating")
            .unwrap()
            .field_type = FieldType::Int32;
        assert!(original.validate_update(&updated).is_err());
    }

    #[test]
    fn update_can_append_field() {
        let original = hotel_schema();
        let mut updated = hotel_schema();
        updated
            .fields
            .push(Field::new("description", FieldType::String).searchable());
        original.validate_update(&updated).expect("append is fine");
    }

    #[test]
    fn profile_lookup_is_case_insensitive() {
        let config = vector_schema();
        let vs = config.vector_search.as_ref().unwrap();
        assert!(vs.algorithm_for_profile("DEFAULT-PROFILE").is_some());
    }
}
