//! BM25 execution of the query AST over the inverted index.
//!
//! Scoring is BM25-family with per-field length normalization; per-field
//! weights multiply the field's contribution before summation across fields.
//! Phrase nodes require adjacent positions within a single field. Wildcards
//! expand against the term dictionary under a configurable cap.

use std::collections::HashMap;

use regex::Regex;

use searchsim_core::schema::IndexSchema;

use crate::analysis::AnalysisRegistry;
use crate::query::QueryNode;
use crate::text_index::{FieldPostings, TextIndex};

/// BM25 term-frequency saturation parameter.
const BM25_K1: f64 = 1.2;
/// BM25 length-normalization parameter.
const BM25_B: f64 = 0.75;

/// Result of text search execution: per-document scores plus non-fatal
/// warnings (unknown field names in qualified terms).
#[derive(Debug, Clone, Default)]
pub struct TextSearchOutcome {
    /// Document key → raw text score.
    pub scores: HashMap<String, f64>,
    /// Non-fatal warnings accumulated during execution.
    pub warnings: Vec<String>,
}

impl TextSearchOutcome {
    /// Scores sorted descending, ties broken by key ascending.
    #[must_use]
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .scores
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }
}

/// Executes query ASTs against one index's postings.
pub struct TextSearcher<'a> {
    index: &'a TextIndex,
    schema: &'a IndexSchema,
    registry: &'a AnalysisRegistry,
    /// Wildcard term expansion cap.
    pub wildcard_expansion_limit: usize,
}

impl<'a> TextSearcher<'a> {
    /// Create a searcher over an index snapshot.
    #[must_use]
    pub fn new(index: &'a TextIndex, schema: &'a IndexSchema, registry: &'a AnalysisRegistry) -> Self {
        Self {
            index,
            schema,
            registry,
            wildcard_expansion_limit: 128,
        }
    }

    /// Execute a parsed query over the searched fields.
    ///
    /// `searched_fields` defaults to every searchable field when empty;
    /// `weights` multiplies per-field contributions (unit weight when
    /// absent).
    #[must_use]
    pub fn execute(
        &self,
        node: &QueryNode,
        searched_fields: &[String],
        weights: &HashMap<String, f64>,
    ) -> TextSearchOutcome {
        let fields: Vec<String> = if searched_fields.is_empty() {
            self.schema
                .searchable_fields()
                .iter()
                .map(|f| f.name.clone())
                .collect()
        } else {
            searched_fields.to_vec()
        };
        let mut warnings = Vec::new();
        let scores = self.evaluate(node, &fields, weights, &mut warnings);
        TextSearchOutcome { scores, warnings }
    }

    fn evaluate(
        &self,
        node: &QueryNode,
        fields: &[String],
        weights: &HashMap<String, f64>,
        warnings: &mut Vec<String>,
    ) -> HashMap<String, f64> {
        match node {
            QueryNode::MatchAll => self
                .index
                .keys()
                .map(|key| (key.to_string(), 1.0))
                .collect(),
            QueryNode::Term { field, text } => {
                self.score_term(field.as_deref(), text, fields, weights, warnings)
            }
            QueryNode::Phrase { field, text } => {
                self.score_phrase(field.as_deref(), text, fields, weights, warnings)
            }
            QueryNode::Wildcard { field, pattern } => {
                self.score_wildcard(field.as_deref(), pattern, fields, weights, warnings)
            }
            QueryNode::And(children) => {
                let mut positive: Option<HashMap<String, f64>> = None;
                let mut negative: Vec<HashMap<String, f64>> = Vec::new();
                for child in children {
                    if let QueryNode::Not(inner) = child {
                        negative.push(self.evaluate(inner, fields, weights, warnings));
                        continue;
                    }
                    let child_scores = self.evaluate(child, fields, weights, warnings);
                    positive = Some(match positive {
                        None => child_scores,
                        Some(existing) => intersect(existing, &child_scores),
                    });
                }
                // A pure-negation conjunction excludes from the full corpus.
                let mut result = positive.unwrap_or_else(|| {
                    self.index
                        .keys()
                        .map(|key| (key.to_string(), 1.0))
                        .collect()
                });
                for excluded in negative {
                    result.retain(|key, _| !excluded.contains_key(key));
                }
                result
            }
            QueryNode::Or(children) => {
                let mut result: HashMap<String, f64> = HashMap::new();
                for child in children {
                    for (key, score) in self.evaluate(child, fields, weights, warnings) {
                        *result.entry(key).or_insert(0.0) += score;
                    }
                }
                result
            }
            QueryNode::Not(inner) => {
                // Standalone negation: everything except the matches.
                let excluded = self.evaluate(inner, fields, weights, warnings);
                self.index
                    .keys()
                    .filter(|key| !excluded.contains_key(*key))
                    .map(|key| (key.to_string(), 1.0))
                    .collect()
            }
        }
    }

    /// Resolve the target fields for a possibly field-qualified node.
    /// Unknown qualified fields produce a warning and an empty target list.
    fn resolve_fields(
        &self,
        qualifier: Option<&str>,
        fields: &[String],
        warnings: &mut Vec<String>,
    ) -> Vec<String> {
        match qualifier {
            None => fields.to_vec(),
            Some(name) => {
                if self.schema.field(name).is_some_and(|f| f.searchable) {
                    vec![name.to_string()]
                } else {
                    warnings.push(format!("unknown or non-searchable field '{name}' in query"));
                    Vec::new()
                }
            }
        }
    }

    fn analyzer_tokens(&self, field_name: &str, text: &str) -> Vec<String> {
        let analyzer_name = self
            .schema
            .field(field_name)
            .and_then(|f| f.analyzer.as_deref());
        self.registry.analyzer(analyzer_name).analyze(text)
    }

    fn score_term(
        &self,
        qualifier: Option<&str>,
        text: &str,
        fields: &[String],
        weights: &HashMap<String, f64>,
        warnings: &mut Vec<String>,
    ) -> HashMap<String, f64> {
        let mut result: HashMap<String, f64> = HashMap::new();
        for field_name in self.resolve_fields(qualifier, fields, warnings) {
            let Some(postings) = self.index.field(&field_name) else {
                continue;
            };
            let tokens = self.analyzer_tokens(&field_name, text);
            if tokens.is_empty() {
                continue;
            }
            let weight = weights.get(&field_name).copied().unwrap_or(1.0);
            // A source term analyzing into several tokens requires all of
            // them in the field.
            let mut field_scores: Option<HashMap<String, f64>> = None;
            for token in &tokens {
                let token_scores = bm25_scores(postings, token);
                field_scores = Some(match field_scores {
                    None => token_scores,
                    Some(existing) => intersect(existing, &token_scores),
                });
            }
            for (key, score) in field_scores.unwrap_or_default() {
                *result.entry(key).or_insert(0.0) += weight * score;
            }
        }
        result
    }

    fn score_phrase(
        &self,
        qualifier: Option<&str>,
        text: &str,
        fields: &[String],
        weights: &HashMap<String, f64>,
        warnings: &mut Vec<String>,
    ) -> HashMap<String, f64> {
        let mut result: HashMap<String, f64> = HashMap::new();
        for field_name in self.resolve_fields(qualifier, fields, warnings) {
            let Some(postings) = self.index.field(&field_name) else {
                continue;
            };
            let tokens = self.analyzer_tokens(&field_name, text);
            if tokens.is_empty() {
                continue;
            }
            let weight = weights.get(&field_name).copied().unwrap_or(1.0);
            for (key, occurrences) in phrase_matches(postings, &tokens) {
                // Phrase frequency feeds the same BM25 saturation curve.
                let score: f64 = tokens
                    .iter()
                    .map(|token| bm25(postings, token, &key, occurrences))
                    .sum();
                *result.entry(key).or_insert(0.0) += weight * score;
            }
        }
        result
    }

    fn score_wildcard(
        &self,
        qualifier: Option<&str>,
        pattern: &str,
        fields: &[String],
        weights: &HashMap<String, f64>,
        warnings: &mut Vec<String>,
    ) -> HashMap<String, f64> {
        let mut result: HashMap<String, f64> = HashMap::new();
        let lowered = pattern.to_lowercase();
        let Some(matcher) = wildcard_regex(&lowered) else {
            warnings.push(format!("invalid wildcard pattern '{pattern}'"));
            return result;
        };

        for field_name in self.resolve_fields(qualifier, fields, warnings) {
            let Some(postings) = self.index.field(&field_name) else {
                continue;
            };
            let weight = weights.get(&field_name).copied().unwrap_or(1.0);
            let expanded = expand_wildcard(postings, &lowered, &matcher, self.wildcard_expansion_limit);
            for term in expanded {
                for (key, score) in bm25_scores(postings, &term) {
                    *result.entry(key).or_insert(0.0) += weight * score;
                }
            }
        }
        result
    }
}

/// Intersect two score maps, summing scores of surviving keys.
fn intersect(left: HashMap<String, f64>, right: &HashMap<String, f64>) -> HashMap<String, f64> {
    left.into_iter()
        .filter_map(|(key, score)| right.get(&key).map(|other| (key, score + other)))
        .collect()
}

/// BM25 score of one term for every document in its posting list.
fn bm25_scores(postings: &FieldPostings, term: &str) -> HashMap<String, f64> {
    let Some(posting) = postings.postings(term) else {
        return HashMap::new();
    };
    posting
        .keys()
        .map(|key| {
            #[allow(clippy::cast_possible_truncation)]
            let tf = posting.get(key).map_or(0, Vec::len) as u32;
            (key.clone(), bm25(postings, term, key, tf))
        })
        .collect()
}

/// BM25 for one (term, document) pair with an explicit term frequency.
#[allow(clippy::cast_precision_loss)]
fn bm25(postings: &FieldPostings, term: &str, key: &str, tf: u32) -> f64 {
    if tf == 0 {
        return 0.0;
    }
    let n = postings.doc_count() as f64;
    let df = postings.doc_frequency(term) as f64;
    if df == 0.0 || n == 0.0 {
        return 0.0;
    }
    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

    let avg_len = postings.avg_length();
    if avg_len == 0.0 {
        return 0.0;
    }
    let doc_len = f64::from(postings.doc_length(key));
    let tf = f64::from(tf);
    let numerator = tf * (BM25_K1 + 1.0);
    let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len);
    idf * numerator / denominator
}

/// Documents where the token sequence occurs at adjacent positions, with the
/// number of occurrences.
fn phrase_matches(postings: &FieldPostings, tokens: &[String]) -> HashMap<String, u32> {
    let Some(first) = tokens.first() else {
        return HashMap::new();
    };
    let Some(first_posting) = postings.postings(first) else {
        return HashMap::new();
    };

    let mut matches = HashMap::new();
    'docs: for (key, first_positions) in first_posting {
        let mut rest_positions: Vec<&Vec<u32>> = Vec::with_capacity(tokens.len() - 1);
        for token in &tokens[1..] {
            match postings.postings(token).and_then(|p| p.get(key)) {
                Some(positions) => rest_positions.push(positions),
                None => continue 'docs,
            }
        }
        let mut occurrences = 0u32;
        for &start in first_positions {
            #[allow(clippy::cast_possible_truncation)]
            let adjacent = rest_positions
                .iter()
                .enumerate()
                .all(|(offset, positions)| positions.contains(&(start + offset as u32 + 1)));
            if adjacent {
                occurrences += 1;
            }
        }
        if occurrences > 0 {
            matches.insert(key.clone(), occurrences);
        }
    }
    matches
}

/// Compile a wildcard pattern (`*` any run, `?` one char) into an anchored
/// regex.
fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// Expand a wildcard pattern against the field's term dictionary, using the
/// literal prefix to bound the scan where possible.
fn expand_wildcard(
    postings: &FieldPostings,
    pattern: &str,
    matcher: &Regex,
    limit: usize,
) -> Vec<String> {
    let prefix: String = pattern
        .chars()
        .take_while(|c| *c != '*' && *c != '?')
        .collect();
    if prefix.is_empty() {
        postings
            .terms()
            .filter(|term| matcher.is_match(term))
            .take(limit)
            .map(ToString::to_string)
            .collect()
    } else {
        postings
            .terms_with_prefix(&prefix, usize::MAX)
            .into_iter()
            .filter(|term| matcher.is_match(term))
            .take(limit)
            .collect()
    }
}
