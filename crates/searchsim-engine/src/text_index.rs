//! Positional inverted index.
//!
//! For each (searchable field, analyzed term) the index keeps a posting list
//! of (document key, positions within that field), sorted by key. Positions
//! drive phrase matching and highlight fragment selection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Posting list for one term: document key → token positions.
pub type PostingList = BTreeMap<String, Vec<u32>>;

/// Per-field postings and length statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldPostings {
    /// Term → posting list.
    postings: BTreeMap<String, PostingList>,
    /// Document key → field length in tokens.
    doc_lengths: HashMap<String, u32>,
    /// Sum of all field lengths, for average-length normalization.
    total_length: u64,
}

impl FieldPostings {
    /// Posting list for a term.
    #[must_use]
    pub fn postings(&self, term: &str) -> Option<&PostingList> {
        self.postings.get(term)
    }

    /// Document frequency of a term within this field.
    #[must_use]
    pub fn doc_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, BTreeMap::len)
    }

    /// Number of documents with a value in this field.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Token length of this field in a document.
    #[must_use]
    pub fn doc_length(&self, key: &str) -> u32 {
        self.doc_lengths.get(key).copied().unwrap_or(0)
    }

    /// Average field length across documents.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_length(&self) -> f64 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.doc_lengths.len() as f64
        }
    }

    /// Terms starting with a prefix, for wildcard expansion. Bounded by
    /// `limit`.
    #[must_use]
    pub fn terms_with_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.postings
            .range(prefix.to_string()..)
            .take_while(|(term, _)| term.starts_with(prefix))
            .take(limit)
            .map(|(term, _)| term.clone())
            .collect()
    }

    /// All terms, for unanchored wildcard expansion.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    fn add(&mut self, key: &str, tokens: &[String]) {
        #[allow(clippy::cast_possible_truncation)]
        let length = tokens.len() as u32;
        self.doc_lengths.insert(key.to_string(), length);
        self.total_length += u64::from(length);
        for (position, token) in tokens.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            self.postings
                .entry(token.clone())
                .or_default()
                .entry(key.to_string())
                .or_default()
                .push(position as u32);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(length) = self.doc_lengths.remove(key) {
            self.total_length = self.total_length.saturating_sub(u64::from(length));
        }
        self.postings.retain(|_, posting| {
            posting.remove(key);
            !posting.is_empty()
        });
    }
}

/// The inverted index of one search index: per-field postings over analyzed
/// tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextIndex {
    fields: HashMap<String, FieldPostings>,
    keys: BTreeSet<String>,
}

impl TextIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) a document given its analyzed tokens per field.
    /// Replaces any previous postings for the key.
    pub fn index_document(&mut self, key: &str, field_tokens: &HashMap<String, Vec<String>>) {
        self.remove_document(key);
        self.keys.insert(key.to_string());
        for (field, tokens) in field_tokens {
            self.fields
                .entry(field.clone())
                .or_default()
                .add(key, tokens);
        }
    }

    /// Remove a document from every field. Unknown keys are a no-op.
    pub fn remove_document(&mut self, key: &str) {
        if self.keys.remove(key) {
            for postings in self.fields.values_mut() {
                postings.remove(key);
            }
        }
    }

    /// Per-field postings.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldPostings> {
        self.fields.get(name)
    }

    /// Total indexed documents.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// All document keys, ascending.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Field names with at least one posting.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn sample() -> TextIndex {
        let mut index = TextIndex::new();
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), tokens(&["luxury", "spa", "resort"]));
        fields.insert("body".to_string(), tokens(&["spa", "amenities"]));
        index.index_document("a", &fields);

        let mut fields = HashMap::new();
        fields.insert("title".to_string(), tokens(&["budget", "hotel"]));
        index.index_document("b", &fields);
        index
    }

    #[test]
    fn postings_record_positions() {
        let index = sample();
        let title = index.field("title").unwrap();
        let posting = title.postings("spa").unwrap();
        assert_eq!(posting.get("a").unwrap(), &vec![1]);
        assert!(posting.get("b").is_none());
    }

    #[test]
    fn posting_lists_sorted_by_key() {
        let mut index = sample();
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), tokens(&["spa"]));
        index.index_document("0-first", &fields);
        let title = index.field("title").unwrap();
        let keys: Vec<&String> = title.postings("spa").unwrap().keys().collect();
        assert_eq!(keys, vec!["0-first", "a"]);
    }

    #[test]
    fn reindex_replaces_previous_tokens() {
        let mut index = sample();
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), tokens(&["renovated"]));
        index.index_document("a", &fields);

        let title = index.field("title").unwrap();
        assert_eq!(title.doc_frequency("luxury"), 0);
        assert_eq!(title.doc_frequency("renovated"), 1);
        assert_eq!(index.doc_count(), 2);
    }

    #[test]
    fn remove_document_clears_all_fields() {
        let mut index = sample();
        index.remove_document("a");
        assert_eq!(index.doc_count(), 1);
        assert!(index.field("title").unwrap().postings("luxury").is_none());
        assert_eq!(index.field("body").unwrap().doc_count(), 0);
        // Removing again is a no-op.
        index.remove_document("a");
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn length_statistics() {
        let index = sample();
        let title = index.field("title").unwrap();
        assert_eq!(title.doc_length("a"), 3);
        assert_eq!(title.doc_length("b"), 2);
        assert!((title.avg_length() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn prefix_expansion_is_bounded() {
        let mut index = TextIndex::new();
        for i in 0..10 {
            let mut fields = HashMap::new();
            fields.insert("title".to_string(), tokens(&[&format!("term{i}")]));
            index.index_document(&format!("doc{i}"), &fields);
        }
        let title = index.field("title").unwrap();
        let expanded = title.terms_with_prefix("term", 3);
        assert_eq!(expanded.len(), 3);
        assert!(expanded.iter().all(|t| t.starts_with("term")));
    }
}
