//! Highlight fragment extraction.
//!
//! Only fields named in the request's highlight list produce entries; a field
//! with no matches is omitted entirely (never an empty array). Fragments are
//! bounded character windows around matched term positions, with matched
//! tokens wrapped in the configured pre/post tags (default `<em>`/`</em>`).

use std::collections::HashSet;

use crate::analysis::Analyzer;

/// Default pre-tag.
pub const DEFAULT_PRE_TAG: &str = "<em>";
/// Default post-tag.
pub const DEFAULT_POST_TAG: &str = "</em>";

/// Maximum fragments emitted per field.
const MAX_FRAGMENTS: usize = 5;
/// Target fragment width in characters.
const FRAGMENT_WIDTH: usize = 160;

/// A token with its byte span in the original text.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    matched: bool,
}

/// Extract highlight fragments for one field value.
///
/// `terms` holds the analyzed query terms; a token matches when its analyzed
/// form appears in the set. Returns an empty vector when nothing matches.
#[must_use]
pub fn extract_fragments(
    text: &str,
    terms: &HashSet<String>,
    analyzer: &Analyzer,
    pre_tag: &str,
    post_tag: &str,
) -> Vec<String> {
    if text.is_empty() || terms.is_empty() {
        return Vec::new();
    }

    let spans = token_spans(text, terms, analyzer);
    let matched_indices: Vec<usize> = spans
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.matched.then_some(i))
        .collect();
    if matched_indices.is_empty() {
        return Vec::new();
    }

    // Build character windows around matches and merge overlaps.
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for &idx in &matched_indices {
        let center = &spans[idx];
        let half = FRAGMENT_WIDTH / 2;
        let start = center.start.saturating_sub(half);
        let end = (center.end + half).min(text.len());
        match windows.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => windows.push((start, end)),
        }
    }
    windows.truncate(MAX_FRAGMENTS);

    windows
        .into_iter()
        .map(|(start, end)| {
            let start = snap_to_char_boundary(text, start);
            let end = snap_to_char_boundary(text, end);
            render_window(text, &spans, start, end, pre_tag, post_tag)
        })
        .collect()
}

fn snap_to_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(text.len())
}

fn token_spans(text: &str, terms: &HashSet<String>, analyzer: &Analyzer) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(token_start) = start.take() {
            spans.push(make_span(text, token_start, idx, terms, analyzer));
        }
    }
    if let Some(token_start) = start {
        spans.push(make_span(text, token_start, text.len(), terms, analyzer));
    }
    spans
}

fn make_span(
    text: &str,
    start: usize,
    end: usize,
    terms: &HashSet<String>,
    analyzer: &Analyzer,
) -> Span {
    let token = &text[start..end];
    let matched = analyzer
        .analyze(token)
        .iter()
        .any(|analyzed| terms.contains(analyzed));
    Span {
        start,
        end,
        matched,
    }
}

fn render_window(
    text: &str,
    spans: &[Span],
    window_start: usize,
    window_end: usize,
    pre_tag: &str,
    post_tag: &str,
) -> String {
    let mut fragment = String::with_capacity(window_end - window_start + 16);
    let mut cursor = window_start;
    for span in spans {
        if span.end <= window_start || span.start >= window_end || !span.matched {
            continue;
        }
        fragment.push_str(&text[cursor..span.start]);
        fragment.push_str(pre_tag);
        fragment.push_str(&text[span.start..span.end]);
        fragment.push_str(post_tag);
        cursor = span.end;
    }
    fragment.push_str(&text[cursor..window_end]);
    fragment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(parts: &[&str]) -> HashSet<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn highlight(text: &str, query_terms: &[&str]) -> Vec<String> {
        extract_fragments(
            text,
            &terms(query_terms),
            &Analyzer::default(),
            DEFAULT_PRE_TAG,
            DEFAULT_POST_TAG,
        )
    }

    #[test]
    fn wraps_matched_terms() {
        let fragments = highlight("luxury amenities and pool", &["luxury"]);
        assert_eq!(fragments, vec!["<em>luxury</em> amenities and pool"]);
    }

    #[test]
    fn matching_is_case_insensitive_via_analyzer() {
        let fragments = highlight("Luxury Spa Resort", &["luxury"]);
        assert_eq!(fragments, vec!["<em>Luxury</em> Spa Resort"]);
    }

    #[test]
    fn no_match_returns_empty() {
        assert!(highlight("budget hotel", &["luxury"]).is_empty());
        assert!(highlight("", &["luxury"]).is_empty());
    }

    #[test]
    fn multiple_terms_all_wrapped() {
        let fragments = highlight("a luxury spa with pool", &["luxury", "pool"]);
        assert_eq!(
            fragments,
            vec!["a <em>luxury</em> spa with <em>pool</em>"]
        );
    }

    #[test]
    fn custom_tags() {
        let fragments = extract_fragments(
            "luxury stay",
            &terms(&["luxury"]),
            &Analyzer::default(),
            "<b>",
            "</b>",
        );
        assert_eq!(fragments, vec!["<b>luxury</b> stay"]);
    }

    #[test]
    fn distant_matches_produce_separate_fragments() {
        let filler = "word ".repeat(100);
        let text = format!("luxury {filler} pool");
        let fragments = highlight(&text, &["luxury", "pool"]);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].contains("<em>luxury</em>"));
        assert!(fragments[1].contains("<em>pool</em>"));
    }

    #[test]
    fn fragment_count_is_bounded() {
        let text = (0..50)
            .map(|i| format!("{} luxury", "x ".repeat(120 + i)))
            .collect::<Vec<_>>()
            .join(" ");
        let fragments = highlight(&text, &["luxury"]);
        assert!(fragments.len() <= MAX_FRAGMENTS);
    }
}
