//! Analyzer and normalizer chains.
//!
//! A normalizer is an ordered char-filter chain followed by a token-filter
//! chain applied to the whole value as a single token (no word splitting); it
//! feeds filter/sort/facet comparison. An analyzer reuses the same filter
//! machinery but tokenizes on Unicode word boundaries first; it feeds the
//! inverted index and query-term analysis.
//!
//! Built-in normalizers: `lowercase`, `uppercase`, `standard`
//! (lowercase + asciifolding), `asciifolding`, `elision`. Custom normalizers
//! are declared on the index and referenced case-insensitively; unknown names
//! are a no-op.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use searchsim_core::schema::{CharFilterDefinition, IndexSchema, NormalizerDefinition};

// ── Token filters ───────────────────────────────────────────────────────────

/// A token filter keyed by its protocol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFilter {
    Lowercase,
    Uppercase,
    AsciiFolding,
    Elision,
    Trim,
    ArabicNormalization,
    CjkWidth,
    GermanNormalization,
    HindiNormalization,
    IndicNormalization,
    PersianNormalization,
    ScandinavianFolding,
    ScandinavianNormalization,
    SoraniNormalization,
}

impl TokenFilter {
    /// Resolve a protocol name, case-insensitively.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lowercase" => Some(Self::Lowercase),
            "uppercase" => Some(Self::Uppercase),
            "asciifolding" => Some(Self::AsciiFolding),
            "elision" => Some(Self::Elision),
            "trim" => Some(Self::Trim),
            "arabic_normalization" => Some(Self::ArabicNormalization),
            "cjk_width" => Some(Self::CjkWidth),
            "german_normalization" => Some(Self::GermanNormalization),
            "hindi_normalization" => Some(Self::HindiNormalization),
            "indic_normalization" => Some(Self::IndicNormalization),
            "persian_normalization" => Some(Self::PersianNormalization),
            "scandinavian_folding" => Some(Self::ScandinavianFolding),
            "scandinavian_normalization" => Some(Self::ScandinavianNormalization),
            "sorani_normalization" => Some(Self::SoraniNormalization),
            _ => None,
        }
    }

    /// Apply the filter to one token.
    #[must_use]
    pub fn apply(self, token: &str) -> String {
        match self {
            Self::Lowercase => token.to_lowercase(),
            Self::Uppercase => token.to_uppercase(),
            Self::AsciiFolding => ascii_fold(token),
            Self::Elision => elide(token),
            Self::Trim => token.trim().to_string(),
            Self::ArabicNormalization => arabic_normalize(token),
            Self::CjkWidth => cjk_width(token),
            Self::GermanNormalization => german_normalize(token),
            Self::HindiNormalization => hindi_normalize(token),
            Self::IndicNormalization => indic_normalize(token),
            Self::PersianNormalization => persian_normalize(token),
            Self::ScandinavianFolding => scandinavian_fold(token),
            Self::ScandinavianNormalization => scandinavian_normalize(token),
            Self::SoraniNormalization => sorani_normalize(token),
        }
    }
}

/// Fold accented and ligature characters to their ASCII base form.
fn ascii_fold(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for ch in token.chars() {
        match ch {
            'ß' => out.push_str("ss"),
            'ẞ' => out.push_str("SS"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'đ' => out.push('d'),
            'Đ' => out.push('D'),
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            'þ' => out.push_str("th"),
            'Þ' => out.push_str("TH"),
            _ => {
                for decomposed in ch.nfd() {
                    if !is_combining_mark(decomposed) {
                        out.push(decomposed);
                    }
                }
            }
        }
    }
    out
}

/// French-style elision prefixes, longest first.
const ELISION_PREFIXES: &[&str] = &[
    "jusqu", "lorsqu", "puisqu", "quoiqu", "qu", "l", "m", "t", "n", "s", "j", "d", "c",
];

/// Strip an elision prefix (`l'avion` → `avion`).
fn elide(token: &str) -> String {
    for apostrophe in ['\'', '\u{2019}'] {
        if let Some(idx) = token.find(apostrophe) {
            let prefix = &token[..idx];
            let lower = prefix.to_lowercase();
            if ELISION_PREFIXES.contains(&lower.as_str()) {
                return token[idx + apostrophe.len_utf8()..].to_string();
            }
        }
    }
    token.to_string()
}

fn arabic_normalize(token: &str) -> String {
    token
        .chars()
        .filter_map(|ch| match ch {
            // tatweel and harakat diacritics are removed
            '\u{0640}' | '\u{064B}'..='\u{0652}' => None,
            // alef variants collapse to bare alef
            '\u{0622}' | '\u{0623}' | '\u{0625}' | '\u{0671}' => Some('\u{0627}'),
            // alef maksura to yeh
            '\u{0649}' => Some('\u{064A}'),
            // teh marbuta to heh
            '\u{0629}' => Some('\u{0647}'),
            other => Some(other),
        })
        .collect()
}

fn cjk_width(token: &str) -> String {
    token
        .chars()
        .map(|ch| match ch {
            // ideographic space
            '\u{3000}' => ' ',
            // fullwidth ASCII block folds onto ASCII
            '\u{FF01}'..='\u{FF5E}' => {
                char::from_u32(ch as u32 - 0xFF01 + 0x21).unwrap_or(ch)
            }
            other => other,
        })
        .collect()
}

fn german_normalize(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for ch in token.chars() {
        match ch {
            'ä' => out.push('a'),
            'Ä' => out.push('A'),
            'ö' => out.push('o'),
            'Ö' => out.push('O'),
            'ü' => out.push('u'),
            'Ü' => out.push('U'),
            'ß' => out.push_str("ss"),
            other => out.push(other),
        }
    }
    out
}

fn hindi_normalize(token: &str) -> String {
    token
        .chars()
        .filter_map(|ch| match ch {
            // nukta is removed
            '\u{093C}' => None,
            // candrabindu to anusvara
            '\u{0901}' => Some('\u{0902}'),
            other => Some(other),
        })
        .collect()
}

fn indic_normalize(token: &str) -> String {
    token
        .chars()
        .filter(|ch| !matches!(ch, '\u{200C}' | '\u{200D}'))
        .collect()
}

fn persian_normalize(token: &str) -> String {
    token
        .chars()
        .filter_map(|ch| match ch {
            // arabic yeh to farsi yeh
            '\u{064A}' => Some('\u{06CC}'),
            // arabic kaf to keheh
            '\u{0643}' => Some('\u{06A9}'),
            '\u{0640}' => None,
            other => Some(other),
        })
        .collect()
}

fn scandinavian_fold(token: &str) -> String {
    token
        .chars()
        .map(|ch| match ch {
            'å' | 'ä' | 'æ' => 'a',
            'Å' | 'Ä' | 'Æ' => 'A',
            'ö' | 'ø' => 'o',
            'Ö' | 'Ø' => 'O',
            other => other,
        })
        .collect()
}

fn scandinavian_normalize(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek().copied()) {
            ('a', Some('a')) => {
                chars.next();
                out.push('å');
            }
            ('a', Some('e')) => {
                chars.next();
                out.push('æ');
            }
            ('o', Some('e')) => {
                chars.next();
                out.push('ø');
            }
            ('ä', _) => out.push('æ'),
            ('Ä', _) => out.push('Æ'),
            ('ö', _) => out.push('ø'),
            ('Ö', _) => out.push('Ø'),
            _ => out.push(ch),
        }
    }
    out
}

fn sorani_normalize(token: &str) -> String {
    token
        .chars()
        .filter_map(|ch| match ch {
            '\u{0643}' => Some('\u{06A9}'),
            '\u{064A}' => Some('\u{06CC}'),
            '\u{0640}' => None,
            other => Some(other),
        })
        .collect()
}

// ── Char filters ────────────────────────────────────────────────────────────

/// A char filter instance.
#[derive(Debug, Clone)]
pub enum CharFilter {
    /// Strip HTML tags and decode the common entities.
    HtmlStrip,
    /// Ordered `from=>to` replacements.
    Mapping(Vec<(String, String)>),
    /// Regex replacement; a `None` pattern (invalid regex) passes input
    /// through unchanged.
    PatternReplace {
        pattern: Option<Regex>,
        replacement: String,
    },
}

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

impl CharFilter {
    /// Build from an index-level declaration.
    #[must_use]
    pub fn from_definition(definition: &CharFilterDefinition) -> Self {
        match definition {
            CharFilterDefinition::Mapping { mappings, .. } => Self::Mapping(
                mappings
                    .iter()
                    .filter_map(|rule| {
                        rule.split_once("=>")
                            .map(|(from, to)| (from.to_string(), to.to_string()))
                    })
                    .collect(),
            ),
            CharFilterDefinition::PatternReplace {
                pattern,
                replacement,
                ..
            } => Self::PatternReplace {
                pattern: Regex::new(pattern).ok(),
                replacement: replacement.clone(),
            },
        }
    }

    /// Apply the filter to the whole value.
    #[must_use]
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::HtmlStrip => {
                let stripped = TAG.replace_all(value, " ");
                stripped
                    .replace("&amp;", "&")
                    .replace("&lt;", "<")
                    .replace("&gt;", ">")
                    .replace("&quot;", "\"")
                    .replace("&#39;", "'")
                    .replace("&nbsp;", " ")
            }
            Self::Mapping(rules) => {
                let mut out = value.to_string();
                for (from, to) in rules {
                    if !from.is_empty() {
                        out = out.replace(from, to);
                    }
                }
                out
            }
            Self::PatternReplace {
                pattern,
                replacement,
            } => pattern.as_ref().map_or_else(
                || value.to_string(),
                |re| re.replace_all(value, replacement.as_str()).into_owned(),
            ),
        }
    }
}

// ── Normalizers and analyzers ───────────────────────────────────────────────

/// A compiled normalizer: char filters then token filters over the whole
/// value.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    char_filters: Vec<CharFilter>,
    token_filters: Vec<TokenFilter>,
}

impl Normalizer {
    /// Apply to a whole value as a single token.
    #[must_use]
    pub fn normalize(&self, value: &str) -> String {
        let mut current = value.to_string();
        for filter in &self.char_filters {
            current = filter.apply(&current);
        }
        for filter in &self.token_filters {
            current = filter.apply(&current);
        }
        current
    }
}

/// A compiled analyzer: char filters, Unicode word-boundary tokenization,
/// then token filters.
#[derive(Debug, Clone)]
pub struct Analyzer {
    char_filters: Vec<CharFilter>,
    token_filters: Vec<TokenFilter>,
    /// Keyword analyzers skip tokenization and emit the whole value.
    keyword: bool,
}

impl Default for Analyzer {
    /// The standard analyzer: tokenize + lowercase + asciifolding.
    fn default() -> Self {
        Self {
            char_filters: Vec::new(),
            token_filters: vec![TokenFilter::Lowercase, TokenFilter::AsciiFolding],
            keyword: false,
        }
    }
}

impl Analyzer {
    /// Tokenize a value into (token, position) pairs.
    #[must_use]
    pub fn analyze(&self, value: &str) -> Vec<String> {
        let mut current = value.to_string();
        for filter in &self.char_filters {
            current = filter.apply(&current);
        }
        let raw_tokens: Vec<String> = if self.keyword {
            if current.is_empty() {
                Vec::new()
            } else {
                vec![current]
            }
        } else {
            tokenize(&current)
        };
        raw_tokens
            .into_iter()
            .map(|token| {
                let mut t = token;
                for filter in &self.token_filters {
                    t = filter.apply(&t);
                }
                t
            })
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Split on Unicode word boundaries: runs of alphanumeric characters are
/// tokens, everything else separates.
#[must_use]
pub fn tokenize(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Per-index registry resolving analyzer and normalizer names.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRegistry {
    normalizers: HashMap<String, Normalizer>,
    char_filters: HashMap<String, CharFilter>,
}

impl AnalysisRegistry {
    /// Build the registry for an index: built-ins plus the index's custom
    /// declarations.
    #[must_use]
    pub fn for_index(schema: &IndexSchema) -> Self {
        let mut registry = Self::default();

        for definition in &schema.char_filters {
            registry.char_filters.insert(
                definition.name().to_ascii_lowercase(),
                CharFilter::from_definition(definition),
            );
        }
        for definition in &schema.normalizers {
            let normalizer = registry.compile_normalizer(definition);
            registry
                .normalizers
                .insert(definition.name.to_ascii_lowercase(), normalizer);
        }
        registry
    }

    fn compile_normalizer(&self, definition: &NormalizerDefinition) -> Normalizer {
        let char_filters = definition
            .char_filters
            .iter()
            .filter_map(|name| match name.to_ascii_lowercase().as_str() {
                "html_strip" => Some(CharFilter::HtmlStrip),
                other => self.char_filters.get(other).cloned(),
            })
            .collect();
        let token_filters = definition
            .token_filters
            .iter()
            .filter_map(|name| TokenFilter::by_name(name))
            .collect();
        Normalizer {
            char_filters,
            token_filters,
        }
    }

    /// Resolve a normalizer name (case-insensitive). Built-ins are always
    /// available; unknown names resolve to the identity normalizer.
    #[must_use]
    pub fn normalizer(&self, name: &str) -> Normalizer {
        let lower = name.to_ascii_lowercase();
        if let Some(custom) = self.normalizers.get(&lower) {
            return custom.clone();
        }
        match lower.as_str() {
            "lowercase" => Normalizer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::Lowercase],
            },
            "uppercase" => Normalizer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::Uppercase],
            },
            "standard" => Normalizer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::Lowercase, TokenFilter::AsciiFolding],
            },
            "asciifolding" => Normalizer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::AsciiFolding],
            },
            "elision" => Normalizer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::Elision],
            },
            // Unknown normalizer names are a no-op.
            _ => Normalizer::default(),
        }
    }

    /// Resolve an analyzer name. `keyword` emits the whole value as one
    /// token; anything else (including unknown names) is the standard
    /// analyzer.
    #[must_use]
    pub fn analyzer(&self, name: Option<&str>) -> Analyzer {
        match name.map(str::to_ascii_lowercase).as_deref() {
            Some("keyword") => Analyzer {
                char_filters: Vec::new(),
                token_filters: vec![TokenFilter::Lowercase],
                keyword: true,
            },
            Some("whitespace") => Analyzer {
                char_filters: Vec::new(),
                token_filters: Vec::new(),
                keyword: false,
            },
            _ => Analyzer::default(),
        }
    }

    /// Normalize a value for a field: the field's declared normalizer when
    /// present, otherwise the identity.
    #[must_use]
    pub fn normalize_for_field(&self, normalizer_name: Option<&str>, value: &str) -> String {
        normalizer_name.map_or_else(|| value.to_string(), |name| self.normalizer(name).normalize(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchsim_core::schema::{Field, FieldType};

    fn registry() -> AnalysisRegistry {
        AnalysisRegistry::default()
    }

    #[test]
    fn standard_normalizer_lowercases_and_folds() {
        let n = registry().normalizer("standard");
        assert_eq!(n.normalize("Crème BRÛLÉE"), "creme brulee");
    }

    #[test]
    fn normalizer_lookup_is_case_insensitive() {
        let n = registry().normalizer("LOWERCASE");
        assert_eq!(n.normalize("ABC"), "abc");
    }

    #[test]
    fn unknown_normalizer_is_identity() {
        let n = registry().normalizer("does_not_exist");
        assert_eq!(n.normalize("MiXeD Case"), "MiXeD Case");
    }

    #[test]
    fn ascii_folding_ligatures() {
        assert_eq!(ascii_fold("straße"), "strasse");
        assert_eq!(ascii_fold("Ærø"), "AEro");
        assert_eq!(ascii_fold("œuvre"), "oeuvre");
    }

    #[test]
    fn elision_strips_french_articles() {
        assert_eq!(elide("l'avion"), "avion");
        assert_eq!(elide("qu'il"), "il");
        assert_eq!(elide("jusqu'ici"), "ici");
        assert_eq!(elide("o'brien"), "o'brien");
    }

    #[test]
    fn trim_filter() {
        assert_eq!(TokenFilter::Trim.apply("  padded \t"), "padded");
    }

    #[test]
    fn arabic_normalization_representative() {
        // alef with hamza folds to bare alef; tatweel removed
        assert_eq!(arabic_normalize("\u{0623}\u{0640}\u{0628}"), "\u{0627}\u{0628}");
        // teh marbuta to heh
        assert_eq!(arabic_normalize("\u{0629}"), "\u{0647}");
    }

    #[test]
    fn cjk_width_folds_fullwidth() {
        assert_eq!(cjk_width("\u{FF28}\u{FF45}\u{FF4C}\u{FF4C}\u{FF4F}"), "Hello");
        assert_eq!(cjk_width("a\u{3000}b"), "a b");
    }

    #[test]
    fn german_normalization_representative() {
        assert_eq!(german_normalize("Müller"), "Muller");
        assert_eq!(german_normalize("weiß"), "weiss");
    }

    #[test]
    fn indic_normalization_removes_joiners() {
        assert_eq!(indic_normalize("a\u{200C}b\u{200D}c"), "abc");
    }

    #[test]
    fn persian_normalization_representative() {
        assert_eq!(persian_normalize("\u{064A}"), "\u{06CC}");
        assert_eq!(persian_normalize("\u{0643}"), "\u{06A9}");
    }

    #[test]
    fn scandinavian_folding_representative() {
        assert_eq!(scandinavian_fold("Ålesund"), "Alesund");
        assert_eq!(scandinavian_fold("smörgåsbord"), "smorgasbord");
    }

    #[test]
    fn scandinavian_normalization_digraphs() {
        assert_eq!(scandinavian_normalize("aarhus"), "århus");
        assert_eq!(scandinavian_normalize("oeresund"), "øresund");
    }

    #[test]
    fn sorani_normalization_representative() {
        assert_eq!(sorani_normalize("\u{0643}\u{064A}"), "\u{06A9}\u{06CC}");
    }

    #[test]
    fn html_strip_filter() {
        let filter = CharFilter::HtmlStrip;
        assert_eq!(
            filter.apply("<p>Hello &amp; <b>world</b></p>").trim(),
            "Hello &  world"
        );
    }

    #[test]
    fn mapping_char_filter() {
        let filter = CharFilter::Mapping(vec![("ph".into(), "f".into())]);
        assert_eq!(filter.apply("phone photo"), "fone foto");
    }

    #[test]
    fn invalid_pattern_replace_passes_through() {
        let definition = CharFilterDefinition::PatternReplace {
            name: "broken".into(),
            pattern: "[unclosed".into(),
            replacement: "x".into(),
        };
        let filter = CharFilter::from_definition(&definition);
        assert_eq!(filter.apply("input"), "input");
    }

    #[test]
    fn pattern_replace_applies() {
        let definition = CharFilterDefinition::PatternReplace {
            name: "digits".into(),
            pattern: r"\d+".into(),
            replacement: "#".into(),
        };
        let filter = CharFilter::from_definition(&definition);
        assert_eq!(filter.apply("room 404 floor 12"), "room # floor #");
    }

    #[test]
    fn analyzer_tokenizes_on_word_boundaries() {
        let analyzer = Analyzer::default();
        assert_eq!(
            analyzer.analyze("Luxury Spa-Resort, 5*!"),
            vec!["luxury", "spa", "resort", "5"]
        );
    }

    #[test]
    fn keyword_analyzer_keeps_whole_value() {
        let analyzer = registry().analyzer(Some("keyword"));
        assert_eq!(analyzer.analyze("New York"), vec!["new york"]);
    }

    #[test]
    fn custom_normalizer_from_schema() {
        let mut schema = IndexSchema::new(
            "idx",
            vec![Field::new("id", FieldType::String).as_key()],
        );
        schema.char_filters.push(CharFilterDefinition::Mapping {
            name: "dashes".into(),
            mappings: vec!["-=> ".into()],
        });
        schema.normalizers.push(NormalizerDefinition {
            name: "MyNorm".into(),
            char_filters: vec!["dashes".into()],
            token_filters: vec!["lowercase".into(), "trim".into()],
        });
        let registry = AnalysisRegistry::for_index(&schema);
        assert_eq!(registry.normalizer("mynorm").normalize("A-B"), "a b");
    }

    #[test]
    fn analyzer_idempotent_on_normalized_input() {
        let analyzer = Analyzer::default();
        let once = analyzer.analyze("Crème BRÛLÉE déjà vu");
        let rejoined = once.join(" ");
        let twice = analyzer.analyze(&rejoined);
        assert_eq!(once, twice);
    }
}
