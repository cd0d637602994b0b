//! Query grammars: the `simple` prefix syntax and the `full` Lucene-like
//! syntax.
//!
//! Both parse into the same [`QueryNode`] AST the executor walks:
//! - `simple`: bare terms follow the search mode (`any` = OR, `all` = AND),
//!   `+` requires, `-` excludes, quotes make phrases.
//! - `full`: adds field-qualified terms (`title:hotel`), boolean operators
//!   (`AND`, `OR`, `NOT`) with precedence, grouping, the `*` universal
//!   selector, and in-term wildcards (`mig*`, `h?tel`).
//!
//! Malformed `full` queries fail with a parse error. The `simple` grammar
//! never fails; unrecognizable fragments degrade to plain terms.

use std::fmt;

use serde::{Deserialize, Serialize};

use searchsim_core::error::{SimulatorError, SimulatorResult};

/// Search mode for combining bare terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchMode {
    /// Any term may match (OR).
    #[default]
    Any,
    /// All terms must match (AND).
    All,
}

/// Query type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    /// Simple prefix syntax.
    #[default]
    Simple,
    /// Full Lucene-like syntax.
    Full,
}

/// Parsed query AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    /// Matches every document with score 1.0.
    MatchAll,
    /// A single term, optionally field-qualified.
    Term {
        /// Qualifying field, `None` for all searched fields.
        field: Option<String>,
        /// Raw term text (analyzed at execution time).
        text: String,
    },
    /// A phrase requiring adjacent positions.
    Phrase {
        /// Qualifying field.
        field: Option<String>,
        /// Raw phrase text.
        text: String,
    },
    /// A wildcard term (`*` any run, `?` one character).
    Wildcard {
        /// Qualifying field.
        field: Option<String>,
        /// Raw pattern.
        pattern: String,
    },
    /// All children must match.
    And(Vec<QueryNode>),
    /// At least one child must match.
    Or(Vec<QueryNode>),
    /// The child must not match.
    Not(Box<QueryNode>),
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => write!(f, "*"),
            Self::Term { field, text } => match field {
                Some(name) => write!(f, "{name}:{text}"),
                None => write!(f, "{text}"),
            },
            Self::Phrase { field, text } => match field {
                Some(name) => write!(f, "{name}:\"{text}\""),
                None => write!(f, "\"{text}\""),
            },
            Self::Wildcard { field, pattern } => match field {
                Some(name) => write!(f, "{name}:{pattern}"),
                None => write!(f, "{pattern}"),
            },
            Self::And(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Self::Or(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Self::Not(child) => write!(f, "NOT {child}"),
        }
    }
}

impl QueryNode {
    /// Collapse single-child boolean nodes.
    fn simplify(self) -> Self {
        match self {
            Self::And(mut children) if children.len() == 1 => children.remove(0),
            Self::Or(mut children) if children.len() == 1 => children.remove(0),
            other => other,
        }
    }

    /// Whether the raw text contains wildcard metacharacters.
    #[must_use]
    pub fn has_wildcard(text: &str) -> bool {
        text.contains('*') || text.contains('?')
    }
}

/// Parse a query string under the given type and mode.
///
/// Empty or whitespace-only input parses to [`QueryNode::MatchAll`].
pub fn parse(query: &str, query_type: QueryType, mode: SearchMode) -> SimulatorResult<QueryNode> {
    let trimmed = query.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return Ok(QueryNode::MatchAll);
    }
    match query_type {
        QueryType::Simple => Ok(parse_simple(trimmed, mode)),
        QueryType::Full => parse_full(trimmed, mode),
    }
}

// ── Simple syntax ───────────────────────────────────────────────────────────

/// Split a raw query into whitespace-separated tokens, keeping quoted spans
/// together.
fn split_tokens(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in raw.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
            continue;
        }
        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(token: &str) -> Option<&str> {
    token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
}

fn parse_simple(query: &str, mode: SearchMode) -> QueryNode {
    let mut required = Vec::new();
    let mut excluded = Vec::new();
    let mut optional = Vec::new();

    for token in split_tokens(query) {
        let (bucket, body) = match token.strip_prefix('+') {
            Some(rest) => (&mut required, rest),
            None => match token.strip_prefix('-') {
                Some(rest) => (&mut excluded, rest),
                None => (&mut optional, token.as_str()),
            },
        };
        if body.is_empty() {
            continue;
        }
        let node = if let Some(phrase) = unquote(body) {
            QueryNode::Phrase {
                field: None,
                text: phrase.to_string(),
            }
        } else {
            QueryNode::Term {
                field: None,
                text: body.to_string(),
            }
        };
        bucket.push(node);
    }

    let mut clauses = required;
    if !optional.is_empty() {
        match mode {
            SearchMode::Any => clauses.push(QueryNode::Or(optional).simplify()),
            SearchMode::All => clauses.extend(optional),
        }
    }
    if clauses.is_empty() {
        clauses.push(QueryNode::MatchAll);
    }
    for node in excluded {
        clauses.push(QueryNode::Not(Box::new(node)));
    }
    QueryNode::And(clauses).simplify()
}

// ── Full syntax ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    /// A term, phrase, or wildcard, possibly field-qualified.
    Atom(String),
}

fn lex_full(query: &str) -> SimulatorResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let word = std::mem::take(current);
        match word.as_str() {
            "AND" | "&&" => tokens.push(Token::And),
            "OR" | "||" => tokens.push(Token::Or),
            "NOT" | "!" => tokens.push(Token::Not),
            _ => tokens.push(Token::Atom(word)),
        }
    };

    for ch in query.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::LParen);
            }
            ')' if !in_quotes => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::RParen);
            }
            c if c.is_whitespace() && !in_quotes => flush(&mut current, &mut tokens),
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(SimulatorError::Validation(
            "unterminated quote in full query".into(),
        ));
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

struct FullParser {
    tokens: Vec<Token>,
    position: usize,
    mode: SearchMode,
}

impl FullParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// `or_expr := and_expr (OR and_expr)*`
    fn parse_or(&mut self) -> SimulatorResult<QueryNode> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(QueryNode::Or(children).simplify())
    }

    /// `and_expr := unary (AND unary | unary)*` — adjacency without an
    /// operator follows the search mode.
    fn parse_and(&mut self) -> SimulatorResult<QueryNode> {
        let mut explicit_and = Vec::new();
        let mut implicit = vec![self.parse_unary()?];

        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.advance();
                    implicit.push(self.parse_unary()?);
                }
                Some(Token::Atom(_) | Token::LParen | Token::Not) => {
                    // Implicit adjacency: close the current AND run per mode.
                    if self.mode == SearchMode::All {
                        implicit.push(self.parse_unary()?);
                    } else {
                        explicit_and.push(QueryNode::And(std::mem::take(&mut implicit)).simplify());
                        implicit.push(self.parse_unary()?);
                    }
                }
                _ => break,
            }
        }
        explicit_and.push(QueryNode::And(implicit).simplify());
        Ok(QueryNode::Or(explicit_and).simplify())
    }

    /// `unary := NOT unary | ( or_expr ) | atom`
    fn parse_unary(&mut self) -> SimulatorResult<QueryNode> {
        match self.advance() {
            Some(Token::Not) => Ok(QueryNode::Not(Box::new(self.parse_unary()?))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(SimulatorError::Validation(
                        "unbalanced parenthesis in full query".into(),
                    )),
                }
            }
            Some(Token::Atom(atom)) => Ok(parse_atom(&atom)),
            other => Err(SimulatorError::Validation(format!(
                "unexpected token in full query: {other:?}"
            ))),
        }
    }
}

/// Split an atom into optional field qualifier and body, then classify as
/// phrase, wildcard, match-all, or plain term.
fn parse_atom(atom: &str) -> QueryNode {
    let (field, body) = match atom.split_once(':') {
        // A colon inside quotes belongs to the phrase, not a qualifier.
        Some((field, rest)) if !field.starts_with('"') && !field.is_empty() => {
            (Some(field.to_string()), rest)
        }
        _ => (None, atom),
    };

    if body == "*" {
        return QueryNode::MatchAll;
    }
    if let Some(phrase) = unquote(body) {
        return QueryNode::Phrase {
            field,
            text: phrase.to_string(),
        };
    }
    if QueryNode::has_wildcard(body) {
        return QueryNode::Wildcard {
            field,
            pattern: body.to_string(),
        };
    }
    QueryNode::Term {
        field,
        text: body.to_string(),
    }
}

fn parse_full(query: &str, mode: SearchMode) -> SimulatorResult<QueryNode> {
    let tokens = lex_full(query)?;
    if tokens.is_empty() {
        return Ok(QueryNode::MatchAll);
    }
    let mut parser = FullParser {
        tokens,
        position: 0,
        mode,
    };
    let root = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(SimulatorError::Validation(format!(
            "trailing tokens in full query at position {}",
            parser.position
        )));
    }
    Ok(root)
}
