//! OData-subset filter expressions.
//!
//! Supported grammar: comparison operators (`eq`, `ne`, `gt`, `ge`, `lt`,
//! `le`), boolean composition (`and`, `or`, `not`, grouping), membership
//! (`in`, `search.in(field, list, delimiter)`), collection lambdas
//! (`tags/any(t: t eq 'wifi')`, `tags/all(...)`, bare `tags/any()`), and the
//! geo predicates (`geo.distance(field, geography'POINT(lon lat)') lt 10`,
//! `geo.intersects(field, geography'POLYGON((...))')`).
//!
//! Filter parse or type errors are fatal for the request. Evaluation is a
//! pure function of (document, expression): string comparison happens after
//! normalizer application for filterable string fields, null sorts into
//! equality only with `null`, and missing fields behave as null.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use searchsim_core::document::Document;
use searchsim_core::error::{SimulatorError, SimulatorResult};
use searchsim_core::geo::GeoPoint;
use searchsim_core::schema::IndexSchema;

use crate::analysis::AnalysisRegistry;

// ── AST ─────────────────────────────────────────────────────────────────────

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }
}

/// A literal value in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Null,
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A field reference, possibly a lambda variable (`t`).
    Field(String),
    /// A literal.
    Literal(FilterLiteral),
    /// `geo.distance(field, point)` in kilometers.
    GeoDistance { field: String, point: GeoPoint },
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Binary comparison.
    Cmp {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    /// `field in ('a', 'b')`.
    In { field: String, values: Vec<FilterLiteral> },
    /// `search.in(field, 'a,b', ',')` after list splitting.
    SearchIn { field: String, values: Vec<String> },
    /// `field/any(v: body)`; `body` is `None` for the bare existence form.
    Any {
        field: String,
        var: Option<String>,
        body: Option<Box<FilterExpr>>,
    },
    /// `field/all(v: body)`.
    All {
        field: String,
        var: String,
        body: Box<FilterExpr>,
    },
    /// `geo.intersects(field, polygon)`.
    GeoIntersects { field: String, polygon: Vec<GeoPoint> },
    /// Conjunction.
    And(Box<FilterExpr>, Box<FilterExpr>),
    /// Disjunction.
    Or(Box<FilterExpr>, Box<FilterExpr>),
    /// Negation.
    Not(Box<FilterExpr>),
}

// ── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Comma,
    Colon,
}

fn lex(input: &str) -> SimulatorResult<Vec<Tok>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Tok::Colon);
                i += 1;
            }
            '\'' => {
                // Single-quoted string with '' escaping.
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(*c);
                            i += 1;
                        }
                        None => {
                            return Err(SimulatorError::Validation(
                                "unterminated string literal in filter".into(),
                            ));
                        }
                    }
                }
                tokens.push(Tok::Str(value));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || matches!(chars[i], '.' | '-' | '+' | ':'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                // Bare ISO timestamps lex as words, plain numbers as numbers.
                if let Ok(date) = DateTime::parse_from_rfc3339(&word) {
                    tokens.push(Tok::Word(format!("@date:{}", date.to_rfc3339())));
                } else if let Ok(num) = word.parse::<f64>() {
                    tokens.push(Tok::Num(num));
                } else {
                    return Err(SimulatorError::Validation(format!(
                        "invalid numeric or date literal '{word}' in filter"
                    )));
                }
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '/'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                // geography'...' literals glue a word to a quoted body.
                if word.eq_ignore_ascii_case("geography") && chars.get(i) == Some(&'\'') {
                    let mut body = String::from("geography'");
                    i += 1;
                    loop {
                        match chars.get(i) {
                            Some('\'') => {
                                body.push('\'');
                                i += 1;
                                break;
                            }
                            Some(c) => {
                                body.push(*c);
                                i += 1;
                            }
                            None => {
                                return Err(SimulatorError::Validation(
                                    "unterminated geography literal in filter".into(),
                                ));
                            }
                        }
                    }
                    tokens.push(Tok::Word(body));
                } else {
                    tokens.push(Tok::Word(word));
                }
            }
            other => {
                return Err(SimulatorError::Validation(format!(
                    "unexpected character '{other}' in filter"
                )));
            }
        }
    }
    Ok(tokens)
}

// ── Parser ──────────────────────────────────────────────────────────────────

/// Parse a filter string into an expression tree.
pub fn parse(input: &str) -> SimulatorResult<FilterExpr> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(SimulatorError::Validation(format!(
            "trailing tokens in filter near position {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Tok::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn next(&mut self) -> SimulatorResult<Tok> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| SimulatorError::Validation("unexpected end of filter".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Tok) -> SimulatorResult<()> {
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(SimulatorError::Validation(format!(
                "expected {expected:?} in filter, found {token:?}"
            )))
        }
    }

    fn parse_or(&mut self) -> SimulatorResult<FilterExpr> {
        let mut left = self.parse_and()?;
        while self.peek_word() == Some("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> SimulatorResult<FilterExpr> {
        let mut left = self.parse_unary()?;
        while self.peek_word() == Some("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> SimulatorResult<FilterExpr> {
        if self.peek_word() == Some("not") {
            self.pos += 1;
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek() == Some(&Tok::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&Tok::RParen)?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> SimulatorResult<FilterExpr> {
        // search.in(field, 'list', 'delim')
        if self.peek_word() == Some("search.in") {
            self.pos += 1;
            self.expect(&Tok::LParen)?;
            let field = self.parse_field_name()?;
            self.expect(&Tok::Comma)?;
            let list = self.parse_string()?;
            let delimiter = if self.peek() == Some(&Tok::Comma) {
                self.pos += 1;
                self.parse_string()?
            } else {
                ",".to_string()
            };
            self.expect(&Tok::RParen)?;
            let delimiters: Vec<char> = delimiter.chars().collect();
            let values = list
                .split(|c: char| delimiters.contains(&c))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            return Ok(FilterExpr::SearchIn { field, values });
        }

        // geo.intersects(field, geography'POLYGON((...))')
        if self.peek_word() == Some("geo.intersects") {
            self.pos += 1;
            self.expect(&Tok::LParen)?;
            let field = self.parse_field_name()?;
            self.expect(&Tok::Comma)?;
            let literal = self.parse_word()?;
            self.expect(&Tok::RParen)?;
            let polygon = parse_polygon(&literal).ok_or_else(|| {
                SimulatorError::Validation(format!("invalid polygon literal '{literal}'"))
            })?;
            return Ok(FilterExpr::GeoIntersects { field, polygon });
        }

        // Lambda forms arrive lexed as a single word: field/any or field/all.
        if let Some(word) = self.peek_word() {
            if let Some((field, lambda)) = word.rsplit_once('/') {
                if lambda == "any" || lambda == "all" {
                    let field = field.to_string();
                    let is_all = lambda == "all";
                    self.pos += 1;
                    self.expect(&Tok::LParen)?;
                    if self.peek() == Some(&Tok::RParen) {
                        self.pos += 1;
                        if is_all {
                            return Err(SimulatorError::Validation(
                                "all() requires a lambda body".into(),
                            ));
                        }
                        return Ok(FilterExpr::Any {
                            field,
                            var: None,
                            body: None,
                        });
                    }
                    let var = self.parse_word()?;
                    self.expect(&Tok::Colon)?;
                    let body = self.parse_or()?;
                    self.expect(&Tok::RParen)?;
                    return if is_all {
                        Ok(FilterExpr::All {
                            field,
                            var,
                            body: Box::new(body),
                        })
                    } else {
                        Ok(FilterExpr::Any {
                            field,
                            var: Some(var),
                            body: Some(Box::new(body)),
                        })
                    };
                }
            }
        }

        // Comparison or `in`.
        let left = self.parse_operand()?;
        let op_word = self.parse_word()?;

        if op_word == "in" {
            let Operand::Field(field) = left else {
                return Err(SimulatorError::Validation(
                    "left side of 'in' must be a field".into(),
                ));
            };
            self.expect(&Tok::LParen)?;
            let mut values = Vec::new();
            loop {
                values.push(self.parse_literal()?);
                match self.next()? {
                    Tok::Comma => {}
                    Tok::RParen => break,
                    other => {
                        return Err(SimulatorError::Validation(format!(
                            "expected ',' or ')' in 'in' list, found {other:?}"
                        )));
                    }
                }
            }
            return Ok(FilterExpr::In { field, values });
        }

        let op = CmpOp::from_word(&op_word).ok_or_else(|| {
            SimulatorError::Validation(format!("unknown filter operator '{op_word}'"))
        })?;
        let right = self.parse_operand()?;
        Ok(FilterExpr::Cmp { left, op, right })
    }

    fn parse_operand(&mut self) -> SimulatorResult<Operand> {
        if self.peek_word() == Some("geo.distance") {
            self.pos += 1;
            self.expect(&Tok::LParen)?;
            // Field-first or literal-first argument order.
            let first = self.parse_word()?;
            self.expect(&Tok::Comma)?;
            let second = self.parse_word()?;
            self.expect(&Tok::RParen)?;
            let (field, literal) = if first.starts_with("geography'") {
                (second, first)
            } else {
                (first, second)
            };
            let point = GeoPoint::from_literal(&literal).ok_or_else(|| {
                SimulatorError::Validation(format!("invalid geography literal '{literal}'"))
            })?;
            return Ok(Operand::GeoDistance { field, point });
        }

        match self.next()? {
            Tok::Str(s) => Ok(Operand::Literal(FilterLiteral::String(s))),
            Tok::Num(n) => Ok(Operand::Literal(FilterLiteral::Number(n))),
            Tok::Word(w) => match w.as_str() {
                "true" => Ok(Operand::Literal(FilterLiteral::Boolean(true))),
                "false" => Ok(Operand::Literal(FilterLiteral::Boolean(false))),
                "null" => Ok(Operand::Literal(FilterLiteral::Null)),
                _ => {
                    if let Some(date) = w.strip_prefix("@date:") {
                        let parsed = DateTime::parse_from_rfc3339(date).map_err(|e| {
                            SimulatorError::Validation(format!("invalid date literal: {e}"))
                        })?;
                        Ok(Operand::Literal(FilterLiteral::Date(parsed)))
                    } else {
                        Ok(Operand::Field(w))
                    }
                }
            },
            other => Err(SimulatorError::Validation(format!(
                "unexpected token {other:?} in filter operand"
            ))),
        }
    }

    fn parse_field_name(&mut self) -> SimulatorResult<String> {
        self.parse_word()
    }

    fn parse_word(&mut self) -> SimulatorResult<String> {
        match self.next()? {
            Tok::Word(w) => Ok(w),
            other => Err(SimulatorError::Validation(format!(
                "expected identifier in filter, found {other:?}"
            ))),
        }
    }

    fn parse_string(&mut self) -> SimulatorResult<String> {
        match self.next()? {
            Tok::Str(s) => Ok(s),
            other => Err(SimulatorError::Validation(format!(
                "expected string literal in filter, found {other:?}"
            ))),
        }
    }

    fn parse_literal(&mut self) -> SimulatorResult<FilterLiteral> {
        match self.parse_operand()? {
            Operand::Literal(literal) => Ok(literal),
            other => Err(SimulatorError::Validation(format!(
                "expected literal in filter list, found {other:?}"
            ))),
        }
    }
}

/// Parse `geography'POLYGON((lon lat, lon lat, ...))'`.
fn parse_polygon(literal: &str) -> Option<Vec<GeoPoint>> {
    let lower = literal.to_ascii_lowercase();
    let rest = lower.strip_prefix("geography'")?.strip_suffix('\'')?;
    let inner = rest
        .trim()
        .strip_prefix("polygon((")?
        .strip_suffix("))")?;
    let mut points = Vec::new();
    for pair in inner.split(',') {
        let mut parts = pair.split_whitespace();
        let lon: f64 = parts.next()?.parse().ok()?;
        let lat: f64 = parts.next()?.parse().ok()?;
        points.push(GeoPoint::new(lat, lon));
    }
    (points.len() >= 3).then_some(points)
}

// ── Evaluator ───────────────────────────────────────────────────────────────

/// Evaluates parsed filters against documents of one index.
pub struct FilterEvaluator<'a> {
    schema: &'a IndexSchema,
    registry: &'a AnalysisRegistry,
}

impl<'a> FilterEvaluator<'a> {
    /// Create an evaluator bound to a schema and its analysis registry.
    #[must_use]
    pub const fn new(schema: &'a IndexSchema, registry: &'a AnalysisRegistry) -> Self {
        Self { schema, registry }
    }

    /// Evaluate the expression against a document.
    pub fn matches(&self, expr: &FilterExpr, document: &Document) -> SimulatorResult<bool> {
        self.eval(expr, document, None)
    }

    fn eval(
        &self,
        expr: &FilterExpr,
        document: &Document,
        lambda: Option<(&str, &Value)>,
    ) -> SimulatorResult<bool> {
        match expr {
            FilterExpr::And(left, right) => {
                Ok(self.eval(left, document, lambda)? && self.eval(right, document, lambda)?)
            }
            FilterExpr::Or(left, right) => {
                Ok(self.eval(left, document, lambda)? || self.eval(right, document, lambda)?)
            }
            FilterExpr::Not(inner) => Ok(!self.eval(inner, document, lambda)?),
            FilterExpr::Cmp { left, op, right } => self.eval_cmp(left, *op, right, document, lambda),
            FilterExpr::In { field, values } => {
                let actual = self.operand_value(&Operand::Field(field.clone()), document, lambda);
                Ok(values.iter().any(|candidate| {
                    compare(&actual, &self.literal_value(field, candidate))
                        == Some(std::cmp::Ordering::Equal)
                }))
            }
            FilterExpr::SearchIn { field, values } => {
                let actual = self.operand_value(&Operand::Field(field.clone()), document, lambda);
                let Some(actual_str) = actual.as_string() else {
                    return Ok(false);
                };
                Ok(values.iter().any(|candidate| {
                    self.normalize_for(field, candidate) == actual_str
                }))
            }
            FilterExpr::Any { field, var, body } => {
                let elements = self.collection_elements(field, document, lambda);
                match (var, body) {
                    (Some(var), Some(body)) => {
                        for element in &elements {
                            if self.eval(body, document, Some((var, element)))? {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                    _ => Ok(!elements.is_empty()),
                }
            }
            FilterExpr::All { field, var, body } => {
                let elements = self.collection_elements(field, document, lambda);
                for element in &elements {
                    if !self.eval(body, document, Some((var, element)))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterExpr::GeoIntersects { field, polygon } => {
                let value = document.get(field).cloned().unwrap_or(Value::Null);
                Ok(GeoPoint::from_value(&value)
                    .is_some_and(|point| point_in_polygon(&point, polygon)))
            }
        }
    }

    fn eval_cmp(
        &self,
        left: &Operand,
        op: CmpOp,
        right: &Operand,
        document: &Document,
        lambda: Option<(&str, &Value)>,
    ) -> SimulatorResult<bool> {
        let left_value = self.resolve(left, document, lambda);
        let right_value = self.resolve(right, document, lambda);

        // Null equality is well-defined; ordering against null is false.
        let ordering = compare(&left_value, &right_value);
        Ok(match op {
            CmpOp::Eq => ordering == Some(std::cmp::Ordering::Equal),
            CmpOp::Ne => ordering != Some(std::cmp::Ordering::Equal),
            CmpOp::Gt => ordering == Some(std::cmp::Ordering::Greater),
            CmpOp::Ge => matches!(
                ordering,
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
            CmpOp::Lt => ordering == Some(std::cmp::Ordering::Less),
            CmpOp::Le => matches!(
                ordering,
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
        })
    }

    /// Resolve an operand into a comparable value; for a comparison between a
    /// field and a string literal, both sides pass through the field's
    /// normalizer.
    fn resolve(
        &self,
        operand: &Operand,
        document: &Document,
        lambda: Option<(&str, &Value)>,
    ) -> Comparable {
        self.operand_value(operand, document, lambda)
    }

    fn operand_value(
        &self,
        operand: &Operand,
        document: &Document,
        lambda: Option<(&str, &Value)>,
    ) -> Comparable {
        match operand {
            Operand::Field(name) => {
                if let Some((var, element)) = lambda {
                    if name == var {
                        return self.json_to_comparable(None, element);
                    }
                }
                let value = document.get(name).cloned().unwrap_or(Value::Null);
                self.json_to_comparable(Some(name), &value)
            }
            Operand::Literal(literal) => match literal {
                FilterLiteral::String(s) => Comparable::Str(s.clone()),
                FilterLiteral::Number(n) => Comparable::Num(*n),
                FilterLiteral::Boolean(b) => Comparable::Bool(*b),
                FilterLiteral::Date(d) => Comparable::Date(*d),
                FilterLiteral::Null => Comparable::Null,
            },
            Operand::GeoDistance { field, point } => {
                let value = document.get(field).cloned().unwrap_or(Value::Null);
                GeoPoint::from_value(&value)
                    .map_or(Comparable::Null, |doc_point| {
                        Comparable::Num(doc_point.distance_km(point))
                    })
            }
        }
    }

    fn literal_value(&self, field: &str, literal: &FilterLiteral) -> Comparable {
        match literal {
            FilterLiteral::String(s) => Comparable::Str(self.normalize_for(field, s)),
            FilterLiteral::Number(n) => Comparable::Num(*n),
            FilterLiteral::Boolean(b) => Comparable::Bool(*b),
            FilterLiteral::Date(d) => Comparable::Date(*d),
            FilterLiteral::Null => Comparable::Null,
        }
    }

    fn json_to_comparable(&self, field: Option<&str>, value: &Value) -> Comparable {
        match value {
            Value::Null => Comparable::Null,
            Value::Bool(b) => Comparable::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Comparable::Null, Comparable::Num),
            Value::String(s) => {
                // Date fields compare chronologically.
                if let Some(name) = field {
                    if self
                        .schema
                        .field(name)
                        .is_some_and(|f| f.field_type == searchsim_core::schema::FieldType::DateTimeOffset)
                    {
                        if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                            return Comparable::Date(date);
                        }
                    }
                    return Comparable::Str(self.normalize_for(name, s));
                }
                if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                    return Comparable::Date(date);
                }
                Comparable::Str(s.clone())
            }
            Value::Array(_) | Value::Object(_) => Comparable::Null,
        }
    }

    /// Normalize a string for comparison against `field`, honoring its
    /// declared normalizer.
    fn normalize_for(&self, field: &str, value: &str) -> String {
        let normalizer = self.schema.field(field).and_then(|f| f.normalizer.as_deref());
        self.registry.normalize_for_field(normalizer, value)
    }

    fn collection_elements(
        &self,
        field: &str,
        document: &Document,
        lambda: Option<(&str, &Value)>,
    ) -> Vec<Value> {
        let _ = lambda;
        match document.get(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single.clone()],
        }
    }
}

/// Normalized comparable value.
#[derive(Debug, Clone, PartialEq)]
enum Comparable {
    Str(String),
    Num(f64),
    Bool(bool),
    Date(DateTime<FixedOffset>),
    Null,
}

impl Comparable {
    fn as_string(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn compare(left: &Comparable, right: &Comparable) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (left, right) {
        (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
        (Comparable::Null, _) | (_, Comparable::Null) => None,
        (Comparable::Str(a), Comparable::Str(b)) => Some(a.cmp(b)),
        (Comparable::Num(a), Comparable::Num(b)) => a.partial_cmp(b),
        (Comparable::Bool(a), Comparable::Bool(b)) => Some(a.cmp(b)),
        (Comparable::Date(a), Comparable::Date(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Ray-casting point-in-polygon test.
fn point_in_polygon(point: &GeoPoint, polygon: &[GeoPoint]) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (&polygon[i], &polygon[j]);
        if ((pi.lat > point.lat) != (pj.lat > point.lat))
            && (point.lon
                < (pj.lon - pi.lon) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lon)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
