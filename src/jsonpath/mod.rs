//! JSONPath subset used by splitting patterns and RML iterators
//!
//! Supported syntax:
//!
//! - `$` root, `.name`, `['name']` / `["name"]`, `[n]` (negative counts from the end)
//! - `[*]` / `.*` wildcards, `..name` / `..*` recursive descent
//! - filters `[?(@.a.b == "x")]`, `[?(@.a != 3)]` and existence `[?(@.a)]`
//!
//! Paths are parsed into an AST so they can be re-rendered with a different quote style
//! without changing their meaning (`JsonPath::parse(&p.render_with_quote('\'')) == p`).

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// JSONPath parse error
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid JSONPath '{expression}' at offset {position}: {reason}")]
pub struct JsonPathError {
    pub expression: String,
    pub position: usize,
    pub reason: String,
}

/// One step of a concrete location inside a JSON document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// Concrete location of a matched value
pub type Location = Vec<PathStep>;

/// A matched value together with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub location: Location,
    pub value: &'a Value,
}

/// Comparison operator inside a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Filter predicate evaluated against `@`
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Exists(Vec<String>),
    Compare {
        path: Vec<String>,
        op: CompareOp,
        value: Value,
    },
}

/// Selector applied to the children of the current node
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Name(String),
    Wildcard,
    Index(i64),
    Filter(Filter),
}

/// Path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Child(Selector),
    Descendant(Selector),
}

/// Parsed JSONPath expression
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse an expression
    pub fn parse(expression: &str) -> Result<Self, JsonPathError> {
        Parser::new(expression).parse()
    }

    /// Build a path from segments
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// `$[?(@.<key>=="<value>")]`, the iterator selecting entities of one type
    pub fn type_filter(key: &str, value: &str) -> Self {
        Self::from_segments(vec![Segment::Child(Selector::Filter(Filter::Compare {
            path: vec![key.to_string()],
            op: CompareOp::Eq,
            value: Value::String(value.to_string()),
        }))])
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Name of the last segment when it selects a fixed key
    pub fn leaf_name(&self) -> Option<&str> {
        match self.segments.last()? {
            Segment::Child(Selector::Name(name)) | Segment::Descendant(Selector::Name(name)) => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Evaluate against `root`, returning every match with its location
    pub fn find<'a>(&self, root: &'a Value) -> Vec<Match<'a>> {
        let mut current = vec![Match {
            location: Vec::new(),
            value: root,
        }];

        for segment in &self.segments {
            let mut next = Vec::new();
            for node in &current {
                match segment {
                    Segment::Child(selector) => {
                        apply_selector(&node.location, node.value, selector, &mut next);
                    }
                    Segment::Descendant(selector) => {
                        let mut stack = vec![(node.location.clone(), node.value)];
                        while let Some((location, value)) = stack.pop() {
                            apply_selector(&location, value, selector, &mut next);
                            let mut children = children_of(&location, value);
                            children.reverse();
                            stack.extend(children);
                        }
                    }
                }
            }
            current = next;
        }

        current
    }

    /// Evaluate and keep only the values
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        self.find(root).into_iter().map(|m| m.value).collect()
    }

    /// True when any name or string literal contains `quote`
    pub fn literals_contain(&self, quote: char) -> bool {
        self.segments.iter().any(|segment| {
            let selector = match segment {
                Segment::Child(s) | Segment::Descendant(s) => s,
            };
            match selector {
                Selector::Name(name) => name.contains(quote),
                Selector::Filter(Filter::Exists(path)) => path.iter().any(|k| k.contains(quote)),
                Selector::Filter(Filter::Compare { path, value, .. }) => {
                    path.iter().any(|k| k.contains(quote))
                        || value.as_str().is_some_and(|s| s.contains(quote))
                }
                Selector::Wildcard | Selector::Index(_) => false,
            }
        })
    }

    /// Render using `quote` (`'` or `"`) for every quoted name and string literal
    pub fn render_with_quote(&self, quote: char) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            match segment {
                Segment::Child(selector) => match selector {
                    Selector::Name(name) if is_plain_name(name) => {
                        out.push('.');
                        out.push_str(name);
                    }
                    Selector::Wildcard => out.push_str("[*]"),
                    other => render_bracket(other, quote, &mut out),
                },
                Segment::Descendant(selector) => {
                    out.push_str("..");
                    match selector {
                        Selector::Name(name) if is_plain_name(name) => out.push_str(name),
                        Selector::Wildcard => out.push('*'),
                        other => render_bracket(other, quote, &mut out),
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with_quote('"'))
    }
}

impl std::str::FromStr for JsonPath {
    type Err = JsonPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Resolve a dotted reference (`refRoom.value`) relative to `value`
pub fn resolve_reference<'a>(value: &'a Value, reference: &str) -> Option<&'a Value> {
    let reference = reference.trim_start_matches("$.").trim_start_matches('@');
    let reference = reference.trim_start_matches('.');
    if reference.is_empty() {
        return Some(value);
    }
    reference.split('.').try_fold(value, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_plain_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_str(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        if c == quote || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(quote);
    out
}

fn render_filter_path(path: &[String], quote: char, out: &mut String) {
    out.push('@');
    for key in path {
        if is_plain_name(key) {
            out.push('.');
            out.push_str(key);
        } else {
            out.push('[');
            out.push_str(&quote_str(key, quote));
            out.push(']');
        }
    }
}

fn render_bracket(selector: &Selector, quote: char, out: &mut String) {
    out.push('[');
    match selector {
        Selector::Name(name) => out.push_str(&quote_str(name, quote)),
        Selector::Wildcard => out.push('*'),
        Selector::Index(i) => out.push_str(&i.to_string()),
        Selector::Filter(Filter::Exists(path)) => {
            out.push_str("?(");
            render_filter_path(path, quote, out);
            out.push(')');
        }
        Selector::Filter(Filter::Compare { path, op, value }) => {
            out.push_str("?(");
            render_filter_path(path, quote, out);
            out.push_str(match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
            });
            match value {
                Value::String(s) => out.push_str(&quote_str(s, quote)),
                other => out.push_str(&other.to_string()),
            }
            out.push(')');
        }
    }
    out.push(']');
}

fn children_of<'a>(location: &Location, value: &'a Value) -> Vec<(Location, &'a Value)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (child_location(location, PathStep::Key(k.clone())), v))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (child_location(location, PathStep::Index(i)), v))
            .collect(),
        _ => Vec::new(),
    }
}

fn child_location(location: &Location, step: PathStep) -> Location {
    let mut child = location.clone();
    child.push(step);
    child
}

fn apply_selector<'a>(
    location: &Location,
    value: &'a Value,
    selector: &Selector,
    out: &mut Vec<Match<'a>>,
) {
    match selector {
        Selector::Name(name) => {
            if let Some(child) = value.as_object().and_then(|m| m.get(name)) {
                out.push(Match {
                    location: child_location(location, PathStep::Key(name.clone())),
                    value: child,
                });
            }
        }
        Selector::Wildcard => {
            out.extend(
                children_of(location, value)
                    .into_iter()
                    .map(|(location, value)| Match { location, value }),
            );
        }
        Selector::Index(index) => {
            if let Some(items) = value.as_array() {
                let len = items.len() as i64;
                let resolved = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&resolved) {
                    let i = resolved as usize;
                    out.push(Match {
                        location: child_location(location, PathStep::Index(i)),
                        value: &items[i],
                    });
                }
            }
        }
        Selector::Filter(filter) => {
            out.extend(
                children_of(location, value)
                    .into_iter()
                    .filter(|(_, child)| filter_matches(filter, child))
                    .map(|(location, value)| Match { location, value }),
            );
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |node, key| node.as_object().and_then(|m| m.get(key)))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn filter_matches(filter: &Filter, candidate: &Value) -> bool {
    match filter {
        Filter::Exists(path) => lookup(candidate, path).is_some(),
        Filter::Compare { path, op, value } => match lookup(candidate, path) {
            Some(found) => match op {
                CompareOp::Eq => values_equal(found, value),
                CompareOp::Ne => !values_equal(found, value),
            },
            None => false,
        },
    }
}

struct Parser<'a> {
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            chars: expression.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> JsonPathError {
        JsonPathError {
            expression: self.expression.to_string(),
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, expected: char) -> Result<(), JsonPathError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of input"))),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<JsonPath, JsonPathError> {
        self.expect('$')?;
        let mut segments = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let selector = match self.peek() {
                        Some('*') => {
                            self.pos += 1;
                            Selector::Wildcard
                        }
                        Some('[') => self.parse_bracket()?,
                        _ => Selector::Name(self.parse_dot_name()?),
                    };
                    segments.push(Segment::Descendant(selector));
                }
                '.' => {
                    self.pos += 1;
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        segments.push(Segment::Child(Selector::Wildcard));
                    } else {
                        segments.push(Segment::Child(Selector::Name(self.parse_dot_name()?)));
                    }
                }
                '[' => {
                    let selector = self.parse_bracket()?;
                    segments.push(Segment::Child(selector));
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            }
        }

        Ok(JsonPath { segments })
    }

    fn parse_dot_name(&mut self) -> Result<String, JsonPathError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, '.' | '[' | ']' | '(' | ')') && !c.is_whitespace())
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a member name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_quoted(&mut self) -> Result<String, JsonPathError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn parse_bracket(&mut self) -> Result<Selector, JsonPathError> {
        self.expect('[')?;
        self.skip_ws();
        let selector = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Selector::Wildcard
            }
            Some('\'' | '"') => Selector::Name(self.parse_quoted()?),
            Some('?') => {
                self.pos += 1;
                Selector::Filter(self.parse_filter()?)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.pos += 1;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                Selector::Index(
                    text.parse()
                        .map_err(|_| self.error(format!("invalid index '{text}'")))?,
                )
            }
            _ => return Err(self.error("expected '*', a quoted name, an index or a filter")),
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(selector)
    }

    fn parse_filter(&mut self) -> Result<Filter, JsonPathError> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        self.expect('@')?;

        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    path.push(self.parse_filter_name()?);
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    path.push(self.parse_quoted()?);
                    self.skip_ws();
                    self.expect(']')?;
                }
                _ => break,
            }
        }
        if path.is_empty() {
            return Err(self.error("filter must test a member of '@'"));
        }

        self.skip_ws();
        let filter = match (self.peek(), self.peek_at(1)) {
            (Some('='), Some('=')) | (Some('!'), Some('=')) => {
                let op = if self.peek() == Some('=') {
                    CompareOp::Eq
                } else {
                    CompareOp::Ne
                };
                self.pos += 2;
                self.skip_ws();
                let value = self.parse_literal()?;
                Filter::Compare { path, op, value }
            }
            _ => Filter::Exists(path),
        };

        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_filter_name(&mut self) -> Result<String, JsonPathError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| {
            !matches!(c, '.' | '[' | ']' | '(' | ')' | '=' | '!') && !c.is_whitespace()
        }) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a member name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_literal(&mut self) -> Result<Value, JsonPathError> {
        if matches!(self.peek(), Some('\'' | '"')) {
            return Ok(Value::String(self.parse_quoted()?));
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, ')') && !c.is_whitespace())
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<Value>(&text)
            .ok()
            .filter(|v| !v.is_array() && !v.is_object())
            .ok_or_else(|| self.error(format!("invalid literal '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rooms() -> Value {
        json!([
            {"id": "Room1", "type": "Room", "fanSpeed": {"type": "Number", "value": 3}},
            {"id": "Sensor1", "type": "TemperatureSensor", "temperature": {"value": 21.5}},
            {"id": "Room2", "type": "Room", "fanSpeed": {"type": "Number", "value": 1}}
        ])
    }

    #[test]
    fn test_type_filter_selects_entities() {
        let data = rooms();
        let path = JsonPath::parse(r#"$[?(@.type=="Room")]"#).unwrap();

        let ids: Vec<_> = path.select(&data).iter().map(|v| v["id"].clone()).collect();
        assert_eq!(ids, vec![json!("Room1"), json!("Room2")]);
        assert_eq!(path, JsonPath::type_filter("type", "Room"));
    }

    #[test]
    fn test_find_returns_locations() {
        let data = rooms();
        let path = JsonPath::parse("$[*].fanSpeed").unwrap();

        let matches = path.find(&data);
        assert_eq!(matches.len(), 2);
        assert_eq!(
            matches[0].location,
            vec![PathStep::Index(0), PathStep::Key("fanSpeed".to_string())]
        );
        assert_eq!(matches[1].value["value"], json!(1));
        assert_eq!(path.leaf_name(), Some("fanSpeed"));
    }

    #[test]
    fn test_recursive_descent() {
        let data = rooms();
        let path = JsonPath::parse("$..value").unwrap();

        assert_eq!(path.select(&data), vec![&json!(3), &json!(21.5), &json!(1)]);
    }

    #[test]
    fn test_index_and_bracket_names() {
        let data = rooms();

        let last = JsonPath::parse("$[-1]['id']").unwrap();
        assert_eq!(last.select(&data), vec![&json!("Room2")]);

        let first = JsonPath::parse(r#"$[0]["fanSpeed"].value"#).unwrap();
        assert_eq!(first.select(&data), vec![&json!(3)]);
    }

    #[test]
    fn test_exists_and_not_equal_filters() {
        let data = rooms();

        let with_temp = JsonPath::parse("$[?(@.temperature)]").unwrap();
        assert_eq!(with_temp.select(&data).len(), 1);

        let not_room = JsonPath::parse("$[?(@.type != 'Room')].id").unwrap();
        assert_eq!(not_room.select(&data), vec![&json!("Sensor1")]);

        let numeric = JsonPath::parse("$[?(@.fanSpeed.value == 3)].id").unwrap();
        assert_eq!(numeric.select(&data), vec![&json!("Room1")]);
    }

    #[test]
    fn test_render_preserves_ast() {
        let path = JsonPath::parse(r#"$[?(@.type=="Room's")]..['odd key'][2]"#).unwrap();

        for quote in ['\'', '"'] {
            let rendered = path.render_with_quote(quote);
            assert_eq!(JsonPath::parse(&rendered).unwrap(), path, "{rendered}");
        }
        assert!(path.literals_contain('\''));
        assert!(!path.literals_contain('"'));
    }

    #[test]
    fn test_display_matches_iterator_form() {
        let path = JsonPath::type_filter("type", "Room");
        assert_eq!(path.to_string(), r#"$[?(@.type=="Room")]"#);
        assert_eq!(path.render_with_quote('\''), "$[?(@.type=='Room')]");
    }

    #[test]
    fn test_parse_errors() {
        assert!(JsonPath::parse("type").is_err());
        assert!(JsonPath::parse("$[?(@.type==\"Room\"]").is_err());
        assert!(JsonPath::parse("$[").is_err());

        let err = JsonPath::parse("$.a[x]").unwrap_err();
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_resolve_reference() {
        let value = json!({"refRoom": {"value": "Room1"}, "list": ["a", "b"]});

        assert_eq!(resolve_reference(&value, "refRoom.value"), Some(&json!("Room1")));
        assert_eq!(resolve_reference(&value, "list.1"), Some(&json!("b")));
        assert_eq!(resolve_reference(&value, "missing"), None);
    }
}
