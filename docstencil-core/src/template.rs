//! Template parsing.
//!
//! A template is relaxed document notation (unquoted keys, single-quoted strings, regex literals)
//! in which a marker character, `#` by default, stands for an argument supplied at compile time.
//! Parsing classifies every marker by where it appears:
//!
//! - `{name: #}` - a [`PlaceholderContext::Value`], substituted as a typed value
//! - `{_id: #oid}`, `{_id: #id}` or `{_id: {$oid: #}}` - a [`PlaceholderContext::ObjectId`]
//! - `{"tags.#": 1}` or `{items.#.qty: 1}` - a [`PlaceholderContext::KeyFragment`]
//! - `{name: '^#'}` or `{name: /^#/i}` - an [`PlaceholderContext::Embedded`] string fragment
//!
//! A marker preceded by a backslash is kept as a literal character.
//!
//! The parsed [`Template`] keeps the structure of the document with placeholders left open, so
//! compilation never round-trips argument values through text.

use std::fmt;

use bson::{Bson, oid::ObjectId};

use crate::error::{StencilError, StencilResult};

/// The default placeholder marker.
pub const DEFAULT_MARKER: char = '#';

const ID_MARKER_SUFFIXES: [&str; 2] = ["oid", "id"];
const REGEX_FLAGS: &str = "imsxlu";
const MAX_NESTING: usize = 128;

/// The syntactic position a placeholder occupies, which decides how its argument is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderContext {
    /// A whole value; the argument is inserted as a typed value or nested document.
    Value,
    /// A whole value that must be rendered as an ObjectId.
    ObjectId,
    /// Part of a key; the argument is concatenated into the key name.
    KeyFragment,
    /// Part of a string or regex literal; the argument's string form is concatenated.
    Embedded,
}

impl fmt::Display for PlaceholderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaceholderContext::Value => "a value",
            PlaceholderContext::ObjectId => "an object id",
            PlaceholderContext::KeyFragment => "a key fragment",
            PlaceholderContext::Embedded => "an embedded string",
        })
    }
}

/// A placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Index of the argument bound to this placeholder (order of appearance).
    pub index: usize,
    /// Byte offset of the marker in the template source.
    pub position: usize,
    /// Length in bytes of the marker, including an id suffix such as `oid`.
    pub len: usize,
    /// Syntactic context of the placeholder.
    pub context: PlaceholderContext,
}

/// One unit of a template's token sequence, see [`Template::spans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span<'a> {
    /// Literal template text, verbatim.
    Literal(&'a str),
    /// A placeholder.
    Placeholder(&'a Placeholder),
}

/// A piece of a key, string or regex: literal text or a placeholder to splice in.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Literal(String),
    Placeholder(usize),
}

/// Parsed template structure with placeholders left open.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Object(Vec<(Vec<Segment>, Node)>),
    Array(Vec<Node>),
    Literal(Bson),
    Placeholder(usize),
    Text(Vec<Segment>),
    Regex { pattern: Vec<Segment>, options: String },
}

/// A parsed, immutable query template.
///
/// Templates are independent of any argument values and can be shared between threads and
/// compiled any number of times.
///
/// # Example
///
/// ```ignore
/// use docstencil_core::template::{Template, PlaceholderContext};
///
/// let template = Template::parse("{name: #, _id: #oid}")?;
/// assert_eq!(template.placeholder_count(), 2);
/// assert_eq!(template.placeholders()[1].context, PlaceholderContext::ObjectId);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    marker: char,
    root: Node,
    placeholders: Vec<Placeholder>,
}

impl Template {
    /// Parses a template using the default `#` marker.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::MalformedTemplate`] when the template is not valid document
    /// notation or a marker sits in an invalid position.
    pub fn parse(source: &str) -> StencilResult<Self> {
        Self::parse_with_marker(source, DEFAULT_MARKER)
    }

    /// Parses a template using a custom marker character.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::Initialization`] for a marker that collides with the notation,
    /// as [`QueryConfig::validate`](crate::config::QueryConfig::validate) does, and
    /// [`StencilError::MalformedTemplate`] for an invalid template.
    pub fn parse_with_marker(source: &str, marker: char) -> StencilResult<Self> {
        check_marker(marker).map_err(StencilError::Initialization)?;

        Parser::new(source, marker).parse()
    }

    /// Returns the template source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the marker character this template was parsed with.
    pub fn marker(&self) -> char {
        self.marker
    }

    /// Returns the placeholders in order of appearance.
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Returns the number of arguments this template must be compiled with.
    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Returns the template as a token sequence: literal text spans, verbatim, interleaved with
    /// placeholders.
    pub fn spans(&self) -> Vec<Span<'_>> {
        let mut spans = Vec::with_capacity(self.placeholders.len() * 2 + 1);
        let mut cursor = 0;

        for placeholder in &self.placeholders {
            if placeholder.position > cursor {
                spans.push(Span::Literal(&self.source[cursor..placeholder.position]));
            }
            spans.push(Span::Placeholder(placeholder));
            cursor = placeholder.position + placeholder.len;
        }

        if cursor < self.source.len() {
            spans.push(Span::Literal(&self.source[cursor..]));
        }

        spans
    }

    pub(crate) fn root(&self) -> &Node {
        &self.root
    }
}

/// Checks that `marker` can be told apart from the surrounding notation.
pub(crate) fn check_marker(marker: char) -> Result<(), String> {
    if marker.is_whitespace()
        || marker.is_alphanumeric()
        || "{}[]:,\"'/\\-.$_".contains(marker)
    {
        return Err(format!("'{marker}' cannot be used as a placeholder marker"));
    }

    Ok(())
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '-')
}

#[derive(Default)]
struct SegmentsBuilder {
    segments: Vec<Segment>,
    text: String,
}

impl SegmentsBuilder {
    fn push_char(&mut self, c: char) {
        self.text.push(c);
    }

    fn push_placeholder(&mut self, index: usize) {
        self.flush();
        self.segments.push(Segment::Placeholder(index));
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.segments
                .push(Segment::Literal(std::mem::take(&mut self.text)));
        }
    }

    fn finish(mut self) -> Vec<Segment> {
        self.flush();
        self.segments
    }
}

struct Parser<'t> {
    source: &'t str,
    pos: usize,
    marker: char,
    placeholders: Vec<Placeholder>,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(source: &'t str, marker: char) -> Self {
        Self {
            source,
            pos: 0,
            marker,
            placeholders: Vec::new(),
            depth: 0,
        }
    }

    fn parse(mut self) -> StencilResult<Template> {
        self.skip_ws();

        let root = match self.peek() {
            Some('{') | Some('[') => self.parse_value()?,
            Some(c) if c == self.marker => {
                let root = self.parse_value()?;
                if self.placeholders[0].context == PlaceholderContext::ObjectId {
                    return Err(self.error_at(0, "an object id placeholder cannot be the whole template"));
                }
                root
            }
            None => return Err(self.error("empty template")),
            Some(_) => {
                return Err(self.error("template must be a document, an array or a placeholder"));
            }
        };

        self.skip_ws();
        if self.pos < self.source.len() {
            return Err(self.error("unexpected trailing input"));
        }

        Ok(Template {
            source: self.source.to_string(),
            marker: self.marker,
            root,
            placeholders: self.placeholders,
        })
    }

    fn parse_value(&mut self) -> StencilResult<Node> {
        match self.peek() {
            Some(open @ ('{' | '[')) => {
                if self.depth == MAX_NESTING {
                    return Err(self.error(format!("documents nest deeper than {MAX_NESTING} levels")));
                }
                self.depth += 1;
                let node = if open == '{' { self.parse_object() } else { self.parse_array() };
                self.depth -= 1;
                node
            }
            Some(quote @ ('"' | '\'')) => {
                let segments = self.parse_quoted(quote, PlaceholderContext::Embedded)?;
                Ok(match segments.as_slice() {
                    [] => Node::Literal(Bson::String(String::new())),
                    [Segment::Literal(text)] => Node::Literal(Bson::String(text.clone())),
                    _ => Node::Text(segments),
                })
            }
            Some('/') => self.parse_regex(),
            Some(c) if c == self.marker => self.parse_value_placeholder(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() => self.parse_keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{c}' where a value was expected"))),
            None => Err(self.error("unexpected end of template, expected a value")),
        }
    }

    fn parse_object(&mut self) -> StencilResult<Node> {
        let open = self.pos;
        self.bump();

        let mut members = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Node::Object(members));
        }

        loop {
            self.skip_ws();
            let key = self.parse_key()?;

            self.skip_ws();
            match self.peek() {
                Some(':') => self.bump(),
                None => return Err(self.error_at(open, "unclosed '{'")),
                Some(_) => return Err(self.error("expected ':' after key")),
            };

            self.skip_ws();
            let value = self.parse_value()?;
            members.push((key, value));

            self.skip_ws();
            match self.peek() {
                Some(',') => self.bump(),
                Some('}') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error_at(open, "unclosed '{'")),
                Some(_) => return Err(self.error("expected ',' or '}'")),
            };
        }

        self.rewrite_object_id(open, members)
    }

    /// Turns `{$oid: "<hex>"}` into an ObjectId literal and `{$oid: #}` into an id placeholder.
    fn rewrite_object_id(&mut self, open: usize, mut members: Vec<(Vec<Segment>, Node)>) -> StencilResult<Node> {
        let is_oid = members.len() == 1
            && matches!(members[0].0.as_slice(), [Segment::Literal(key)] if key == "$oid");
        if !is_oid {
            return Ok(Node::Object(members));
        }

        match members.pop().map(|(_, value)| value) {
            Some(Node::Literal(Bson::String(hex))) => ObjectId::parse_str(&hex)
                .map(|oid| Node::Literal(Bson::ObjectId(oid)))
                .map_err(|_| self.error_at(open, format!("invalid $oid literal '{hex}'"))),
            Some(Node::Placeholder(index)) => {
                self.placeholders[index].context = PlaceholderContext::ObjectId;
                Ok(Node::Placeholder(index))
            }
            _ => Err(self.error_at(open, "$oid expects a hex string or a placeholder")),
        }
    }

    fn parse_array(&mut self) -> StencilResult<Node> {
        let open = self.pos;
        self.bump();

        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Node::Array(items));
        }

        loop {
            self.skip_ws();
            items.push(self.parse_value()?);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.bump(),
                Some(']') => {
                    self.bump();
                    break;
                }
                None => return Err(self.error_at(open, "unclosed '['")),
                Some(_) => return Err(self.error("expected ',' or ']'")),
            };
        }

        Ok(Node::Array(items))
    }

    fn parse_key(&mut self) -> StencilResult<Vec<Segment>> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => self.parse_quoted(quote, PlaceholderContext::KeyFragment),
            Some(c) if is_key_char(c) || c == self.marker || c == '\\' => self.parse_unquoted_key(),
            Some(c) => Err(self.error(format!("unexpected character '{c}' where a key was expected"))),
            None => Err(self.error("unexpected end of template, expected a key")),
        }
    }

    fn parse_unquoted_key(&mut self) -> StencilResult<Vec<Segment>> {
        let mut segments = SegmentsBuilder::default();

        while let Some(c) = self.peek() {
            if c == '\\' {
                if self.peek_second() != Some(self.marker) {
                    return Err(self.error("unexpected '\\' in key"));
                }
                self.bump();
                self.bump();
                segments.push_char(self.marker);
            } else if c == self.marker {
                let index = self.push_placeholder(self.pos, c.len_utf8(), PlaceholderContext::KeyFragment);
                self.bump();
                segments.push_placeholder(index);
            } else if is_key_char(c) {
                self.bump();
                segments.push_char(c);
            } else {
                break;
            }
        }

        Ok(segments.finish())
    }

    fn parse_quoted(&mut self, quote: char, context: PlaceholderContext) -> StencilResult<Vec<Segment>> {
        let open = self.pos;
        self.bump();

        let mut segments = SegmentsBuilder::default();
        loop {
            match self.peek() {
                None => return Err(self.error_at(open, "unterminated string")),
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let escaped = self.parse_escape()?;
                    segments.push_char(escaped);
                }
                Some(c) if c == self.marker => {
                    let index = self.push_placeholder(self.pos, c.len_utf8(), context);
                    self.bump();
                    segments.push_placeholder(index);
                }
                Some(c) => {
                    self.bump();
                    segments.push_char(c);
                }
            }
        }

        Ok(segments.finish())
    }

    fn parse_escape(&mut self) -> StencilResult<char> {
        let escape = self.pos;
        let escaped = match self.peek() {
            Some('"') => '"',
            Some('\'') => '\'',
            Some('\\') => '\\',
            Some('/') => '/',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('u') => {
                self.bump();
                let digits = self
                    .source
                    .get(self.pos..self.pos + 4)
                    .ok_or_else(|| self.error_at(escape, "truncated unicode escape"))?;
                let code = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error_at(escape, format!("invalid unicode escape '\\u{digits}'")))?;
                self.pos += 4;
                return Ok(code);
            }
            Some(c) if c == self.marker => c,
            Some(c) => return Err(self.error(format!("invalid escape '\\{c}'"))),
            None => return Err(self.error("unterminated escape sequence")),
        };
        self.bump();

        Ok(escaped)
    }

    fn parse_regex(&mut self) -> StencilResult<Node> {
        let open = self.pos;
        self.bump();

        let mut pattern = SegmentsBuilder::default();
        loop {
            match self.peek() {
                None => return Err(self.error_at(open, "unterminated regular expression")),
                Some('/') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some('/') => pattern.push_char('/'),
                        Some(c) if c == self.marker => pattern.push_char(c),
                        Some(c) => {
                            pattern.push_char('\\');
                            pattern.push_char(c);
                        }
                        None => return Err(self.error_at(open, "unterminated regular expression")),
                    }
                    self.bump();
                }
                Some(c) if c == self.marker => {
                    let index = self.push_placeholder(self.pos, c.len_utf8(), PlaceholderContext::Embedded);
                    self.bump();
                    pattern.push_placeholder(index);
                }
                Some(c) => {
                    self.bump();
                    pattern.push_char(c);
                }
            }
        }

        let mut options = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_alphabetic) {
            if !REGEX_FLAGS.contains(c) {
                return Err(self.error(format!("invalid regular expression flag '{c}'")));
            }
            self.bump();
            options.push(c);
        }

        Ok(Node::Regex {
            pattern: pattern.finish(),
            options,
        })
    }

    fn parse_value_placeholder(&mut self) -> StencilResult<Node> {
        let position = self.pos;
        self.bump();

        let mut context = PlaceholderContext::Value;
        for suffix in ID_MARKER_SUFFIXES {
            let terminated = self.source[self.pos..]
                .strip_prefix(suffix)
                .is_some_and(|after| after.chars().next().is_none_or(|c| !is_key_char(c)));
            if terminated {
                self.pos += suffix.len();
                context = PlaceholderContext::ObjectId;
                break;
            }
        }

        if let Some(c) = self.peek() {
            if is_key_char(c) || c == self.marker || c == '"' || c == '\'' {
                return Err(self.error(format!("unexpected '{c}' after placeholder")));
            }
        }

        let index = self.push_placeholder(position, self.pos - position, context);

        Ok(Node::Placeholder(index))
    }

    fn parse_number(&mut self) -> StencilResult<Node> {
        let start = self.pos;

        if self.peek() == Some('-') {
            self.bump();
        }
        self.expect_digits(start)?;

        let mut float = false;
        if self.peek() == Some('.') {
            self.bump();
            float = true;
            self.expect_digits(start)?;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            float = true;
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.expect_digits(start)?;
        }

        if let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == self.marker {
                return Err(self.error(format!("unexpected '{c}' after number")));
            }
        }

        let text = &self.source[start..self.pos];
        let value = if float {
            text.parse::<f64>().map(Bson::Double).ok()
        } else {
            match text.parse::<i64>() {
                Ok(n) => Some(i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32)),
                Err(_) => text.parse::<f64>().map(Bson::Double).ok(),
            }
        };

        value
            .map(Node::Literal)
            .ok_or_else(|| self.error_at(start, format!("invalid number '{text}'")))
    }

    fn expect_digits(&mut self, start: usize) -> StencilResult<()> {
        let before = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }

        if self.pos == before {
            return Err(self.error_at(start, "invalid number"));
        }

        Ok(())
    }

    fn parse_keyword(&mut self) -> StencilResult<Node> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }

        match &self.source[start..self.pos] {
            "true" => Ok(Node::Literal(Bson::Boolean(true))),
            "false" => Ok(Node::Literal(Bson::Boolean(false))),
            "null" => Ok(Node::Literal(Bson::Null)),
            word => Err(self.error_at(start, format!("unknown literal '{word}'"))),
        }
    }

    fn push_placeholder(&mut self, position: usize, len: usize, context: PlaceholderContext) -> usize {
        let index = self.placeholders.len();
        self.placeholders.push(Placeholder {
            index,
            position,
            len,
            context,
        });

        index
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.source[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, reason: impl Into<String>) -> StencilError {
        self.error_at(self.pos, reason)
    }

    fn error_at(&self, position: usize, reason: impl Into<String>) -> StencilError {
        StencilError::MalformedTemplate {
            template: self.source.to_string(),
            position,
            reason: reason.into(),
        }
    }
}
