//! Selector parsing and matching for in-memory pages
//!
//! Supported grammar is a practical CSS subset plus the `text=` engine:
//! type and universal selectors, `#id`, `.class`, attribute presence and
//! `=`, `*=`, `^=`, `$=` operators, `:nth-child(n)`, `:nth-of-type(n)`,
//! `:has-text("t")`, descendant and child combinators, and `,` lists.

use crate::errors::DomError;

/// Read access to a node tree, addressed by arena index
pub trait NodeView {
    fn tag(&self, node: usize) -> &str;
    fn attribute(&self, node: usize, name: &str) -> Option<&str>;
    fn parent(&self, node: usize) -> Option<usize>;
    fn children(&self, node: usize) -> &[usize];
    /// 1-based position among the parent's children, 0 for the root
    fn child_index(&self, node: usize) -> usize;
    /// 1-based position among same-tag siblings, 0 for the root
    fn type_index(&self, node: usize) -> usize;
    /// Whitespace-normalized text content, descendants included
    fn text(&self, node: usize) -> String;
}

/// Parsed selector list
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq)]
enum Alternative {
    Css(Complex),
    Text(TextQuery),
}

#[derive(Debug, Clone, PartialEq)]
struct TextQuery {
    value: String,
    exact: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    simple: Vec<Simple>,
}

#[derive(Debug, Clone, PartialEq)]
enum Simple {
    Id(String),
    Class(String),
    Attr {
        name: String,
        op: AttrOp,
        value: String,
    },
    NthChild(usize),
    NthOfType(usize),
    HasText(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Contains,
    Prefix,
    Suffix,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, DomError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomError::invalid_selector(input, "empty selector"));
        }

        let mut alternatives = Vec::new();
        for part in split_top_level(trimmed, ',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(DomError::invalid_selector(input, "empty selector in list"));
            }
            let alternative = match part.strip_prefix("text=") {
                Some(rest) => Alternative::Text(parse_text_query(input, rest)?),
                None => Alternative::Css(Parser::new(input, part).complex()?),
            };
            alternatives.push(alternative);
        }

        Ok(Self {
            source: input.to_string(),
            alternatives,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches<V: NodeView + ?Sized>(&self, view: &V, node: usize) -> bool {
        self.alternatives.iter().any(|alt| match alt {
            Alternative::Css(complex) => complex.matches_at(view, node, complex.compounds.len() - 1),
            Alternative::Text(query) => {
                query.matches(view, node)
                    && !view
                        .children(node)
                        .iter()
                        .any(|&child| query.matches(view, child))
            }
        })
    }
}

impl TextQuery {
    fn matches<V: NodeView + ?Sized>(&self, view: &V, node: usize) -> bool {
        let text = view.text(node);
        if self.exact {
            text == self.value
        } else {
            text.to_lowercase().contains(&self.value)
        }
    }
}

impl Complex {
    fn matches_at<V: NodeView + ?Sized>(&self, view: &V, node: usize, idx: usize) -> bool {
        if !self.compounds[idx].matches(view, node) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => view
                .parent(node)
                .is_some_and(|parent| self.matches_at(view, parent, idx - 1)),
            Combinator::Descendant => {
                let mut current = view.parent(node);
                while let Some(ancestor) = current {
                    if self.matches_at(view, ancestor, idx - 1) {
                        return true;
                    }
                    current = view.parent(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches<V: NodeView + ?Sized>(&self, view: &V, node: usize) -> bool {
        if let Some(tag) = &self.tag {
            if !view.tag(node).eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.simple.iter().all(|simple| simple.matches(view, node))
    }
}

impl Simple {
    fn matches<V: NodeView + ?Sized>(&self, view: &V, node: usize) -> bool {
        match self {
            Simple::Id(id) => view.attribute(node, "id") == Some(id.as_str()),
            Simple::Class(class) => view
                .attribute(node, "class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == class)),
            Simple::Attr { name, op, value } => {
                let Some(actual) = view.attribute(node, name) else {
                    return false;
                };
                match op {
                    AttrOp::Exists => true,
                    AttrOp::Equals => actual == value,
                    AttrOp::Contains => !value.is_empty() && actual.contains(value.as_str()),
                    AttrOp::Prefix => !value.is_empty() && actual.starts_with(value.as_str()),
                    AttrOp::Suffix => !value.is_empty() && actual.ends_with(value.as_str()),
                }
            }
            Simple::NthChild(n) => view.child_index(node) == *n,
            Simple::NthOfType(n) => view.type_index(node) == *n,
            Simple::HasText(text) => view.text(node).to_lowercase().contains(text.as_str()),
        }
    }
}

fn parse_text_query(input: &str, rest: &str) -> Result<TextQuery, DomError> {
    let rest = rest.trim();
    for quote in ['"', '\''] {
        if rest.starts_with(quote) {
            if rest.len() < 2 || !rest.ends_with(quote) {
                return Err(DomError::invalid_selector(input, "unterminated text literal"));
            }
            let literal = unescape_literal(&rest[1..rest.len() - 1])
                .ok_or_else(|| DomError::invalid_selector(input, "unterminated text literal"))?;
            return Ok(TextQuery {
                value: normalize_whitespace(&literal),
                exact: true,
            });
        }
    }
    if rest.is_empty() {
        return Err(DomError::invalid_selector(input, "empty text query"));
    }
    Ok(TextQuery {
        value: normalize_whitespace(rest).to_lowercase(),
        exact: false,
    })
}

/// Resolve `\x` escapes inside a quoted literal; `None` when a trailing
/// backslash swallowed the closing quote
fn unescape_literal(inner: &str) -> Option<String> {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

/// Collapse runs of whitespace into single spaces and trim
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on `sep` outside quotes, brackets and parentheses
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '[') | (None, '(') => depth += 1,
            (None, ']') | (None, ')') => depth -= 1,
            (None, c) if c == sep && depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, part: &str) -> Self {
        Self {
            input,
            chars: part.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DomError {
        DomError::invalid_selector(self.input, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn complex(&mut self) -> Result<Complex, DomError> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();
        let mut pending: Option<Combinator> = None;

        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('>') => {
                    if compounds.is_empty() || pending.is_some() {
                        return Err(self.error("unexpected '>'"));
                    }
                    self.bump();
                    pending = Some(Combinator::Child);
                }
                Some(_) => {
                    if !compounds.is_empty() {
                        combinators.push(pending.take().unwrap_or(Combinator::Descendant));
                    }
                    compounds.push(self.compound()?);
                }
            }
        }

        if pending.is_some() {
            return Err(self.error("dangling combinator"));
        }
        if compounds.is_empty() {
            return Err(self.error("empty selector"));
        }
        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> Result<Compound, DomError> {
        let mut compound = Compound::default();
        let mut universal = false;

        match self.peek() {
            Some('*') => {
                self.bump();
                universal = true;
            }
            Some(ch) if is_ident_start(ch) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    compound.simple.push(Simple::Id(self.ident()?));
                }
                Some('.') => {
                    self.bump();
                    compound.simple.push(Simple::Class(self.ident()?));
                }
                Some('[') => {
                    self.bump();
                    compound.simple.push(self.attribute()?);
                }
                Some(':') => {
                    self.bump();
                    compound.simple.push(self.pseudo()?);
                }
                None | Some('>') => break,
                Some(ch) if ch.is_whitespace() => break,
                Some(ch) => return Err(self.error(format!("unexpected character '{}'", ch))),
            }
        }

        if compound.tag.is_none() && compound.simple.is_empty() && !universal {
            return Err(self.error("expected a selector"));
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, DomError> {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.bump();
                match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(self.error("dangling escape")),
                }
            } else if is_ident_char(ch) {
                out.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.error("expected an identifier"));
        }
        Ok(out)
    }

    fn quoted(&mut self, quote: char) -> Result<String, DomError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some(ch) => out.push(ch),
                    None => return Err(self.error("unterminated string")),
                },
                Some(ch) if ch == quote => return Ok(out),
                Some(ch) => out.push(ch),
            }
        }
    }

    fn attribute(&mut self) -> Result<Simple, DomError> {
        self.skip_whitespace();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_whitespace();

        let op = match self.bump() {
            Some(']') => {
                return Ok(Simple::Attr {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                })
            }
            Some('=') => AttrOp::Equals,
            Some(prefix @ ('*' | '^' | '$')) => {
                if self.bump() != Some('=') {
                    return Err(self.error("expected '=' in attribute selector"));
                }
                match prefix {
                    '*' => AttrOp::Contains,
                    '^' => AttrOp::Prefix,
                    _ => AttrOp::Suffix,
                }
            }
            _ => return Err(self.error("malformed attribute selector")),
        };

        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.quoted(quote)?
            }
            _ => {
                let mut raw = String::new();
                while let Some(ch) = self.peek() {
                    if ch == ']' || ch.is_whitespace() {
                        break;
                    }
                    raw.push(ch);
                    self.bump();
                }
                if raw.is_empty() {
                    return Err(self.error("missing attribute value"));
                }
                raw
            }
        };

        self.skip_whitespace();
        if self.bump() != Some(']') {
            return Err(self.error("unterminated attribute selector"));
        }
        Ok(Simple::Attr { name, op, value })
    }

    fn pseudo(&mut self) -> Result<Simple, DomError> {
        let name = self.ident()?.to_ascii_lowercase();
        if self.bump() != Some('(') {
            return Err(self.error(format!("pseudo-class :{} needs an argument", name)));
        }

        let mut arg = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated pseudo-class argument")),
                Some(')') => break,
                Some(quote @ ('"' | '\'')) => arg.push_str(&self.quoted(quote)?),
                Some(ch) => arg.push(ch),
            }
        }
        let arg = arg.trim();

        match name.as_str() {
            "nth-child" => Ok(Simple::NthChild(self.position(arg)?)),
            "nth-of-type" => Ok(Simple::NthOfType(self.position(arg)?)),
            "has-text" => {
                if arg.is_empty() {
                    return Err(self.error(":has-text needs text"));
                }
                Ok(Simple::HasText(normalize_whitespace(arg).to_lowercase()))
            }
            other => Err(self.error(format!("unsupported pseudo-class :{}", other))),
        }
    }

    fn position(&self, arg: &str) -> Result<usize, DomError> {
        match arg.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(self.error(format!("unsupported position '{}'", arg))),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '-' || !ch.is_ascii()
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-' || !ch.is_ascii()
}
