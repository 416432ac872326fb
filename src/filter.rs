//! LDAP-style remote-service filters (RFC 1960 subset).
//!
//! Supports `&`, `|`, `!`, equality, presence (`attr=*`), substrings
//! (`attr=a*b*`), approximate match (`~=`) and ordering (`>=`, `<=`).
//! Attribute names match property keys case-insensitively.

use std::fmt;
use std::str::FromStr;

use crate::properties::{Properties, PropertyValue};
use crate::{Error, Result};

/// Deepest nesting of `&`, `|` and `!` accepted by [`Filter::parse`].
pub const MAX_DEPTH: usize = 64;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// Any sub-filter must match.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`
    Equal(String, String),
    /// `(attr~=value)`
    Approx(String, String),
    /// `(attr>=value)`
    GreaterEq(String, String),
    /// `(attr<=value)`
    LessEq(String, String),
    /// `(attr=a*b*c)`; `parts` are the literal segments between wildcards.
    Substring {
        /// Attribute name.
        attr: String,
        /// Literal segments; the first/last are empty for leading/trailing `*`.
        parts: Vec<String>,
    },
}

impl Filter {
    /// Parse a filter string.
    ///
    /// Filters nested deeper than [`MAX_DEPTH`] are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::filter_syntax(input, "empty filter"));
        }
        let mut parser = Parser {
            src: input,
            lead: input.chars().take_while(|c| c.is_whitespace()).count(),
            chars: trimmed.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.err("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Evaluate the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Self::And(items) => items.iter().all(|f| f.matches(props)),
            Self::Or(items) => items.iter().any(|f| f.matches(props)),
            Self::Not(inner) => !inner.matches(props),
            Self::Present(attr) => props.get_ignore_case(attr).is_some(),
            Self::Equal(attr, value) => props
                .get_ignore_case(attr)
                .is_some_and(|v| v.matches_text(value)),
            Self::Approx(attr, value) => props.get_ignore_case(attr).is_some_and(|v| {
                v.strings().iter().any(|s| approx_eq(s, value)) || v.matches_text(value)
            }),
            Self::GreaterEq(attr, value) => props
                .get_ignore_case(attr)
                .is_some_and(|v| compare(v, value, |o| o.is_ge())),
            Self::LessEq(attr, value) => props
                .get_ignore_case(attr)
                .is_some_and(|v| compare(v, value, |o| o.is_le())),
            Self::Substring { attr, parts } => props
                .get_ignore_case(attr)
                .is_some_and(|v| v.strings().iter().any(|s| substring_match(s, parts))),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(items) | Self::Or(items) => {
                f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "(!{inner})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Equal(attr, value) => write!(f, "({attr}={})", escape(value)),
            Self::Approx(attr, value) => write!(f, "({attr}~={})", escape(value)),
            Self::GreaterEq(attr, value) => write!(f, "({attr}>={})", escape(value)),
            Self::LessEq(attr, value) => write!(f, "({attr}<={})", escape(value)),
            Self::Substring { attr, parts } => {
                let joined: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({attr}={})", joined.join("*"))
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn approx_eq(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    norm(a) == norm(b)
}

fn compare(v: &PropertyValue, expected: &str, pred: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match v {
        PropertyValue::Int(i) => expected
            .trim()
            .parse::<i64>()
            .is_ok_and(|e| pred(i.cmp(&e))),
        _ => v
            .strings()
            .iter()
            .any(|s| pred((*s).cmp(expected))),
    }
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

struct Parser<'a> {
    src: &'a str,
    // whitespace trimmed off the front of `src`
    lead: usize,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn err(&self, reason: &str) -> Error {
        Error::filter_syntax(self.src, format!("{reason} at offset {}", self.lead + self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(&format!("expected `{c}`")))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(op @ ('&' | '|' | '!')) => {
                if self.depth == MAX_DEPTH {
                    return Err(self.err("filter nested too deeply"));
                }
                self.pos += 1;
                self.depth += 1;
                let nested = match op {
                    '&' => self.list().map(Filter::And),
                    '|' => self.list().map(Filter::Or),
                    _ => self.filter().map(|f| Filter::Not(Box::new(f))),
                };
                self.depth -= 1;
                nested?
            }
            Some(_) => self.item()?,
            None => return Err(self.err("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(self.err("empty filter list"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_owned();
        if attr.is_empty() {
            return Err(self.err("missing attribute name"));
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '>' | '<')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            _ => return Err(self.err("invalid operator")),
        };

        let parts = self.value()?;
        let literal = |parts: Vec<String>| parts.concat();
        match op {
            '=' if parts.len() == 2 && parts.iter().all(String::is_empty) => {
                Ok(Filter::Present(attr))
            }
            '=' if parts.len() > 1 => Ok(Filter::Substring { attr, parts }),
            '=' => Ok(Filter::Equal(attr, literal(parts))),
            _ if parts.len() > 1 => Err(self.err("wildcard not allowed with this operator")),
            '~' => Ok(Filter::Approx(attr, literal(parts))),
            '>' => Ok(Filter::GreaterEq(attr, literal(parts))),
            _ => Ok(Filter::LessEq(attr, literal(parts))),
        }
    }

    /// Read a value up to the closing `)`, splitting on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.err("unescaped `(` in value")),
                Some('\\') => {
                    self.pos += 1;
                    let Some(c) = self.peek() else {
                        return Err(self.err("dangling escape"));
                    };
                    self.pos += 1;
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
                Some('*') => {
                    self.pos += 1;
                    parts.push(String::new());
                }
                Some(c) => {
                    self.pos += 1;
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
            }
        }
        Ok(parts)
    }
}
