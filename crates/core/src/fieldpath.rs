//! Field-path extraction over schema-less objects.
//!
//! Grammar (single value, no flattening):
//!
//! ```text
//! path    := ["{"] ["$"] [ident] segment* ["}"]
//! segment := "." ident | "[" digits "]" | "['" chars "']" | "[\"" chars "\"]"
//! ```
//!
//! A missing key or out-of-range index yields `None`; only a malformed expression errors.

use std::fmt;

use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed field path {expr:?} at offset {offset}: {reason}")]
pub struct PathError {
    pub expr: String,
    pub offset: usize,
    pub reason: &'static str,
}

/// A parsed path; parse once, extract many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    source: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        Parser::new(expr).parse()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn extract<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut cur = root;
        for seg in &self.segments {
            cur = match (seg, cur) {
                (Segment::Field(k), Json::Object(map)) => map.get(k)?,
                (Segment::Index(i), Json::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and extract in one step.
pub fn extract<'a>(root: &'a Json, expr: &str) -> Result<Option<&'a Json>, PathError> {
    Ok(FieldPath::parse(expr)?.extract(root))
}

struct Parser<'s> {
    expr: &'s str,
    bytes: &'s [u8],
    pos: usize,
    end: usize,
}

impl<'s> Parser<'s> {
    fn new(expr: &'s str) -> Self {
        Self { expr, bytes: expr.as_bytes(), pos: 0, end: expr.len() }
    }

    fn err(&self, offset: usize, reason: &'static str) -> PathError {
        PathError { expr: self.expr.to_string(), offset, reason }
    }

    fn peek(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.bytes[self.pos])
        } else {
            None
        }
    }

    fn parse(mut self) -> Result<FieldPath, PathError> {
        let trimmed_start = self.expr.len() - self.expr.trim_start().len();
        self.pos = trimmed_start;
        self.end = self.expr.trim_end().len();
        if self.pos >= self.end {
            return Err(self.err(0, "empty path"));
        }
        if self.peek() == Some(b'{') {
            if self.bytes[self.end - 1] != b'}' {
                return Err(self.err(self.end, "unclosed '{'"));
            }
            self.pos += 1;
            self.end -= 1;
            if self.pos >= self.end {
                return Err(self.err(self.pos, "empty path"));
            }
        }
        if self.peek() == Some(b'$') {
            self.pos += 1;
        }

        let mut segments = Vec::new();
        // a bare leading identifier (`metadata.name`) is accepted
        if let Some(c) = self.peek() {
            if c != b'.' && c != b'[' {
                segments.push(Segment::Field(self.ident()?));
            }
        }
        while let Some(c) = self.peek() {
            match c {
                b'.' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'.') => return Err(self.err(self.pos, "recursive descent is not supported")),
                        None => {
                            // `.` alone (or `$.`) addresses the root
                            if segments.is_empty() && self.pos == self.end {
                                break;
                            }
                            return Err(self.err(self.pos, "expected a field name after '.'"));
                        }
                        _ => segments.push(Segment::Field(self.ident()?)),
                    }
                }
                b'[' => segments.push(self.bracket()?),
                _ => return Err(self.err(self.pos, "expected '.' or '['")),
            }
        }
        Ok(FieldPath { source: self.expr.to_string(), segments })
    }

    fn ident(&mut self) -> Result<String, PathError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'.' | b'[' => break,
                b'*' => return Err(self.err(self.pos, "wildcards are not supported")),
                b']' | b'?' | b'@' | b'(' | b')' | b'{' | b'}' => {
                    return Err(self.err(self.pos, "unexpected character in field name"))
                }
                c if c.is_ascii_whitespace() => {
                    return Err(self.err(self.pos, "unexpected whitespace in field name"))
                }
                _ => self.pos += 1,
            }
        }
        if self.pos == start {
            return Err(self.err(start, "empty field name"));
        }
        Ok(self.expr[start..self.pos].to_string())
    }

    fn bracket(&mut self) -> Result<Segment, PathError> {
        let open = self.pos;
        self.pos += 1;
        let seg = match self.peek() {
            Some(q @ (b'\'' | b'"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(self.err(open, "unterminated quoted key"));
                }
                let key = self.expr[start..self.pos].to_string();
                self.pos += 1;
                Segment::Field(key)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let n = self.expr[start..self.pos]
                    .parse::<usize>()
                    .map_err(|_| self.err(start, "index out of range"))?;
                Segment::Index(n)
            }
            Some(b'*') => return Err(self.err(self.pos, "wildcards are not supported")),
            Some(b'?') => return Err(self.err(self.pos, "filter expressions are not supported")),
            Some(b'-') => return Err(self.err(self.pos, "negative indices are not supported")),
            Some(b':') => return Err(self.err(self.pos, "slices are not supported")),
            Some(_) => return Err(self.err(self.pos, "expected an index or a quoted key")),
            None => return Err(self.err(open, "unclosed '['")),
        };
        match self.peek() {
            Some(b']') => {
                self.pos += 1;
                Ok(seg)
            }
            Some(b':') => Err(self.err(self.pos, "slices are not supported")),
            Some(b',') => Err(self.err(self.pos, "unions are not supported")),
            _ => Err(self.err(open, "unclosed '['")),
        }
    }
}
