//! Cross-item reference resolution
//!
//! A sub-request may name an earlier sub-request in `reference` and embed
//! placeholders in its `body` and `relativeUrl`. Each placeholder is replaced
//! with the value found at its path in the referenced response's JSON body.
//!
//! Placeholder grammar:
//!
//! ```text
//! placeholder := "$" ( "." segment )+
//! segment     := identifier | digits
//! identifier  := [A-Za-z_] [A-Za-z0-9_]*
//! ```
//!
//! A `$` that is not followed by `.segment` is literal text. Digit segments
//! index arrays, or name object keys when the value is an object.

use crate::models::{BatchRequest, BatchResponse};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Leading character of every placeholder
pub const PLACEHOLDER_MARKER: char = '$';

/// Reference resolution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// `reference` names no earlier item of this batch
    #[error("Request {request_id} references request {reference}, which does not precede it in the batch")]
    Unresolved { request_id: i64, reference: i64 },

    /// The referenced item did not succeed
    #[error("Parent request with id {reference} was erroneous (status {status_code})")]
    ParentFailed { reference: i64, status_code: u16 },

    /// The placeholder path does not exist in the referenced body
    #[error("Placeholder {path} not found in response of request {reference}")]
    UnknownPath { reference: i64, path: String },
}

/// One step of a placeholder path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Field(&'a str),
    Index(usize),
}

/// A placeholder located in a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    /// Byte range of the whole token, marker included
    pub span: Range<usize>,
    /// Parsed path
    pub segments: Vec<PathSegment<'a>>,
}

impl Placeholder<'_> {
    /// Look up the value this placeholder points at
    pub fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.segments.iter().try_fold(root, |value, segment| match segment {
            PathSegment::Field(name) => value.get(*name),
            PathSegment::Index(i) => match value {
                Value::Array(items) => items.get(*i),
                Value::Object(map) => map.get(&i.to_string()),
                _ => None,
            },
        })
    }
}

impl fmt::Display for Placeholder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PLACEHOLDER_MARKER)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(i) => write!(f, ".{}", i)?,
            }
        }
        Ok(())
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse one segment starting right after a '.', returning it and its end offset
fn parse_segment(text: &str, start: usize) -> Option<(PathSegment<'_>, usize)> {
    let bytes = text.as_bytes();
    let first = *bytes.get(start)?;

    if first.is_ascii_digit() {
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |n| start + n);
        // Digits followed by identifier characters form no valid segment
        if bytes.get(end).copied().is_some_and(is_ident_continue) {
            return None;
        }
        let index = text[start..end].parse().ok()?;
        Some((PathSegment::Index(index), end))
    } else if is_ident_start(first) {
        let end = bytes[start..]
            .iter()
            .position(|b| !is_ident_continue(*b))
            .map_or(bytes.len(), |n| start + n);
        Some((PathSegment::Field(&text[start..end]), end))
    } else {
        None
    }
}

/// Find every placeholder in `text`, in order of appearance
pub fn parse_placeholders(text: &str) -> Vec<Placeholder<'_>> {
    let bytes = text.as_bytes();
    let mut placeholders = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(PLACEHOLDER_MARKER) {
        let start = pos + offset;
        let mut cursor = start + 1;
        let mut segments = Vec::new();

        while bytes.get(cursor) == Some(&b'.') {
            match parse_segment(text, cursor + 1) {
                Some((segment, end)) => {
                    segments.push(segment);
                    cursor = end;
                }
                None => break,
            }
        }

        if segments.is_empty() {
            pos = start + 1;
        } else {
            placeholders.push(Placeholder {
                span: start..cursor,
                segments,
            });
            pos = cursor;
        }
    }

    placeholders
}

/// Render a resolved value as text
///
/// Inside a JSON string literal the text is escaped so the literal stays
/// valid whatever the value contains.
fn render(value: &Value, in_literal: bool) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if !in_literal {
        return text;
    }
    let quoted = Value::String(text).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Tracks whether a byte offset of JSON text lies inside a string literal
#[derive(Debug, Default)]
struct LiteralTracker {
    position: usize,
    in_string: bool,
    escaped: bool,
}

impl LiteralTracker {
    fn advance_to(&mut self, bytes: &[u8], to: usize) -> bool {
        for &byte in &bytes[self.position..to] {
            if self.escaped {
                self.escaped = false;
            } else if self.in_string && byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = !self.in_string;
            }
        }
        self.position = to;
        self.in_string
    }
}

/// Replace every placeholder in `text` with its value from `source`
///
/// When a placeholder fills a whole JSON string literal and resolves to a
/// non-string value, the surrounding quotes are dropped so the JSON type of
/// the value survives. Values landing inside a string literal are escaped;
/// elsewhere, such as in a relative URL, they are inserted as-is. Text
/// without placeholders is returned borrowed.
pub fn substitute<'t>(text: &'t str, source: &Value, reference: i64) -> Result<Cow<'t, str>, ReferenceError> {
    let placeholders = parse_placeholders(text);
    if placeholders.is_empty() {
        return Ok(Cow::Borrowed(text));
    }

    let bytes = text.as_bytes();
    let mut output = String::with_capacity(text.len());
    let mut literals = LiteralTracker::default();
    let mut last = 0;

    for placeholder in &placeholders {
        let value = placeholder
            .lookup(source)
            .ok_or_else(|| ReferenceError::UnknownPath {
                reference,
                path: placeholder.to_string(),
            })?;

        let mut start = placeholder.span.start;
        let mut end = placeholder.span.end;
        let mut in_literal = literals.advance_to(bytes, start);
        let quoted = start > 0 && bytes[start - 1] == b'"' && bytes.get(end) == Some(&b'"');
        if quoted && !value.is_string() && start - 1 >= last {
            start -= 1;
            end += 1;
            in_literal = false;
        }

        output.push_str(&text[last..start]);
        output.push_str(&render(value, in_literal));
        last = end;
    }
    output.push_str(&text[last..]);

    Ok(Cow::Owned(output))
}

/// Rewrites a sub-request against the responses produced so far in its batch
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve placeholders in `request` against its referenced response
    ///
    /// Requests without `reference` come back unchanged.
    pub fn resolve(
        &self,
        request: &BatchRequest,
        responses: &HashMap<i64, BatchResponse>,
    ) -> Result<BatchRequest, ReferenceError> {
        let Some(reference) = request.reference else {
            return Ok(request.clone());
        };

        let parent = responses.get(&reference).ok_or(ReferenceError::Unresolved {
            request_id: request.request_id,
            reference,
        })?;

        if !parent.is_success() {
            return Err(ReferenceError::ParentFailed {
                reference,
                status_code: parent.status_code,
            });
        }

        let needs_substitution = has_placeholders(&request.relative_url)
            || request.body.as_deref().is_some_and(has_placeholders);
        if !needs_substitution {
            return Ok(request.clone());
        }

        // A non-JSON parent body has no paths to look up
        let source: Value = serde_json::from_str(&parent.body).unwrap_or(Value::Null);

        let relative_url = substitute(&request.relative_url, &source, reference)?.into_owned();
        let body = request
            .body
            .as_deref()
            .map(|body| substitute(body, &source, reference).map(Cow::into_owned))
            .transpose()?;

        debug!(
            "Resolved request {} against request {}: {}",
            request.request_id, reference, relative_url
        );

        Ok(BatchRequest {
            relative_url,
            body,
            ..request.clone()
        })
    }
}

fn has_placeholders(text: &str) -> bool {
    !parse_placeholders(text).is_empty()
}
