//! Batch envelope data models
//!
//! Defines the sub-request and sub-response structures carried by `POST /batches`

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sub-request header mapping
pub type Headers = BTreeMap<String, String>;

/// HTTP method of a sub-request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sub-request within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Identifier unique within the batch, target of later references
    pub request_id: i64,
    /// Internal API path plus optional query string (e.g. `loans/12?command=approve`)
    pub relative_url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Headers passed to the internal handler (optional)
    #[serde(
        default,
        deserialize_with = "deserialize_headers",
        skip_serializing_if = "Option::is_none"
    )]
    pub headers: Option<Headers>,
    /// Opaque payload, may contain `$.path` placeholders (optional)
    #[serde(
        default,
        deserialize_with = "deserialize_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<String>,
    /// requestId of an earlier item whose response feeds the placeholders (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<i64>,
}

impl BatchRequest {
    /// Create a bodiless request
    pub fn new(request_id: i64, method: HttpMethod, relative_url: impl Into<String>) -> Self {
        Self {
            request_id,
            relative_url: relative_url.into(),
            method,
            headers: None,
            body: None,
            reference: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_reference(mut self, reference: i64) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }
}

/// A single sub-response within a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Mirrors the originating request; `None` only when the enclosing
    /// transaction itself failed to begin or commit
    pub request_id: Option<i64>,
    /// HTTP-style status code
    pub status_code: u16,
    /// Response headers (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Success payload or serialized error information
    pub body: String,
}

impl BatchResponse {
    /// Whether the sub-request succeeded (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Wire form of a header used by older clients: `{"name": ..., "value": ...}`
#[derive(Debug, Deserialize)]
struct NamedHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeadersRepr {
    Map(Headers),
    List(Vec<NamedHeader>),
}

/// Accept headers either as a mapping or as a list of name/value objects
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Option<Headers>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr: Option<HeadersRepr> = Option::deserialize(deserializer)?;
    Ok(repr.map(|repr| match repr {
        HeadersRepr::Map(map) => map,
        HeadersRepr::List(list) => list.into_iter().map(|h| (h.name, h.value)).collect(),
    }))
}

/// Accept the body as a string, or as any JSON value carried as its compact text
fn deserialize_body<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(other) => serde_json::to_string(&other)
            .map(Some)
            .map_err(de::Error::custom),
    }
}
