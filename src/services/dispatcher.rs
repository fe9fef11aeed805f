//! Sub-request dispatcher
//!
//! Routes a resolved sub-request to the internal handler registered for its
//! method, path pattern and (optionally) `command` query parameter

use crate::api::{ApiHandler, ApiRequest, ApiResponse, InvocationContext};
use crate::models::{BatchRequest, HttpMethod};
use crate::utils::error::{helpers, ItemFailure};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Query parameter selecting an action on a resource
pub const COMMAND_PARAM: &str = "command";

/// Outcome of dispatching one sub-request
pub type DispatchResult = Result<ApiResponse, ItemFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Param(String),
}

/// Route path pattern such as `loans/{loanId}/transactions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => PatternSegment::Param(name.to_string()),
                    None => PatternSegment::Literal(segment.to_string()),
                }
            })
            .collect();

        Self {
            raw: pattern.trim_matches('/').to_string(),
            segments,
        }
    }

    /// Match a path, returning the captured parameters
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                PatternSegment::Literal(literal) if literal == part => {}
                PatternSegment::Literal(_) => return None,
                PatternSegment::Param(_) if part.is_empty() => return None,
                PatternSegment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_matches('/');
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

/// Split a relative URL into its path and decoded query parameters
pub fn split_relative_url(relative_url: &str) -> (&str, HashMap<String, String>) {
    match relative_url.split_once('?') {
        Some((path, query)) => (
            path,
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (relative_url, HashMap::new()),
    }
}

struct Route {
    method: HttpMethod,
    pattern: PathPattern,
    command: Option<String>,
    handler: Arc<dyn ApiHandler>,
}

/// Routing table over the internal API
#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<Route>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `method` + `pattern` without a command
    pub fn route(mut self, method: HttpMethod, pattern: &str, handler: Arc<dyn ApiHandler>) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(pattern),
            command: None,
            handler,
        });
        self
    }

    /// Register a handler for `method` + `pattern` + `?command=<command>`
    pub fn route_command(
        mut self,
        method: HttpMethod,
        pattern: &str,
        command: &str,
        handler: Arc<dyn ApiHandler>,
    ) -> Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(pattern),
            command: Some(command.to_string()),
            handler,
        });
        self
    }

    /// Number of registered routes
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn find(
        &self,
        method: HttpMethod,
        path: &str,
        command: Option<&str>,
    ) -> Option<(&Route, HashMap<String, String>)> {
        self.routes
            .iter()
            .filter(|route| route.method == method && route.command.as_deref() == command)
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)))
    }

    /// Invoke the handler matching `request`
    ///
    /// Handler failures are returned as-is; a panicking handler becomes an
    /// [`ItemFailure::Unexpected`].
    pub async fn dispatch(&self, request: &BatchRequest, ctx: &InvocationContext) -> DispatchResult {
        let (path, query) = split_relative_url(&request.relative_url);
        let command = query.get(COMMAND_PARAM).map(String::as_str);

        let (route, path_params) = self.find(request.method, path, command).ok_or_else(|| {
            helpers::not_found_failure(format!(
                "No handler for {} {}",
                request.method, request.relative_url
            ))
        })?;

        debug!(
            "Dispatching request {} ({} {}) to {}",
            request.request_id,
            request.method,
            route.pattern,
            route.handler.name()
        );

        let api_request = ApiRequest {
            method: request.method,
            path: path.to_string(),
            path_params,
            query,
            headers: request.headers.clone().unwrap_or_default(),
            body: request.body.clone(),
        };

        match AssertUnwindSafe(route.handler.handle(api_request, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(&*panic);
                error!("Handler {} panicked: {}", route.handler.name(), detail);
                Err(helpers::unexpected_failure(format!(
                    "handler {} panicked: {}",
                    route.handler.name(),
                    detail
                )))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
