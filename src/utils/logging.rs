//! Logging utilities
//!
//! Shared logging configuration and helper functions

use crate::models::BatchRequest;

/// Set to true to include full sub-request bodies in debug logs
/// Default is false to reduce log verbosity
pub const VERBOSE_REQUEST_LOGGING: bool = false;

/// Maximum body characters kept in log summaries
const MAX_BODY_LOG_LEN: usize = 120;

/// Truncate a string with a note about original length
pub fn truncate_content(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len).collect();
        format!("{}... ({} chars truncated)", kept, s.chars().count() - max_len)
    } else {
        s.to_string()
    }
}

/// One-line summary of a sub-request for logging
pub fn request_summary(request: &BatchRequest) -> String {
    let body = match &request.body {
        Some(body) if VERBOSE_REQUEST_LOGGING => body.clone(),
        Some(body) => truncate_content(body, MAX_BODY_LOG_LEN),
        None => "-".to_string(),
    };

    match request.reference {
        Some(reference) => format!(
            "{} {} (ref {}) body={}",
            request.method, request.relative_url, reference, body
        ),
        None => format!("{} {} body={}", request.method, request.relative_url, body),
    }
}

/// Create a filtered summary of a whole batch for logging
pub fn create_batch_log_summary(requests: &[BatchRequest]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = requests
        .iter()
        .map(|r| {
            serde_json::json!({
                "requestId": r.request_id,
                "method": r.method.as_str(),
                "relativeUrl": r.relative_url,
                "reference": r.reference,
                "bodyChars": r.body.as_ref().map(|b| b.chars().count()),
            })
        })
        .collect();

    serde_json::json!({
        "items": requests.len(),
        "requests": items,
    })
}
