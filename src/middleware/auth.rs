//! Authentication middleware
//!
//! Resolves the caller's API key to an authenticated user before any batch
//! processing starts

use crate::api::ALL_FUNCTIONS;
use crate::config::AppConfig;
use crate::utils::error::{AppError, AppResult};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity of the caller, shared by every item of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub permissions: Vec<String>,
}

impl AuthenticatedUser {
    pub fn new(username: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            username: username.into(),
            permissions,
        }
    }

    /// `ALL_FUNCTIONS` grants every permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == ALL_FUNCTIONS || p == permission)
    }
}

/// Authentication middleware
///
/// Validates the API key header and stores the [`AuthenticatedUser`] in the
/// request extensions. Runs once per batch call.
pub async fn auth_middleware(
    State(state): State<Arc<crate::handlers::AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    debug!("Executing authentication middleware");

    let header_name = state.settings.security.api_key_header.as_str();
    let auth_header = request
        .headers()
        .get(header_name)
        .and_then(|h| h.to_str().ok());

    let user = match auth_header {
        Some(value) => authenticate(&state.app_config, value)?,
        None => {
            warn!("Missing authentication header: {}", header_name);
            return Err(AppError::Authentication(format!(
                "missing {} header",
                header_name
            )));
        }
    };

    debug!("Authenticated user {}", user.username);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Resolve a raw header value to the user it authenticates
pub fn authenticate(config: &AppConfig, header_value: &str) -> AppResult<AuthenticatedUser> {
    let token = extract_token(header_value);

    if !validate_token_format(token) {
        warn!("Malformed API key");
        return Err(AppError::Authentication("malformed API key".to_string()));
    }

    match config.find_key(token) {
        Some(entry) => Ok(AuthenticatedUser::new(
            entry.user.clone(),
            entry.permissions.clone(),
        )),
        None => {
            warn!("Invalid API key");
            Err(AppError::Authentication("invalid API key".to_string()))
        }
    }
}

/// Remove a `Bearer ` prefix if present
pub fn extract_token(header_value: &str) -> &str {
    let trimmed = header_value.trim();
    trimmed.strip_prefix("Bearer ").unwrap_or(trimmed).trim()
}

/// Validate token format
pub fn validate_token_format(token: &str) -> bool {
    if token.chars().count() < crate::config::file::MIN_API_KEY_LENGTH {
        return false;
    }

    // Check for invalid characters (spaces, newlines, etc.)
    !token.contains(char::is_whitespace)
}
