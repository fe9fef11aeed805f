//! Batch endpoint handler
//!
//! `POST /batches?enclosingTransaction={true|false}`

use crate::handlers::AppState;
use crate::middleware::AuthenticatedUser;
use crate::models::BatchResponse;
use crate::services::{decode_batch, ExecutionMode};
use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::create_batch_log_summary;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Query parameters of the batch endpoint
#[derive(Debug, Default, Deserialize)]
pub struct BatchParams {
    #[serde(rename = "enclosingTransaction")]
    pub enclosing_transaction: Option<String>,
}

impl BatchParams {
    /// Absent or empty means independent execution
    pub fn execution_mode(&self) -> AppResult<ExecutionMode> {
        match self.enclosing_transaction.as_deref().map(str::trim) {
            None | Some("") => Ok(ExecutionMode::Independent),
            Some(value) if value.eq_ignore_ascii_case("true") => Ok(ExecutionMode::Transactional),
            Some(value) if value.eq_ignore_ascii_case("false") => Ok(ExecutionMode::Independent),
            Some(value) => Err(AppError::MalformedBatchRequest(format!(
                "enclosingTransaction must be true or false, got '{}'",
                value
            ))),
        }
    }
}

/// Handle a batch call
///
/// Authentication has already run. The transport status is 200 whenever the
/// envelope could be decoded; outcomes are reported per item.
pub async fn handle_batch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<BatchParams>,
    body: Result<Bytes, BytesRejection>,
) -> AppResult<(StatusCode, Json<Vec<BatchResponse>>)> {
    let mode = params.execution_mode()?;

    let payload = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            AppError::MalformedBatchRequest(rejection.body_text())
        }
    })?;

    let requests = decode_batch(&payload, state.settings.request.max_batch_size)?;

    info!("Batch call from {}: {} items, {:?}", user.username, requests.len(), mode);
    debug!(
        "Batch summary: {}",
        serde_json::to_string(&create_batch_log_summary(&requests)).unwrap_or_default()
    );

    // Detached so a dropped connection cannot leave the enclosing transaction open
    let task_state = state.clone();
    let outcome = tokio::spawn(async move { task_state.coordinator.execute(requests, mode, &user).await })
        .await
        .map_err(|e| AppError::Internal(format!("Batch task failed: {}", e)))?;

    Ok((StatusCode::OK, Json(outcome.responses)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Option<&str>) -> BatchParams {
        BatchParams {
            enclosing_transaction: value.map(str::to_string),
        }
    }

    #[test]
    fn test_execution_mode_from_query() {
        assert_eq!(params(None).execution_mode().unwrap(), ExecutionMode::Independent);
        assert_eq!(params(Some("")).execution_mode().unwrap(), ExecutionMode::Independent);
        assert_eq!(params(Some("false")).execution_mode().unwrap(), ExecutionMode::Independent);
        assert_eq!(params(Some("TRUE")).execution_mode().unwrap(), ExecutionMode::Transactional);
        assert!(matches!(
            params(Some("yes")).execution_mode(),
            Err(AppError::MalformedBatchRequest(_))
        ));
    }
}
