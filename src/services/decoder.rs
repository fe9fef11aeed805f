//! Batch envelope decoder
//!
//! Turns the raw `POST /batches` payload into an ordered list of sub-requests

use crate::models::BatchRequest;
use crate::utils::error::{AppError, AppResult};
use serde_json::Value;
use tracing::debug;

/// Decode a batch payload
///
/// The payload must be a JSON array of objects, each a valid sub-request.
/// Uniqueness of `requestId` and validity of `reference` are not checked
/// here; the coordinator reports those per item.
pub fn decode_batch(payload: &[u8], max_batch_size: usize) -> AppResult<Vec<BatchRequest>> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| AppError::MalformedBatchRequest(format!("payload is not valid JSON: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(AppError::MalformedBatchRequest(format!(
                "expected a JSON array of requests, got {}",
                json_kind(&other)
            )))
        }
    };

    if items.len() > max_batch_size {
        return Err(AppError::MalformedBatchRequest(format!(
            "batch of {} requests exceeds the maximum of {}",
            items.len(),
            max_batch_size
        )));
    }

    let requests = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(AppError::MalformedBatchRequest(format!(
                    "item {} must be an object, got {}",
                    index,
                    json_kind(&item)
                )));
            }
            serde_json::from_value::<BatchRequest>(item)
                .map_err(|e| AppError::MalformedBatchRequest(format!("item {}: {}", index, e)))
        })
        .collect::<AppResult<Vec<_>>>()?;

    debug!("Decoded batch of {} requests", requests.len());
    Ok(requests)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
