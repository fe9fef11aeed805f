//! Health check handlers
//!
//! Provides application health status check endpoints

use crate::handlers::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version information
    pub version: String,
    /// Timestamp
    pub timestamp: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Ledger status, including open transactions
    pub ledger: String,
    /// Number of configured API keys
    pub api_keys: usize,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Memory usage (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<MemoryUsage>,
}

/// Memory usage information
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Used memory in bytes
    pub used_bytes: u64,
    /// Total memory in bytes
    pub total_bytes: u64,
    /// Usage percentage
    pub usage_percent: f64,
}

const SERVICE_NAME: &str = "batchapi";

/// Basic health check
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing health check");

    let open = state.ledger.open_transactions().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details: Some(HealthDetails {
            ledger: format!("{} open transactions", open),
            api_keys: state.app_config.api_keys.len(),
            uptime_seconds: get_uptime_seconds(),
            memory_usage: get_memory_usage(),
        }),
    })
}

/// Liveness check
///
/// GET /health/live
/// Only confirms the process is serving requests
pub async fn liveness_check() -> Json<HealthResponse> {
    debug!("Executing liveness check");

    Json(HealthResponse {
        status: "alive".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details: None,
    })
}

/// Get service uptime in seconds
fn get_uptime_seconds() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START_TIME: OnceLock<Instant> = OnceLock::new();

    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

/// Get memory usage information
fn get_memory_usage() -> Option<MemoryUsage> {
    #[cfg(target_os = "linux")]
    {
        // Read /proc/self/status to get memory information
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
            };

            if let (Some(used), Some(total)) = (read_kb("VmRSS:"), read_kb("VmSize:")) {
                let usage_percent = if total > 0 {
                    (used as f64 / total as f64) * 100.0
                } else {
                    0.0
                };

                return Some(MemoryUsage {
                    used_bytes: used,
                    total_bytes: total,
                    usage_percent,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyConfig, AppConfig, Settings};
    use crate::storage::MemoryLedger;
    use std::collections::HashMap;

    fn create_test_state() -> Arc<AppState> {
        let mut keys = HashMap::new();
        keys.insert(
            "test-key-0001".to_string(),
            ApiKeyConfig {
                user: "tester".to_string(),
                permissions: vec!["ALL_FUNCTIONS".to_string()],
            },
        );
        AppState::new(
            Settings::default(),
            AppConfig::with_keys(keys).unwrap(),
            MemoryLedger::new_shared(),
        )
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check(State(create_test_state())).await.0;

        assert_eq!(response.status, "healthy");
        assert_eq!(response.service, "batchapi");
        let details = response.details.unwrap();
        assert_eq!(details.ledger, "0 open transactions");
        assert_eq!(details.api_keys, 1);
    }

    #[tokio::test]
    async fn test_liveness_check() {
        let response = liveness_check().await.0;
        assert_eq!(response.status, "alive");
        assert!(response.details.is_none());
    }

    #[test]
    fn test_uptime_calculation() {
        let uptime1 = get_uptime_seconds();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let uptime2 = get_uptime_seconds();

        assert!(uptime2 >= uptime1);
    }
}
