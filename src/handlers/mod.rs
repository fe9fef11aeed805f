//! HTTP handlers module
//!
//! Contains all HTTP endpoint handling logic

pub mod batch;
pub mod health;

use crate::api::ledger_dispatcher;
use crate::config::{AppConfig, Settings};
use crate::middleware::{auth_middleware, request_logging_middleware};
use crate::services::BatchCoordinator;
use crate::storage::MemoryLedger;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state
#[derive(Debug)]
pub struct AppState {
    pub settings: Settings,
    pub app_config: AppConfig,
    pub coordinator: BatchCoordinator,
    pub ledger: Arc<MemoryLedger>,
}

impl AppState {
    /// Wire the coordinator to the ledger's internal API and unit-of-work
    pub fn new(settings: Settings, app_config: AppConfig, ledger: Arc<MemoryLedger>) -> Arc<Self> {
        let dispatcher = Arc::new(ledger_dispatcher(ledger.clone()));
        info!("Internal API ready with {} routes", dispatcher.route_count());

        let coordinator = BatchCoordinator::new(dispatcher, ledger.clone());

        Arc::new(Self {
            settings,
            app_config,
            coordinator,
            ledger,
        })
    }
}

/// Create application router backed by a fresh ledger
pub async fn create_router(settings: Settings, app_config: AppConfig) -> Result<Router> {
    let state = AppState::new(settings, app_config, MemoryLedger::new_shared());
    Ok(build_router(state))
}

/// Build the router over existing state
pub fn build_router(state: Arc<AppState>) -> Router {
    let settings = &state.settings;

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_logging_middleware));

    // Only the batch endpoint requires an API key
    let batch_routes = Router::new()
        .route("/batches", post(batch::handle_batch))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.request.max_request_size));

    let router = Router::new()
        .merge(batch_routes)
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check));

    let router = if settings.security.cors_enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state).layer(middleware_stack)
}
