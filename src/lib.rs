//! Batch API Library
//!
//! Executes batches of internal API sub-requests in one HTTP call, either
//! independently or inside one enclosing transaction

pub mod api;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export common types
pub use config::{AppConfig, Settings};
pub use handlers::{build_router, create_router, AppState};
pub use models::{BatchRequest, BatchResponse, HttpMethod};
pub use services::{BatchCoordinator, BatchOutcome, ExecutionMode};
pub use utils::error::{AppError, AppResult, ErrorInfo, ItemFailure};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get version information
pub fn version_info() -> String {
    format!("{} v{} - {}", NAME, VERSION, DESCRIPTION)
}
