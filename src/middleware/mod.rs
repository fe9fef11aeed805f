//! HTTP middleware
//!
//! Authentication and request logging

pub mod auth;
pub mod logging;

pub use auth::{auth_middleware, AuthenticatedUser};
pub use logging::request_logging_middleware;
