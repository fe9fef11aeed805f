//! Configuration management module
//!
//! Responsible for loading and managing application configuration, including environment variables and the API key file

pub mod file;
pub mod settings;

pub use file::{ApiKeyConfig, AppConfig};
pub use settings::Settings;
