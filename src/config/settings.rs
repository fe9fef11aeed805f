//! Application configuration settings
//!
//! Server, request limit, security and logging settings read from the environment

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Request limits
    pub request: RequestConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Request configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Maximum batch payload size in bytes
    pub max_request_size: usize,
    /// Maximum number of sub-requests in one batch
    pub max_batch_size: usize,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// API key header name
    pub api_key_header: String,
    /// Whether CORS is enabled
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: &str = "8080";
const DEFAULT_MAX_REQUEST_SIZE: &str = "2097152";
const DEFAULT_MAX_BATCH_SIZE: &str = "200";
const DEFAULT_API_KEY_HEADER: &str = "Authorization";

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_HOST.to_string(),
                port: 8080,
            },
            request: RequestConfig {
                max_request_size: 2 * 1024 * 1024,
                max_batch_size: 200,
            },
            security: SecurityConfig {
                api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
                cors_enabled: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Settings {
    /// Create a new configuration instance
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let settings = Self {
            server: ServerConfig {
                host: get_env_or_default("SERVER_HOST", DEFAULT_HOST),
                port: get_env_or_default("SERVER_PORT", DEFAULT_PORT)
                    .parse()
                    .context("Invalid port number")?,
            },
            request: RequestConfig {
                max_request_size: get_env_or_default("MAX_REQUEST_SIZE", DEFAULT_MAX_REQUEST_SIZE)
                    .parse()
                    .context("Invalid maximum request size")?,
                max_batch_size: get_env_or_default("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)
                    .parse()
                    .context("Invalid maximum batch size")?,
            },
            security: SecurityConfig {
                api_key_header: get_env_or_default("API_KEY_HEADER", DEFAULT_API_KEY_HEADER),
                cors_enabled: get_env_or_default("CORS_ENABLED", "true")
                    .parse()
                    .context("Invalid CORS enabled flag")?,
            },
            logging: LoggingConfig {
                level: get_env_or_default("RUST_LOG", "info"),
                format: get_env_or_default("LOG_FORMAT", "text"),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        if self.request.max_request_size == 0 {
            anyhow::bail!("Maximum request size cannot be 0");
        }

        if self.request.max_batch_size == 0 {
            anyhow::bail!("Maximum batch size cannot be 0");
        }

        if self.security.api_key_header.trim().is_empty() {
            anyhow::bail!("API key header name cannot be empty");
        }

        // RUST_LOG may hold full directives, so only emptiness is checked
        if self.logging.level.trim().is_empty() {
            anyhow::bail!("Log level cannot be empty");
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }

    /// Address the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get environment variable or default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
