//! File-based configuration loading
//!
//! Loads the API credentials table from a JSON file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Minimum accepted API key length
pub const MIN_API_KEY_LENGTH: usize = 8;

/// Application configuration loaded from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API keys mapped to the user they authenticate
    #[serde(rename = "apiKeys")]
    pub api_keys: HashMap<String, ApiKeyConfig>,
}

/// Identity bound to one API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Username reported in logs and passed to handlers
    pub user: String,

    /// Granted permissions, e.g. `ALL_FUNCTIONS` or `CREATE_CLIENT`
    pub permissions: Vec<String>,
}

impl AppConfig {
    /// Build a configuration from an in-memory key table
    pub fn with_keys(api_keys: HashMap<String, ApiKeyConfig>) -> Result<Self> {
        let config = Self { api_keys };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config JSON")?;

        config.validate()?;

        debug!("Loaded {} API keys", config.api_keys.len());
        Ok(config)
    }

    /// Load configuration from default locations
    /// Searches in order:
    /// 1. ~/.config/batchapi/batchapi.json
    /// 2. ./batchapi.json
    ///
    /// Returns error if no configuration file is found.
    pub fn load_default() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("batchapi").join("batchapi.json");
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        let local_path = Path::new("batchapi.json");
        if local_path.exists() {
            return Self::load(local_path);
        }

        anyhow::bail!(
            "Configuration file not found. Please create one at:\n\
             - ~/.config/batchapi/batchapi.json (recommended)\n\
             - ./batchapi.json (current directory)\n\
             \n\
             See batchapi.example.json for reference."
        )
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            anyhow::bail!("At least one API key must be configured");
        }

        for (key, entry) in &self.api_keys {
            // Never echo the key itself
            let label = if entry.user.is_empty() { "<unnamed>" } else { entry.user.as_str() };

            if key.chars().count() < MIN_API_KEY_LENGTH {
                anyhow::bail!(
                    "API key for user '{}' must be at least {} characters long",
                    label,
                    MIN_API_KEY_LENGTH
                );
            }

            if key.contains(char::is_whitespace) {
                anyhow::bail!("API key for user '{}' cannot contain whitespace characters", label);
            }

            if entry.user.trim().is_empty() {
                anyhow::bail!("Every API key must name a user");
            }

            if entry.permissions.is_empty() {
                anyhow::bail!("User '{}' must have at least one permission", entry.user);
            }

            if entry.permissions.iter().any(|p| p.trim().is_empty()) {
                anyhow::bail!("User '{}' has an empty permission", entry.user);
            }
        }

        Ok(())
    }

    /// Look up the identity bound to an API key
    pub fn find_key(&self, key: &str) -> Option<&ApiKeyConfig> {
        self.api_keys.get(key)
    }
}
