//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration priority (highest to lowest):
//! 1. Deploy-platform environment variables (HOST, PORT, MODEL_PATH, API_KEY)
//! 2. APP_-prefixed environment variables (APP_SERVER_HOST, ...)
//! 3. Configuration file (config.toml)
//! 4. Defaults

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub auth: AuthConfig,
}

/// HTTP server settings.
///
/// ## Fields:
/// - `host`: address to bind to ("127.0.0.1" for local only, "0.0.0.0" for any)
/// - `port`: TCP port to listen on
/// - `max_request_size_mb`: upper bound for request bodies (JSON and uploads)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_mb: usize,
}

/// Classifier artifact settings.
///
/// ## Fields:
/// - `path`: filesystem path of the safetensors model container
/// - `strict_startup`: when true, a failed model load aborts startup instead
///   of falling back to degraded serving with `model_loaded=false`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub strict_startup: bool,
}

/// Access control settings. With `api_key` unset the prediction endpoints are
/// open; when set, requests must present `Authorization: Bearer <key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                max_request_size_mb: 10,
            },
            model: ModelConfig {
                path: "./model/hiragana_classifier.safetensors".to_string(),
                strict_startup: false,
            },
            auth: AuthConfig { api_key: None },
        }
    }
}

impl AppConfig {
    /// Load configuration, layering file and environment sources over the
    /// defaults.
    ///
    /// Deploy platforms commonly inject bare `HOST`/`PORT` variables, and the
    /// original deployment supplied `MODEL_PATH`/`API_KEY` the same way, so
    /// those four are honored in addition to the `APP_` prefix convention.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(model_path) = env::var("MODEL_PATH") {
            settings = settings.set_override("model.path", model_path)?;
        }

        if let Ok(api_key) = env::var("API_KEY") {
            settings = settings.set_override("auth.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Sanity-check the loaded values before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_request_size_mb == 0 {
            return Err(anyhow::anyhow!("Max request size must be greater than 0"));
        }

        if self.model.path.trim().is_empty() {
            return Err(anyhow::anyhow!("Model path cannot be empty"));
        }

        if let Some(key) = &self.auth.api_key {
            if key.trim().is_empty() {
                return Err(anyhow::anyhow!("API key, when set, cannot be blank"));
            }
        }

        Ok(())
    }

    /// Request body limit in bytes, derived from the configured megabytes.
    pub fn max_request_size_bytes(&self) -> usize {
        self.server.max_request_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.max_request_size_mb, 10);
        assert!(!config.model.strict_startup);
        assert!(config.auth.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.path = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.api_key = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_size_conversion() {
        let config = AppConfig::default();
        assert_eq!(config.max_request_size_bytes(), 10 * 1024 * 1024);
    }
}
