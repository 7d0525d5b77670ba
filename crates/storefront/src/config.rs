//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ELECTROKART_API_URL` - Base URL of the REST API (http or https)
//!
//! ## Optional
//! - `ELECTROKART_STATE_DIR` - Durable storage directory (default: .electrokart)
//! - `ELECTROKART_HTTP_TIMEOUT_SECS` - Request timeout (default: 30)
//! - `ELECTROKART_CATALOG_TTL_SECS` - Catalog cache lifetime (default: 300)
//! - `ELECTROKART_PAYMENT_KEY` - Public key id for the payment widget
//! - `ELECTROKART_STORE_NAME` - Name shown in the payment widget (default: ElectroKart)
//! - `ELECTROKART_THEME_COLOR` - Payment widget accent color (default: #3399cc)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub api_url: Url,
    /// Directory for the persisted session and cookie store
    pub state_dir: PathBuf,
    /// Per-request timeout
    pub http_timeout: Duration,
    /// Catalog cache time-to-live
    pub catalog_ttl: Duration,
    /// Public key id for the payment widget
    pub payment_key: Option<String>,
    /// Store name shown in the payment widget
    pub store_name: String,
    /// Payment widget accent color
    pub theme_color: String,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = parse_api_url(&get_required_env("ELECTROKART_API_URL")?)?;
        let state_dir = PathBuf::from(get_env_or_default("ELECTROKART_STATE_DIR", ".electrokart"));
        let http_timeout = get_secs("ELECTROKART_HTTP_TIMEOUT_SECS", 30)?;
        let catalog_ttl = get_secs("ELECTROKART_CATALOG_TTL_SECS", 300)?;
        let payment_key = get_optional_env("ELECTROKART_PAYMENT_KEY");
        let store_name = get_env_or_default("ELECTROKART_STORE_NAME", "ElectroKart");
        let theme_color = get_env_or_default("ELECTROKART_THEME_COLOR", "#3399cc");

        Ok(Self {
            api_url,
            state_dir,
            http_timeout,
            catalog_ttl,
            payment_key,
            store_name,
            theme_color,
        })
    }

    /// Configuration with defaults for everything but the API URL.
    #[must_use]
    pub fn new(api_url: Url, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url,
            state_dir: state_dir.into(),
            http_timeout: Duration::from_secs(30),
            catalog_ttl: Duration::from_secs(300),
            payment_key: None,
            store_name: "ElectroKart".to_string(),
            theme_color: "#3399cc".to_string(),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Blank counts as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn get_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = get_optional_env(key) else {
        return Ok(Duration::from_secs(default));
    };
    parse_secs(key, &raw)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        )),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        ConfigError::InvalidEnvVar("ELECTROKART_API_URL".to_string(), e.to_string())
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            "ELECTROKART_API_URL".to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_url() {
        let url = parse_api_url("https://api.electrokart.in/api").unwrap();
        assert_eq!(url.host_str(), Some("api.electrokart.in"));
        assert!(parse_api_url("ftp://example.com").is_err());
        assert!(parse_api_url("not a url").is_err());
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("T", "45").unwrap(), Duration::from_secs(45));
        assert!(matches!(
            parse_secs("T", "0"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(parse_secs("T", "soon").is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("ELECTROKART_API_URL".to_string());
        assert_eq!(
            err.to_string(),
            "Missing environment variable: ELECTROKART_API_URL"
        );
    }
}
