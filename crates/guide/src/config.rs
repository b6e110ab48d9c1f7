//! Guide configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `TUNI_BACKEND_URL` - Project URL of the hosted backend (e.g. `https://abc.supabase.co`)
//! - `TUNI_BACKEND_ANON_KEY` - Public anon API key of the project
//!
//! ## Optional
//! - `TUNI_SITE_URL` - Public URL of the app, used in reset-password links (default: `http://localhost:5173`)
//! - `TUNI_DATA_DIR` - Directory for local storage (default: `.tuni`)
//! - `TUNI_GEOCODER_URL` - Reverse geocoding endpoint (default: Nominatim)
//! - `TUNI_IP_LOCATOR_URL` - IP geolocation endpoint used when no device position is configured
//! - `TUNI_DEVICE_LAT` / `TUNI_DEVICE_LNG` - Fixed device position
//! - `TUNI_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use tuni_core::Coordinates;

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const DEFAULT_SITE_URL: &str = "http://localhost:5173";
const DEFAULT_DATA_DIR: &str = ".tuni";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Guide application configuration.
#[derive(Debug, Clone)]
pub struct GuideConfig {
    /// Hosted backend configuration
    pub backend: BackendConfig,
    /// Public site URL (reset-password redirects land here)
    pub site_url: Url,
    /// Directory holding local storage
    pub data_dir: PathBuf,
    /// Location provider configuration
    pub location: LocationConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Hosted backend configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL
    pub url: Url,
    /// Anon API key (sent as `apikey` on every request)
    pub anon_key: SecretString,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Location provider configuration.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// Reverse geocoding endpoint
    pub geocoder_url: Url,
    /// IP geolocation endpoint
    pub ip_locator_url: Option<Url>,
    /// Fixed device position, overriding IP geolocation
    pub device_position: Option<Coordinates>,
}

impl GuideConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = BackendConfig::from_env()?;
        let site_url = parse_url(
            "TUNI_SITE_URL",
            &get_env_or_default("TUNI_SITE_URL", DEFAULT_SITE_URL),
        )?;
        let data_dir = PathBuf::from(get_env_or_default("TUNI_DATA_DIR", DEFAULT_DATA_DIR));
        let location = LocationConfig::from_env()?;

        Ok(Self {
            backend,
            site_url,
            data_dir,
            location,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Where reset-password emails send the user.
    #[must_use]
    pub fn reset_password_url(&self) -> String {
        format!("{}/reset-password", self.site_url.as_str().trim_end_matches('/'))
    }
}

impl BackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = parse_url("TUNI_BACKEND_URL", &get_required_env("TUNI_BACKEND_URL")?)?;
        let anon_key = get_validated_secret("TUNI_BACKEND_ANON_KEY")?;
        let timeout_secs = get_env_or_default(
            "TUNI_REQUEST_TIMEOUT_SECS",
            &DEFAULT_REQUEST_TIMEOUT_SECS.to_string(),
        )
        .parse::<u64>()
        .map_err(|e| {
            ConfigError::InvalidEnvVar("TUNI_REQUEST_TIMEOUT_SECS".to_string(), e.to_string())
        })?;

        Ok(Self {
            url,
            anon_key,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl LocationConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let geocoder_url = parse_url(
            "TUNI_GEOCODER_URL",
            &get_env_or_default("TUNI_GEOCODER_URL", DEFAULT_GEOCODER_URL),
        )?;
        let ip_locator_url = get_optional_env("TUNI_IP_LOCATOR_URL")
            .map(|raw| parse_url("TUNI_IP_LOCATOR_URL", &raw))
            .transpose()?;
        let device_position = parse_device_position(
            get_optional_env("TUNI_DEVICE_LAT").as_deref(),
            get_optional_env("TUNI_DEVICE_LNG").as_deref(),
        )?;

        Ok(Self {
            geocoder_url,
            ip_locator_url,
            device_position,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable; empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Both coordinates must be given together.
fn parse_device_position(
    lat: Option<&str>,
    lng: Option<&str>,
) -> Result<Option<Coordinates>, ConfigError> {
    let parse = |key: &str, raw: &str| {
        raw.trim()
            .parse::<f64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    };

    match (lat, lng) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => {
            let position = Coordinates::new(
                parse("TUNI_DEVICE_LAT", lat)?,
                parse("TUNI_DEVICE_LNG", lng)?,
            );
            if position.is_valid() {
                Ok(Some(position))
            } else {
                Err(ConfigError::InvalidEnvVar(
                    "TUNI_DEVICE_LAT".to_string(),
                    "position out of range".to_string(),
                ))
            }
        }
        (Some(_), None) => Err(ConfigError::MissingEnvVar("TUNI_DEVICE_LNG".to_string())),
        (None, Some(_)) => Err(ConfigError::MissingEnvVar("TUNI_DEVICE_LAT".to_string())),
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a key is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(value.trim(), key)?;
    Ok(SecretString::from(value.trim().to_string()))
}

/// Expose the anon key for request headers.
pub(crate) fn anon_key(config: &BackendConfig) -> &str {
    config.anon_key.expose_secret()
}
