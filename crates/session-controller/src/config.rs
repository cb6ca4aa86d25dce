//! Session Controller configuration.
//!
//! Configuration is loaded from environment variables. Every variable has
//! a sensible default so a bare `session-controller` starts locally.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default invitation validity margin around meeting start, in seconds.
/// Tokens are accepted from one hour before start until one hour after.
pub const DEFAULT_INVITATION_WINDOW_SECONDS: i64 = 3600;

/// Default number of pre-key fetches allowed per rolling window.
pub const DEFAULT_PREKEY_FETCH_LIMIT: usize = 3;

/// Default rolling window for pre-key fetch rate limiting, in seconds.
pub const DEFAULT_PREKEY_FETCH_WINDOW_SECONDS: i64 = 60;

/// Default cooldown between admission requests from one session, in seconds.
pub const DEFAULT_ADMISSION_COOLDOWN_SECONDS: i64 = 5;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Default SC instance ID prefix.
pub const DEFAULT_SC_ID_PREFIX: &str = "sc";

/// Session Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Invitation validity margin around meeting start, in seconds.
    pub invitation_window_seconds: i64,

    /// Pre-key fetches allowed per rolling window per requester.
    pub prekey_fetch_limit: usize,

    /// Rolling window for pre-key fetch rate limiting, in seconds.
    pub prekey_fetch_window_seconds: i64,

    /// Minimum spacing between admission requests from one session, in seconds.
    pub admission_cooldown_seconds: i64,

    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_seconds: u64,

    /// Unique identifier for this SC instance.
    pub sc_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let invitation_window_seconds = parse_or_default(
            vars,
            "SC_INVITATION_WINDOW_SECONDS",
            DEFAULT_INVITATION_WINDOW_SECONDS,
        )?;

        let prekey_fetch_limit =
            parse_or_default(vars, "SC_PREKEY_FETCH_LIMIT", DEFAULT_PREKEY_FETCH_LIMIT)?;

        let prekey_fetch_window_seconds = parse_or_default(
            vars,
            "SC_PREKEY_FETCH_WINDOW_SECONDS",
            DEFAULT_PREKEY_FETCH_WINDOW_SECONDS,
        )?;

        let admission_cooldown_seconds = parse_or_default(
            vars,
            "SC_ADMISSION_COOLDOWN_SECONDS",
            DEFAULT_ADMISSION_COOLDOWN_SECONDS,
        )?;

        let request_timeout_seconds = parse_or_default(
            vars,
            "SC_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        let shutdown_timeout_seconds = parse_or_default(
            vars,
            "SC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        if invitation_window_seconds <= 0 {
            return Err(ConfigError::InvalidValue(
                "SC_INVITATION_WINDOW_SECONDS must be positive".to_string(),
            ));
        }

        if prekey_fetch_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_PREKEY_FETCH_LIMIT must be at least 1".to_string(),
            ));
        }

        // Generate SC instance ID
        let sc_id = vars.get("SC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            invitation_window_seconds,
            prekey_fetch_limit,
            prekey_fetch_window_seconds,
            admission_cooldown_seconds,
            request_timeout_seconds,
            shutdown_timeout_seconds,
            sc_id,
        })
    }
}

fn parse_or_default<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} is not a valid number: {raw}"))),
    }
}
