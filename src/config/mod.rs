//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::{GameParams, RegistrySettings};
use crate::util::rate_limit::INPUT_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated or `*`
    pub client_origin: String,

    /// How long a finished match lingers for attached clients
    pub finished_match_grace: Duration,
    /// How long an unfinished match survives with nobody attached
    pub abandoned_match_timeout: Duration,

    /// Largest page the queue listing serves
    pub queue_page_size_max: u32,
    /// Inbound socket messages per second per connection
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, applying defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            server_addr: server_addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            finished_match_grace: Duration::from_secs(parse_or(&lookup, "FINISHED_MATCH_GRACE_SECS", 30)?),
            abandoned_match_timeout: Duration::from_secs(parse_or(&lookup, "ABANDONED_MATCH_TIMEOUT_SECS", 60)?),

            queue_page_size_max: positive(parse_or(&lookup, "QUEUE_PAGE_SIZE_MAX", 100)?, "QUEUE_PAGE_SIZE_MAX")?,
            input_rate_limit: positive(parse_or(&lookup, "INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?, "INPUT_RATE_LIMIT")?,
        })
    }

    /// Match lifecycle settings for the registry
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            params: GameParams::default(),
            finished_grace: self.finished_match_grace,
            abandoned_timeout: self.abandoned_match_timeout,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn positive(value: u32, key: &'static str) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(key));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
