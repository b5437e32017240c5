//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use crate::model::UserId;
use secrecy::SecretString;
use uuid::Uuid;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Default acting user for CLI invocations, overridable per command.
    pub default_actor: Option<UserId>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let default_actor = match std::env::var("PLOWTRACK_ACTOR") {
            Ok(raw) => Some(
                raw.parse::<Uuid>()
                    .map(UserId)
                    .map_err(|e| Error::Config(format!("PLOWTRACK_ACTOR is not a UUID: {e}")))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            default_actor,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
