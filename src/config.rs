// src/config.rs
use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// No URL means the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub smtp: Option<SmtpConfig>,
    pub vote_retry_attempts: usize,
    pub otp_ttl_seconds: i64,
    pub cors_allow_origin: Option<String>,
}

impl Config {
    /// Reads the process environment (after `.env`, if present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let smtp = match var("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                port: try_load(&var, "SMTP_PORT", "587")?,
                username: var("SMTP_USERNAME"),
                password: var("SMTP_PASSWORD"),
                from: var("SMTP_FROM").unwrap_or_else(|| "no-reply@redcurtain.app".to_string()),
                host,
            }),
            None => {
                warn!("SMTP_HOST not set, emails will only be logged");
                None
            }
        };

        let database_url = var("DATABASE_URL");
        if database_url.is_none() {
            warn!("DATABASE_URL not set, using the in-memory store");
        }

        Ok(Self {
            port: try_load(&var, "PORT", "3030")?,
            database_url,
            database_max_connections: try_load(&var, "DATABASE_MAX_CONNECTIONS", "5")?,
            smtp,
            vote_retry_attempts: try_load(&var, "VOTE_RETRY_ATTEMPTS", "3")?,
            otp_ttl_seconds: try_load(&var, "OTP_TTL_SECONDS", "600")?,
            cors_allow_origin: var("CORS_ALLOW_ORIGIN"),
        })
    }
}

fn try_load<T, F>(var: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}
