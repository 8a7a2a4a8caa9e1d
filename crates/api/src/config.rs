//! Application configuration

use std::net::SocketAddr;

use medcomply_billing::StripeConfig;
use thiserror::Error;

const DEFAULT_APP_URL: &str = "http://localhost:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error(transparent)]
    Billing(#[from] medcomply_billing::BillingError),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub bind_address: SocketAddr,
    pub log_format: LogFormat,
    pub version: String,
    /// Public dashboard URL, used for checkout and portal redirects
    pub app_url: String,
    pub stripe: StripeConfig,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let bind_address = parse_var(
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;

        Ok(Self {
            database_url,
            database_max_connections: parse_var(
                "DATABASE_MAX_CONNECTIONS",
                medcomply_shared::DEFAULT_MAX_CONNECTIONS,
            )?,
            run_migrations: parse_var("RUN_MIGRATIONS", true)?,
            bind_address,
            log_format: var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Pretty),
            version: var("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            app_url: var("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            stripe: StripeConfig::from_env()?,
        })
    }
}
