//! Engine configuration, read from environment variables

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::CircuitBreakerConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub redis_url: String,
    /// Address the HTTP server binds to
    pub http_bind: String,
    pub db_max_connections: u32,
    /// Fraction of the discounted subtotal charged as tax, in [0, 1]
    pub tax_rate: Decimal,
    /// Upper bound on one unit of work, commit included
    pub transaction_timeout: Duration,
    /// Upper bound on one tracking mirror write
    pub tracking_timeout: Duration,
    pub tracking_breaker: CircuitBreakerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset and blank values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let tax_rate: Decimal = parse(&var, "TAX_RATE", Decimal::new(8, 2))?;
        if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
            return Err(ConfigError::Invalid {
                name: "TAX_RATE",
                value: tax_rate.to_string(),
                reason: "must be between 0 and 1".into(),
            });
        }

        let failure_threshold: u32 = parse(&var, "TRACKING_BREAKER_FAILURES", 5)?;
        if failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                name: "TRACKING_BREAKER_FAILURES",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let db_max_connections: u32 = parse(&var, "DB_MAX_CONNECTIONS", 10)?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "DB_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            database_url,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379/".into()),
            http_bind: var("HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".into()),
            db_max_connections,
            tax_rate,
            transaction_timeout: millis(&var, "TRANSACTION_TIMEOUT_MS", 5_000)?,
            tracking_timeout: millis(&var, "TRACKING_TIMEOUT_MS", 1_000)?,
            tracking_breaker: CircuitBreakerConfig {
                failure_threshold,
                cool_down: millis(&var, "TRACKING_BREAKER_COOLDOWN_MS", 30_000)?,
                ..CircuitBreakerConfig::default()
            },
        })
    }
}

fn parse<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Positive millisecond duration
fn millis(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let ms: u64 = parse(var, name, default_ms)?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_millis(ms))
}
