//! Rendezvous service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::rooms::ExpirationPolicy;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default signaling + room API bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default absolute room lifetime in seconds (10 minutes).
pub const DEFAULT_ROOM_MAX_AGE_SECONDS: u64 = 600;

/// Default idle timeout for rooms with at most one participant (5 minutes).
pub const DEFAULT_ROOM_IDLE_SECONDS: u64 = 300;

/// Default interval between expiration sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Default interval between `activeUsers` broadcasts.
pub const DEFAULT_ACTIVE_USERS_INTERVAL_SECONDS: u64 = 5;

/// Default per-connection outbound event buffer.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Default bcrypt cost for room passwords.
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rv";

/// Rendezvous service configuration.
#[derive(Clone)]
pub struct Config {
    /// Signaling WebSocket and room API bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// PostgreSQL URL for room persistence. Rooms are kept in memory when unset.
    /// Protected by `SecretString` to prevent accidental logging.
    pub database_url: Option<SecretString>,

    /// Absolute room lifetime in seconds.
    pub room_max_age_seconds: u64,

    /// Idle timeout in seconds for rooms with at most one participant.
    pub room_idle_seconds: u64,

    /// Interval between expiration sweeps in seconds.
    pub sweep_interval_seconds: u64,

    /// Interval between `activeUsers` broadcasts in seconds.
    pub active_users_interval_seconds: u64,

    /// Per-connection outbound event buffer size.
    pub outbox_capacity: usize,

    /// bcrypt cost for room password hashes (4..=31).
    pub password_hash_cost: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("room_max_age_seconds", &self.room_max_age_seconds)
            .field("room_idle_seconds", &self.room_idle_seconds)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field(
                "active_users_interval_seconds",
                &self.active_users_interval_seconds,
            )
            .field("outbox_capacity", &self.outbox_capacity)
            .field("password_hash_cost", &self.password_hash_cost)
            .finish()
    }
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
            .get("RV_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RV_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .map(|url| SecretString::from(url.clone()));

        // Expiration constants are policy: reject garbage instead of defaulting
        let room_max_age_seconds =
            parse_positive(vars, "RV_ROOM_MAX_AGE_SECONDS", DEFAULT_ROOM_MAX_AGE_SECONDS)?;
        let room_idle_seconds =
            parse_positive(vars, "RV_ROOM_IDLE_SECONDS", DEFAULT_ROOM_IDLE_SECONDS)?;

        let sweep_interval_seconds = vars
            .get("RV_SWEEP_INTERVAL_SECONDS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);

        let active_users_interval_seconds = vars
            .get("RV_ACTIVE_USERS_INTERVAL_SECONDS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_ACTIVE_USERS_INTERVAL_SECONDS);

        let outbox_capacity = vars
            .get("RV_OUTBOX_CAPACITY")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_OUTBOX_CAPACITY);

        let password_hash_cost = match vars.get("RV_PASSWORD_HASH_COST") {
            None => DEFAULT_PASSWORD_HASH_COST,
            Some(raw) => {
                let cost: u32 = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "RV_PASSWORD_HASH_COST must be an integer: {e}"
                    ))
                })?;
                if !(4..=31).contains(&cost) {
                    return Err(ConfigError::InvalidValue(format!(
                        "RV_PASSWORD_HASH_COST must be between 4 and 31, got {cost}"
                    )));
                }
                cost
            }
        };

        let instance_id = vars.get("RV_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            instance_id,
            database_url,
            room_max_age_seconds,
            room_idle_seconds,
            sweep_interval_seconds,
            active_users_interval_seconds,
            outbox_capacity,
            password_hash_cost,
        })
    }

    /// Room expiration policy derived from the configured constants.
    #[must_use]
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::new(
            Duration::from_secs(self.room_max_age_seconds),
            Duration::from_secs(self.room_idle_seconds),
        )
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub fn active_users_interval(&self) -> Duration {
        Duration::from_secs(self.active_users_interval_seconds)
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidValue(format!(
                "{name} must be a positive integer, got {raw:?}"
            ))),
        },
    }
}
