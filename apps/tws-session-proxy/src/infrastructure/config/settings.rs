//! Session Proxy Configuration Settings
//!
//! Gateway endpoint and session limits, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::GatewayEndpoint;
use crate::application::session::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_PACING_DELAY, DEFAULT_TIMEOUT, SessionConfig,
};

/// Gateway host variable.
pub const ENV_HOST: &str = "TWS_HOST";
/// Gateway port variable.
pub const ENV_PORT: &str = "TWS_PORT";
/// Client id variable.
pub const ENV_CLIENT_ID: &str = "TWS_CLIENT_ID";
/// Session deadline variable, in seconds.
pub const ENV_SESSION_TIMEOUT_SECS: &str = "TWS_SESSION_TIMEOUT_SECS";
/// Pacing delay variable, in milliseconds.
pub const ENV_PACING_DELAY_MS: &str = "TWS_PACING_DELAY_MS";
/// Inbound event channel capacity variable.
pub const ENV_EVENT_CHANNEL_CAPACITY: &str = "TWS_EVENT_CHANNEL_CAPACITY";

/// Session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Hard deadline for the whole session.
    pub timeout: Duration,
    /// Delay between consecutive requests (zero disables pacing).
    pub pacing_delay: Duration,
    /// Capacity of the inbound event channel.
    pub event_capacity: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            pacing_delay: DEFAULT_PACING_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxySettings {
    /// Gateway to connect to.
    pub endpoint: GatewayEndpoint,
    /// Session limits.
    pub limits: SessionLimits,
}

impl ProxySettings {
    /// Create configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but empty or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but empty or unparseable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = match lookup(ENV_HOST) {
            Some(host) if host.trim().is_empty() => {
                return Err(ConfigError::EmptyValue(ENV_HOST.to_string()));
            }
            Some(host) => host.trim().to_string(),
            None => defaults.endpoint.host,
        };

        let endpoint = GatewayEndpoint::new(
            host,
            parse_var(&lookup, ENV_PORT, defaults.endpoint.port)?,
            parse_var(&lookup, ENV_CLIENT_ID, defaults.endpoint.client_id)?,
        );

        let event_capacity = parse_var(
            &lookup,
            ENV_EVENT_CHANNEL_CAPACITY,
            defaults.limits.event_capacity,
        )?;
        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_EVENT_CHANNEL_CAPACITY.to_string(),
                value: "0".to_string(),
            });
        }

        let limits = SessionLimits {
            timeout: Duration::from_secs(parse_var(
                &lookup,
                ENV_SESSION_TIMEOUT_SECS,
                defaults.limits.timeout.as_secs(),
            )?),
            pacing_delay: Duration::from_millis(parse_var(
                &lookup,
                ENV_PACING_DELAY_MS,
                duration_millis(defaults.limits.pacing_delay),
            )?),
            event_capacity,
        };

        Ok(Self { endpoint, limits })
    }

    /// Session configuration for these settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.limits.timeout,
            pacing_delay: self.limits.pacing_delay,
            event_capacity: self.limits.event_capacity,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Load a `.env` file from the current directory or the nearest ancestor
/// that has one. Missing files are not an error.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let settings = ProxySettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.endpoint.address(), "127.0.0.1:7497");
        assert_eq!(settings.endpoint.client_id, 0);
        assert_eq!(settings.limits.timeout, Duration::from_secs(900));
        assert_eq!(settings.limits.pacing_delay, Duration::from_millis(500));
        assert_eq!(settings.limits.event_capacity, 1024);
    }

    #[test]
    fn overrides_from_variables() {
        let settings = ProxySettings::from_lookup(lookup(&[
            (ENV_HOST, "gateway.internal"),
            (ENV_PORT, "4002"),
            (ENV_CLIENT_ID, "17"),
            (ENV_SESSION_TIMEOUT_SECS, "60"),
            (ENV_PACING_DELAY_MS, "0"),
        ]))
        .unwrap();

        assert_eq!(settings.endpoint.address(), "gateway.internal:4002");
        assert_eq!(settings.endpoint.client_id, 17);
        assert_eq!(settings.limits.timeout, Duration::from_secs(60));
        assert!(settings.limits.pacing_delay.is_zero());

        let config = settings.session_config();
        assert_eq!(config.endpoint, settings.endpoint);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn rejects_empty_and_invalid_values() {
        assert!(matches!(
            ProxySettings::from_lookup(lookup(&[(ENV_HOST, "  ")])),
            Err(ConfigError::EmptyValue(key)) if key == ENV_HOST
        ));
        assert!(matches!(
            ProxySettings::from_lookup(lookup(&[(ENV_PORT, "seventy")])),
            Err(ConfigError::InvalidValue { key, .. }) if key == ENV_PORT
        ));
        assert!(matches!(
            ProxySettings::from_lookup(lookup(&[(ENV_EVENT_CHANNEL_CAPACITY, "0")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
