//! Runtime configuration from `AGENTBUS_*` environment variables.

use std::time::Duration;

use crate::supervisor::agents::{RestartIntensity, RestartPolicy};

pub const SYNC_TIMEOUT_MS: &str = "AGENTBUS_SYNC_TIMEOUT_MS";
pub const MAX_RESTARTS: &str = "AGENTBUS_MAX_RESTARTS";
pub const RESTART_WINDOW_MS: &str = "AGENTBUS_RESTART_WINDOW_MS";
pub const DEFAULT_RESTART: &str = "AGENTBUS_DEFAULT_RESTART";
pub const TELEMETRY_CAPACITY: &str = "AGENTBUS_TELEMETRY_CAPACITY";
pub const LOG: &str = "AGENTBUS_LOG";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentBusConfig {
    /// Default timeout for synchronous dispatch.
    pub sync_dispatch_timeout: Duration,
    pub default_restart: RestartPolicy,
    pub restart_intensity: RestartIntensity,
    /// Dispatch reports buffered per telemetry receiver.
    pub telemetry_capacity: usize,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AgentBusConfig {
    fn default() -> Self {
        Self {
            sync_dispatch_timeout: Duration::from_millis(5000),
            default_restart: RestartPolicy::Permanent,
            restart_intensity: RestartIntensity::default(),
            telemetry_capacity: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl AgentBusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let sync_dispatch_timeout = match get(SYNC_TIMEOUT_MS) {
            Some(raw) => match parse_number::<u64>(SYNC_TIMEOUT_MS, &raw)? {
                0 => return Err(invalid(SYNC_TIMEOUT_MS, &raw)),
                ms => Duration::from_millis(ms),
            },
            None => defaults.sync_dispatch_timeout,
        };

        let max_restarts = match get(MAX_RESTARTS) {
            Some(raw) => parse_number::<u32>(MAX_RESTARTS, &raw)?,
            None => defaults.restart_intensity.max_restarts,
        };

        let window = match get(RESTART_WINDOW_MS) {
            Some(raw) => Duration::from_millis(parse_number::<u64>(RESTART_WINDOW_MS, &raw)?),
            None => defaults.restart_intensity.window,
        };

        let default_restart = match get(DEFAULT_RESTART) {
            Some(raw) => raw.parse().map_err(|_| invalid(DEFAULT_RESTART, &raw))?,
            None => defaults.default_restart,
        };

        let telemetry_capacity = match get(TELEMETRY_CAPACITY) {
            Some(raw) => match parse_number::<usize>(TELEMETRY_CAPACITY, &raw)? {
                0 => return Err(invalid(TELEMETRY_CAPACITY, &raw)),
                capacity => capacity,
            },
            None => defaults.telemetry_capacity,
        };

        Ok(Self {
            sync_dispatch_timeout,
            default_restart,
            restart_intensity: RestartIntensity {
                max_restarts,
                window,
            },
            telemetry_capacity,
            log_filter: get(LOG).unwrap_or(defaults.log_filter),
        })
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}

/// Load the first `.env` found in the current directory or its ancestors.
pub fn load_dotenv() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => tracing::info!(path = %candidate.display(), "Loaded environment from .env"),
                Err(e) => tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "Failed to load .env file"
                ),
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::debug!(cwd = %cwd.display(), "No .env file found; using process environment only");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AgentBusConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentBusConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(config_from(&[]).unwrap(), AgentBusConfig::default());
    }

    #[test]
    fn test_reads_every_key() {
        let config = config_from(&[
            (SYNC_TIMEOUT_MS, "250"),
            (MAX_RESTARTS, "7"),
            (RESTART_WINDOW_MS, "1000"),
            (DEFAULT_RESTART, "transient"),
            (TELEMETRY_CAPACITY, "32"),
            (LOG, "agentbus=debug"),
        ])
        .unwrap();

        assert_eq!(config.sync_dispatch_timeout, Duration::from_millis(250));
        assert_eq!(config.restart_intensity.max_restarts, 7);
        assert_eq!(config.restart_intensity.window, Duration::from_secs(1));
        assert_eq!(config.default_restart, RestartPolicy::Transient);
        assert_eq!(config.telemetry_capacity, 32);
        assert_eq!(config.log_filter, "agentbus=debug");
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[(SYNC_TIMEOUT_MS, "  "), (LOG, "")]).unwrap();
        assert_eq!(config, AgentBusConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            config_from(&[(SYNC_TIMEOUT_MS, "soon")]),
            Err(ConfigError::Invalid {
                key: SYNC_TIMEOUT_MS,
                value: "soon".to_string()
            })
        );
        assert!(config_from(&[(SYNC_TIMEOUT_MS, "0")]).is_err());
        assert!(config_from(&[(DEFAULT_RESTART, "sometimes")]).is_err());
        assert!(config_from(&[(TELEMETRY_CAPACITY, "-1")]).is_err());
    }
}
