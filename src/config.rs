use std::time::Duration;

use config::Config;
use serde::Deserialize;

use crate::net::{StreamOptions, TaskParameters};
use crate::utils::error::NetworkError;

/// Configuration settings for the demo echo server.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The port on which the server will listen.
    pub port: u16,
    /// The maximum number of simultaneously accepted clients.
    pub max_clients: usize,
    /// Worker loop tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Whether the Nagle algorithm is enabled on client streams.
    pub nagle_enabled: bool,
    /// Whether keep-alive probing is enabled on client streams.
    pub keep_alive_enabled: bool,
    /// Idle seconds before the first keep-alive probe.
    pub keep_alive_idle_secs: u64,
    /// Seconds between keep-alive probes.
    pub keep_alive_interval_secs: u64,
    /// Unanswered keep-alive probes before the connection is dropped.
    pub keep_alive_count: u32,
}

impl AppConfig {
    /// Loads the configuration from the environment.
    ///
    /// Environment variables are prefixed with `NET_`; anything not set
    /// falls back to the defaults below (port 7 is the classic echo port).
    ///
    /// # Errors
    /// Returns `NetworkError::Configuration` if the configuration cannot be
    /// loaded or deserialized.
    pub fn from_env() -> Result<Self, NetworkError> {
        Config::builder()
            .set_default("port", 7_i64)
            .and_then(|builder| builder.set_default("max_clients", 1_i64))
            .and_then(|builder| builder.set_default("tick_interval_ms", 10_i64))
            .and_then(|builder| builder.set_default("nagle_enabled", true))
            .and_then(|builder| builder.set_default("keep_alive_enabled", false))
            .and_then(|builder| builder.set_default("keep_alive_idle_secs", 7200_i64))
            .and_then(|builder| builder.set_default("keep_alive_interval_secs", 75_i64))
            .and_then(|builder| builder.set_default("keep_alive_count", 9_i64))
            .map_err(|e| NetworkError::Configuration(e.to_string()))?
            .add_source(config::Environment::with_prefix("NET"))
            .build()
            .map_err(|e| NetworkError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| NetworkError::Configuration(e.to_string()))
    }

    /// Validates the configuration settings.
    ///
    /// # Errors
    /// Returns `NetworkError::Configuration` if validation fails.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.port == 0 {
            return Err(NetworkError::Configuration("port must be nonzero".into()));
        }
        if self.max_clients == 0 {
            return Err(NetworkError::Configuration(
                "max_clients must be greater than 0".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(NetworkError::Configuration(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The socket options this configuration asks for.
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            nagle_enabled: self.nagle_enabled,
            keep_alive_enabled: self.keep_alive_enabled,
            keep_alive_idle_time: Duration::from_secs(self.keep_alive_idle_secs),
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            keep_alive_count: self.keep_alive_count,
        }
    }

    /// The worker task parameters this configuration asks for.
    pub fn task_parameters(&self) -> TaskParameters {
        TaskParameters { tick_interval: Duration::from_millis(self.tick_interval_ms) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            port: 7,
            max_clients: 2,
            tick_interval_ms: 10,
            nagle_enabled: true,
            keep_alive_enabled: false,
            keep_alive_idle_secs: 7200,
            keep_alive_interval_secs: 75,
            keep_alive_count: 9,
        }
    }

    #[test]
    fn validate_rejects_zero_limits() {
        assert!(base().validate().is_ok());
        assert!(AppConfig { port: 0, ..base() }.validate().is_err());
        assert!(AppConfig { max_clients: 0, ..base() }.validate().is_err());
        assert!(AppConfig { tick_interval_ms: 0, ..base() }.validate().is_err());
    }

    #[test]
    fn conversions_carry_units() {
        let config = base();
        assert_eq!(config.task_parameters().tick_interval, Duration::from_millis(10));
        assert_eq!(config.stream_options().keep_alive_idle_time, Duration::from_secs(7200));
    }
}
