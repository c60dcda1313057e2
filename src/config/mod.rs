//! Configuration for walink.
//!
//! Everything comes from environment variables. A `.env` file in the working
//! directory is loaded first via dotenvy, which never overwrites variables
//! that are already set.

pub(crate) mod helpers;
mod provisioning;

use std::time::Duration;

use crate::error::ConfigError;

pub use self::provisioning::{DEFAULT_HOST, DEFAULT_PORT, ProvisioningConfig};

use self::helpers::{optional_env, parse_optional_env};

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub provisioning: ProvisioningConfig,
    pub logging: LoggingConfig,
    pub mock: MockNetworkConfig,
}

impl Config {
    /// Load `.env`, then resolve every section from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve()
    }

    /// Resolve from the current environment only.
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            provisioning: ProvisioningConfig::resolve()?,
            logging: LoggingConfig::resolve()?,
            mock: MockNetworkConfig::resolve()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl LoggingConfig {
    pub const DEFAULT_FILTER: &'static str = "walink=info,tower_http=info";

    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            format: parse_optional_env("LOG_FORMAT", LogFormat::Pretty, "'pretty' or 'json'")?,
            default_filter: optional_env("WALINK_LOG")?
                .unwrap_or_else(|| Self::DEFAULT_FILTER.to_string()),
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_filter: Self::DEFAULT_FILTER.to_string(),
        }
    }
}

/// Behaviour of the development network the binary runs against.
#[derive(Debug, Clone)]
pub struct MockNetworkConfig {
    /// QR refreshes emitted before the login completes.
    pub qr_rotations: usize,
    /// Delay between scripted steps.
    pub step_interval: Duration,
}

impl MockNetworkConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            qr_rotations: parse_optional_env("MOCK_QR_ROTATIONS", 2, "a non-negative integer")?,
            step_interval: Duration::from_secs(parse_optional_env(
                "MOCK_STEP_INTERVAL_SECS",
                5,
                "a number of seconds",
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use secrecy::ExposeSecret;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "PROVISIONING_HOST",
        "PROVISIONING_PORT",
        "PROVISIONING_SHARED_SECRET",
        "LOG_FORMAT",
        "WALINK_LOG",
        "MOCK_QR_ROTATIONS",
        "MOCK_STEP_INTERVAL_SECS",
    ];

    fn clear_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn resolves_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let config = Config::resolve().expect("resolve");

        assert_eq!(config.provisioning.host, DEFAULT_HOST);
        assert_eq!(config.provisioning.port, DEFAULT_PORT);
        assert!(config.provisioning.secret_generated);
        assert_eq!(config.provisioning.shared_secret.expose_secret().len(), 64);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.mock.qr_rotations, 2);
        assert_eq!(config.mock.step_interval, Duration::from_secs(5));
    }

    #[test]
    fn applies_env_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PROVISIONING_HOST", "0.0.0.0");
            std::env::set_var("PROVISIONING_PORT", "8443");
            std::env::set_var("PROVISIONING_SHARED_SECRET", "hunter2");
            std::env::set_var("LOG_FORMAT", "JSON");
            std::env::set_var("MOCK_QR_ROTATIONS", "0");
        }

        let config = Config::resolve().expect("resolve");

        assert_eq!(config.provisioning.socket_addr().unwrap().to_string(), "0.0.0.0:8443");
        assert!(!config.provisioning.secret_generated);
        assert_eq!(config.provisioning.shared_secret.expose_secret(), "hunter2");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.mock.qr_rotations, 0);

        clear_env();
    }

    #[test]
    fn rejects_invalid_port() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PROVISIONING_PORT", "99999");
        }

        match Config::resolve().unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "PROVISIONING_PORT"),
            other => panic!("unexpected error: {other}"),
        }

        clear_env();
    }

    #[test]
    fn blank_values_count_as_unset() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("PROVISIONING_SHARED_SECRET", "  ");
        }

        let config = Config::resolve().expect("resolve");
        assert!(config.provisioning.secret_generated);

        clear_env();
    }
}
