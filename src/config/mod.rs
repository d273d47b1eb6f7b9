//! Configuration values read by the kernel.
//!
//! The kernel only consumes `host` and `port` (after the `Created` milestone);
//! the remaining [`AppConfig`] fields are exposed for binaries that want to set
//! up logging from the same source.

use crate::error::{KernelError, Result};
use dashmap::DashMap;
use std::env;
use std::ffi::OsString;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

pub const APP_NAME: &str = "APP_NAME";
pub const APP_ENV: &str = "APP_ENV";
pub const APP_HOST: &str = "APP_HOST";
pub const APP_PORT: &str = "APP_PORT";
pub const APP_LOG_LEVEL: &str = "APP_LOG_LEVEL";

const DEFAULT_NAME: &str = "meshestra-app";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u32 = 3000;

/// Configuration service
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Create a configuration service seeded from the process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn new() -> Self {
        Self::from_vars(env::vars_os())
    }

    fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let service = Self::empty();
        for (key, value) in vars {
            match (key.to_str(), value.to_str()) {
                (Some(key), Some(value)) => service.set(key, value),
                _ => tracing::debug!("Skipping non-Unicode environment variable {:?}", key),
            }
        }
        service
    }

    /// Create a configuration service with no values.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly useful in tests.
    pub fn with(self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Parse `key` into `T`. A missing key yields `Ok(None)`; a value that
    /// does not parse is a configuration error.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                KernelError::config(format!("{key} has invalid value '{raw}': {e}"))
            }),
        }
    }
}

/// Deployment environment of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    Local,
    Development,
    Staging,
    #[default]
    Production,
    Test,
}

/// Log verbosity, using the usual level names plus `fatal` and `silent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
    Silent,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Fatal | LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Silent => "off",
        }
    }
}

/// Typed application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub name: String,
    pub env: Environment,
    pub host: String,
    pub port: u32,
    pub log_level: LogLevel,
}

impl AppConfig {
    /// Read and validate the application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Config`] when a value is present but invalid.
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let name = config
            .get(APP_NAME)
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        if !is_kebab_case(&name) {
            return Err(KernelError::config(format!(
                "{APP_NAME} must be kebab-case, got '{name}'"
            )));
        }

        let host = config
            .get(APP_HOST)
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.is_empty() {
            return Err(KernelError::config(format!("{APP_HOST} must not be empty")));
        }

        Ok(Self {
            name,
            env: config.get_parsed(APP_ENV)?.unwrap_or_default(),
            host,
            port: config.get_parsed(APP_PORT)?.unwrap_or(DEFAULT_PORT),
            log_level: config.get_parsed(APP_LOG_LEVEL)?.unwrap_or_default(),
        })
    }

    /// The configured port as a TCP port number.
    pub fn socket_port(&self) -> Result<u16> {
        u16::try_from(self.port).map_err(|_| {
            KernelError::config(format!(
                "{APP_PORT} must be between 0 and {}, got {}",
                u16::MAX,
                self.port
            ))
        })
    }
}

fn is_kebab_case(value: &str) -> bool {
    let mut chars = value.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }
    !value.ends_with('-')
        && !value.contains("--")
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_is_read_without_panicking() {
        let config = ConfigService::new();
        if let Ok(path) = env::var("PATH") {
            assert_eq!(config.get("PATH"), Some(path));
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_unicode_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let config = ConfigService::from_vars([
            (OsString::from("BROKEN"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xc3, 0x28]), OsString::from("value")),
            (OsString::from(APP_PORT), OsString::from("8080")),
        ]);

        assert_eq!(config.get("BROKEN"), None);
        assert_eq!(config.get(APP_PORT).as_deref(), Some("8080"));
        assert_eq!(config.config.len(), 1);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_config(&ConfigService::empty()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.env, Environment::Production);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn values_are_parsed_from_the_source() {
        let source = ConfigService::empty()
            .with(APP_NAME, "billing-api")
            .with(APP_ENV, "staging")
            .with(APP_HOST, "127.0.0.1")
            .with(APP_PORT, "8080")
            .with(APP_LOG_LEVEL, "DEBUG");

        let config = AppConfig::from_config(&source).unwrap();
        assert_eq!(config.name, "billing-api");
        assert_eq!(config.env, Environment::Staging);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.socket_port().unwrap(), 8080);
        assert_eq!(config.log_level.as_filter(), "debug");
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let source = ConfigService::empty().with(APP_PORT, "not-a-port");
        let err = AppConfig::from_config(&source).unwrap_err();
        assert!(matches!(err, KernelError::Config { .. }));
    }

    #[test]
    fn port_outside_tcp_range_is_rejected() {
        let source = ConfigService::empty().with(APP_PORT, "70000");
        let config = AppConfig::from_config(&source).unwrap();
        assert!(config.socket_port().is_err());
    }

    #[test]
    fn app_name_must_be_kebab_case() {
        for bad in ["Billing", "billing--api", "billing-", "1api", ""] {
            let source = ConfigService::empty().with(APP_NAME, bad);
            assert!(AppConfig::from_config(&source).is_err(), "{bad} accepted");
        }
    }
}
