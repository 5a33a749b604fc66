//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{
    convert::TryFrom,
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_STORAGE_SERVER: &str = "192.168.1.59";
pub const DEFAULT_STORAGE_BASE_PATH: &str = "/data/mysql";
pub const DEFAULT_STORAGE_CLASS_NAME: &str = "nfs-storage";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_MONITOR_INTERVAL: u64 = 30;
pub const DEFAULT_RETRY_DELAY: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

/// environment variables read by previous deployments of the operator, they
/// take precedence over every other source
pub const LEGACY_ENVIRONMENT: [(&str, &str); 3] = [
    ("storage.server", "NFS_SERVER"),
    ("storage.base_path", "NFS_BASE_PATH"),
    ("storage.class_name", "STORAGE_CLASS_NAME"),
];

// -----------------------------------------------------------------------------
// Storage structure

/// network attached storage settings shared by every database instance
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Storage {
    #[serde(rename = "server")]
    pub server: String,
    #[serde(rename = "base_path")]
    pub base_path: String,
    #[serde(rename = "class_name")]
    pub class_name: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            server: DEFAULT_STORAGE_SERVER.to_string(),
            base_path: DEFAULT_STORAGE_BASE_PATH.to_string(),
            class_name: DEFAULT_STORAGE_CLASS_NAME.to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: String,
    /// interval in seconds between two observations of an instance
    #[serde(rename = "monitor_interval")]
    pub monitor_interval: u64,
    /// delay in seconds before retrying a failed update
    #[serde(rename = "retry_delay")]
    pub retry_delay: u64,
    /// timeout in seconds of a single request to the kubernetes api
    #[serde(rename = "request_timeout")]
    pub request_timeout: u64,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Operator {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn listen(&self) -> Result<SocketAddr, AddrParseError> {
        self.listen.parse()
    }
}

// -----------------------------------------------------------------------------
// Sentry structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Sentry {
    #[serde(rename = "dsn")]
    pub dsn: Option<String>,
}

// -----------------------------------------------------------------------------
// Jaeger structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Jaeger {
    #[serde(rename = "endpoint")]
    pub endpoint: Option<String>,
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
    #[error("failed to override key '{0}' using environment variable '{1}', {2}")]
    Override(String, String, ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Configuration {
    #[serde(rename = "storage", default)]
    pub storage: Storage,
    #[serde(rename = "operator", default)]
    pub operator: Operator,
    #[serde(rename = "sentry", default)]
    pub sentry: Sentry,
    #[serde(rename = "jaeger", default)]
    pub jaeger: Jaeger,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        let builder = defaults()?.add_source(File::from(path).required(true));

        finish(builder)
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = defaults()?;
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Ok(home) = env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
            paths.push(PathBuf::from(format!(
                "{}/.local/share/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
        }

        paths.push(PathBuf::from("config"));
        for path in paths {
            builder = builder.add_source(File::from(path).required(false));
        }

        finish(builder)
    }

    /// log the configuration without secrets
    pub fn help(&self) {
        info!(
            server = &self.storage.server,
            base_path = &self.storage.base_path,
            class_name = &self.storage.class_name,
            "Use network attached storage settings"
        );

        info!(
            listen = &self.operator.listen,
            monitor_interval = self.operator.monitor_interval,
            retry_delay = self.operator.retry_delay,
            request_timeout = self.operator.request_timeout,
            sentry = self.sentry.dsn.is_some(),
            jaeger = self.jaeger.endpoint.is_some(),
            "Use operator settings"
        );
    }
}

// -----------------------------------------------------------------------------
// Helpers

fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    let mut builder = Config::builder();
    let defaults: [(&str, config::Value); 7] = [
        ("storage.server", DEFAULT_STORAGE_SERVER.into()),
        ("storage.base_path", DEFAULT_STORAGE_BASE_PATH.into()),
        ("storage.class_name", DEFAULT_STORAGE_CLASS_NAME.into()),
        ("operator.listen", DEFAULT_LISTEN.into()),
        ("operator.monitor_interval", (DEFAULT_MONITOR_INTERVAL as i64).into()),
        ("operator.retry_delay", (DEFAULT_RETRY_DELAY as i64).into()),
        ("operator.request_timeout", (DEFAULT_REQUEST_TIMEOUT as i64).into()),
    ];

    for (key, value) in defaults {
        builder = builder
            .set_default(key, value)
            .map_err(|err| Error::Default(key.to_string(), err))?;
    }

    Ok(builder)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Configuration, Error> {
    let mut builder = builder.add_source(
        Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_"))
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    for (key, var) in LEGACY_ENVIRONMENT {
        if let Ok(value) = env::var(var) {
            builder = builder
                .set_override(key, value)
                .map_err(|err| Error::Override(key.to_string(), var.to_string(), err))?;
        }
    }

    builder
        .build()
        .map_err(Error::Build)?
        .try_deserialize()
        .map_err(Error::Cast)
}

// -----------------------------------------------------------------------------
// Tests
