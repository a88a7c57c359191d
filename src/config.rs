//! Driver Configuration
//!
//! YAML configuration file with the appliance address list and credentials.
//! Command line flags may override the address and credentials.

use crate::controlplane::backends::nexentastor::RestClientConfig;
use crate::controlplane::cluster::HealthPolicy;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/config/nexentastor-csi-driver-config.yaml";

/// Driver configuration
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// One or more appliance addresses, comma-separated
    pub address: String,
    pub username: String,
    pub password: String,
    /// Parent dataset for new volumes, used by the volume service
    pub default_dataset: Option<String>,
    /// Data IP clients mount from, used by the volume service
    pub default_data_ip: Option<String>,
    pub insecure_skip_verify: bool,
    pub request_timeout_secs: u64,
    pub healthy_pool_states: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: String::new(),
            password: String::new(),
            default_dataset: None,
            default_data_ip: None,
            insecure_skip_verify: true,
            request_timeout_secs: 30,
            healthy_pool_states: HealthPolicy::default().healthy_pool_states,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("default_dataset", &self.default_dataset)
            .field("default_data_ip", &self.default_data_ip)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("healthy_pool_states", &self.healthy_pool_states)
            .finish()
    }
}

/// Values given on the command line that replace file values
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Parse a configuration file without validating it
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Parse and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        if let Some(address) = non_empty(overrides.address) {
            self.address = address;
        }
        if let Some(username) = non_empty(overrides.username) {
            self.username = username;
        }
        if let Some(password) = non_empty(overrides.password) {
            self.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.addresses()?;
        if self.username.is_empty() {
            return Err(Error::Configuration(
                "NexentaStor username is not set, use 'username' option in config file or CLI"
                    .into(),
            ));
        }
        if self.password.is_empty() {
            return Err(Error::Configuration(
                "NexentaStor password is not set, use 'password' option in config file or CLI"
                    .into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "requestTimeoutSecs must be greater than 0".into(),
            ));
        }
        if self.healthy_pool_states.is_empty() {
            return Err(Error::Configuration(
                "healthyPoolStates must list at least one state".into(),
            ));
        }
        Ok(())
    }

    /// Appliance addresses in configured order
    pub fn addresses(&self) -> Result<Vec<String>> {
        if self.address.trim().is_empty() {
            return Err(Error::Configuration(
                "NexentaStor address is not set, use 'address' option in config file or CLI"
                    .into(),
            ));
        }

        self.address
            .split(',')
            .map(str::trim)
            .map(|address| {
                let host = address
                    .strip_prefix("https://")
                    .or_else(|| address.strip_prefix("http://"));
                match host {
                    Some(host) if !host.is_empty() => Ok(address.trim_end_matches('/').to_string()),
                    _ => Err(Error::Configuration(format!(
                        "Invalid NexentaStor address '{}', expected scheme://host:port",
                        address
                    ))),
                }
            })
            .collect()
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            healthy_pool_states: self.healthy_pool_states.clone(),
            ..Default::default()
        }
    }

    pub fn rest_client_config(&self) -> RestClientConfig {
        RestClientConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            insecure_skip_verify: self.insecure_skip_verify,
        }
    }
}
