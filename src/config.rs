//! Configuration loading via `ortho-config`.
//!
//! Provider credential structs live next to their connections; this module
//! holds the remote-execution settings shared by every pipeline run plus
//! the validation helpers all of them use.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::remote::LogOptions;
use crate::remote::session::RetryPolicy;
use crate::wait::WaitPolicy;

/// Metadata for a configuration field, used to generate actionable error
/// messages.
pub struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    /// Describes where a configuration field comes from.
    #[must_use]
    pub const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

/// Fails with an actionable message when a required field is empty.
///
/// # Errors
///
/// Returns [`ConfigError::MissingField`] naming the environment variable and
/// configuration key that supply the field.
pub fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in stratus.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

/// Remote-execution settings shared by every pipeline run, derived from
/// environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "STRATUS")]
pub struct RemoteConfig {
    /// TCP port of the remote login service.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Seconds between connection attempts against a booting host.
    #[ortho_config(default = 10)]
    pub retry_backoff_secs: u64,
    /// Connection attempts made before the host is declared unreachable.
    #[ortho_config(default = 50)]
    pub retry_max_attempts: u32,
    /// Seconds between instance state checks.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// State checks made before a readiness wait times out.
    #[ortho_config(default = 120)]
    pub wait_max_attempts: u32,
    /// Forward remote output chunks to structured logging.
    #[ortho_config(default = false)]
    pub remote_server_debug: bool,
    /// Render credentials in clear text in log output.
    #[ortho_config(default = false)]
    pub reveal_secrets: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_port: 22,
            retry_backoff_secs: 10,
            retry_max_attempts: 50,
            poll_interval_secs: 5,
            wait_max_attempts: 120,
            remote_server_debug: false,
            reveal_secrets: false,
        }
    }
}

impl RemoteConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("stratus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Connection retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs(self.retry_backoff_secs),
            max_attempts: self.retry_max_attempts,
        }
    }

    /// State polling policy derived from this configuration.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.wait_max_attempts,
        }
    }

    /// Logging behaviour derived from this configuration.
    #[must_use]
    pub const fn log_options(&self) -> LogOptions {
        LogOptions {
            remote_debug: self.remote_server_debug,
            reveal_secrets: self.reveal_secrets,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies_match_documented_budgets() {
        let config = RemoteConfig::default();
        let retry = config.retry_policy();
        assert_eq!(retry.backoff, Duration::from_secs(10));
        assert_eq!(retry.max_attempts, 50);
        let wait = config.wait_policy();
        assert_eq!(wait.interval, Duration::from_secs(5));
        assert_eq!(wait.max_attempts, 120);
    }

    #[test]
    fn require_field_accepts_populated_values() {
        let metadata = FieldMetadata::new("AWS region", "AWS_REGION", "region", "aws");
        require_field("eu-west-1", &metadata)
            .unwrap_or_else(|err| panic!("populated field rejected: {err}"));
    }

    #[test]
    fn require_field_names_every_source() {
        let metadata = FieldMetadata::new("AWS region", "AWS_REGION", "region", "aws");
        let err = require_field("  ", &metadata).expect_err("blank field should be rejected");
        assert_eq!(
            err.to_string(),
            "missing configuration field: missing AWS region: set AWS_REGION or add region to [aws] in stratus.toml"
        );
    }
}
