//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::descriptor::CloudProperties;
use crate::infra::Credentials;

/// vSphere connection settings derived from environment variables,
/// configuration files, and CLI flags.
///
/// Credentials are optional here because each one may instead come from the
/// instance descriptor; see [`VsphereConfig::credentials`].
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "VI")]
pub struct VsphereConfig {
    /// vCenter API endpoint.
    pub url: Option<String>,
    /// Login name.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Seconds between batched status polls. Defaults to 2.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
}

/// Metadata for a credential, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    property: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, property: &'static str) -> Self {
        Self {
            description,
            env_var,
            property,
        }
    }
}

const ENDPOINT: FieldMetadata = FieldMetadata::new("vCenter endpoint", "VI_URL", "vi_url");
const USERNAME: FieldMetadata = FieldMetadata::new("vCenter username", "VI_USERNAME", "vi_username");
const PASSWORD: FieldMetadata = FieldMetadata::new("vCenter password", "VI_PASSWORD", "vi_password");

impl VsphereConfig {
    fn pick(
        configured: Option<&str>,
        fallback: Option<&str>,
        metadata: &FieldMetadata,
    ) -> Result<String, ConfigError> {
        configured
            .into_iter()
            .chain(fallback)
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "missing {}: set the environment variable {} or the {} property for vSphere instances",
                    metadata.description, metadata.env_var, metadata.property
                ))
            })
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("vsphere-fleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Resolves login credentials, preferring configured values and falling
    /// back to the descriptor's `vi_*` properties.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and descriptor property when neither source provides a value.
    pub fn credentials(&self, props: &CloudProperties) -> Result<Credentials, ConfigError> {
        Ok(Credentials {
            endpoint: Self::pick(self.url.as_deref(), props.vi_url.as_deref(), &ENDPOINT)?,
            username: Self::pick(
                self.username.as_deref(),
                props.vi_username.as_deref(),
                &USERNAME,
            )?,
            password: Self::pick(
                self.password.as_deref(),
                props.vi_password.as_deref(),
                &PASSWORD,
            )?,
        })
    }

    /// Interval between batched status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for VsphereConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            poll_interval_secs: 2,
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
mod tests;
