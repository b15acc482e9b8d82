//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use crate::providers::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Schema version understood by this crate
pub const CONFIG_VERSION: &str = "0.1";

/// Root configuration for a [`crate::Client`]
///
/// Every section is optional; `ClientConfig::default()` is a working
/// configuration that takes credentials from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Schema version (required in files)
    pub version: String,

    /// Defaults applied when a request leaves a setting unset
    #[serde(default)]
    pub defaults: DefaultConfig,

    /// Connection pool settings shared by all HTTP providers
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Per-provider settings keyed by provider tag
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            defaults: DefaultConfig::default(),
            connection: ConnectionConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Settings for one provider
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    /// API key (supports environment variable interpolation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    /// Base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// AWS region (Bedrock)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Worker threads for blocking SDK calls made from async code (Bedrock)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Static AWS access key id; the default credential chain is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<SecretString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SecretString>,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Idle pooled connections are closed after this many seconds
    #[serde(default = "default_pool_idle")]
    pub pool_idle_timeout_secs: u64,

    /// User-Agent header; the crate name and version when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            max_idle_per_host: default_max_idle(),
            pool_idle_timeout_secs: default_pool_idle(),
            user_agent: None,
        }
    }
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultConfig {
    /// Whole-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for requests that carry none
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DefaultConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value functions for serde
fn default_connect_timeout() -> u64 { 10_000 }
fn default_max_idle() -> usize { 10 }
fn default_pool_idle() -> u64 { 90 }
fn default_timeout_secs() -> u64 { 600 }

impl ClientConfig {
    /// Settings for `provider`, if the configuration names it
    pub fn provider(&self, provider: &str) -> Option<&ProviderSettings> {
        self.providers.get(provider)
    }

    /// Add or replace the settings of one provider
    pub fn with_provider(mut self, provider: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(provider.into(), settings);
        self
    }

    /// Structural validation; provider tags are checked by [`super::ConfigValidator`]
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }

        if self.version != CONFIG_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: CONFIG_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if self.defaults.timeout_secs == 0 {
            return Err(ValidationError::out_of_range(
                "defaults.timeout_secs",
                "Must be greater than 0",
            ));
        }
        validate_retry(&self.defaults.retry, "defaults.retry")?;

        if self.connection.connect_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                "connection.connect_timeout_ms",
                "Must be greater than 0",
            ));
        }

        for (name, settings) in &self.providers {
            settings.validate(&format!("providers.{}", name))?;
        }

        Ok(())
    }
}

impl ProviderSettings {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if let Some(api_key) = &self.api_key {
            if api_key.is_empty() {
                return Err(ValidationError::required(format!("{}.api_key", path))
                    .with_hint("remove the entry to fall back to the environment"));
            }
        }

        if let Some(base_url) = &self.base_url {
            validate_url(base_url, &format!("{}.base_url", path))?;
        }

        if self.max_workers == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{}.max_workers", path),
                "Must be greater than 0",
            ));
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ValidationError::incompatible(
                format!("{}.secret_access_key", path),
                "access_key_id and secret_access_key must be set together",
            ));
        }

        Ok(())
    }
}

fn validate_url(value: &str, path: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        Ok(url) => Err(ValidationError::invalid_url(
            path,
            format!("URL scheme must be http or https, got: {}", url.scheme()),
        )),
        Err(e) => Err(ValidationError::invalid_url(path, e.to_string())),
    }
}

fn validate_retry(policy: &RetryPolicy, path: &str) -> Result<(), ValidationError> {
    if policy.max_delay_ms < policy.base_delay_ms {
        return Err(ValidationError::incompatible(
            format!("{}.max_delay_ms", path),
            "Must be >= base_delay_ms",
        ));
    }

    if !(policy.jitter_min.is_finite() && policy.jitter_min > 0.0) {
        return Err(ValidationError::out_of_range(
            format!("{}.jitter_min", path),
            "Must be a positive number",
        ));
    }

    if !policy.jitter_max.is_finite() || policy.jitter_max < policy.jitter_min {
        return Err(ValidationError::incompatible(
            format!("{}.jitter_max", path),
            "Must be >= jitter_min",
        ));
    }

    Ok(())
}
