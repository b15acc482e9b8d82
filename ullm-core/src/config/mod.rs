//! Client configuration
//!
//! A configuration file is optional. When present it supplies default timeout
//! and retry settings, connection pool tuning, and per-provider credentials and
//! endpoints. `${VAR}` placeholders are replaced from the environment before
//! parsing.

pub mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use error::{ConfigError, ConfigFormat, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    ClientConfig, ConnectionConfig, DefaultConfig, ProviderSettings, CONFIG_VERSION,
};
pub use secrets::SecretString;
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<ClientConfig> {
    load_from_yaml_with(path, &ConfigValidator::new())
}

/// Load a YAML configuration, validating provider tags with `validator`
pub fn load_from_yaml_with<P: AsRef<Path>>(
    path: P,
    validator: &ConfigValidator,
) -> ConfigResult<ClientConfig> {
    let path = path.as_ref();
    let interpolated = read_interpolated(path)?;

    let config: ClientConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            format: ConfigFormat::Yaml,
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    validator.validate(&config)?;
    Ok(config)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<ClientConfig> {
    load_from_json_with(path, &ConfigValidator::new())
}

/// Load a JSON configuration, validating provider tags with `validator`
pub fn load_from_json_with<P: AsRef<Path>>(
    path: P,
    validator: &ConfigValidator,
) -> ConfigResult<ClientConfig> {
    let path = path.as_ref();
    let interpolated = read_interpolated(path)?;

    let config: ClientConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            format: ConfigFormat::Json,
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    validator.validate(&config)?;
    Ok(config)
}

fn read_interpolated(path: &Path) -> ConfigResult<String> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    env::interpolate_env_vars(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_yaml() {
        let yaml = r#"
version: "0.1"
defaults:
  timeout_secs: 30
  retry:
    max_attempts: 5
    base_delay_ms: 200
providers:
  openai:
    api_key: sk-test
  groq:
    base_url: https://api.groq.com/openai/v1
  bedrock:
    region: eu-west-1
    max_workers: 4
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.defaults.retry.max_attempts, 5);
        assert_eq!(config.defaults.retry.max_delay_ms, 60_000);
        assert_eq!(
            config.provider("bedrock").and_then(|p| p.region.as_deref()),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = r#"
version: "0.1"
routing:
  strategy: round_robin
"#;
        assert!(serde_yaml::from_str::<ClientConfig>(yaml).is_err());
    }
}
