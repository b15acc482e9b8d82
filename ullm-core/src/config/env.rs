//! Environment variable lookup and interpolation for configuration

use super::error::ConfigError;
use regex::{Captures, Regex};
use std::env;

const PLACEHOLDER: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

fn placeholder_pattern() -> Result<Regex, ConfigError> {
    Regex::new(PLACEHOLDER).map_err(|e| ConfigError::Invalid {
        message: format!("bad placeholder pattern: {}", e),
    })
}

/// Replace every `${VAR}` in `content` with the variable's value
///
/// The first missing variable (in document order) is reported.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = placeholder_pattern()?;
    let mut missing: Option<String> = None;

    let result = pattern.replace_all(content, |cap: &Captures<'_>| match env::var(&cap[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.get_or_insert_with(|| cap[1].to_string());
            String::new()
        }
    });

    match missing {
        Some(var) => Err(ConfigError::EnvVarNotFound { var }),
        None => Ok(result.into_owned()),
    }
}

/// Conventional variable name for a provider setting, e.g. `GROQ_API_KEY`
pub fn provider_env_var(provider: &str, suffix: &str) -> String {
    format!(
        "{}_{}",
        provider.to_ascii_uppercase().replace('-', "_"),
        suffix
    )
}

/// Read a variable, treating blank values as unset
pub fn lookup(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("ULLM_TEST_VAR", "test_value");

        let content = "api_key: ${ULLM_TEST_VAR}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("ULLM_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var() {
        let content = "api_key: ${ULLM_MISSING_VAR}";
        let result = interpolate_env_vars(content);

        match result {
            Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "ULLM_MISSING_VAR"),
            other => panic!("Expected EnvVarNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("ULLM_VAR1", "value1");
        env::set_var("ULLM_VAR2", "value2");

        let content = "key1: ${ULLM_VAR1}, key2: ${ULLM_VAR2}, again: ${ULLM_VAR1}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "key1: value1, key2: value2, again: value1");

        env::remove_var("ULLM_VAR1");
        env::remove_var("ULLM_VAR2");
    }

    #[test]
    fn test_provider_env_var_names() {
        assert_eq!(provider_env_var("openai", "API_KEY"), "OPENAI_API_KEY");
        assert_eq!(provider_env_var("groq", "API_BASE"), "GROQ_API_BASE");
        assert_eq!(provider_env_var("my-proxy", "API_KEY"), "MY_PROXY_API_KEY");
    }

    #[test]
    fn test_blank_values_are_unset() {
        env::set_var("ULLM_BLANK_VAR", "  ");
        assert_eq!(lookup("ULLM_BLANK_VAR"), None);
        env::remove_var("ULLM_BLANK_VAR");
    }
}
