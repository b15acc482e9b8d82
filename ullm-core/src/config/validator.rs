//! Configuration validation utilities

use super::error::ValidationError;
use super::schema::ClientConfig;
use crate::providers::SUPPORTED_PROVIDERS;
use std::collections::BTreeSet;

/// Validator layering provider-tag checks over [`ClientConfig::validate`]
pub struct ConfigValidator {
    known_providers: BTreeSet<String>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Validator accepting the built-in provider tags
    pub fn new() -> Self {
        Self::with_known_providers(SUPPORTED_PROVIDERS.iter().copied())
    }

    /// Validator accepting exactly the given tags, for custom registries
    pub fn with_known_providers<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_providers: providers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        config.validate()?;
        self.validate_provider_names(config)
    }

    fn validate_provider_names(&self, config: &ClientConfig) -> Result<(), ValidationError> {
        // Sorted so the reported entry does not depend on map order
        let mut names: Vec<&String> = config.providers.keys().collect();
        names.sort();

        for name in names {
            if !self.known_providers.contains(name.as_str()) {
                return Err(ValidationError::unknown_provider(
                    name.as_str(),
                    self.known_providers.iter().cloned().collect(),
                ));
            }
        }
        Ok(())
    }
}
