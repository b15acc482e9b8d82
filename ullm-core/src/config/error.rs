//! Errors raised while loading or checking a client configuration

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Source format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Json => "JSON",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{}': {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} error in '{}' at {}:{}: {message}",
            .path.display(), .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: PathBuf,
        format: ConfigFormat,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("environment variable '{var}' referenced by the config is not set")]
    EnvVarNotFound { var: String },

    /// The shared HTTP connection pool could not be built
    #[error("cannot build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// A rejected field, addressed by its dotted path (`providers.openai.base_url`)
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    /// What the user can do about it, when there is something obvious
    pub hint: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config at '{}': {}", self.field_path, self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, " ({})", hint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    RequiredFieldMissing,

    #[error("unknown provider '{tag}', expected one of: {}", .known.join(", "))]
    UnknownProvider { tag: String, known: Vec<String> },

    #[error("value out of range: {message}")]
    OutOfRange { message: String },

    #[error("conflicting settings: {message}")]
    Incompatible { message: String },

    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("unsupported config version {actual}, this build reads {expected}")]
    InvalidVersion { expected: String, actual: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn unknown_provider(tag: impl Into<String>, known: Vec<String>) -> Self {
        let tag = tag.into();
        Self::new(
            format!("providers.{}", tag),
            ValidationErrorKind::UnknownProvider { tag, known },
        )
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::OutOfRange {
                message: message.into(),
            },
        )
    }

    pub fn incompatible(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::Incompatible {
                message: message.into(),
            },
        )
    }

    pub fn invalid_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidUrl {
                message: message.into(),
            },
        )
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_the_field() {
        let err = ValidationError::unknown_provider("azure", vec!["groq".into(), "openai".into()])
            .with_hint("register the tag on a custom registry");
        let text = err.to_string();
        assert!(text.contains("providers.azure"));
        assert!(text.contains("groq, openai"));
        assert!(text.ends_with("(register the tag on a custom registry)"));
    }

    #[test]
    fn test_parse_error_reports_format_and_position() {
        let err = ConfigError::ParseError {
            path: PathBuf::from("ullm.yaml"),
            format: ConfigFormat::Yaml,
            line: Some(3),
            column: Some(7),
            message: "unexpected key".into(),
        };
        assert_eq!(err.to_string(), "YAML error in 'ullm.yaml' at 3:7: unexpected key");
    }
}
