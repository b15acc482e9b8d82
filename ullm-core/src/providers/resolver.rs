//! Model identifier resolution
//!
//! Maps `provider/model` or a bare model name to a provider tag. Resolution is
//! a pure function of the input string and the set of registered tags.

use crate::error::UllmError;
use crate::providers::{ANTHROPIC, BEDROCK, GROQ, OPENAI};

/// Outcome of resolving a model identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedModel {
    /// Provider tag
    pub provider: String,
    /// Model name as the vendor knows it
    pub model: String,
}

impl ResolvedModel {
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

const OPENAI_PREFIXES: &[&str] = &["gpt", "chatgpt", "o1", "o3", "o4", "text-embedding"];
const GROQ_MARKERS: &[&str] = &["llama", "mixtral", "gemma"];

/// Region prefixes of Bedrock cross-region inference profiles
const BEDROCK_REGION_PREFIXES: &[&str] = &["us", "eu", "apac", "us-gov", "global"];
const BEDROCK_VENDORS: &[&str] = &[
    "anthropic", "amazon", "meta", "mistral", "cohere", "ai21", "deepseek", "writer",
];

/// Resolve against the built-in provider set
pub fn resolve_model(model: &str) -> Result<ResolvedModel, UllmError> {
    resolve_with(model, |tag| {
        crate::providers::SUPPORTED_PROVIDERS.contains(&tag)
    })
}

/// Resolve, accepting any prefix for which `is_known` holds
///
/// A `tag/model` identifier must name a known tag exactly (case-sensitive).
/// Bare names go through ordered heuristics and never fall back to a default.
pub fn resolve_with(
    model: &str,
    is_known: impl Fn(&str) -> bool,
) -> Result<ResolvedModel, UllmError> {
    if model.trim().is_empty() {
        return Err(UllmError::InvalidRequest("model must not be empty".to_string()));
    }

    if let Some((prefix, bare)) = model.split_once('/') {
        if !is_known(prefix) {
            return Err(UllmError::UnsupportedProvider {
                provider: prefix.to_string(),
                model: model.to_string(),
            });
        }
        if bare.is_empty() {
            return Err(UllmError::InvalidRequest(format!(
                "model name missing after provider prefix in '{}'",
                model
            )));
        }
        return Ok(ResolvedModel {
            provider: prefix.to_string(),
            model: bare.to_string(),
        });
    }

    match infer_provider(model) {
        Some(provider) if is_known(provider) => Ok(ResolvedModel {
            provider: provider.to_string(),
            model: model.to_string(),
        }),
        _ => Err(UllmError::ProviderNotFound {
            model: model.to_string(),
        }),
    }
}

/// Ordered bare-name heuristics; the most specific pattern wins
fn infer_provider(model: &str) -> Option<&'static str> {
    let lower = model.to_ascii_lowercase();

    if is_bedrock_model_id(&lower) {
        return Some(BEDROCK);
    }
    if OPENAI_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return Some(OPENAI);
    }
    if lower.contains("claude") {
        return Some(ANTHROPIC);
    }
    if GROQ_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return Some(GROQ);
    }
    None
}

/// `vendor.model` or `region.vendor.model`, e.g. `us.anthropic.claude-3-5-sonnet-20241022-v2:0`
fn is_bedrock_model_id(model: &str) -> bool {
    let mut segments = model.splitn(3, '.');
    let first = segments.next().unwrap_or_default();
    let second = segments.next();

    if BEDROCK_VENDORS.contains(&first) {
        return second.is_some_and(|rest| !rest.is_empty());
    }
    if BEDROCK_REGION_PREFIXES.contains(&first) {
        let vendor = second.unwrap_or_default();
        let rest = segments.next().unwrap_or_default();
        return BEDROCK_VENDORS.contains(&vendor) && !rest.is_empty();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("openai/gpt-4o-mini", "openai", "gpt-4o-mini")]
    #[test_case("anthropic/claude-3-5-sonnet-20241022", "anthropic", "claude-3-5-sonnet-20241022")]
    #[test_case("groq/llama-3.1-8b-instant", "groq", "llama-3.1-8b-instant")]
    #[test_case("bedrock/anthropic.claude-3-haiku-20240307-v1:0", "bedrock", "anthropic.claude-3-haiku-20240307-v1:0")]
    #[test_case("groq/meta-llama/llama-4-scout", "groq", "meta-llama/llama-4-scout")]
    fn test_qualified_identifiers(input: &str, provider: &str, model: &str) {
        let resolved = resolve_model(input).unwrap();
        assert_eq!(resolved.provider, provider);
        assert_eq!(resolved.model, model);
    }

    #[test_case("gpt-4o", OPENAI)]
    #[test_case("o1-mini", OPENAI)]
    #[test_case("o3", OPENAI)]
    #[test_case("text-embedding-3-small", OPENAI)]
    #[test_case("claude-3-opus-20240229", ANTHROPIC)]
    #[test_case("llama-3.3-70b-versatile", GROQ)]
    #[test_case("mixtral-8x7b-32768", GROQ)]
    #[test_case("gemma2-9b-it", GROQ)]
    #[test_case("anthropic.claude-v2", BEDROCK)]
    #[test_case("us.meta.llama3-2-90b-instruct-v1:0", BEDROCK)]
    #[test_case("amazon.titan-text-express-v1", BEDROCK)]
    fn test_bare_names(input: &str, provider: &str) {
        let resolved = resolve_model(input).unwrap();
        assert_eq!(resolved.provider, provider);
        assert_eq!(resolved.model, input);
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        let err = resolve_model("OpenAI/gpt-4o").unwrap_err();
        assert!(matches!(err, UllmError::UnsupportedProvider { ref provider, .. } if provider == "OpenAI"));
    }

    #[test]
    fn test_unknown_prefix_never_defaults() {
        let err = resolve_model("mystery/gpt-4o").unwrap_err();
        assert!(matches!(err, UllmError::UnsupportedProvider { .. }));
    }

    #[test_case("my-custom-model")]
    #[test_case("mistral-large")]
    #[test_case("phi-3-mini")]
    #[test_case("cohere.")]
    fn test_unrecognized_bare_names_fail(input: &str) {
        let err = resolve_model(input).unwrap_err();
        assert!(matches!(err, UllmError::ProviderNotFound { .. }));
    }

    #[test]
    fn test_empty_model_is_rejected() {
        assert!(matches!(resolve_model(""), Err(UllmError::InvalidRequest(_))));
        assert!(matches!(resolve_model("openai/"), Err(UllmError::InvalidRequest(_))));
    }

    #[test]
    fn test_custom_tags() {
        let resolved = resolve_with("local/phi-3", |tag| tag == "local").unwrap();
        assert_eq!(resolved.qualified(), "local/phi-3");
        // heuristics only ever name registered tags
        assert!(resolve_with("gpt-4o", |tag| tag == "local").is_err());
    }
}
