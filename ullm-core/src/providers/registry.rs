//! Provider registry
//!
//! An explicit map from provider tag to adapter constructor. The built-in
//! dialects are registered by [`ProviderRegistry::with_defaults`]; callers can
//! add their own tags (for example another OpenAI-compatible endpoint) before
//! handing the registry to a [`Client`](crate::client::Client).

use crate::error::{UllmError, UllmResult};
use crate::providers::adapter::{AdapterContext, ProviderAdapter};
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::bedrock::BedrockAdapter;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::resolver::{resolve_with, ResolvedModel};
use crate::providers::{ANTHROPIC, BEDROCK, GROQ, OPENAI};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds an adapter for one client
pub type AdapterFactory =
    Arc<dyn Fn(&AdapterContext) -> UllmResult<Arc<dyn ProviderAdapter>> + Send + Sync>;

/// Tag to constructor mapping
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl ProviderRegistry {
    /// An empty registry; nothing resolves until something is registered
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenAI, Groq, Anthropic and Bedrock
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(OPENAI, |ctx| {
            Ok(Arc::new(OpenAiAdapter::openai(ctx.clone())) as Arc<dyn ProviderAdapter>)
        });
        registry.register(GROQ, |ctx| {
            Ok(Arc::new(OpenAiAdapter::groq(ctx.clone())) as Arc<dyn ProviderAdapter>)
        });
        registry.register(ANTHROPIC, |ctx| {
            Ok(Arc::new(AnthropicAdapter::new(ctx.clone())) as Arc<dyn ProviderAdapter>)
        });
        registry.register(BEDROCK, |ctx| {
            Ok(Arc::new(BedrockAdapter::new(ctx)) as Arc<dyn ProviderAdapter>)
        });
        registry
    }

    /// Register or replace the constructor for `tag`
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&AdapterContext) -> UllmResult<Arc<dyn ProviderAdapter>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        debug!(provider = %tag, "registering provider");
        self.factories.insert(tag, Arc::new(factory));
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags in sorted order
    pub fn tags(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve a model identifier against the registered tags
    pub fn resolve(&self, model: &str) -> UllmResult<ResolvedModel> {
        resolve_with(model, |tag| self.contains(tag))
    }

    /// Construct the adapter for `tag`
    pub fn build(&self, tag: &str, ctx: &AdapterContext) -> UllmResult<Arc<dyn ProviderAdapter>> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| UllmError::UnsupportedProvider {
                provider: tag.to_string(),
                model: String::new(),
            })?;
        factory(ctx)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
