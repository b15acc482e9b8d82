//! Canonical call surface
//!
//! [`Client`] resolves the request's model to an adapter, wraps one attempt in
//! the retry engine, and hands back either a [`ModelResponse`] or a lazy chunk
//! sequence. Blocking and async entry points behave the same way.
//!
//! Streams are retried only until their first chunk arrives. After that a
//! failure is yielded by the sequence itself.

use crate::config::{self, ClientConfig};
use crate::error::{UllmError, UllmResult};
use crate::protocol::{CompletionRequest, ModelResponse, ResponseInputItem};
use crate::providers::adapter::{AdapterContext, Attempt, ProviderAdapter};
use crate::providers::registry::ProviderRegistry;
use crate::providers::resolver::ResolvedModel;
use crate::providers::retry::{RetryExecutor, RetryPolicy};
use crate::providers::stream::{ChunkIter, ChunkStream};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Everything one call needs once the request has been checked
struct CallPlan {
    resolved: ResolvedModel,
    adapter: Arc<dyn ProviderAdapter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl CallPlan {
    fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.policy.clone()).with_label(self.resolved.qualified())
    }
}

/// Entry point for completions over every registered provider
///
/// Holds the configuration, the shared HTTP pool and one adapter per provider
/// tag, built on first use. Share it behind an `Arc` across tasks or threads.
pub struct Client {
    ctx: AdapterContext,
    registry: ProviderRegistry,
    adapters: Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl Client {
    /// Client with default configuration and the built-in providers
    pub fn new() -> UllmResult<Self> {
        Self::from_config(ClientConfig::default())
    }

    pub fn from_config(config: ClientConfig) -> UllmResult<Self> {
        Self::with_registry(config, ProviderRegistry::with_defaults())
    }

    /// Load a YAML configuration file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> UllmResult<Self> {
        Self::from_config(config::load_from_yaml(path)?)
    }

    /// Load a JSON configuration file
    pub fn from_json<P: AsRef<Path>>(path: P) -> UllmResult<Self> {
        Self::from_config(config::load_from_json(path)?)
    }

    pub fn with_registry(config: ClientConfig, registry: ProviderRegistry) -> UllmResult<Self> {
        let ctx = AdapterContext::new(config)?;
        Ok(Self::with_context(ctx, registry))
    }

    /// Client over a prepared context, e.g. one with a custom transport
    pub fn with_context(ctx: AdapterContext, registry: ProviderRegistry) -> Self {
        info!(providers = ?registry.tags(), "client ready");
        Self {
            ctx,
            registry,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Adapter for `tag`, constructed once per client
    pub fn adapter(&self, tag: &str) -> UllmResult<Arc<dyn ProviderAdapter>> {
        let mut adapters = self.adapters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(adapter) = adapters.get(tag) {
            return Ok(adapter.clone());
        }

        let adapter = self.registry.build(tag, &self.ctx)?;
        debug!(provider = tag, "adapter constructed");
        adapters.insert(tag.to_string(), adapter.clone());
        Ok(adapter)
    }

    /// Check the request, resolve its model and pick the policy and timeout
    fn plan(&self, request: &CompletionRequest) -> UllmResult<CallPlan> {
        if request.messages.is_empty() {
            return Err(UllmError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        let resolved = self.registry.resolve(&request.model)?;
        let adapter = self.adapter(&resolved.provider)?;
        let policy = request
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.config().defaults.retry.clone());
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config().defaults.timeout());

        info!(
            provider = %resolved.provider,
            model = %resolved.model,
            max_attempts = policy.effective_attempts(),
            timeout_ms = timeout.as_millis() as u64,
            "dispatching completion"
        );

        Ok(CallPlan {
            resolved,
            adapter,
            policy,
            timeout,
        })
    }

    /// Blocking completion
    ///
    /// Must not be called from an async runtime worker thread; use
    /// [`Client::acomplete`] there.
    pub fn complete(&self, request: &CompletionRequest) -> UllmResult<ModelResponse> {
        let plan = self.plan(request)?;
        let adapter = plan.adapter.as_ref();
        let attempt = Attempt::new(request, &plan.resolved.model, plan.timeout);

        let response = plan
            .executor()
            .execute_blocking(|| {
                let body = adapter.send(attempt)?;
                adapter.parse_response(body, attempt.model)
            })
            .into_result()?;
        Ok(response)
    }

    /// Blocking stream of chunks
    ///
    /// Failures before the first chunk are retried; later ones are yielded by
    /// the iterator and end it.
    pub fn complete_stream(&self, request: &CompletionRequest) -> UllmResult<ChunkIter> {
        let plan = self.plan(request)?;
        let adapter = &plan.adapter;
        let attempt = Attempt::new(request, &plan.resolved.model, plan.timeout);

        let chunks = plan
            .executor()
            .execute_blocking(|| {
                let events = adapter.open_stream(attempt)?;
                ChunkIter::new(events, adapter.clone()).prime()
            })
            .into_result()?;
        Ok(chunks)
    }

    /// Async completion
    pub async fn acomplete(&self, request: &CompletionRequest) -> UllmResult<ModelResponse> {
        let plan = self.plan(request)?;
        let adapter = plan.adapter.as_ref();
        let attempt = Attempt::new(request, &plan.resolved.model, plan.timeout);

        let response = plan
            .executor()
            .execute(move || async move {
                let body = adapter.send_async(attempt).await?;
                adapter.parse_response(body, attempt.model)
            })
            .await
            .into_result()?;
        Ok(response)
    }

    /// Async stream of chunks, retried up to the first chunk
    pub async fn acomplete_stream(&self, request: &CompletionRequest) -> UllmResult<ChunkStream> {
        let plan = self.plan(request)?;
        let adapter = &plan.adapter;
        let attempt = Attempt::new(request, &plan.resolved.model, plan.timeout);

        let chunks = plan
            .executor()
            .execute(move || async move {
                let events = adapter.open_stream_async(attempt).await?;
                ChunkStream::new(events, adapter.clone()).prime().await
            })
            .await
            .into_result()?;
        Ok(chunks)
    }

    /// Blocking completion from responses-style input items
    pub fn responses(
        &self,
        model: impl Into<String>,
        input: Vec<ResponseInputItem>,
    ) -> UllmResult<ModelResponse> {
        self.complete(&CompletionRequest::from_input(model, input))
    }

    /// Async completion from responses-style input items
    pub async fn aresponses(
        &self,
        model: impl Into<String>,
        input: Vec<ResponseInputItem>,
    ) -> UllmResult<ModelResponse> {
        self.acomplete(&CompletionRequest::from_input(model, input))
            .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::providers::error::ErrorKind;

    fn client() -> Client {
        Client::new().unwrap()
    }

    #[test]
    fn test_empty_messages_rejected_before_resolution() {
        let request = CompletionRequest::new("nonsense/model", vec![]);
        let err = client().complete(&request).unwrap_err();
        assert!(matches!(err, UllmError::InvalidRequest(_)));
    }

    #[test]
    fn test_unknown_prefix_is_unsupported() {
        let request = CompletionRequest::new("acme/model-1", vec![Message::user("hi")]);
        let err = client().complete(&request).unwrap_err();
        assert!(matches!(err, UllmError::UnsupportedProvider { .. }));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_adapters_are_cached() {
        let client = client();
        let first = client.adapter("anthropic").unwrap();
        let second = client.adapter("anthropic").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_request_policy_overrides_default() {
        let client = client();
        let request = CompletionRequest::new("openai/gpt-4o", vec![Message::user("hi")])
            .with_retry_policy(RetryPolicy::no_retry())
            .with_timeout(Duration::from_secs(5));
        let plan = client.plan(&request).unwrap();
        assert_eq!(plan.policy.effective_attempts(), 1);
        assert_eq!(plan.timeout, Duration::from_secs(5));
        assert_eq!(plan.resolved.qualified(), "openai/gpt-4o");

        let defaulted = CompletionRequest::new("openai/gpt-4o", vec![Message::user("hi")]);
        let plan = client.plan(&defaulted).unwrap();
        assert_eq!(plan.timeout, client.config().defaults.timeout());
    }
}
