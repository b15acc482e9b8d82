//! Provider adapter trait and capabilities
//!
//! An adapter implements one vendor's wire protocol behind a single contract:
//! shape the request, perform exactly one attempt (blocking or not), parse the
//! answer, decode stream events, and classify failures. Retrying, resolution
//! and stream bookkeeping live outside the adapter.

use crate::config::{env, ClientConfig, ConfigError, ProviderSettings, SecretString};
use crate::http::{HttpClient, HttpExecutor};
use crate::protocol::{
    CompletionRequest, ContentPart, MessageContent, MessageRole, ModelResponse, ResponseFormat,
    ToolChoice,
};
use crate::providers::error::{ProviderError, ProviderResult, WireFailure};
use crate::providers::stream::{EventOutcome, RawEvent, RawEventIter, RawEventStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One attempt's inputs: the canonical request, the bare vendor model name,
/// and the whole-attempt timeout
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub request: &'a CompletionRequest,
    pub model: &'a str,
    pub timeout: Duration,
}

impl<'a> Attempt<'a> {
    pub fn new(request: &'a CompletionRequest, model: &'a str, timeout: Duration) -> Self {
        Self {
            request,
            model,
            timeout,
        }
    }
}

/// Core trait that every vendor adapter implements
///
/// `send*` and `open_stream*` perform one network attempt and never retry.
/// Failures they return are already classified through [`ProviderAdapter::map_error`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag, e.g. `openai`
    fn tag(&self) -> &str;

    /// Features the vendor can express natively
    fn capabilities(&self) -> ProviderCapabilities;

    /// Canonical request to vendor payload
    ///
    /// Capability gaps are reported here, before any network call.
    fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
        stream: bool,
    ) -> ProviderResult<Value>;

    /// One blocking attempt returning the raw success payload
    fn send(&self, attempt: Attempt<'_>) -> ProviderResult<Value>;

    /// One non-blocking attempt returning the raw success payload
    async fn send_async(&self, attempt: Attempt<'_>) -> ProviderResult<Value>;

    /// Open a streaming connection, blocking
    fn open_stream(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventIter>;

    /// Open a streaming connection, non-blocking
    async fn open_stream_async(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventStream>;

    /// Raw success payload to canonical response, usage copied verbatim
    fn parse_response(&self, body: Value, model: &str) -> ProviderResult<ModelResponse>;

    /// One raw stream event to at most one canonical chunk
    fn parse_stream_event(&self, event: &RawEvent) -> ProviderResult<EventOutcome>;

    /// Classify a raw failure
    fn map_error(&self, failure: WireFailure) -> ProviderError;
}

/// What a vendor can express natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Does the provider accept system messages (in the turn list or a dedicated field)?
    pub supports_system_role: bool,

    /// Does the provider support tool calling?
    pub supports_tools: bool,

    /// Can tool use be switched off explicitly (`tool_choice: none`)?
    pub supports_tool_choice_none: bool,

    /// Does the provider have a loose JSON output mode?
    pub supports_json_mode: bool,

    /// Does the provider accept a named JSON schema for output?
    pub supports_json_schema: bool,

    /// Does the provider support streaming?
    pub supports_streaming: bool,

    /// Can images be referenced by URL (rather than inline data only)?
    pub supports_image_urls: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_system_role: true,
            supports_tools: true,
            supports_tool_choice_none: true,
            supports_json_mode: true,
            supports_json_schema: true,
            supports_streaming: true,
            supports_image_urls: true,
        }
    }
}

impl ProviderCapabilities {
    /// Report the first feature in `request` this vendor cannot express
    pub fn check(
        &self,
        provider: &str,
        request: &CompletionRequest,
        stream: bool,
    ) -> ProviderResult<()> {
        if stream && !self.supports_streaming {
            return Err(ProviderError::capability_gap(provider, "streaming"));
        }

        if !self.supports_system_role
            && request
                .messages
                .iter()
                .any(|message| message.role == MessageRole::System)
        {
            return Err(ProviderError::capability_gap(provider, "system messages"));
        }

        match &request.response_format {
            Some(format @ ResponseFormat::JsonObject) if !self.supports_json_mode => {
                return Err(gap(provider, format));
            }
            Some(format @ ResponseFormat::JsonSchema { .. }) if !self.supports_json_schema => {
                return Err(gap(provider, format));
            }
            _ => {}
        }

        let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());
        if has_tools && !self.supports_tools {
            return Err(ProviderError::capability_gap(provider, "tools"));
        }

        if !self.supports_tool_choice_none {
            if let Some(ToolChoice::Mode(mode)) = &request.tool_choice {
                if mode == "none" {
                    return Err(ProviderError::capability_gap(provider, "tool_choice=none"));
                }
            }
        }

        if !self.supports_image_urls && request.messages.iter().any(has_image_url) {
            return Err(ProviderError::capability_gap(provider, "image URLs"));
        }

        Ok(())
    }
}

fn gap(provider: &str, format: &ResponseFormat) -> ProviderError {
    ProviderError::capability_gap(provider, format!("response_format={}", format.label()))
}

fn has_image_url(message: &crate::protocol::Message) -> bool {
    match &message.content {
        MessageContent::Text(_) => false,
        MessageContent::Parts(parts) => parts
            .iter()
            .any(|part| matches!(part, ContentPart::Image { url: Some(_), base64: None, .. })),
    }
}

/// Shared state handed to adapter constructors
#[derive(Clone)]
pub struct AdapterContext {
    /// Client configuration (defaults, provider settings)
    pub config: Arc<ClientConfig>,

    /// Pooled HTTP transport shared by every HTTP adapter of one client
    pub http: Arc<dyn HttpExecutor>,
}

impl AdapterContext {
    /// Context with an HTTP pool built from `config.connection`
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let http = HttpClient::from_config(&config.connection)?;
        Ok(Self {
            config: Arc::new(config),
            http: Arc::new(http),
        })
    }

    /// Context over a caller-supplied transport
    pub fn with_http(config: ClientConfig, http: Arc<dyn HttpExecutor>) -> Self {
        Self {
            config: Arc::new(config),
            http,
        }
    }

    pub fn settings(&self, provider: &str) -> Option<&ProviderSettings> {
        self.config.provider(provider)
    }

    /// Credential for one call
    ///
    /// Explicit request key, then the configuration entry, then `<TAG>_API_KEY`.
    /// Nothing found is an authentication error raised before any network call.
    pub fn api_key(
        &self,
        provider: &str,
        explicit: Option<&SecretString>,
    ) -> ProviderResult<SecretString> {
        if let Some(key) = explicit.filter(|key| !key.is_empty()) {
            debug!(provider, "using request credential {}", key.fingerprint());
            return Ok(key.clone());
        }

        if let Some(key) = self
            .settings(provider)
            .and_then(|settings| settings.api_key.as_ref())
            .filter(|key| !key.is_empty())
        {
            debug!(provider, "using configured credential {}", key.fingerprint());
            return Ok(key.clone());
        }

        let var = env::provider_env_var(provider, "API_KEY");
        match env::lookup(&var) {
            Some(value) => Ok(SecretString::new(value)),
            None => Err(ProviderError::authentication(format!(
                "no API key for {}: pass one on the request, set providers.{}.api_key, or export {}",
                provider, provider, var
            ))
            .with_provider(provider)),
        }
    }

    /// Base URL for one call, without a trailing slash
    ///
    /// Explicit request value, then the configuration entry, then
    /// `<TAG>_API_BASE`, then `default`.
    pub fn base_url(&self, provider: &str, explicit: Option<&str>, default: &str) -> String {
        let configured = self
            .settings(provider)
            .and_then(|settings| settings.base_url.clone());

        explicit
            .map(str::to_string)
            .or(configured)
            .or_else(|| env::lookup(&env::provider_env_var(provider, "API_BASE")))
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Keys that decide how the call itself is made; extra params never set them
const RESERVED_KEYS: &[&str] = &["model", "stream", "stream_options"];

/// Merge extra request parameters into the top level of a payload
///
/// Keys already shaped by the adapter win, and reserved keys are skipped even
/// when the adapter left them out, so metadata cannot turn a plain call into a
/// stream or retarget the model.
pub(crate) fn merge_extra_params(payload: &mut Value, request: &CompletionRequest) {
    if let Value::Object(map) = payload {
        for (key, value) in &request.metadata {
            if RESERVED_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring reserved extra parameter");
                continue;
            }
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Current unix time, for vendors that do not report one
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, MessageBuilder, MessageRole};
    use crate::providers::error::ErrorKind;
    use serde_json::json;

    fn context() -> AdapterContext {
        AdapterContext::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ClientConfig::default().with_provider(
            "openai",
            ProviderSettings {
                api_key: Some("sk-from-config".into()),
                ..Default::default()
            },
        );
        let ctx = AdapterContext::new(config).unwrap();
        let explicit = SecretString::new("sk-explicit");

        let key = ctx.api_key("openai", Some(&explicit)).unwrap();
        assert_eq!(key.expose_secret(), "sk-explicit");

        let key = ctx.api_key("openai", None).unwrap();
        assert_eq!(key.expose_secret(), "sk-from-config");
    }

    #[test]
    fn test_missing_key_is_authentication_error() {
        let err = context()
            .api_key("ullm-test-nokey", None)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(err.message.contains("ULLM_TEST_NOKEY_API_KEY"));
    }

    #[test]
    fn test_base_url_precedence() {
        let ctx = context();
        assert_eq!(
            ctx.base_url("ullm-test-base", None, "https://default.example/v1/"),
            "https://default.example/v1"
        );
        assert_eq!(
            ctx.base_url("ullm-test-base", Some("http://localhost:8080"), "https://x"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_capability_check_reports_gaps() {
        let caps = ProviderCapabilities {
            supports_json_schema: false,
            supports_tool_choice_none: false,
            supports_image_urls: false,
            ..Default::default()
        };

        let request = CompletionRequest::new("x", vec![Message::user("hi")])
            .with_response_format(ResponseFormat::json_schema("p", json!({})));
        let err = caps.check("bedrock", &request, false).unwrap_err();
        assert_eq!(err.capability.as_deref(), Some("response_format=json_schema"));

        let request = CompletionRequest::new("x", vec![Message::user("hi")])
            .with_tool_choice(ToolChoice::none());
        assert!(caps.check("bedrock", &request, false).unwrap_err().is_capability_gap());

        let image = MessageBuilder::with_parts(
            MessageRole::User,
            vec![ContentPart::Image {
                url: Some("https://example.com/cat.png".into()),
                base64: None,
                media_type: None,
            }],
        )
        .build();
        let request = CompletionRequest::new("x", vec![image]);
        assert!(caps.check("bedrock", &request, false).is_err());

        let request = CompletionRequest::new("x", vec![Message::user("hi")])
            .with_response_format(ResponseFormat::JsonObject);
        assert!(caps.check("bedrock", &request, false).is_ok());
    }

    #[test]
    fn test_extra_params_do_not_override_shaped_fields() {
        let request = CompletionRequest::new("x", vec![Message::user("hi")])
            .with_param("model", json!("other"))
            .with_param("logprobs", json!(true));
        let mut payload = json!({"model": "gpt-4o"});
        merge_extra_params(&mut payload, &request);
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["logprobs"], true);
    }

    #[test]
    fn test_extra_params_cannot_turn_on_streaming() {
        let request = CompletionRequest::new("x", vec![Message::user("hi")])
            .with_param("stream", json!(true))
            .with_param("stream_options", json!({"include_usage": true}))
            .with_param("top_k", json!(5));
        let mut payload = json!({"model": "m", "messages": []});
        merge_extra_params(&mut payload, &request);
        assert!(payload.get("stream").is_none());
        assert!(payload.get("stream_options").is_none());
        assert_eq!(payload["top_k"], 5);
    }

    #[test]
    fn test_streaming_and_system_role_are_gated() {
        let caps = ProviderCapabilities {
            supports_streaming: false,
            supports_system_role: false,
            ..Default::default()
        };

        let plain = CompletionRequest::new("x", vec![Message::user("hi")]);
        assert!(caps.check("local", &plain, false).is_ok());
        let err = caps.check("local", &plain, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.capability.as_deref(), Some("streaming"));

        let with_system =
            CompletionRequest::new("x", vec![Message::system("be brief"), Message::user("hi")]);
        let err = caps.check("local", &with_system, false).unwrap_err();
        assert_eq!(err.capability.as_deref(), Some("system messages"));
        assert_eq!(err.provider.as_deref(), Some("local"));

        // Defaults accept both
        assert!(ProviderCapabilities::default()
            .check("local", &with_system, true)
            .is_ok());
    }
}
