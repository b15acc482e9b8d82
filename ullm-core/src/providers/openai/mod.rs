//! OpenAI dialect adapter
//!
//! One adapter serves OpenAI and every server that speaks its chat-completions
//! dialect. Groq is this adapter with a different tag, endpoint and key
//! variable, not a separate translation path.

pub mod converter;
pub mod types;

use crate::http::WireRequest;
use crate::protocol::{CompletionRequest, ModelResponse};
use crate::providers::adapter::{
    merge_extra_params, AdapterContext, Attempt, ProviderAdapter, ProviderCapabilities,
};
use crate::providers::error::{
    classify_failure, extract_error_message, kind_from_error_type, ErrorKind, ProviderError,
    ProviderResult, WireFailure,
};
use crate::providers::stream::{EventOutcome, RawEvent, RawEventIter, RawEventStream};
use crate::providers::{GROQ, OPENAI};
use async_trait::async_trait;
use converter::{from_openai_response, from_openai_stream_chunk, to_openai_request};
use serde_json::Value;
use tracing::info;
use types::{ChatCompletion, ChatCompletionChunk};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Everything that differs between servers speaking the OpenAI dialect
#[derive(Debug, Clone)]
pub struct OpenAiDialect {
    /// Provider tag; also selects `<TAG>_API_KEY` and `<TAG>_API_BASE`
    pub tag: String,

    /// Endpoint used when no override is configured
    pub default_base_url: String,

    /// Ask for a usage trailer on streams (`stream_options.include_usage`)
    pub stream_usage: bool,

    pub capabilities: ProviderCapabilities,
}

impl OpenAiDialect {
    pub fn openai() -> Self {
        Self {
            tag: OPENAI.to_string(),
            default_base_url: OPENAI_BASE_URL.to_string(),
            stream_usage: true,
            capabilities: ProviderCapabilities::default(),
        }
    }

    /// Groq rejects `stream_options` and reports stream usage in `x_groq`
    pub fn groq() -> Self {
        Self {
            tag: GROQ.to_string(),
            default_base_url: GROQ_BASE_URL.to_string(),
            stream_usage: false,
            capabilities: ProviderCapabilities::default(),
        }
    }

    /// Any other OpenAI-compatible server
    pub fn compatible(tag: impl Into<String>, default_base_url: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            default_base_url: default_base_url.into(),
            stream_usage: false,
            capabilities: ProviderCapabilities::default(),
        }
    }
}

/// Adapter for the OpenAI chat-completions dialect
pub struct OpenAiAdapter {
    dialect: OpenAiDialect,
    ctx: AdapterContext,
}

impl OpenAiAdapter {
    pub fn new(dialect: OpenAiDialect, ctx: AdapterContext) -> Self {
        Self { dialect, ctx }
    }

    pub fn openai(ctx: AdapterContext) -> Self {
        Self::new(OpenAiDialect::openai(), ctx)
    }

    pub fn groq(ctx: AdapterContext) -> Self {
        Self::new(OpenAiDialect::groq(), ctx)
    }

    pub fn dialect(&self) -> &OpenAiDialect {
        &self.dialect
    }

    /// Shape one HTTP call: endpoint, bearer auth, payload
    fn prepare(&self, attempt: Attempt<'_>, stream: bool) -> ProviderResult<WireRequest> {
        let tag = self.dialect.tag.as_str();
        let body = self.build_wire_request(attempt.request, attempt.model, stream)?;
        let api_key = self.ctx.api_key(tag, attempt.request.api_key.as_ref())?;
        let base_url = self.ctx.base_url(
            tag,
            attempt.request.api_base.as_deref(),
            &self.dialect.default_base_url,
        );

        let request = WireRequest::new(
            format!("{}/chat/completions", base_url),
            body,
            attempt.timeout,
        )
        .with_header("Authorization", api_key.bearer());

        info!(
            provider = tag,
            model = attempt.model,
            stream,
            "Prepared chat completion [request_id: {}]",
            request.request_id
        );
        Ok(request)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn tag(&self) -> &str {
        &self.dialect.tag
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.dialect.capabilities
    }

    fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
        stream: bool,
    ) -> ProviderResult<Value> {
        self.dialect.capabilities.check(&self.dialect.tag, request, stream)?;

        let wire = to_openai_request(request, model, stream, self.dialect.stream_usage);
        let mut payload = serde_json::to_value(&wire).map_err(|e| {
            ProviderError::bad_request(format!("request could not be encoded: {}", e))
                .with_provider(self.tag())
        })?;
        merge_extra_params(&mut payload, request);
        Ok(payload)
    }

    fn send(&self, attempt: Attempt<'_>) -> ProviderResult<Value> {
        let request = self.prepare(attempt, false)?;
        self.ctx
            .http
            .post_json_blocking(&request)
            .map_err(|failure| self.map_error(failure))
    }

    async fn send_async(&self, attempt: Attempt<'_>) -> ProviderResult<Value> {
        let request = self.prepare(attempt, false)?;
        self.ctx
            .http
            .post_json(&request)
            .await
            .map_err(|failure| self.map_error(failure))
    }

    fn open_stream(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventIter> {
        let request = self.prepare(attempt, true)?;
        self.ctx
            .http
            .open_event_stream_blocking(&request)
            .map_err(|failure| self.map_error(failure))
    }

    async fn open_stream_async(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventStream> {
        let request = self.prepare(attempt, true)?;
        self.ctx
            .http
            .open_event_stream(&request)
            .await
            .map_err(|failure| self.map_error(failure))
    }

    fn parse_response(&self, body: Value, model: &str) -> ProviderResult<ModelResponse> {
        let response: ChatCompletion = serde_json::from_value(body).map_err(|e| {
            ProviderError::new(
                ErrorKind::Unknown,
                format!("unexpected response shape: {}", e),
            )
            .with_provider(self.tag())
        })?;

        if response.choices.is_empty() {
            return Err(ProviderError::new(
                ErrorKind::Unknown,
                "response contained no choices",
            )
            .with_provider(self.tag()));
        }

        Ok(from_openai_response(response, self.tag(), model))
    }

    fn parse_stream_event(&self, event: &RawEvent) -> ProviderResult<EventOutcome> {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Ok(EventOutcome::Terminal(None));
        }
        if data.is_empty() {
            return Ok(EventOutcome::Ignored);
        }

        let value = event.json()?;
        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .or_else(|| error.get("code"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let message = extract_error_message(&value).unwrap_or_else(|| error.to_string());
            return Err(ProviderError::new(kind_from_error_type(error_type), message)
                .with_provider(self.tag()));
        }

        let chunk: ChatCompletionChunk = serde_json::from_value(value).map_err(|e| {
            ProviderError::server(format!("unexpected stream chunk: {}", e)).with_provider(self.tag())
        })?;
        Ok(from_openai_stream_chunk(chunk))
    }

    fn map_error(&self, failure: WireFailure) -> ProviderError {
        classify_failure(self.tag(), failure, extract_error_message)
    }
}
