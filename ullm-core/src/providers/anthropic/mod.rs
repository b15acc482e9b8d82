//! Anthropic Messages API adapter

pub mod converter;
pub mod types;

use crate::http::WireRequest;
use crate::protocol::{CompletionRequest, ModelResponse};
use crate::providers::adapter::{
    merge_extra_params, AdapterContext, Attempt, ProviderAdapter, ProviderCapabilities,
};
use crate::providers::error::{
    classify_failure, extract_error_message, ErrorKind, ProviderError, ProviderResult,
    WireFailure,
};
use crate::providers::stream::{EventOutcome, RawEvent, RawEventIter, RawEventStream};
use crate::providers::ANTHROPIC;
use async_trait::async_trait;
use converter::{from_anthropic_response, from_anthropic_stream_event, to_anthropic_request};
use serde_json::Value;
use tracing::info;
use types::{AnthropicResponse, AnthropicStreamEvent};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for Anthropic's Messages API
pub struct AnthropicAdapter {
    ctx: AdapterContext,
}

impl AnthropicAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    fn prepare(&self, attempt: Attempt<'_>, stream: bool) -> ProviderResult<WireRequest> {
        let body = self.build_wire_request(attempt.request, attempt.model, stream)?;
        let api_key = self.ctx.api_key(ANTHROPIC, attempt.request.api_key.as_ref())?;
        let base_url = self.ctx.base_url(
            ANTHROPIC,
            attempt.request.api_base.as_deref(),
            ANTHROPIC_BASE_URL,
        );

        let request = WireRequest::new(format!("{}/messages", base_url), body, attempt.timeout)
            .with_header("x-api-key", api_key.expose_secret())
            .with_header("anthropic-version", ANTHROPIC_VERSION);

        info!(
            provider = ANTHROPIC,
            model = attempt.model,
            stream,
            "Prepared messages call [request_id: {}]",
            request.request_id
        );
        Ok(request)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn tag(&self) -> &str {
        ANTHROPIC
    }

    fn capabilities(&self) -> ProviderCapabilities {
        // No native JSON output mode of either kind
        ProviderCapabilities {
            supports_json_mode: false,
            supports_json_schema: false,
            ..Default::default()
        }
    }

    fn build_wire_request(
        &self,
        request: &CompletionRequest,
        model: &str,
        stream: bool,
    ) -> ProviderResult<Value> {
        self.capabilities().check(ANTHROPIC, request, stream)?;

        let wire = to_anthropic_request(request, model, stream)
            .map_err(|e| e.with_provider(ANTHROPIC))?;
        let mut payload = serde_json::to_value(&wire).map_err(|e| {
            ProviderError::bad_request(format!("request could not be encoded: {}", e))
                .with_provider(ANTHROPIC)
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
        let response: AnthropicResponse = serde_json::from_value(body).map_err(|e| {
            ProviderError::new(
                ErrorKind::Unknown,
                format!("unexpected response shape: {}", e),
            )
            .with_provider(ANTHROPIC)
        })?;
        Ok(from_anthropic_response(response, ANTHROPIC, model))
    }

    fn parse_stream_event(&self, event: &RawEvent) -> ProviderResult<EventOutcome> {
        if event.data.trim().is_empty() {
            return Ok(EventOutcome::Ignored);
        }

        let decoded: AnthropicStreamEvent =
            serde_json::from_value(event.json()?).map_err(|e| {
                ProviderError::server(format!("unexpected stream event '{}': {}", event.event, e))
                    .with_provider(ANTHROPIC)
            })?;
        from_anthropic_stream_event(decoded).map_err(|e| e.with_provider(ANTHROPIC))
    }

    fn map_error(&self, failure: WireFailure) -> ProviderError {
        classify_failure(ANTHROPIC, failure, extract_error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FinishReason, Message, ResponseFormat, ToolDefinition};
    use crate::providers::testing::adapter_context;
    use serde_json::json;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(adapter_context())
    }

    #[test]
    fn test_json_modes_are_capability_gaps() {
        let request = CompletionRequest::new("claude-3-5-sonnet", vec![Message::user("hi")])
            .with_response_format(ResponseFormat::JsonObject);
        let err = adapter()
            .build_wire_request(&request, "claude-3-5-sonnet", false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.capability.as_deref(), Some("response_format=json_object"));
    }

    #[test]
    fn test_tool_definition_uses_input_schema() {
        let schema = json!({"type": "object", "properties": {"city": {"type": "string"}}});
        let request = CompletionRequest::new("claude-3-5-sonnet", vec![Message::user("hi")])
            .with_tools(vec![ToolDefinition::function(
                "get_weather",
                "Current weather",
                schema.clone(),
            )]);
        let wire = adapter()
            .build_wire_request(&request, "claude-3-5-sonnet", true)
            .unwrap();
        assert_eq!(wire["tools"][0]["name"], "get_weather");
        assert_eq!(wire["tools"][0]["input_schema"], schema);
        assert_eq!(wire["stream"], true);
    }

    #[test]
    fn test_stream_events() {
        let adapter = adapter();
        let parse = |event: &str, data: serde_json::Value| {
            adapter
                .parse_stream_event(&RawEvent::new(event, data.to_string()))
                .unwrap()
        };

        assert_eq!(
            parse("ping", json!({"type": "ping"})),
            EventOutcome::Ignored
        );

        match parse(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
        ) {
            EventOutcome::Chunk(chunk) => assert_eq!(chunk.delta.content.as_deref(), Some("Hel")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        match parse(
            "content_block_start",
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}}),
        ) {
            EventOutcome::Chunk(chunk) => {
                let calls = chunk.delta.tool_calls.unwrap();
                assert_eq!(calls[0].index, 1);
                assert_eq!(calls[0].id.as_deref(), Some("toolu_1"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        match parse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
                   "usage": {"output_tokens": 12}}),
        ) {
            EventOutcome::Chunk(chunk) => {
                assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
                assert_eq!(chunk.usage.unwrap().completion_tokens, 12);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(
            parse("message_stop", json!({"type": "message_stop"})),
            EventOutcome::Terminal(None)
        );
    }

    #[test]
    fn test_error_body_message_is_extracted() {
        let err = adapter().map_error(WireFailure::Http {
            status: 529,
            body: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                .to_string(),
            retry_after: None,
        });
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "Overloaded");
        assert_eq!(err.provider.as_deref(), Some("anthropic"));
    }
}
