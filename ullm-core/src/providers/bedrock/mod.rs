//! AWS Bedrock adapter over the Converse API
//!
//! Bedrock is reached through the AWS SDK, which this crate drives blocking.
//! The non-blocking entry points are a shim: each blocking call runs on the
//! tokio blocking pool, gated by a semaphore of `max_workers` permits.
//! Dropping an async call only stops waiting for it; the dispatched blocking
//! call runs to completion on its worker and its result is discarded.

pub mod converter;
pub mod sdk;
pub mod types;

use crate::config::{env, ProviderSettings};
use crate::protocol::{CompletionRequest, ModelResponse};
use crate::providers::adapter::{AdapterContext, Attempt, ProviderAdapter, ProviderCapabilities};
use crate::providers::error::{
    classify_failure, extract_error_message, ErrorKind, ProviderError, ProviderResult,
    WireFailure,
};
use crate::providers::stream::{EventOutcome, RawEvent, RawEventIter, RawEventStream};
use crate::providers::BEDROCK;
use async_trait::async_trait;
use converter::{from_converse_response, from_converse_stream_event, to_converse_request};
use futures::stream::{self, StreamExt};
use sdk::{BedrockSettings, SdkBedrockRuntime};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use types::ConverseResponse;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Blocking access to the Converse API, in its REST JSON shape
///
/// The SDK-backed implementation is [`SdkBedrockRuntime`]; tests substitute
/// their own.
pub trait BedrockRuntime: Send + Sync {
    /// One `Converse` call returning the response body
    fn converse(&self, model: &str, body: &Value, timeout: Duration) -> Result<Value, WireFailure>;

    /// One `ConverseStream` call returning named events
    fn converse_stream(
        &self,
        model: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<RawEventIter, WireFailure>;
}

/// Region from configuration, then `AWS_REGION`, then `AWS_REGION_NAME`
pub fn resolve_region(settings: Option<&ProviderSettings>) -> String {
    settings
        .and_then(|settings| settings.region.clone())
        .or_else(|| env::lookup("AWS_REGION"))
        .or_else(|| env::lookup("AWS_REGION_NAME"))
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Adapter for Bedrock
pub struct BedrockAdapter {
    runtime: Arc<dyn BedrockRuntime>,
    workers: Arc<Semaphore>,
}

impl BedrockAdapter {
    /// Adapter over the AWS SDK, configured from `providers.bedrock`
    pub fn new(ctx: &AdapterContext) -> Self {
        let provider = ctx.settings(BEDROCK);
        let settings = BedrockSettings {
            region: resolve_region(provider),
            endpoint_url: provider.and_then(|p| p.base_url.clone()),
            access_key_id: provider.and_then(|p| p.access_key_id.clone()),
            secret_access_key: provider
                .and_then(|p| p.secret_access_key.as_ref())
                .map(|key| key.expose_secret().to_string()),
            session_token: provider
                .and_then(|p| p.session_token.as_ref())
                .map(|token| token.expose_secret().to_string()),
        };
        debug!(region = %settings.region, "Configured Bedrock adapter");

        let max_workers = provider
            .and_then(|p| p.max_workers)
            .unwrap_or(DEFAULT_MAX_WORKERS);
        Self::with_runtime(Arc::new(SdkBedrockRuntime::new(settings)), max_workers)
    }

    /// Adapter over any runtime, with at most `max_workers` blocking calls in flight
    pub fn with_runtime(runtime: Arc<dyn BedrockRuntime>, max_workers: usize) -> Self {
        Self {
            runtime,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Run one blocking runtime call on the bounded pool
    async fn offload<T, F>(&self, call: F) -> ProviderResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BedrockRuntime) -> Result<T, WireFailure> + Send + 'static,
    {
        let result = run_on_pool(self.runtime.clone(), self.workers.clone(), call).await?;
        result.map_err(|failure| self.map_error(failure))
    }
}

/// Shared by the adapter and its async stream, which outlives any borrow
async fn run_on_pool<T, F>(
    runtime: Arc<dyn BedrockRuntime>,
    workers: Arc<Semaphore>,
    call: F,
) -> ProviderResult<Result<T, WireFailure>>
where
    T: Send + 'static,
    F: FnOnce(&dyn BedrockRuntime) -> Result<T, WireFailure> + Send + 'static,
{
    let permit = workers.acquire_owned().await.map_err(|_| {
        ProviderError::server("Bedrock worker pool is closed").with_provider(BEDROCK)
    })?;

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        call(runtime.as_ref())
    })
    .await
    .map_err(|e| {
        ProviderError::server(format!("Bedrock worker failed: {}", e)).with_provider(BEDROCK)
    })
}

/// Kind for a Bedrock exception code
fn exception_kind(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "AccessDeniedException" | "UnrecognizedClientException" | "ExpiredTokenException" => {
            ErrorKind::Authentication
        }
        "ValidationException" => ErrorKind::BadRequest,
        "ThrottlingException" | "ServiceQuotaExceededException" => ErrorKind::RateLimit,
        "ModelTimeoutException" => ErrorKind::Timeout,
        "InternalServerException"
        | "ServiceUnavailableException"
        | "ModelStreamErrorException"
        | "ModelNotReadyException" => ErrorKind::ServerError,
        _ => return None,
    };
    Some(kind)
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn tag(&self) -> &str {
        BEDROCK
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tool_choice_none: false,
            supports_json_mode: false,
            supports_json_schema: false,
            supports_image_urls: false,
            ..Default::default()
        }
    }

    fn build_wire_request(
        &self,
        request: &CompletionRequest,
        _model: &str,
        stream: bool,
    ) -> ProviderResult<Value> {
        self.capabilities().check(BEDROCK, request, stream)?;

        let wire = to_converse_request(request).map_err(|e| e.with_provider(BEDROCK))?;
        serde_json::to_value(&wire).map_err(|e| {
            ProviderError::bad_request(format!("request could not be encoded: {}", e))
                .with_provider(BEDROCK)
        })
    }

    fn send(&self, attempt: Attempt<'_>) -> ProviderResult<Value> {
        let body = self.build_wire_request(attempt.request, attempt.model, false)?;
        info!(provider = BEDROCK, model = attempt.model, "Calling Converse");
        self.runtime
            .converse(attempt.model, &body, attempt.timeout)
            .map_err(|failure| self.map_error(failure))
    }

    async fn send_async(&self, attempt: Attempt<'_>) -> ProviderResult<Value> {
        let body = self.build_wire_request(attempt.request, attempt.model, false)?;
        let model = attempt.model.to_string();
        let timeout = attempt.timeout;
        info!(provider = BEDROCK, model = %model, "Calling Converse on worker pool");

        self.offload(move |runtime| runtime.converse(&model, &body, timeout))
            .await
    }

    fn open_stream(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventIter> {
        let body = self.build_wire_request(attempt.request, attempt.model, true)?;
        info!(provider = BEDROCK, model = attempt.model, "Opening ConverseStream");
        self.runtime
            .converse_stream(attempt.model, &body, attempt.timeout)
            .map_err(|failure| self.map_error(failure))
    }

    async fn open_stream_async(&self, attempt: Attempt<'_>) -> ProviderResult<RawEventStream> {
        let body = self.build_wire_request(attempt.request, attempt.model, true)?;
        let model = attempt.model.to_string();
        let timeout = attempt.timeout;
        info!(provider = BEDROCK, model = %model, "Opening ConverseStream on worker pool");

        let events = self
            .offload(move |runtime| runtime.converse_stream(&model, &body, timeout))
            .await?;

        // Each pull is one blocking call on the pool
        let runtime = self.runtime.clone();
        let workers = self.workers.clone();
        let pulled = stream::unfold(Some(events), move |state| {
            let runtime = runtime.clone();
            let workers = workers.clone();
            async move {
                let mut events = state?;
                let pulled = run_on_pool(runtime, workers, move |_| {
                    let next = events.next();
                    Ok((next, events))
                })
                .await;

                match pulled {
                    Ok(Ok((Some(item), events))) => Some((item, Some(events))),
                    Ok(Ok((None, _))) => None,
                    Ok(Err(failure)) => Some((Err(failure), None)),
                    Err(error) => Some((
                        Err(WireFailure::Transport {
                            timed_out: false,
                            response_started: true,
                            message: error.message,
                        }),
                        None,
                    )),
                }
            }
        });
        Ok(pulled.boxed())
    }

    fn parse_response(&self, body: Value, model: &str) -> ProviderResult<ModelResponse> {
        let response: ConverseResponse = serde_json::from_value(body).map_err(|e| {
            ProviderError::new(
                ErrorKind::Unknown,
                format!("unexpected response shape: {}", e),
            )
            .with_provider(BEDROCK)
        })?;
        Ok(from_converse_response(response, BEDROCK, model))
    }

    fn parse_stream_event(&self, event: &RawEvent) -> ProviderResult<EventOutcome> {
        from_converse_stream_event(event).map_err(|e| e.with_provider(BEDROCK))
    }

    fn map_error(&self, failure: WireFailure) -> ProviderError {
        if let WireFailure::Sdk {
            code: Some(code),
            status,
            message,
        } = &failure
        {
            if let Some(kind) = exception_kind(code) {
                let error = ProviderError::new(kind, format!("{}: {}", code, message))
                    .with_provider(BEDROCK);
                return match status {
                    Some(status) => error.with_status(*status),
                    None => error,
                };
            }
        }
        classify_failure(BEDROCK, failure, extract_error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FinishReason, Message, ToolChoice};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Runtime returning canned answers and recording the bodies it saw
    #[derive(Default)]
    struct FakeRuntime {
        bodies: Mutex<Vec<Value>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        failure: Option<WireFailure>,
    }

    impl BedrockRuntime for FakeRuntime {
        fn converse(&self, _model: &str, body: &Value, _timeout: Duration) -> Result<Value, WireFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.bodies.lock().unwrap().push(body.clone());
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            Ok(json!({
                "output": {"message": {"role": "assistant", "content": [{"text": "Hello"}]}},
                "stopReason": "end_turn",
                "usage": {"inputTokens": 3, "outputTokens": 1, "totalTokens": 4}
            }))
        }

        fn converse_stream(
            &self,
            _model: &str,
            _body: &Value,
            _timeout: Duration,
        ) -> Result<RawEventIter, WireFailure> {
            let events = vec![
                Ok(RawEvent::new("messageStart", r#"{"role":"assistant"}"#)),
                Ok(RawEvent::new(
                    "contentBlockDelta",
                    r#"{"contentBlockIndex":0,"delta":{"text":"Hi"}}"#,
                )),
                Ok(RawEvent::new("messageStop", r#"{"stopReason":"end_turn"}"#)),
                Ok(RawEvent::new(
                    "metadata",
                    r#"{"usage":{"inputTokens":1,"outputTokens":1,"totalTokens":2}}"#,
                )),
            ];
            Ok(Box::new(events.into_iter()))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("anthropic.claude-3-haiku", vec![Message::user("Hi")])
    }

    #[test]
    fn test_tool_choice_none_is_capability_gap() {
        let adapter = BedrockAdapter::with_runtime(Arc::new(FakeRuntime::default()), 1);
        let request = request().with_tool_choice(ToolChoice::none());
        let err = adapter.build_wire_request(&request, "m", false).unwrap_err();
        assert!(err.is_capability_gap());
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_blocking_send_and_parse() {
        let runtime = Arc::new(FakeRuntime::default());
        let adapter = BedrockAdapter::with_runtime(runtime.clone(), 1);
        let request = request();

        let body = adapter
            .send(Attempt::new(&request, "anthropic.claude-3-haiku", Duration::from_secs(5)))
            .unwrap();
        let response = adapter.parse_response(body, "anthropic.claude-3-haiku").unwrap();
        assert_eq!(response.content(), Some("Hello"));
        assert_eq!(response.provider, "bedrock");
        assert_eq!(runtime.bodies.lock().unwrap()[0]["messages"][0]["content"][0]["text"], "Hi");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_calls_are_bounded_by_worker_pool() {
        let runtime = Arc::new(FakeRuntime::default());
        let adapter = Arc::new(BedrockAdapter::with_runtime(runtime.clone(), 2));

        let calls = (0..6).map(|_| {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                let request = request();
                adapter
                    .send_async(Attempt::new(&request, "m", Duration::from_secs(5)))
                    .await
            })
        });
        for call in futures::future::join_all(calls).await {
            assert!(call.unwrap().is_ok());
        }

        assert_eq!(runtime.bodies.lock().unwrap().len(), 6);
        assert!(runtime.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_async_stream_pulls_through_pool() {
        let adapter = BedrockAdapter::with_runtime(Arc::new(FakeRuntime::default()), 1);
        let request = request();
        let events: Vec<_> = adapter
            .open_stream_async(Attempt::new(&request, "m", Duration::from_secs(5)))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 4);

        let outcomes: Vec<_> = events
            .into_iter()
            .map(|event| adapter.parse_stream_event(&event.unwrap()).unwrap())
            .collect();
        assert_eq!(outcomes[0], EventOutcome::Ignored);
        match &outcomes[2] {
            EventOutcome::Chunk(chunk) => assert_eq!(chunk.finish_reason, Some(FinishReason::Stop)),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(outcomes[3], EventOutcome::Terminal(Some(_))));
    }

    #[test]
    fn test_exception_codes_are_classified() {
        let adapter = BedrockAdapter::with_runtime(Arc::new(FakeRuntime::default()), 1);
        let cases = [
            ("ThrottlingException", ErrorKind::RateLimit),
            ("AccessDeniedException", ErrorKind::Authentication),
            ("ValidationException", ErrorKind::BadRequest),
            ("ModelTimeoutException", ErrorKind::Timeout),
            ("ServiceUnavailableException", ErrorKind::ServerError),
        ];
        for (code, kind) in cases {
            let err = adapter.map_error(WireFailure::Sdk {
                code: Some(code.to_string()),
                status: None,
                message: "boom".to_string(),
            });
            assert_eq!(err.kind, kind, "{}", code);
            assert_eq!(err.provider.as_deref(), Some("bedrock"));
        }

        let err = adapter.map_error(WireFailure::Sdk {
            code: Some("SomethingNew".to_string()),
            status: Some(503),
            message: "boom".to_string(),
        });
        assert_eq!(err.kind, ErrorKind::ServerError);
    }

    #[test]
    fn test_sdk_failures_surface_through_send() {
        let runtime = Arc::new(FakeRuntime {
            failure: Some(WireFailure::Sdk {
                code: Some("ThrottlingException".to_string()),
                status: Some(429),
                message: "Too many requests".to_string(),
            }),
            ..Default::default()
        });
        let adapter = BedrockAdapter::with_runtime(runtime, 1);
        let request = request();
        let err = adapter
            .send(Attempt::new(&request, "m", Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.status, Some(429));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_region_from_settings() {
        let settings = ProviderSettings {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_region(Some(&settings)), "eu-west-1");
    }
}
