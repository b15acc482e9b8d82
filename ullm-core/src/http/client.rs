//! HTTP client implementation using reqwest

use crate::config::{ConfigError, ConnectionConfig};
use crate::http::error::{from_io, from_reqwest, retry_after_from_headers};
use crate::http::{HttpExecutor, WireRequest};
use crate::providers::error::WireFailure;
use crate::providers::stream::{RawEvent, RawEventIter, RawEventStream};
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::io::Read;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum non-streaming response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("ullm/", env!("CARGO_PKG_VERSION"));

/// Read size for blocking event streams
const READ_CHUNK: usize = 8 * 1024;

/// Shared HTTP client with connection pooling
///
/// Cloning is cheap and clones share the same pools. The blocking pool is
/// created on first blocking use.
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying async client
    client: Arc<Client>,

    /// Blocking client, built lazily
    blocking: Arc<OnceLock<reqwest::blocking::Client>>,

    /// Pool and connect settings, reused for the blocking client
    settings: ConnectionConfig,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(&ConnectionConfig::default())
    }

    /// Create a new HTTP client from connection settings
    pub fn from_config(settings: &ConnectionConfig) -> Result<Self, ConfigError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_secs))
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .user_agent(settings.user_agent.as_deref().unwrap_or(USER_AGENT))
            .gzip(true)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client: Arc::new(client),
            blocking: Arc::new(OnceLock::new()),
            settings: settings.clone(),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, WireFailure> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }

        let client = reqwest::blocking::ClientBuilder::new()
            .pool_max_idle_per_host(self.settings.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.settings.pool_idle_timeout_secs))
            .connect_timeout(Duration::from_millis(self.settings.connect_timeout_ms))
            .user_agent(self.settings.user_agent.as_deref().unwrap_or(USER_AGENT))
            .gzip(true)
            .build()
            .map_err(|e| WireFailure::Transport {
                timed_out: false,
                response_started: false,
                message: format!("Failed to create blocking HTTP client: {}", e),
            })?;

        // A concurrent caller may have won the race; either client is fine
        let _ = self.blocking.set(client);
        self.blocking.get().ok_or_else(|| WireFailure::Transport {
            timed_out: false,
            response_started: false,
            message: "blocking HTTP client unavailable".to_string(),
        })
    }

    async fn send(&self, request: &WireRequest) -> Result<reqwest::Response, WireFailure> {
        info!("Executing HTTP request {}", request);

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .json(&request.body)
            .header("X-Request-ID", request.request_id.to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(
                "Request error [request_id: {}]: {} (timeout: {})",
                request.request_id,
                e,
                e.is_timeout()
            );
            from_reqwest(&e, false)
        })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request.request_id);

        if !status.is_success() {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Request failed with status {} [request_id: {}]",
                status, request.request_id
            );
            return Err(WireFailure::Http {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        Ok(response)
    }

    fn send_blocking(
        &self,
        request: &WireRequest,
    ) -> Result<reqwest::blocking::Response, WireFailure> {
        info!("Executing blocking HTTP request {}", request);

        let mut builder = self
            .blocking_client()?
            .post(&request.url)
            .timeout(request.timeout)
            .json(&request.body)
            .header("X-Request-ID", request.request_id.to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| {
            warn!("Request error [request_id: {}]: {}", request.request_id, e);
            from_reqwest(&e, false)
        })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request.request_id);

        if !status.is_success() {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().unwrap_or_default();
            warn!(
                "Request failed with status {} [request_id: {}]",
                status, request.request_id
            );
            return Err(WireFailure::Http {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        Ok(response)
    }

    /// Reject non-JSON success bodies
    fn validate_content_type(headers: &reqwest::header::HeaderMap) -> Result<(), WireFailure> {
        if let Some(content_type) = headers.get(reqwest::header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or("").to_lowercase();
            if !content_type.contains("json") {
                return Err(WireFailure::Malformed {
                    message: format!("Expected application/json, got: {}", content_type),
                    body: String::new(),
                });
            }
        }
        Ok(())
    }

    fn check_size(&self, len: Option<u64>) -> Result<(), WireFailure> {
        match len {
            Some(len) if len as usize > self.max_response_size => Err(WireFailure::Malformed {
                message: format!(
                    "Response size {} exceeds maximum {}",
                    len, self.max_response_size
                ),
                body: String::new(),
            }),
            _ => Ok(()),
        }
    }

    fn decode_json(&self, text: String) -> Result<Value, WireFailure> {
        self.check_size(Some(text.len() as u64))?;
        serde_json::from_str(&text).map_err(|e| WireFailure::Malformed {
            message: format!("Invalid response format: {}", e),
            body: text,
        })
    }
}

fn raw_event<E: std::fmt::Display>(
    item: Result<eventsource_stream::Event, EventStreamError<E>>,
    transport: impl Fn(&E) -> WireFailure,
) -> Result<RawEvent, WireFailure> {
    match item {
        Ok(event) => Ok(RawEvent::new(event.event, event.data)),
        Err(EventStreamError::Transport(e)) => Err(transport(&e)),
        Err(e) => Err(WireFailure::Transport {
            timed_out: false,
            response_started: true,
            message: format!("Invalid event stream: {}", e),
        }),
    }
}

/// Blocking response body as a sequence of byte chunks
struct BodyChunks {
    response: reqwest::blocking::Response,
    done: bool,
}

impl Iterator for BodyChunks {
    type Item = Result<Bytes, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; READ_CHUNK];
        match self.response.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[async_trait]
impl HttpExecutor for HttpClient {
    async fn post_json(&self, request: &WireRequest) -> Result<Value, WireFailure> {
        let response = self.send(request).await?;
        Self::validate_content_type(response.headers())?;
        self.check_size(response.content_length())?;

        let text = response
            .text()
            .await
            .map_err(|e| from_reqwest(&e, true))?;

        info!("Request completed successfully [request_id: {}]", request.request_id);
        self.decode_json(text)
    }

    fn post_json_blocking(&self, request: &WireRequest) -> Result<Value, WireFailure> {
        let response = self.send_blocking(request)?;
        Self::validate_content_type(response.headers())?;
        self.check_size(response.content_length())?;

        let text = response.text().map_err(|e| from_reqwest(&e, true))?;

        info!("Request completed successfully [request_id: {}]", request.request_id);
        self.decode_json(text)
    }

    async fn open_event_stream(
        &self,
        request: &WireRequest,
    ) -> Result<RawEventStream, WireFailure> {
        let response = self.send(request).await?;
        debug!("Event stream opened [request_id: {}]", request.request_id);

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|item| raw_event(item, |e: &reqwest::Error| from_reqwest(e, true)));
        Ok(Box::pin(events))
    }

    fn open_event_stream_blocking(
        &self,
        request: &WireRequest,
    ) -> Result<RawEventIter, WireFailure> {
        let response = self.send_blocking(request)?;
        debug!("Event stream opened [request_id: {}]", request.request_id);

        let chunks = BodyChunks {
            response,
            done: false,
        };
        let events = futures::executor::block_on_stream(futures::stream::iter(chunks).eventsource())
            .map(|item| raw_event(item, from_io));
        Ok(Box::new(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(server: &MockServer, route: &str) -> WireRequest {
        WireRequest::new(
            format!("{}{}", server.uri(), route),
            json!({"hello": "world"}),
            Duration::from_secs(5),
        )
        .with_header("Authorization", "Bearer test")
    }

    #[tokio::test]
    async fn test_post_json_sends_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header_exists("X-Request-ID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let value = client.post_json(&request(&server, "/echo")).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_error_status_keeps_body_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let failure = client.post_json(&request(&server, "/x")).await.unwrap_err();
        assert_eq!(
            failure,
            WireFailure::Http {
                status: 429,
                body: "slow down".into(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let mut req = request(&server, "/slow");
        req.timeout = Duration::from_millis(50);
        let failure = client.post_json(&req).await.unwrap_err();
        assert!(matches!(failure, WireFailure::Transport { timed_out: true, .. }));
    }

    #[tokio::test]
    async fn test_event_stream_decodes_events() {
        let server = MockServer::start().await;
        let body = "event: ping\ndata: {}\n\ndata: {\"n\":1}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let events: Vec<RawEvent> = client
            .open_event_stream(&request(&server, "/stream"))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "ping");
        assert_eq!(events[1].data, "{\"n\":1}");
        assert_eq!(events[2].data, "[DONE]");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_event_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: a\n\ndata: b\n\n"),
            )
            .mount(&server)
            .await;

        let req = request(&server, "/stream");
        let data = tokio::task::spawn_blocking(move || {
            let client = HttpClient::new().unwrap();
            client
                .open_event_stream_blocking(&req)
                .unwrap()
                .map(|e| e.unwrap().data)
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

        assert_eq!(data, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_undecodable_event_stream_is_transport_failure() {
        let utf8 = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let failure = raw_event::<std::io::Error>(Err(EventStreamError::Utf8(utf8)), from_io)
            .unwrap_err();
        match failure {
            WireFailure::Transport {
                timed_out,
                response_started,
                message,
            } => {
                assert!(!timed_out);
                assert!(response_started);
                assert!(message.starts_with("Invalid event stream"));
            }
            other => panic!("unexpected failure: {:?}", other),
        }

        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let failure = raw_event(Err(EventStreamError::Transport(timeout)), from_io).unwrap_err();
        assert!(matches!(failure, WireFailure::Transport { timed_out: true, .. }));
    }
}
