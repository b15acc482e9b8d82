//! Error classification for provider calls
//!
//! Every failure is classified exactly once, at the adapter boundary, into the
//! closed [`ErrorKind`] set. The retry engine only ever looks at the kind.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Closed taxonomy of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    BadRequest,
    RateLimit,
    Timeout,
    ServerError,
    Unknown,
}

impl ErrorKind {
    /// Whether a call failing with this kind may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::ServerError
        )
    }

    /// Table-driven HTTP status classification
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Authentication,
            400 | 422 => ErrorKind::BadRequest,
            429 => ErrorKind::RateLimit,
            408 => ErrorKind::Timeout,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified provider failure
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} error{}: {message}", provider_suffix(.provider, .status))]
pub struct ProviderError {
    /// Classified kind
    pub kind: ErrorKind,

    /// Provider tag, when known
    pub provider: Option<String>,

    /// HTTP status, when the failure came with a response
    pub status: Option<u16>,

    /// Vendor message, or the raw body when it could not be parsed
    pub message: String,

    /// Server-requested delay before the next attempt
    pub retry_after: Option<Duration>,

    /// Name of the unsupported feature for capability-gap errors
    pub capability: Option<String>,
}

fn provider_suffix(provider: &Option<String>, status: &Option<u16>) -> String {
    match (provider, status) {
        (Some(p), Some(s)) => format!(" from {} (HTTP {})", p, s),
        (Some(p), None) => format!(" from {}", p),
        (None, Some(s)) => format!(" (HTTP {})", s),
        (None, None) => String::new(),
    }
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: None,
            status: None,
            message: message.into(),
            retry_after: None,
            capability: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    /// A feature the resolved vendor cannot express, raised before any network call
    pub fn capability_gap(provider: &str, feature: impl Into<String>) -> Self {
        let feature = feature.into();
        Self {
            message: format!("{} does not support {}", provider, feature),
            provider: Some(provider.to_string()),
            capability: Some(feature),
            ..Self::new(ErrorKind::BadRequest, "")
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_capability_gap(&self) -> bool {
        self.capability.is_some()
    }
}

/// Raw failure observed by a transport, before classification
#[derive(Debug, Clone, PartialEq)]
pub enum WireFailure {
    /// The vendor answered with a non-success status
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    /// No usable response: connect error, reset, deadline, broken stream
    Transport {
        timed_out: bool,
        /// Whether any bytes of a response had arrived
        response_started: bool,
        message: String,
    },
    /// Success status but a payload that could not be decoded
    Malformed { message: String, body: String },
    /// Error raised by a vendor SDK
    Sdk {
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },
}

impl fmt::Display for WireFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFailure::Http { status, body, .. } => write!(f, "HTTP {}: {}", status, body),
            WireFailure::Transport { message, .. } => write!(f, "transport: {}", message),
            WireFailure::Malformed { message, .. } => write!(f, "malformed payload: {}", message),
            WireFailure::Sdk { code, message, .. } => {
                write!(f, "sdk {}: {}", code.as_deref().unwrap_or("error"), message)
            }
        }
    }
}

/// Classify a raw failure with the shared table
///
/// `extract_message` pulls the vendor's human-readable message out of an error
/// body; when it returns `None` the raw body is kept verbatim.
pub fn classify_failure(
    provider: &str,
    failure: WireFailure,
    extract_message: impl Fn(&Value) -> Option<String>,
) -> ProviderError {
    match failure {
        WireFailure::Http {
            status,
            body,
            retry_after,
        } => {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| extract_message(&v))
                .unwrap_or(body);
            ProviderError::new(ErrorKind::from_status(status), message)
                .with_provider(provider)
                .with_status(status)
                .with_retry_after(retry_after)
        }
        WireFailure::Transport {
            timed_out,
            response_started,
            message,
        } => {
            // No bytes means the vendor never answered; bytes followed by a break
            // means it failed while answering.
            let kind = if timed_out || !response_started {
                ErrorKind::Timeout
            } else {
                ErrorKind::ServerError
            };
            ProviderError::new(kind, message).with_provider(provider)
        }
        WireFailure::Malformed { message, body } => ProviderError::new(
            ErrorKind::Unknown,
            format!("{}; body: {}", message, body),
        )
        .with_provider(provider),
        WireFailure::Sdk {
            code,
            status,
            message,
        } => {
            let kind = match status {
                Some(status) => ErrorKind::from_status(status),
                None => ErrorKind::Unknown,
            };
            let message = match code {
                Some(code) => format!("{}: {}", code, message),
                None => message,
            };
            let error = ProviderError::new(kind, message).with_provider(provider);
            match status {
                Some(status) => error.with_status(status),
                None => error,
            }
        }
    }
}

/// Kind for an error reported inside a stream, keyed by the vendor's error type
///
/// The stream had already started, so unrecognized types count as server errors.
pub fn kind_from_error_type(error_type: &str) -> ErrorKind {
    match error_type {
        "authentication_error" | "invalid_api_key" | "permission_error" => {
            ErrorKind::Authentication
        }
        "invalid_request_error" | "validation_error" => ErrorKind::BadRequest,
        "rate_limit_error" | "rate_limit_exceeded" | "throttling_exception" => {
            ErrorKind::RateLimit
        }
        "timeout_error" | "request_timeout" => ErrorKind::Timeout,
        _ => ErrorKind::ServerError,
    }
}

/// `{"error": {"message": ..}}`, `{"message": ..}` or `{"error": ".."}`
pub fn extract_error_message(json: &Value) -> Option<String> {
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }
    json.get("message")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(401, ErrorKind::Authentication)]
    #[test_case(403, ErrorKind::Authentication)]
    #[test_case(400, ErrorKind::BadRequest)]
    #[test_case(422, ErrorKind::BadRequest)]
    #[test_case(429, ErrorKind::RateLimit)]
    #[test_case(408, ErrorKind::Timeout)]
    #[test_case(500, ErrorKind::ServerError)]
    #[test_case(503, ErrorKind::ServerError)]
    #[test_case(404, ErrorKind::Unknown)]
    #[test_case(418, ErrorKind::Unknown)]
    fn test_status_table(status: u16, expected: ErrorKind) {
        assert_eq!(ErrorKind::from_status(status), expected);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::BadRequest.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_http_failure_keeps_vendor_message() {
        let failure = WireFailure::Http {
            status: 401,
            body: r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#.into(),
            retry_after: None,
        };
        let error = classify_failure("openai", failure, extract_error_message);
        assert_eq!(error.kind, ErrorKind::Authentication);
        assert_eq!(error.status, Some(401));
        assert_eq!(error.provider.as_deref(), Some("openai"));
        assert_eq!(error.message, "Incorrect API key provided");
    }

    #[test]
    fn test_unknown_status_preserves_raw_body() {
        let failure = WireFailure::Http {
            status: 404,
            body: "<html>not here</html>".into(),
            retry_after: None,
        };
        let error = classify_failure("groq", failure, extract_error_message);
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert_eq!(error.message, "<html>not here</html>");
    }

    #[test]
    fn test_transport_failure_depends_on_bytes_received() {
        let before = WireFailure::Transport {
            timed_out: false,
            response_started: false,
            message: "connection refused".into(),
        };
        let after = WireFailure::Transport {
            timed_out: false,
            response_started: true,
            message: "connection reset".into(),
        };
        assert_eq!(
            classify_failure("openai", before, extract_error_message).kind,
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_failure("openai", after, extract_error_message).kind,
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let failure = WireFailure::Http {
            status: 429,
            body: "{}".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        let error = classify_failure("anthropic", failure, extract_error_message);
        assert_eq!(error.kind, ErrorKind::RateLimit);
        assert_eq!(error.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(error.message, "{}");
    }

    #[test_case("overloaded_error", ErrorKind::ServerError)]
    #[test_case("api_error", ErrorKind::ServerError)]
    #[test_case("rate_limit_error", ErrorKind::RateLimit)]
    #[test_case("invalid_request_error", ErrorKind::BadRequest)]
    #[test_case("something_new", ErrorKind::ServerError)]
    fn test_stream_error_types(error_type: &str, expected: ErrorKind) {
        assert_eq!(kind_from_error_type(error_type), expected);
    }

    #[test]
    fn test_capability_gap_is_bad_request() {
        let error = ProviderError::capability_gap("anthropic", "response_format=json_schema");
        assert_eq!(error.kind, ErrorKind::BadRequest);
        assert!(error.is_capability_gap());
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("anthropic"));
    }
}
