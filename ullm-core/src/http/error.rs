//! Mapping transport-level errors to raw wire failures

use crate::providers::error::WireFailure;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Parse Retry-After header value
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let trimmed = header_value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    // Fractional seconds show up on some gateways
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
    }
    // HTTP-date values are not handled
    None
}

/// Read Retry-After (or the OpenAI-style `retry-after-ms`) from response headers
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Map a reqwest error; `response_started` tells whether headers had arrived
pub fn from_reqwest(error: &reqwest::Error, response_started: bool) -> WireFailure {
    WireFailure::Transport {
        timed_out: error.is_timeout(),
        response_started: response_started && !error.is_connect(),
        message: error.to_string(),
    }
}

/// Map an I/O error raised while reading a blocking response body
pub fn from_io(error: &std::io::Error) -> WireFailure {
    let timed_out = error.kind() == std::io::ErrorKind::TimedOut
        || error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(|inner| inner.is_timeout());
    WireFailure::Transport {
        timed_out,
        response_started: true,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_retry_after_ms_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        headers.insert("retry-after-ms", HeaderValue::from_static("1200"));
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_millis(1200)));
    }

    #[test]
    fn test_io_timeout_detected() {
        let error = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        assert!(matches!(from_io(&error), WireFailure::Transport { timed_out: true, .. }));

        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            from_io(&error),
            WireFailure::Transport { timed_out: false, response_started: true, .. }
        ));
    }
}
