//! HTTP transport shared by the HTTP-based adapters
//!
//! This module implements the network layer, handling:
//! - Connection pooling, one pool per client shared by all calls
//! - Blocking and non-blocking request execution
//! - Server-sent event decoding for streaming calls
//! - Request ID generation and correlation
//!
//! The transport never classifies failures; it reports a raw [`WireFailure`]
//! and leaves classification to the adapter that issued the call.

pub mod client;
pub mod error;

pub use client::HttpClient;

use crate::providers::error::WireFailure;
use crate::providers::stream::{RawEventIter, RawEventStream};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// One fully-shaped HTTP call, ready to send
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Absolute endpoint URL
    pub url: String,

    /// Vendor headers (auth, versioning); secrets live only here
    pub headers: Vec<(String, String)>,

    /// JSON payload
    pub body: Value,

    /// Whole-attempt timeout (connect + read)
    pub timeout: Duration,

    /// Unique ID for log and header correlation
    pub request_id: Uuid,
}

impl WireRequest {
    pub fn new(url: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl std::fmt::Display for WireRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "POST {} [request_id: {}]", self.url, self.request_id)
    }
}

/// Trait for HTTP executors
///
/// Blocking methods must be called from a thread that is not driving an async
/// runtime; async methods perform genuine non-blocking I/O.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// POST a JSON body and decode the JSON answer
    async fn post_json(&self, request: &WireRequest) -> Result<Value, WireFailure>;

    /// Blocking variant of [`HttpExecutor::post_json`]
    fn post_json_blocking(&self, request: &WireRequest) -> Result<Value, WireFailure>;

    /// POST a JSON body and return the server-sent event stream
    async fn open_event_stream(&self, request: &WireRequest)
        -> Result<RawEventStream, WireFailure>;

    /// Blocking variant of [`HttpExecutor::open_event_stream`]
    fn open_event_stream_blocking(&self, request: &WireRequest)
        -> Result<RawEventIter, WireFailure>;
}
