//! ullm Core Library
//!
//! One request/response shape over several LLM vendors. A [`Client`] resolves
//! `provider/model` (or a bare model name) to an adapter, retries transient
//! failures, and returns either a [`ModelResponse`] or a lazy stream of
//! [`StreamChunk`]s.
//!
//! ```no_run
//! use ullm_core::{Client, CompletionRequest, Message};
//!
//! # fn main() -> Result<(), ullm_core::UllmError> {
//! let client = Client::new()?;
//! let request = CompletionRequest::new("openai/gpt-4o-mini", vec![Message::user("Hi")]);
//! let response = client.complete(&request)?;
//! println!("{}", response.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod providers;

pub use client::Client;
pub use config::{ClientConfig, SecretString};
pub use error::{UllmError, UllmResult};
pub use protocol::{
    CompletionRequest, FinishReason, Message, ModelResponse, ResponseFormat, StreamChunk,
    ToolCall, ToolChoice, ToolDefinition,
};
pub use providers::{ErrorKind, ProviderError, ProviderRegistry, RetryPolicy};

/// Returns the version of the ullm core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
