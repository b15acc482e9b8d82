//! Provider abstraction layer
//!
//! Everything between a canonical request and a vendor's wire protocol:
//! resolving a model identifier to a provider tag, the adapter contract every
//! vendor implements, error classification, the retry engine that wraps each
//! attempt, and the normalizer that turns raw event streams into chunks.

pub mod adapter;
pub mod anthropic;
pub mod bedrock;
pub mod error;
pub mod openai;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod stream;

pub use adapter::{AdapterContext, Attempt, ProviderAdapter, ProviderCapabilities};
pub use anthropic::AnthropicAdapter;
pub use bedrock::{BedrockAdapter, BedrockRuntime};
pub use error::{ErrorKind, ProviderError, ProviderResult, WireFailure};
pub use openai::{OpenAiAdapter, OpenAiDialect};
pub use registry::{AdapterFactory, ProviderRegistry};
pub use resolver::{resolve_model, ResolvedModel};
pub use retry::{RetryExecutor, RetryPolicy, RetryResult, RetryState};
pub use stream::{ChunkIter, ChunkStream, EventOutcome, RawEvent, StreamStart};

pub const OPENAI: &str = "openai";
pub const ANTHROPIC: &str = "anthropic";
pub const GROQ: &str = "groq";
pub const BEDROCK: &str = "bedrock";

/// Tags with a built-in adapter
pub const SUPPORTED_PROVIDERS: &[&str] = &[OPENAI, ANTHROPIC, GROQ, BEDROCK];
