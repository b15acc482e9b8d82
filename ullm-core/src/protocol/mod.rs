//! Canonical data model for LLM calls
//!
//! These structures are provider-agnostic. Adapters translate them to each
//! vendor's wire format and back; callers never see vendor shapes.

pub mod types;

pub use types::{
    CompletionRequest, CompletionUsage, ContentPart, FinishReason, FunctionCall,
    FunctionCallDelta, FunctionChoice, FunctionDefinition, JsonSchemaFormat, Message,
    MessageBuilder, MessageContent, MessageDelta, MessageRole, ModelResponse, ResponseChoice,
    ResponseFormat, ResponseInputBlock, ResponseInputContent, ResponseInputItem, StreamChunk,
    ToolCall, ToolCallDelta, ToolChoice, ToolDefinition,
};
