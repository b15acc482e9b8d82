//! Bedrock Converse wire types
//!
//! This is the JSON shape of the Converse REST API. The adapter speaks it to a
//! [`BedrockRuntime`](super::BedrockRuntime); the SDK-backed runtime converts
//! it to SDK builders and back.

use serde::{Deserialize, Serialize};

/// Converse request body, minus the model id which travels separately
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub messages: Vec<ConverseMessage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<ConverseSystemBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<ConverseInferenceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ConverseToolConfig>,

    /// Model-specific fields the Converse shape has no slot for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_model_request_fields: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseMessage {
    /// `user` or `assistant`
    pub role: String,
    pub content: Vec<ConverseContentBlock>,
}

/// Content block union; serialized as `{"text": ..}`, `{"toolUse": ..}`, ..
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConverseContentBlock {
    Text(String),
    Image(ConverseImage),
    ToolUse(ConverseToolUse),
    ToolResult(ConverseToolResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseImage {
    /// `png`, `jpeg`, `gif` or `webp`
    pub format: String,
    pub source: ConverseImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverseImageSource {
    /// Base64 image data
    pub bytes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolUse {
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolResult {
    pub tool_use_id: String,
    pub content: Vec<ConverseToolResultContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConverseToolResultContent {
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseSystemBlock {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseInferenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl ConverseInferenceConfig {
    pub fn is_empty(&self) -> bool {
        self.max_tokens.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.stop_sequences.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolConfig {
    pub tools: Vec<ConverseTool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ConverseToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseTool {
    pub tool_spec: ConverseToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input_schema: ConverseInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseInputSchema {
    pub json: serde_json::Value,
}

/// `{"auto": {}}`, `{"any": {}}` or `{"tool": {"name": ..}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConverseToolChoice {
    Auto {},
    Any {},
    Tool { name: String },
}

// -- Response types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
    #[serde(default)]
    pub output: Option<ConverseOutput>,

    #[serde(default)]
    pub stop_reason: Option<String>,

    #[serde(default)]
    pub usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ConverseOutput {
    #[serde(default)]
    pub message: Option<ConverseResponseMessage>,
}

/// Response turn; blocks stay untyped so unknown kinds can be skipped
#[derive(Debug, Deserialize)]
pub struct ConverseResponseMessage {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseUsage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,
}

// -- Streaming types, one per event name --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStartEvent {
    #[serde(default)]
    pub content_block_index: usize,

    #[serde(default)]
    pub start: Option<ContentBlockStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStart {
    #[serde(default)]
    pub tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseStart {
    pub tool_use_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
    #[serde(default)]
    pub content_block_index: usize,

    pub delta: ContentBlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDelta {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub tool_use: Option<ToolUseDelta>,
}

#[derive(Debug, Deserialize)]
pub struct ToolUseDelta {
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
    pub stop_reason: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataEvent {
    #[serde(default)]
    pub usage: Option<ConverseUsage>,
}
