//! Conversion between the canonical protocol and the Converse shape

use super::types::*;
use crate::protocol::{
    CompletionRequest, CompletionUsage, ContentPart, FinishReason, FunctionCall,
    FunctionCallDelta, Message, MessageContent, MessageRole, ModelResponse, ResponseChoice,
    StreamChunk, ToolCall, ToolCallDelta, ToolChoice, ToolDefinition,
};
use crate::providers::adapter::unix_now;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::stream::{EventOutcome, RawEvent};
use serde_json::Value;
use uuid::Uuid;

/// Convert a canonical request to a Converse body
pub fn to_converse_request(request: &CompletionRequest) -> ProviderResult<ConverseRequest> {
    let mut system = Vec::new();
    let mut messages: Vec<ConverseMessage> = Vec::new();

    for message in &request.messages {
        match message.role {
            MessageRole::System => system.push(ConverseSystemBlock {
                text: message.text(),
            }),
            MessageRole::Tool => push_tool_result(&mut messages, message),
            MessageRole::User => messages.push(ConverseMessage {
                role: "user".to_string(),
                content: to_converse_content(&message.content)?,
            }),
            MessageRole::Assistant => messages.push(to_assistant_message(message)?),
        }
    }

    let inference_config = ConverseInferenceConfig {
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
    };

    let tool_config = match request.tools.as_ref().filter(|tools| !tools.is_empty()) {
        Some(tools) => Some(ConverseToolConfig {
            tools: tools.iter().map(to_converse_tool).collect(),
            tool_choice: request
                .tool_choice
                .as_ref()
                .map(to_converse_tool_choice)
                .transpose()?,
        }),
        None if request.tool_choice.is_some() => {
            return Err(ProviderError::bad_request(
                "tool_choice was set but no tools were supplied",
            ));
        }
        None => None,
    };

    let additional_model_request_fields = (!request.metadata.is_empty()).then(|| {
        Value::Object(
            request
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    });

    Ok(ConverseRequest {
        messages,
        system,
        inference_config: (!inference_config.is_empty()).then_some(inference_config),
        tool_config,
        additional_model_request_fields,
    })
}

fn push_tool_result(messages: &mut Vec<ConverseMessage>, message: &Message) {
    let block = ConverseContentBlock::ToolResult(ConverseToolResult {
        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
        content: vec![ConverseToolResultContent::Text(message.text())],
    });

    if let Some(last) = messages.last_mut() {
        let only_results = last
            .content
            .iter()
            .all(|block| matches!(block, ConverseContentBlock::ToolResult(_)));
        if last.role.as_str() == "user" && only_results {
            last.content.push(block);
            return;
        }
    }

    messages.push(ConverseMessage {
        role: "user".to_string(),
        content: vec![block],
    });
}

fn to_assistant_message(message: &Message) -> ProviderResult<ConverseMessage> {
    let mut content = to_converse_content(&message.content)?;

    for call in message.tool_calls.as_deref().unwrap_or_default() {
        let arguments = call.function.arguments.trim();
        let input = if arguments.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                ProviderError::bad_request(format!(
                    "tool call '{}' has arguments that are not valid JSON: {}",
                    call.id, e
                ))
            })?
        };
        content.push(ConverseContentBlock::ToolUse(ConverseToolUse {
            tool_use_id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        }));
    }

    Ok(ConverseMessage {
        role: "assistant".to_string(),
        content,
    })
}

/// Converse rejects blank text blocks, so empty text is dropped
fn to_converse_content(content: &MessageContent) -> ProviderResult<Vec<ConverseContentBlock>> {
    match content {
        MessageContent::Text(text) if text.is_empty() => Ok(Vec::new()),
        MessageContent::Text(text) => Ok(vec![ConverseContentBlock::Text(text.clone())]),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(Ok(ConverseContentBlock::Text(text.clone()))),
                ContentPart::Image {
                    base64: Some(data),
                    media_type,
                    ..
                } => Some(image_format(media_type.as_deref()).map(|format| {
                    ConverseContentBlock::Image(ConverseImage {
                        format,
                        source: ConverseImageSource {
                            bytes: data.clone(),
                        },
                    })
                })),
                // URL images are rejected by the capability check
                ContentPart::Image { .. } => None,
            })
            .collect(),
    }
}

fn image_format(media_type: Option<&str>) -> ProviderResult<String> {
    match media_type.unwrap_or("image/jpeg") {
        "image/png" => Ok("png".to_string()),
        "image/jpeg" | "image/jpg" => Ok("jpeg".to_string()),
        "image/gif" => Ok("gif".to_string()),
        "image/webp" => Ok("webp".to_string()),
        other => Err(ProviderError::bad_request(format!(
            "unsupported image type '{}'",
            other
        ))),
    }
}

fn to_converse_tool(tool: &ToolDefinition) -> ConverseTool {
    ConverseTool {
        tool_spec: ConverseToolSpec {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: ConverseInputSchema {
                json: tool.parameters_or_empty(),
            },
        },
    }
}

fn to_converse_tool_choice(choice: &ToolChoice) -> ProviderResult<ConverseToolChoice> {
    match choice {
        ToolChoice::Function { function, .. } => Ok(ConverseToolChoice::Tool {
            name: function.name.clone(),
        }),
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Ok(ConverseToolChoice::Auto {}),
            "required" | "any" => Ok(ConverseToolChoice::Any {}),
            other => Err(ProviderError::bad_request(format!(
                "unsupported tool_choice mode '{}'",
                other
            ))),
        },
    }
}

/// Converse stop reason to the canonical finish reason
pub fn finish_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "content_filtered" | "guardrail_intervened" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn from_converse_usage(usage: ConverseUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Convert a Converse response to canonical format
///
/// Converse responses carry no id, so one is made up from the clock.
pub fn from_converse_response(
    response: ConverseResponse,
    provider: &str,
    model: &str,
) -> ModelResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    let blocks = response
        .output
        .and_then(|output| output.message)
        .map(|message| message.content)
        .unwrap_or_default();

    for block in blocks {
        match serde_json::from_value::<ConverseContentBlock>(block) {
            Ok(ConverseContentBlock::Text(fragment)) => text.push_str(&fragment),
            Ok(ConverseContentBlock::ToolUse(tool_use)) => tool_calls.push(ToolCall {
                id: tool_use.tool_use_id,
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: tool_use.name,
                    arguments: tool_use.input.to_string(),
                },
            }),
            // Reasoning and other block kinds carry nothing canonical
            _ => {}
        }
    }

    let created = unix_now();
    ModelResponse {
        id: format!("bedrock-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        provider: provider.to_string(),
        choices: vec![ResponseChoice {
            index: 0,
            message: Message {
                role: MessageRole::Assistant,
                content: MessageContent::Text(text),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: response.stop_reason.as_deref().map(finish_reason),
        }],
        usage: response.usage.map(from_converse_usage),
        system_fingerprint: None,
    }
}

/// Convert one named Converse stream event
///
/// `messageStop` carries the finish reason; `metadata` follows it with usage
/// and ends the stream.
pub fn from_converse_stream_event(event: &RawEvent) -> ProviderResult<EventOutcome> {
    let outcome = match event.event.as_str() {
        "contentBlockStart" => {
            let start: ContentBlockStartEvent = decode(event)?;
            match start.start.and_then(|start| start.tool_use) {
                Some(tool_use) => EventOutcome::Chunk(StreamChunk::tool_call(ToolCallDelta {
                    index: start.content_block_index,
                    id: Some(tool_use.tool_use_id),
                    tool_type: Some("function".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some(tool_use.name),
                        arguments: None,
                    }),
                })),
                None => EventOutcome::Ignored,
            }
        }
        "contentBlockDelta" => {
            let delta: ContentBlockDeltaEvent = decode(event)?;
            match (delta.delta.text, delta.delta.tool_use) {
                (Some(text), _) => EventOutcome::Chunk(StreamChunk::text(text)),
                (None, Some(tool_use)) => {
                    EventOutcome::Chunk(StreamChunk::tool_call(ToolCallDelta {
                        index: delta.content_block_index,
                        id: None,
                        tool_type: None,
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some(tool_use.input),
                        }),
                    }))
                }
                (None, None) => EventOutcome::Ignored,
            }
        }
        "messageStop" => {
            let stop: MessageStopEvent = decode(event)?;
            EventOutcome::Chunk(StreamChunk::finished(finish_reason(&stop.stop_reason)))
        }
        "metadata" => {
            let metadata: MetadataEvent = decode(event)?;
            EventOutcome::Terminal(metadata.usage.map(|usage| StreamChunk {
                usage: Some(from_converse_usage(usage)),
                ..Default::default()
            }))
        }
        _ => EventOutcome::Ignored,
    };
    Ok(outcome)
}

fn decode<T: serde::de::DeserializeOwned>(event: &RawEvent) -> ProviderResult<T> {
    serde_json::from_value(event.json()?).map_err(|e| {
        ProviderError::server(format!("unexpected stream event '{}': {}", event.event, e))
    })
}
