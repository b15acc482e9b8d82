//! Conversion between the canonical protocol and the Anthropic Messages API

use super::types::*;
use crate::protocol::{
    CompletionRequest, CompletionUsage, ContentPart, FinishReason, FunctionCall,
    FunctionCallDelta, Message, MessageContent, MessageRole, ModelResponse, ResponseChoice,
    StreamChunk, ToolCall, ToolCallDelta, ToolChoice, ToolDefinition,
};
use crate::providers::adapter::unix_now;
use crate::providers::error::{kind_from_error_type, ProviderError, ProviderResult};
use crate::providers::stream::{EventOutcome, StreamStart};

/// Sent when the caller leaves `max_tokens` unset; the API requires one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert a canonical request to Anthropic format
///
/// Fails only on input the API cannot represent, such as tool-call
/// arguments that are not JSON.
pub fn to_anthropic_request(
    request: &CompletionRequest,
    model: &str,
    stream: bool,
) -> ProviderResult<AnthropicRequest> {
    let mut system = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in &request.messages {
        match message.role {
            MessageRole::System => system.push(message.text()),
            MessageRole::Tool => push_tool_result(&mut messages, message),
            MessageRole::User => messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: to_anthropic_content(&message.content),
            }),
            MessageRole::Assistant => messages.push(to_assistant_message(message)?),
        }
    }

    let tool_choice = request
        .tool_choice
        .as_ref()
        .map(to_anthropic_tool_choice)
        .transpose()?;

    Ok(AnthropicRequest {
        model: model.to_string(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        stream: stream.then_some(true),
        tools: request
            .tools
            .as_ref()
            .filter(|tools| !tools.is_empty())
            .map(|tools| tools.iter().map(to_anthropic_tool).collect()),
        tool_choice,
        metadata: request.user.clone().map(|user_id| AnthropicMetadata { user_id }),
    })
}

/// Tool results travel as user turns; consecutive ones share a turn
fn push_tool_result(messages: &mut Vec<AnthropicMessage>, message: &Message) {
    let block = AnthropicContentBlock::ToolResult {
        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
        content: message.text(),
    };

    if let Some(AnthropicMessage {
        role,
        content: AnthropicContent::Blocks(blocks),
    }) = messages.last_mut()
    {
        if role.as_str() == "user" && blocks.iter().all(AnthropicContentBlock::is_tool_result) {
            blocks.push(block);
            return;
        }
    }

    messages.push(AnthropicMessage {
        role: "user".to_string(),
        content: AnthropicContent::Blocks(vec![block]),
    });
}

fn to_assistant_message(message: &Message) -> ProviderResult<AnthropicMessage> {
    let calls = message.tool_calls.as_deref().unwrap_or_default();
    if calls.is_empty() {
        return Ok(AnthropicMessage {
            role: "assistant".to_string(),
            content: to_anthropic_content(&message.content),
        });
    }

    let mut blocks = Vec::with_capacity(calls.len() + 1);
    let text = message.text();
    if !text.is_empty() {
        blocks.push(AnthropicContentBlock::Text { text });
    }
    for call in calls {
        blocks.push(AnthropicContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_arguments(call)?,
        });
    }

    Ok(AnthropicMessage {
        role: "assistant".to_string(),
        content: AnthropicContent::Blocks(blocks),
    })
}

fn parse_arguments(call: &ToolCall) -> ProviderResult<serde_json::Value> {
    let arguments = call.function.arguments.trim();
    if arguments.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| {
        ProviderError::bad_request(format!(
            "tool call '{}' has arguments that are not valid JSON: {}",
            call.id, e
        ))
    })
}

fn to_anthropic_content(content: &MessageContent) -> AnthropicContent {
    match content {
        MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
        MessageContent::Parts(parts) => AnthropicContent::Blocks(
            parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => {
                        Some(AnthropicContentBlock::Text { text: text.clone() })
                    }
                    ContentPart::Image {
                        url,
                        base64,
                        media_type,
                    } => {
                        let source = match (base64, url) {
                            (Some(data), _) => AnthropicImageSource::Base64 {
                                media_type: media_type
                                    .clone()
                                    .unwrap_or_else(|| "image/jpeg".to_string()),
                                data: data.clone(),
                            },
                            (None, Some(url)) => AnthropicImageSource::Url { url: url.clone() },
                            (None, None) => return None,
                        };
                        Some(AnthropicContentBlock::Image { source })
                    }
                })
                .collect(),
        ),
    }
}

fn to_anthropic_tool(tool: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema: tool.parameters_or_empty(),
    }
}

fn to_anthropic_tool_choice(choice: &ToolChoice) -> ProviderResult<AnthropicToolChoice> {
    let choice_type = match choice {
        ToolChoice::Function { function, .. } => {
            return Ok(AnthropicToolChoice {
                choice_type: "tool".to_string(),
                name: Some(function.name.clone()),
            });
        }
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => "auto",
            "required" | "any" => "any",
            "none" => "none",
            other => {
                return Err(ProviderError::bad_request(format!(
                    "unknown tool_choice mode '{}'",
                    other
                )));
            }
        },
    };
    Ok(AnthropicToolChoice {
        choice_type: choice_type.to_string(),
        name: None,
    })
}

/// Anthropic stop reason to the canonical finish reason
pub fn finish_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn from_anthropic_usage(usage: AnthropicUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}

/// Convert an Anthropic response to canonical format
pub fn from_anthropic_response(
    response: AnthropicResponse,
    provider: &str,
    model: &str,
) -> ModelResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            AnthropicResponseBlock::Text { text: fragment } => text.push_str(&fragment),
            AnthropicResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            AnthropicResponseBlock::Other => {}
        }
    }

    let message = Message {
        role: MessageRole::Assistant,
        content: MessageContent::Text(text),
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    };

    ModelResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: response.model.unwrap_or_else(|| model.to_string()),
        provider: provider.to_string(),
        choices: vec![ResponseChoice {
            index: 0,
            message,
            finish_reason: response.stop_reason.as_deref().map(finish_reason),
        }],
        usage: response.usage.map(from_anthropic_usage),
        system_fingerprint: None,
    }
}

/// Convert one decoded stream event to at most one canonical chunk
pub fn from_anthropic_stream_event(event: AnthropicStreamEvent) -> ProviderResult<EventOutcome> {
    let outcome = match event {
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: AnthropicStreamContentBlock::ToolUse { id, name },
        } => EventOutcome::Chunk(StreamChunk::tool_call(ToolCallDelta {
            index,
            id: Some(id),
            tool_type: Some("function".to_string()),
            function: Some(FunctionCallDelta {
                name: Some(name),
                arguments: None,
            }),
        })),
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
            AnthropicStreamDelta::TextDelta { text } => EventOutcome::Chunk(StreamChunk::text(text)),
            AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                EventOutcome::Chunk(StreamChunk::tool_call(ToolCallDelta {
                    index,
                    id: None,
                    tool_type: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some(partial_json),
                    }),
                }))
            }
            AnthropicStreamDelta::Other => EventOutcome::Ignored,
        },
        AnthropicStreamEvent::MessageDelta { delta, usage } => match delta.stop_reason {
            Some(reason) => EventOutcome::Chunk(StreamChunk {
                finish_reason: Some(finish_reason(&reason)),
                usage: usage.map(from_anthropic_usage),
                ..Default::default()
            }),
            None => EventOutcome::Ignored,
        },
        AnthropicStreamEvent::MessageStop => EventOutcome::Terminal(None),
        AnthropicStreamEvent::Error { error } => {
            return Err(ProviderError::new(
                kind_from_error_type(&error.error_type),
                error.message,
            ));
        }
        AnthropicStreamEvent::MessageStart { message } => EventOutcome::Started(StreamStart {
            id: message.id,
            model: message.model,
            prompt_tokens: message.usage.map(|usage| usage.input_tokens),
        }),
        AnthropicStreamEvent::ContentBlockStart { .. }
        | AnthropicStreamEvent::ContentBlockStop { .. }
        | AnthropicStreamEvent::Ping
        | AnthropicStreamEvent::Unknown => EventOutcome::Ignored,
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ErrorKind;
    use serde_json::json;

    fn wire(request: &CompletionRequest) -> serde_json::Value {
        serde_json::to_value(to_anthropic_request(request, "claude-3-5-sonnet", false).unwrap())
            .unwrap()
    }

    #[test]
    fn test_system_messages_move_to_top_level() {
        let request = CompletionRequest::new(
            "claude-3-5-sonnet",
            vec![
                Message::system("Be brief."),
                Message::system("Answer in French."),
                Message::user("Hi"),
            ],
        );
        let wire = wire(&request);
        assert_eq!(wire["system"], "Be brief.\n\nAnswer in French.");
        assert_eq!(wire["messages"].as_array().unwrap().len(), 1);
        assert_eq!(wire["messages"][0]["role"], "user");
        assert_eq!(wire["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_consecutive_tool_results_share_a_turn() {
        let request = CompletionRequest::new(
            "claude-3-5-sonnet",
            vec![
                Message::user("weather in Paris and Rome?"),
                Message::assistant_tool_calls(vec![
                    ToolCall::function("toolu_1", "get_weather", r#"{"city":"Paris"}"#),
                    ToolCall::function("toolu_2", "get_weather", r#"{"city":"Rome"}"#),
                ]),
                Message::tool("toolu_1", "sunny"),
                Message::tool("toolu_2", "rainy"),
            ],
        );
        let wire = wire(&request);
        let messages = wire["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["city"], "Rome");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "toolu_2");
    }

    #[test]
    fn test_invalid_tool_arguments_are_rejected() {
        let request = CompletionRequest::new(
            "claude-3-5-sonnet",
            vec![Message::assistant_tool_calls(vec![ToolCall::function(
                "toolu_1", "f", "{not json",
            )])],
        );
        let err = to_anthropic_request(&request, "claude-3-5-sonnet", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_tool_choice_vocabulary() {
        let cases = [
            (ToolChoice::auto(), json!({"type": "auto"})),
            (ToolChoice::required(), json!({"type": "any"})),
            (ToolChoice::none(), json!({"type": "none"})),
            (
                ToolChoice::function("get_weather"),
                json!({"type": "tool", "name": "get_weather"}),
            ),
        ];
        for (choice, expected) in cases {
            let request = CompletionRequest::new("c", vec![Message::user("hi")])
                .with_tool_choice(choice);
            assert_eq!(wire(&request)["tool_choice"], expected);
        }
    }

    #[test]
    fn test_stop_reasons() {
        assert_eq!(finish_reason("end_turn"), FinishReason::Stop);
        assert_eq!(finish_reason("stop_sequence"), FinishReason::Stop);
        assert_eq!(finish_reason("max_tokens"), FinishReason::Length);
        assert_eq!(finish_reason("tool_use"), FinishReason::ToolCalls);
        assert_eq!(finish_reason("refusal"), FinishReason::ContentFilter);
        assert_eq!(
            finish_reason("pause_turn"),
            FinishReason::Other("pause_turn".to_string())
        );
    }

    #[test]
    fn test_response_with_text_and_tool_use() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 8}
        }))
        .unwrap();

        let response = from_anthropic_response(response, "anthropic", "claude-3-5-sonnet");
        assert_eq!(response.content(), Some("Checking."));
        assert_eq!(response.tool_calls()[0].function.arguments, r#"{"city":"Paris"}"#);
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.usage.unwrap().total_tokens, 28);
    }

    #[test]
    fn test_error_event_is_classified() {
        let event: AnthropicStreamEvent = serde_json::from_value(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }))
        .unwrap();
        let err = from_anthropic_stream_event(event).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "Overloaded");
    }

    #[test]
    fn test_message_start_reports_id_model_and_input_tokens() {
        let event: AnthropicStreamEvent = serde_json::from_value(json!({
            "type": "message_start",
            "message": {
                "id": "msg_7",
                "type": "message",
                "role": "assistant",
                "model": "claude-3-5-haiku-20241022",
                "content": [],
                "usage": {"input_tokens": 25, "output_tokens": 1}
            }
        }))
        .unwrap();
        assert_eq!(
            from_anthropic_stream_event(event).unwrap(),
            EventOutcome::Started(StreamStart {
                id: Some("msg_7".to_string()),
                model: Some("claude-3-5-haiku-20241022".to_string()),
                prompt_tokens: Some(25),
            })
        );
    }
}
