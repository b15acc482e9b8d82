//! Conversion between the canonical protocol and the OpenAI dialect

use super::types::*;
use crate::protocol::{
    CompletionRequest, CompletionUsage, ContentPart, FinishReason, FunctionCall,
    FunctionCallDelta, Message, MessageContent, MessageDelta, MessageRole, ModelResponse,
    ResponseChoice, ResponseFormat, StreamChunk, ToolCall, ToolCallDelta, ToolChoice,
    ToolDefinition,
};
use crate::providers::adapter::unix_now;
use crate::providers::stream::EventOutcome;

/// Model families that take `max_completion_tokens` instead of `max_tokens`
const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

pub fn uses_max_completion_tokens(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    REASONING_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Convert a canonical request to OpenAI format
pub fn to_openai_request(
    request: &CompletionRequest,
    model: &str,
    stream: bool,
    stream_usage: bool,
) -> ChatRequest {
    let (max_tokens, max_completion_tokens) = if uses_max_completion_tokens(model) {
        (None, request.max_tokens)
    } else {
        (request.max_tokens, None)
    };

    ChatRequest {
        model: model.to_string(),
        messages: request.messages.iter().map(to_openai_message).collect(),
        temperature: request.temperature,
        max_tokens,
        max_completion_tokens,
        top_p: request.top_p,
        stop: request.stop.clone(),
        stream: stream.then_some(true),
        stream_options: (stream && stream_usage).then_some(ChatStreamOptions {
            include_usage: true,
        }),
        user: request.user.clone(),
        response_format: request.response_format.as_ref().map(to_openai_response_format),
        seed: request.seed,
        tools: request
            .tools
            .as_ref()
            .filter(|tools| !tools.is_empty())
            .map(|tools| tools.iter().map(to_openai_tool).collect()),
        tool_choice: request.tool_choice.as_ref().map(to_openai_tool_choice),
    }
}

/// Convert a canonical message to OpenAI format
fn to_openai_message(message: &Message) -> ChatMessage {
    let has_tool_calls = message
        .tool_calls
        .as_ref()
        .is_some_and(|calls| !calls.is_empty());

    // Assistant turns that only call tools carry no content
    let content = if has_tool_calls && message.content.is_empty() {
        None
    } else {
        Some(to_openai_content(&message.content))
    };

    ChatMessage {
        role: message.role.as_str().to_string(),
        content,
        name: message.name.clone(),
        tool_calls: message.tool_calls.as_ref().filter(|_| has_tool_calls).map(|calls| {
            calls
                .iter()
                .map(|call| ChatToolCall {
                    id: call.id.clone(),
                    tool_type: call.tool_type.clone(),
                    function: ChatFunctionCall {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
        refusal: None,
    }
}

fn to_openai_content(content: &MessageContent) -> ChatContent {
    match content {
        MessageContent::Text(text) => ChatContent::Text(text.clone()),
        MessageContent::Parts(parts) => ChatContent::Parts(
            parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(ChatContentPart::Text { text: text.clone() }),
                    ContentPart::Image {
                        url,
                        base64,
                        media_type,
                    } => {
                        let url = match (base64, url) {
                            (Some(data), _) => format!(
                                "data:{};base64,{}",
                                media_type.as_deref().unwrap_or("image/jpeg"),
                                data
                            ),
                            (None, Some(url)) => url.clone(),
                            (None, None) => return None,
                        };
                        Some(ChatContentPart::ImageUrl {
                            image_url: ChatImageUrl { url, detail: None },
                        })
                    }
                })
                .collect(),
        ),
    }
}

fn to_openai_response_format(format: &ResponseFormat) -> serde_json::Value {
    // The canonical shape is the OpenAI shape
    serde_json::to_value(format).unwrap_or_else(|_| serde_json::json!({"type": format.label()}))
}

fn to_openai_tool(tool: &ToolDefinition) -> ChatTool {
    ChatTool {
        tool_type: tool.tool_type.clone(),
        function: ChatFunction {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: Some(tool.parameters_or_empty()),
        },
    }
}

fn to_openai_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Mode(mode) => serde_json::json!(mode),
        ToolChoice::Function { function, .. } => serde_json::json!({
            "type": "function",
            "function": { "name": function.name }
        }),
    }
}

/// Convert an OpenAI response to canonical format
pub fn from_openai_response(response: ChatCompletion, provider: &str, model: &str) -> ModelResponse {
    ModelResponse {
        id: response.id,
        object: response
            .object
            .unwrap_or_else(|| "chat.completion".to_string()),
        created: response.created.unwrap_or_else(unix_now),
        model: response.model.unwrap_or_else(|| model.to_string()),
        provider: provider.to_string(),
        choices: response.choices.into_iter().map(from_openai_choice).collect(),
        usage: response.usage.map(from_openai_usage),
        system_fingerprint: response.system_fingerprint,
    }
}

fn from_openai_choice(choice: ChatChoice) -> ResponseChoice {
    ResponseChoice {
        index: choice.index,
        message: from_openai_message(choice.message),
        finish_reason: choice.finish_reason.map(FinishReason::from),
    }
}

fn from_openai_message(message: ChatMessage) -> Message {
    let content = match (message.content, message.refusal) {
        (Some(content), _) => from_openai_content(content),
        (None, Some(refusal)) => MessageContent::Text(refusal),
        (None, None) => MessageContent::Text(String::new()),
    };

    Message {
        role: MessageRole::from_wire(&message.role),
        content,
        name: message.name,
        tool_calls: message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    tool_type: call.tool_type,
                    function: FunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id,
    }
}

fn from_openai_content(content: ChatContent) -> MessageContent {
    match content {
        ChatContent::Text(text) => MessageContent::Text(text),
        ChatContent::Parts(parts) => MessageContent::Parts(
            parts
                .into_iter()
                .map(|part| match part {
                    ChatContentPart::Text { text } => ContentPart::Text { text },
                    ChatContentPart::ImageUrl { image_url } => from_image_url(image_url.url),
                })
                .collect(),
        ),
    }
}

/// Split `data:` URLs back into inline data
fn from_image_url(url: String) -> ContentPart {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ContentPart::Image {
                url: None,
                base64: Some(data.to_string()),
                media_type: Some(media_type.to_string()),
            };
        }
    }
    ContentPart::Image {
        url: Some(url),
        base64: None,
        media_type: None,
    }
}

fn from_openai_usage(usage: ChatUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Convert one OpenAI stream chunk to at most one canonical chunk
///
/// Only the first choice is streamed. A chunk with no choices but usage (the
/// `include_usage` trailer) becomes a usage-only chunk.
pub fn from_openai_stream_chunk(chunk: ChatCompletionChunk) -> EventOutcome {
    let usage = chunk
        .usage
        .or_else(|| chunk.x_groq.and_then(|extension| extension.usage))
        .map(from_openai_usage);

    let Some(choice) = chunk.choices.into_iter().next() else {
        return match usage {
            Some(usage) => EventOutcome::Chunk(StreamChunk {
                id: chunk.id,
                model: chunk.model,
                usage: Some(usage),
                ..Default::default()
            }),
            None => EventOutcome::Ignored,
        };
    };

    let delta = MessageDelta {
        role: choice.delta.role.as_deref().map(MessageRole::from_wire),
        content: choice.delta.content,
        tool_calls: choice.delta.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    tool_type: call.tool_type,
                    function: call.function.map(|f| FunctionCallDelta {
                        name: f.name,
                        arguments: f.arguments,
                    }),
                })
                .collect()
        }),
    };

    EventOutcome::Chunk(StreamChunk {
        id: chunk.id,
        model: chunk.model,
        index: choice.index,
        delta,
        finish_reason: choice.finish_reason.map(FinishReason::from),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reasoning_models_use_max_completion_tokens() {
        let request = CompletionRequest::new("o1-mini", vec![Message::user("hi")])
            .with_max_tokens(256);

        let wire = serde_json::to_value(to_openai_request(&request, "o1-mini", false, true)).unwrap();
        assert_eq!(wire["max_completion_tokens"], 256);
        assert!(wire.get("max_tokens").is_none());

        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", false, true)).unwrap();
        assert_eq!(wire["max_tokens"], 256);
    }

    #[test]
    fn test_stream_options_only_when_streaming_with_usage() {
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("hi")]);

        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", true, true)).unwrap();
        assert_eq!(wire["stream"], true);
        assert_eq!(wire["stream_options"]["include_usage"], true);

        let wire = serde_json::to_value(to_openai_request(&request, "llama3", true, false)).unwrap();
        assert!(wire.get("stream_options").is_none());

        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", false, true)).unwrap();
        assert!(wire.get("stream").is_none());
    }

    #[test]
    fn test_tool_only_assistant_turn_has_null_content() {
        let request = CompletionRequest::new(
            "gpt-4o",
            vec![
                Message::user("weather?"),
                Message::assistant_tool_calls(vec![ToolCall::function(
                    "call_1",
                    "get_weather",
                    r#"{"city":"Paris"}"#,
                )]),
                Message::tool("call_1", "sunny"),
            ],
        );
        let wire = serde_json::to_value(to_openai_request(&request, "gpt-4o", false, true)).unwrap();
        let messages = wire["messages"].as_array().unwrap();
        assert!(messages[1].get("content").is_none());
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "get_weather");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_inline_image_becomes_data_url() {
        let message = crate::protocol::MessageBuilder::with_parts(
            MessageRole::User,
            vec![
                ContentPart::Text { text: "what is this".into() },
                ContentPart::Image {
                    url: None,
                    base64: Some("aGVsbG8=".into()),
                    media_type: Some("image/png".into()),
                },
            ],
        )
        .build();
        let wire = serde_json::to_value(to_openai_message(&message)).unwrap();
        assert_eq!(
            wire["content"][1]["image_url"]["url"],
            "data:image/png;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_response_usage_is_copied_verbatim() {
        let response: ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 13}
        }))
        .unwrap();

        let response = from_openai_response(response, "openai", "gpt-4o-mini");
        assert_eq!(response.content(), Some("Hello!"));
        assert_eq!(response.qualified_model(), "openai/gpt-4o-mini-2024-07-18");
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
        // 9 + 3 != 13 on purpose: counts are never recomputed
        assert_eq!(response.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn test_usage_trailer_chunk() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c1",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }))
        .unwrap();
        match from_openai_stream_chunk(chunk) {
            EventOutcome::Chunk(chunk) => {
                assert!(chunk.finish_reason.is_none());
                assert_eq!(chunk.usage.unwrap().total_tokens, 7);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_tool_call_fragments_keep_index() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c1",
            "choices": [{
                "index": 0,
                "delta": {"tool_calls": [{"index": 1, "function": {"arguments": "{\"ci"}}]},
                "finish_reason": null
            }]
        }))
        .unwrap();
        let EventOutcome::Chunk(chunk) = from_openai_stream_chunk(chunk) else {
            panic!("expected a chunk");
        };
        let fragment = &chunk.delta.tool_calls.unwrap()[0];
        assert_eq!(fragment.index, 1);
        assert_eq!(
            fragment.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"ci")
        );
    }
}
