//! Tests for the canonical protocol types

use serde_json::json;
use ullm_core::protocol::*;

#[test]
fn test_message_construction() {
    let sys_msg = Message::system("You are a helpful assistant");
    assert_eq!(sys_msg.role, MessageRole::System);
    assert_eq!(sys_msg.content.as_text(), Some("You are a helpful assistant"));

    let user_msg = Message::user("Hello!");
    assert_eq!(user_msg.role, MessageRole::User);

    let tool_msg = Message::tool("call_123", "Tool result");
    assert_eq!(tool_msg.role, MessageRole::Tool);
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_123"));

    let call = ToolCall::function("call_1", "get_weather", r#"{"city":"Paris"}"#);
    let asst = Message::assistant_tool_calls(vec![call.clone()]);
    assert_eq!(asst.role, MessageRole::Assistant);
    assert_eq!(asst.tool_calls, Some(vec![call]));
}

#[test]
fn test_message_builder() {
    let msg = MessageBuilder::with_parts(
        MessageRole::User,
        vec![
            ContentPart::Text {
                text: "What's in this image?".to_string(),
            },
            ContentPart::Image {
                url: Some("https://example.com/cat.png".to_string()),
                base64: None,
                media_type: None,
            },
        ],
    )
    .with_name("alice")
    .build();

    assert_eq!(msg.name.as_deref(), Some("alice"));
    assert_eq!(msg.text(), "What's in this image?");
    assert!(msg.content.as_text().is_none());
}

#[test]
fn test_request_builder_keeps_message_order() {
    let request = CompletionRequest::new(
        "openai/gpt-4o",
        vec![
            Message::system("be brief"),
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ],
    )
    .with_temperature(0.2)
    .with_max_tokens(64)
    .with_stop_sequence("END")
    .with_tool_choice(ToolChoice::required())
    .with_param("seed_hint", json!(7));

    let texts: Vec<String> = request.messages.iter().map(Message::text).collect();
    assert_eq!(texts, vec!["be brief", "one", "two", "three"]);
    assert_eq!(request.stop, Some(vec!["END".to_string()]));
    assert_eq!(request.metadata.get("seed_hint"), Some(&json!(7)));
}

#[test]
fn test_finish_reason_wire_strings() {
    let reasons: Vec<FinishReason> =
        serde_json::from_value(json!(["stop", "length", "tool_calls", "content_filter", "eos"]))
            .unwrap();
    assert_eq!(
        reasons,
        vec![
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ToolCalls,
            FinishReason::ContentFilter,
            FinishReason::Other("eos".to_string()),
        ]
    );
    assert_eq!(serde_json::to_value(FinishReason::ToolCalls).unwrap(), json!("tool_calls"));
}

#[test]
fn test_response_format_serialization() {
    let format = ResponseFormat::json_schema("person", json!({"type": "object"}));
    let value = serde_json::to_value(&format).unwrap();
    assert_eq!(value["type"], "json_schema");
    assert_eq!(value["json_schema"]["name"], "person");
    assert_eq!(value["json_schema"]["strict"], true);

    let loose: ResponseFormat = serde_json::from_value(json!({"type": "json_object"})).unwrap();
    assert_eq!(loose, ResponseFormat::JsonObject);
}

#[test]
fn test_tool_choice_shapes() {
    assert_eq!(serde_json::to_value(ToolChoice::auto()).unwrap(), json!("auto"));
    assert_eq!(
        serde_json::to_value(ToolChoice::function("lookup")).unwrap(),
        json!({"type": "function", "function": {"name": "lookup"}})
    );
}

#[test]
fn test_responses_input_flattens_blocks() {
    let input: Vec<ResponseInputItem> = serde_json::from_value(json!([
        {"role": "system", "content": "be terse"},
        {"role": "user", "content": [
            {"type": "input_text", "text": "Hello"},
            {"type": "input_text", "text": "there"}
        ]},
        {"content": [{"text": "defaulted"}]}
    ]))
    .unwrap();

    let request = CompletionRequest::from_input("gpt-4o", input);
    assert_eq!(request.messages.len(), 3);
    assert_eq!(request.messages[0].role, MessageRole::System);
    assert_eq!(request.messages[1].text(), "Hello there");
    assert_eq!(request.messages[2].role, MessageRole::User);
}

#[test]
fn test_stream_chunk_helpers() {
    assert!(!StreamChunk::text("hi").is_terminal());
    assert!(StreamChunk::finished(FinishReason::Stop).is_terminal());
}
