//! [`BedrockRuntime`] backed by the AWS SDK
//!
//! The SDK is async, but the adapter contract calls it blocking. This runtime
//! owns a small private tokio runtime and drives every SDK future to
//! completion on it with `block_on`, so its methods must not be called from
//! inside another runtime's worker thread.

use super::types::{ConverseContentBlock, ConverseRequest, ConverseToolChoice, ConverseToolResultContent};
use super::BedrockRuntime;
use crate::providers::error::WireFailure;
use crate::providers::stream::{RawEvent, RawEventIter};
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::types as bedrock;
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::{Blob, Document, Number};
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tracing::{debug, error};

/// Where and as whom to call Bedrock
#[derive(Debug, Clone, Default)]
pub struct BedrockSettings {
    pub region: String,

    /// Endpoint override, e.g. a VPC endpoint or a local mock
    pub endpoint_url: Option<String>,

    /// Static credentials; the default AWS chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// SDK-backed runtime with a lazily created client
pub struct SdkBedrockRuntime {
    settings: BedrockSettings,
    runtime: OnceLock<Runtime>,
    client: OnceLock<Client>,
}

impl SdkBedrockRuntime {
    pub fn new(settings: BedrockSettings) -> Self {
        Self {
            settings,
            runtime: OnceLock::new(),
            client: OnceLock::new(),
        }
    }

    fn runtime(&self) -> Result<&Runtime, WireFailure> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ullm-bedrock")
            .enable_all()
            .build()
            .map_err(|e| WireFailure::Transport {
                timed_out: false,
                response_started: false,
                message: format!("failed to start Bedrock runtime: {}", e),
            })?;
        Ok(self.runtime.get_or_init(|| runtime))
    }

    fn client(&self) -> Result<&Client, WireFailure> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let settings = &self.settings;
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                settings.session_token.clone(),
                None,
                "ullm-config",
            );
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let config = self.runtime()?.block_on(loader.load());
        debug!(region = %settings.region, "Created Bedrock client");
        Ok(self.client.get_or_init(|| Client::new(&config)))
    }
}

impl Drop for SdkBedrockRuntime {
    fn drop(&mut self) {
        // Dropping a runtime blocks; the owner may be inside async code
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl BedrockRuntime for SdkBedrockRuntime {
    fn converse(&self, model: &str, body: &Value, timeout: Duration) -> Result<Value, WireFailure> {
        let input = SdkInput::from_json(body)?;
        let client = self.client()?;

        let call = client
            .converse()
            .model_id(model)
            .set_messages(Some(input.messages))
            .set_system(input.system)
            .set_inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .set_additional_model_request_fields(input.additional_fields);

        let output = self
            .runtime()?
            .block_on(async { tokio::time::timeout(timeout, call.send()).await })
            .map_err(|_| timed_out(false))?
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                error!(model, "Bedrock converse failed: {}", DisplayErrorContext(&e));
                sdk_failure(&e, status, false)
            })?;

        Ok(output_to_json(&output))
    }

    fn converse_stream(
        &self,
        model: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<RawEventIter, WireFailure> {
        let input = SdkInput::from_json(body)?;
        let client = self.client()?;
        let runtime = self.runtime()?;
        let deadline = Instant::now() + timeout;

        let call = client
            .converse_stream()
            .model_id(model)
            .set_messages(Some(input.messages))
            .set_system(input.system)
            .set_inference_config(input.inference_config)
            .set_tool_config(input.tool_config)
            .set_additional_model_request_fields(input.additional_fields);

        let output = runtime
            .block_on(async { tokio::time::timeout_at(deadline, call.send()).await })
            .map_err(|_| timed_out(false))?
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                error!(model, "Bedrock converse_stream failed: {}", DisplayErrorContext(&e));
                sdk_failure(&e, status, false)
            })?;

        let handle = runtime.handle().clone();
        let mut receiver = output.stream;
        let mut done = false;
        let events = std::iter::from_fn(move || {
            while !done {
                let received = handle
                    .block_on(async { tokio::time::timeout_at(deadline, receiver.recv()).await });

                match received {
                    Err(_) => {
                        done = true;
                        return Some(Err(timed_out(true)));
                    }
                    Ok(Err(e)) => {
                        done = true;
                        return Some(Err(sdk_failure(&e, None, true)));
                    }
                    Ok(Ok(None)) => done = true,
                    Ok(Ok(Some(event))) => {
                        if let Some(raw) = stream_event_to_raw(&event) {
                            return Some(Ok(raw));
                        }
                    }
                }
            }
            None
        });
        Ok(Box::new(events))
    }
}

fn timed_out(response_started: bool) -> WireFailure {
    WireFailure::Transport {
        timed_out: true,
        response_started,
        message: "Bedrock call timed out".to_string(),
    }
}

/// SDK error to a raw failure; errors without a service response become
/// transport failures
fn sdk_failure<E, R>(err: &SdkError<E, R>, status: Option<u16>, started: bool) -> WireFailure
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::TimeoutError(_) => WireFailure::Transport {
            timed_out: true,
            response_started: started,
            message,
        },
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => WireFailure::Transport {
            timed_out: false,
            response_started: started || matches!(err, SdkError::ResponseError(_)),
            message,
        },
        _ => WireFailure::Sdk {
            code: err.code().map(str::to_string),
            status,
            message: err.message().map(str::to_string).unwrap_or(message),
        },
    }
}

fn invalid_input(message: impl Into<String>) -> WireFailure {
    WireFailure::Sdk {
        code: Some("ValidationException".to_string()),
        status: None,
        message: message.into(),
    }
}

/// Converse body converted to SDK types
struct SdkInput {
    messages: Vec<bedrock::Message>,
    system: Option<Vec<bedrock::SystemContentBlock>>,
    inference_config: Option<bedrock::InferenceConfiguration>,
    tool_config: Option<bedrock::ToolConfiguration>,
    additional_fields: Option<Document>,
}

impl SdkInput {
    fn from_json(body: &Value) -> Result<Self, WireFailure> {
        let request: ConverseRequest = serde_json::from_value(body.clone())
            .map_err(|e| invalid_input(format!("malformed Converse body: {}", e)))?;

        let messages = request
            .messages
            .into_iter()
            .map(|message| {
                let role = match message.role.as_str() {
                    "assistant" => bedrock::ConversationRole::Assistant,
                    _ => bedrock::ConversationRole::User,
                };
                let content = message
                    .content
                    .into_iter()
                    .map(content_block)
                    .collect::<Result<Vec<_>, _>>()?;
                bedrock::Message::builder()
                    .role(role)
                    .set_content(Some(content))
                    .build()
                    .map_err(|e| invalid_input(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let system = (!request.system.is_empty()).then(|| {
            request
                .system
                .into_iter()
                .map(|block| bedrock::SystemContentBlock::Text(block.text))
                .collect()
        });

        let inference_config = request.inference_config.map(|config| {
            bedrock::InferenceConfiguration::builder()
                .set_max_tokens(config.max_tokens.map(|n| n.min(i32::MAX as u32) as i32))
                .set_temperature(config.temperature)
                .set_top_p(config.top_p)
                .set_stop_sequences(config.stop_sequences)
                .build()
        });

        let tool_config = request.tool_config.map(tool_config).transpose()?;

        Ok(Self {
            messages,
            system,
            inference_config,
            tool_config,
            additional_fields: request
                .additional_model_request_fields
                .as_ref()
                .map(value_to_document),
        })
    }
}

fn content_block(block: ConverseContentBlock) -> Result<bedrock::ContentBlock, WireFailure> {
    let block = match block {
        ConverseContentBlock::Text(text) => bedrock::ContentBlock::Text(text),
        ConverseContentBlock::Image(image) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(image.source.bytes.as_bytes())
                .map_err(|e| invalid_input(format!("image data is not base64: {}", e)))?;
            bedrock::ContentBlock::Image(
                bedrock::ImageBlock::builder()
                    .format(bedrock::ImageFormat::from(image.format.as_str()))
                    .source(bedrock::ImageSource::Bytes(Blob::new(bytes)))
                    .build()
                    .map_err(|e| invalid_input(e.to_string()))?,
            )
        }
        ConverseContentBlock::ToolUse(tool_use) => bedrock::ContentBlock::ToolUse(
            bedrock::ToolUseBlock::builder()
                .tool_use_id(tool_use.tool_use_id)
                .name(tool_use.name)
                .input(value_to_document(&tool_use.input))
                .build()
                .map_err(|e| invalid_input(e.to_string()))?,
        ),
        ConverseContentBlock::ToolResult(result) => {
            let mut builder = bedrock::ToolResultBlock::builder().tool_use_id(result.tool_use_id);
            for ConverseToolResultContent::Text(text) in result.content {
                builder = builder.content(bedrock::ToolResultContentBlock::Text(text));
            }
            bedrock::ContentBlock::ToolResult(
                builder.build().map_err(|e| invalid_input(e.to_string()))?,
            )
        }
    };
    Ok(block)
}

fn tool_config(
    config: super::types::ConverseToolConfig,
) -> Result<bedrock::ToolConfiguration, WireFailure> {
    let mut builder = bedrock::ToolConfiguration::builder();

    for tool in config.tools {
        let spec = tool.tool_spec;
        let spec = bedrock::ToolSpecification::builder()
            .name(spec.name)
            .set_description(spec.description)
            .input_schema(bedrock::ToolInputSchema::Json(value_to_document(
                &spec.input_schema.json,
            )))
            .build()
            .map_err(|e| invalid_input(e.to_string()))?;
        builder = builder.tools(bedrock::Tool::ToolSpec(spec));
    }

    if let Some(choice) = config.tool_choice {
        let choice = match choice {
            ConverseToolChoice::Auto {} => {
                bedrock::ToolChoice::Auto(bedrock::AutoToolChoice::builder().build())
            }
            ConverseToolChoice::Any {} => {
                bedrock::ToolChoice::Any(bedrock::AnyToolChoice::builder().build())
            }
            ConverseToolChoice::Tool { name } => bedrock::ToolChoice::Tool(
                bedrock::SpecificToolChoice::builder()
                    .name(name)
                    .build()
                    .map_err(|e| invalid_input(e.to_string()))?,
            ),
        };
        builder = builder.tool_choice(choice);
    }

    builder.build().map_err(|e| invalid_input(e.to_string()))
}

/// SDK output in the Converse REST response shape
fn output_to_json(output: &aws_sdk_bedrockruntime::operation::converse::ConverseOutput) -> Value {
    let content: Vec<Value> = match output.output() {
        Some(bedrock::ConverseOutput::Message(message)) => message
            .content()
            .iter()
            .filter_map(|block| match block {
                bedrock::ContentBlock::Text(text) => Some(json!({ "text": text })),
                bedrock::ContentBlock::ToolUse(tool_use) => Some(json!({
                    "toolUse": {
                        "toolUseId": tool_use.tool_use_id(),
                        "name": tool_use.name(),
                        "input": document_to_value(tool_use.input()),
                    }
                })),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut body = json!({
        "output": { "message": { "role": "assistant", "content": content } },
        "stopReason": output.stop_reason().as_str(),
    });
    if let Some(usage) = output.usage() {
        body["usage"] = usage_to_json(usage);
    }
    body
}

fn usage_to_json(usage: &bedrock::TokenUsage) -> Value {
    json!({
        "inputTokens": usage.input_tokens().max(0),
        "outputTokens": usage.output_tokens().max(0),
        "totalTokens": usage.total_tokens().max(0),
    })
}

/// SDK stream event to a named raw event; `None` for events with no JSON form
fn stream_event_to_raw(event: &bedrock::ConverseStreamOutput) -> Option<RawEvent> {
    let (name, data) = match event {
        bedrock::ConverseStreamOutput::MessageStart(start) => {
            ("messageStart", json!({ "role": start.role().as_str() }))
        }
        bedrock::ConverseStreamOutput::ContentBlockStart(start) => {
            let payload = match start.start() {
                Some(bedrock::ContentBlockStart::ToolUse(tool_use)) => json!({
                    "toolUse": { "toolUseId": tool_use.tool_use_id(), "name": tool_use.name() }
                }),
                _ => json!({}),
            };
            (
                "contentBlockStart",
                json!({ "contentBlockIndex": start.content_block_index(), "start": payload }),
            )
        }
        bedrock::ConverseStreamOutput::ContentBlockDelta(delta) => {
            let payload = match delta.delta() {
                Some(bedrock::ContentBlockDelta::Text(text)) => json!({ "text": text }),
                Some(bedrock::ContentBlockDelta::ToolUse(tool_use)) => {
                    json!({ "toolUse": { "input": tool_use.input() } })
                }
                _ => json!({}),
            };
            (
                "contentBlockDelta",
                json!({ "contentBlockIndex": delta.content_block_index(), "delta": payload }),
            )
        }
        bedrock::ConverseStreamOutput::ContentBlockStop(stop) => (
            "contentBlockStop",
            json!({ "contentBlockIndex": stop.content_block_index() }),
        ),
        bedrock::ConverseStreamOutput::MessageStop(stop) => (
            "messageStop",
            json!({ "stopReason": stop.stop_reason().as_str() }),
        ),
        bedrock::ConverseStreamOutput::Metadata(metadata) => {
            let mut payload = json!({});
            if let Some(usage) = metadata.usage() {
                payload["usage"] = usage_to_json(usage);
            }
            ("metadata", payload)
        }
        _ => return None,
    };
    Some(RawEvent::new(name, data.to_string()))
}

/// Convert a `serde_json::Value` to an AWS `Document`
pub(crate) fn value_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                n.as_f64()
                    .map_or(Document::Null, |f| Document::Number(Number::Float(f)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(value_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_document(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

/// Convert an AWS `Document` to a `serde_json::Value`
pub(crate) fn document_to_value(doc: &Document) -> Value {
    match doc {
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_value(v)))
                .collect(),
        ),
        Document::Array(items) => Value::Array(items.iter().map(document_to_value).collect()),
        Document::Number(Number::PosInt(u)) => Value::from(*u),
        Document::Number(Number::NegInt(i)) => Value::from(*i),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
            .map_or(Value::Null, Value::Number),
        Document::String(s) => Value::String(s.clone()),
        Document::Bool(b) => Value::Bool(*b),
        Document::Null => Value::Null,
    }
}
