//! Anthropic Messages API client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    call_arguments, http_client, is_event_stream, model_name, send, split_data_url,
    AssistantMessage, Choice, CompletionRequest, LanguageModel, ModelResponse, Provider,
};
use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use crate::message::{ContentPart, Message, MessageContent, Role, ToolCall};

const API_VERSION: &str = "2023-06-01";
/// Anthropic requires an explicit cap; a `max_tokens` parameter overrides it.
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(&config)?,
            base_url: config.base_url_or(Provider::Anthropic.default_base_url()),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_payload(&self, request: &CompletionRequest) -> Result<Value> {
        let mut system = Vec::new();
        let mut turns: Vec<Turn> = Vec::new();
        for message in &request.messages {
            let (role, blocks) = match message.role {
                Role::System => {
                    if let Some(content) = &message.content {
                        system.push(content.to_text());
                    }
                    continue;
                }
                Role::User => ("user", content_blocks(message.content.as_ref())),
                Role::Assistant => ("assistant", assistant_blocks(message)?),
                Role::Tool => ("user", vec![tool_result_block(message)?]),
            };
            match turns.last_mut() {
                Some(last) if last.role == role => last.blocks.extend(blocks),
                _ => turns.push(Turn { role, blocks }),
            }
        }
        if let Some(format) = &request.response_format {
            system.push(format!(
                "Respond only with a JSON document named {} that conforms to this JSON schema:\n{}",
                format.name, format.schema
            ));
        }

        let mut payload = Map::new();
        payload.insert("model".into(), json!(model_name(&request.model)));
        payload.insert("max_tokens".into(), json!(DEFAULT_MAX_TOKENS));
        if !system.is_empty() {
            payload.insert("system".into(), json!(system.join("\n\n")));
        }
        payload.insert(
            "messages".into(),
            Value::Array(
                turns
                    .into_iter()
                    .map(|turn| json!({"role": turn.role, "content": turn.blocks}))
                    .collect(),
            ),
        );
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(|tool| {
                    let mut wire = Map::new();
                    wire.insert("name".into(), json!(tool.name));
                    if let Some(description) = &tool.description {
                        wire.insert("description".into(), json!(description));
                    }
                    wire.insert("input_schema".into(), tool.parameters.clone());
                    Value::Object(wire)
                })
                .collect();
            payload.insert("tools".into(), Value::Array(tools));
        }
        for (key, value) in &request.parameters {
            payload.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(payload))
    }
}

/// Consecutive messages with the same role share one turn.
struct Turn {
    role: &'static str,
    blocks: Vec<Value>,
}

fn content_blocks(content: Option<&MessageContent>) -> Vec<Value> {
    match content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![json!({"type": "text", "text": text})],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"type": "text", "text": text}),
                ContentPart::ImageUrl { image_url } => match split_data_url(&image_url.url) {
                    Some((media_type, data)) => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }),
                    None => json!({
                        "type": "image",
                        "source": {"type": "url", "url": image_url.url},
                    }),
                },
            })
            .collect(),
    }
}

fn assistant_blocks(message: &Message) -> Result<Vec<Value>> {
    let mut blocks = content_blocks(message.content.as_ref());
    for call in &message.tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call_arguments(call)?,
        }));
    }
    Ok(blocks)
}

fn tool_result_block(message: &Message) -> Result<Value> {
    let id = message
        .tool_call_id
        .as_deref()
        .ok_or_else(|| AgentError::Protocol("tool result without a tool call id".into()))?;
    Ok(json!({
        "type": "tool_result",
        "tool_use_id": id,
        "content": content_blocks(message.content.as_ref()),
    }))
}

fn parse_response(body: AnthropicResponse) -> ModelResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in body.content {
        match block {
            AnthropicBlock::Text { text: chunk } => text.push_str(&chunk),
            AnthropicBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            AnthropicBlock::Other => {}
        }
    }
    ModelResponse::Complete {
        choices: vec![Choice::Message(AssistantMessage {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
        })],
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
        let payload = self.build_payload(request)?;

        let mut builder = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", API_VERSION)
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        let resp = send(Provider::Anthropic, builder).await?;
        if is_event_stream(&resp) {
            return Ok(ModelResponse::Stream);
        }

        let body: AnthropicResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("anthropic response parse error: {err}"))
        })?;
        Ok(parse_response(body))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default = "empty_input")]
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn empty_input() -> Value {
    json!({})
}
