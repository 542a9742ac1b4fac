use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    http_client, is_event_stream, model_name, send, synthesized_call_id, AssistantMessage, Choice,
    CompletionRequest, LanguageModel, ModelResponse, Provider,
};
use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use crate::message::{Message, MessageContent, Role, ToolCall};

/// Chat Completions client, shared by every provider that speaks the OpenAI
/// wire format.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    provider: Provider,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::for_provider(Provider::OpenAi, config)
    }

    pub fn for_provider(provider: Provider, config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(&config)?,
            provider,
            base_url: config.base_url_or(provider.default_base_url()),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        let mut payload = Map::new();
        payload.insert("model".into(), json!(model_name(&request.model)));
        payload.insert(
            "messages".into(),
            Value::Array(request.messages.iter().map(wire_message).collect()),
        );
        if !request.tools.is_empty() {
            payload.insert(
                "tools".into(),
                Value::Array(
                    request
                        .tools
                        .iter()
                        .map(|tool| {
                            json!({
                                "type": "function",
                                "function": {
                                    "name": tool.name,
                                    "description": tool.description,
                                    "parameters": tool.parameters,
                                },
                            })
                        })
                        .collect(),
                ),
            );
        }
        if let Some(format) = &request.response_format {
            payload.insert(
                "response_format".into(),
                json!({
                    "type": "json_schema",
                    "json_schema": {"name": format.name, "schema": format.schema},
                }),
            );
        }
        for (key, value) in &request.parameters {
            payload.insert(key.clone(), value.clone());
        }
        Value::Object(payload)
    }
}

fn wire_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let content = match &message.content {
        Some(MessageContent::Text(text)) => json!(text),
        Some(MessageContent::Parts(parts)) => json!(parts),
        None => Value::Null,
    };

    let mut wire = Map::new();
    wire.insert("role".into(), json!(role));
    wire.insert("content".into(), content);
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        wire.insert("tool_calls".into(), Value::Array(calls));
    }
    if let Some(id) = &message.tool_call_id {
        wire.insert("tool_call_id".into(), json!(id));
    }
    if let Some(name) = &message.name {
        wire.insert("name".into(), json!(name));
    }
    Value::Object(wire)
}

fn parse_response(body: OpenAiResponse) -> ModelResponse {
    let choices = body
        .choices
        .into_iter()
        .map(|choice| match choice.message {
            Some(message) => Choice::Message(AssistantMessage {
                content: message.content,
                tool_calls: message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id.unwrap_or_else(synthesized_call_id),
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect(),
            }),
            None => Choice::Delta,
        })
        .collect();
    ModelResponse::Complete { choices }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
        let payload = self.build_payload(request);

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = send(self.provider, builder).await?;
        if is_event_stream(&resp) {
            return Ok(ModelResponse::Stream);
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!(
                "{} response parse error: {err}",
                self.provider.prefix()
            ))
        })?;
        Ok(parse_response(body))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}
