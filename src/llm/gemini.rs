//! Gemini `generateContent` client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    call_arguments, http_client, is_event_stream, model_name, send, split_data_url,
    synthesized_call_id, AssistantMessage, Choice, CompletionRequest, LanguageModel,
    ModelResponse, Provider,
};
use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use crate::message::{ContentPart, Message, MessageContent, Role, ToolCall};

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(&config)?,
            base_url: config.base_url_or(Provider::Gemini.default_base_url()),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_payload(&self, request: &CompletionRequest) -> Result<Value> {
        let mut system = Vec::new();
        let mut contents: Vec<Content> = Vec::new();
        for message in &request.messages {
            let (role, parts) = match message.role {
                Role::System => {
                    if let Some(content) = &message.content {
                        system.push(json!({"text": content.to_text()}));
                    }
                    continue;
                }
                Role::User => ("user", content_parts(message.content.as_ref())),
                Role::Assistant => ("model", model_parts(message)?),
                Role::Tool => ("user", vec![function_response(message)?]),
            };
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.extend(parts),
                _ => contents.push(Content { role, parts }),
            }
        }

        let mut payload = Map::new();
        if !system.is_empty() {
            payload.insert("systemInstruction".into(), json!({"parts": system}));
        }
        payload.insert(
            "contents".into(),
            Value::Array(
                contents
                    .into_iter()
                    .map(|content| json!({"role": content.role, "parts": content.parts}))
                    .collect(),
            ),
        );
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    let mut wire = Map::new();
                    wire.insert("name".into(), json!(tool.name));
                    if let Some(description) = &tool.description {
                        wire.insert("description".into(), json!(description));
                    }
                    wire.insert("parameters".into(), tool.parameters.clone());
                    Value::Object(wire)
                })
                .collect();
            payload.insert(
                "tools".into(),
                json!([{"functionDeclarations": declarations}]),
            );
        }

        // Free-form parameters are generation settings on this API.
        let mut generation = request.parameters.clone();
        if let Some(format) = &request.response_format {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert("responseJsonSchema".into(), format.schema.clone());
        }
        if !generation.is_empty() {
            payload.insert("generationConfig".into(), Value::Object(generation));
        }
        Ok(Value::Object(payload))
    }
}

struct Content {
    role: &'static str,
    parts: Vec<Value>,
}

fn content_parts(content: Option<&MessageContent>) -> Vec<Value> {
    match content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![json!({"text": text})],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"text": text}),
                ContentPart::ImageUrl { image_url } => match split_data_url(&image_url.url) {
                    Some((mime_type, data)) => {
                        json!({"inlineData": {"mimeType": mime_type, "data": data}})
                    }
                    None => json!({"fileData": {"fileUri": image_url.url}}),
                },
            })
            .collect(),
    }
}

fn model_parts(message: &Message) -> Result<Vec<Value>> {
    let mut parts = content_parts(message.content.as_ref());
    for call in &message.tool_calls {
        parts.push(json!({
            "functionCall": {"name": call.name, "args": call_arguments(call)?},
        }));
    }
    Ok(parts)
}

fn function_response(message: &Message) -> Result<Value> {
    let name = message
        .name
        .as_deref()
        .ok_or_else(|| AgentError::Protocol("tool result without a tool name".into()))?;
    let content = message
        .content
        .as_ref()
        .map(MessageContent::to_text)
        .unwrap_or_default();
    Ok(json!({
        "functionResponse": {"name": name, "response": {"content": content}},
    }))
}

fn parse_response(body: GeminiResponse) -> ModelResponse {
    let choices = body
        .candidates
        .into_iter()
        .map(|candidate| {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                if let Some(chunk) = part.text {
                    text.push_str(&chunk);
                }
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolCall::new(
                        call.id.unwrap_or_else(synthesized_call_id),
                        call.name,
                        call.args.to_string(),
                    ));
                }
            }
            Choice::Message(AssistantMessage {
                content: (!text.is_empty()).then_some(text),
                tool_calls,
            })
        })
        .collect();
    ModelResponse::Complete { choices }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
        let payload = self.build_payload(request)?;

        let mut builder = self
            .http
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url,
                model_name(&request.model)
            ))
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }
        let resp = send(Provider::Gemini, builder).await?;
        if is_event_stream(&resp) {
            return Ok(ModelResponse::Stream);
        }

        let body: GeminiResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("gemini response parse error: {err}"))
        })?;
        Ok(parse_response(body))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default = "empty_args")]
    args: Value,
}

fn empty_args() -> Value {
    json!({})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ResponseFormat;
    use crate::tool::ToolDefinition;

    fn client() -> GeminiClient {
        GeminiClient::new(ProviderConfig::default()).unwrap()
    }

    #[test]
    fn conversation_maps_to_contents_and_function_parts() {
        let mut parameters = Map::new();
        parameters.insert("temperature".into(), json!(0.2));
        let request = CompletionRequest {
            model: "gemini/gemini-pro".into(),
            messages: vec![
                Message::system("be brief"),
                Message::user("weather in Oslo?"),
                Message::tool_calls(
                    None,
                    vec![ToolCall::new("c1", "forecast", r#"{"city":"Oslo"}"#)],
                ),
                Message::tool("c1", "forecast", MessageContent::Text("rain".into())),
            ],
            tools: vec![ToolDefinition::new(
                "forecast",
                Some("Weather forecast".into()),
                json!({"type": "object"}),
            )],
            response_format: Some(ResponseFormat {
                name: "Answer".into(),
                schema: json!({"type": "object", "required": ["summary"]}),
            }),
            parameters,
        };

        let payload = client().build_payload(&request).unwrap();
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be brief");

        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["parts"][0]["text"], "weather in Oslo?");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            contents[1]["parts"][0]["functionCall"],
            json!({"name": "forecast", "args": {"city": "Oslo"}})
        );
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"],
            json!({"name": "forecast", "response": {"content": "rain"}})
        );

        let declaration = &payload["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "forecast");
        assert_eq!(declaration["description"], "Weather forecast");

        let generation = &payload["generationConfig"];
        assert_eq!(generation["temperature"], json!(0.2));
        assert_eq!(generation["responseMimeType"], "application/json");
        assert_eq!(generation["responseJsonSchema"]["required"][0], "summary");
    }

    #[test]
    fn plain_request_has_no_generation_config() {
        let request = CompletionRequest {
            model: "gemini/gemini-1.5-flash".into(),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            response_format: None,
            parameters: Map::new(),
        };
        let payload = client().build_payload(&request).unwrap();
        assert!(payload.get("generationConfig").is_none());
        assert!(payload.get("systemInstruction").is_none());
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn candidates_become_choices_with_synthesized_call_ids() {
        let body: GeminiResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [
                    {"text": "Checking."},
                    {"functionCall": {"name": "forecast", "args": {"city": "Oslo"}}}
                ]}},
                {"finishReason": "SAFETY"}
            ]
        }))
        .unwrap();

        let ModelResponse::Complete { choices } = parse_response(body) else {
            panic!("expected a complete response");
        };
        let Choice::Message(first) = &choices[0] else {
            panic!("expected a message choice");
        };
        assert_eq!(first.content.as_deref(), Some("Checking."));
        assert_eq!(first.tool_calls[0].name, "forecast");
        assert_eq!(first.tool_calls[0].arguments, r#"{"city":"Oslo"}"#);
        assert!(first.tool_calls[0].id.starts_with("call_"));
        assert_eq!(choices[1], Choice::Message(AssistantMessage::default()));
    }
}
