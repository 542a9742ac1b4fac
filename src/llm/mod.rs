//! Completion provider seam and its implementations.
//!
//! Model ids are `"<provider>/<model>"`. The prefix picks the client: OpenAI,
//! Groq, Mistral and Ollama share the Chat Completions wire format, while
//! Anthropic and Gemini get their own translation.

mod anthropic;
mod gemini;
mod openai;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Structured output contract forwarded to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
}

/// Everything one completion round sends to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Provider-qualified model id, `"<provider>/<model>"`.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub response_format: Option<ResponseFormat>,
    /// Free-form provider parameters merged into the request body.
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    Message(AssistantMessage),
    /// An incremental streaming chunk; never valid as a final answer.
    Delta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Complete { choices: Vec<Choice> },
    /// The provider answered with a stream instead of a single response.
    Stream,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        ModelResponse::Complete {
            choices: vec![Choice::Message(AssistantMessage {
                content: Some(content.into()),
                tool_calls: Vec::new(),
            })],
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ModelResponse::Complete {
            choices: vec![Choice::Message(AssistantMessage {
                content: None,
                tool_calls: calls,
            })],
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse>;
}

/// Completion providers addressable by model-id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Groq,
    Mistral,
    Ollama,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "openai" => Some(Provider::OpenAi),
            "groq" => Some(Provider::Groq),
            "mistral" => Some(Provider::Mistral),
            "ollama" => Some(Provider::Ollama),
            "anthropic" => Some(Provider::Anthropic),
            "gemini" => Some(Provider::Gemini),
            _ => None,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Ollama => "ollama",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

fn split_model(model: &str) -> Result<(&str, &str)> {
    model
        .split_once('/')
        .ok_or_else(|| AgentError::Config(format!("model `{model}` has no provider prefix")))
}

/// Pick the provider for a `"<provider>/<model>"` id, with credentials from
/// the environment.
pub fn resolve(model: &str) -> Result<Arc<dyn LanguageModel>> {
    let (prefix, _) = split_model(model)?;
    resolve_with(model, &ProviderConfig::from_env(prefix))
}

pub fn resolve_with(model: &str, config: &ProviderConfig) -> Result<Arc<dyn LanguageModel>> {
    let (prefix, _) = split_model(model)?;
    let provider = Provider::from_prefix(prefix)
        .ok_or_else(|| AgentError::Config(format!("unsupported model provider `{prefix}`")))?;
    let client: Arc<dyn LanguageModel> = match provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(config.clone())?),
        Provider::Gemini => Arc::new(GeminiClient::new(config.clone())?),
        Provider::OpenAi | Provider::Groq | Provider::Mistral | Provider::Ollama => {
            Arc::new(OpenAiClient::for_provider(provider, config.clone())?)
        }
    };
    Ok(client)
}

// ─── Shared wire helpers ────────────────────────────────────────────────────

fn http_client(config: &ProviderConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|err| AgentError::LanguageModel(format!("http client error: {err}")))
}

fn coalesce_error(provider: Provider, status: reqwest::StatusCode, body: &str) -> AgentError {
    let name = provider.prefix();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AgentError::LanguageModel(format!("{name} rate limit exceeded: {body}"));
    }
    AgentError::LanguageModel(format!("{name} request failed with {status}: {body}"))
}

/// Send `builder` and hand back the successful response.
async fn send(provider: Provider, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let resp = builder.send().await.map_err(|err| {
        AgentError::LanguageModel(format!("{} request error: {err}", provider.prefix()))
    })?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(coalesce_error(provider, status, &body));
    }
    Ok(resp)
}

fn is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

/// The model name without its provider prefix.
fn model_name(model: &str) -> &str {
    model.split_once('/').map(|(_, name)| name).unwrap_or(model)
}

/// Arguments of an earlier tool call as a JSON value; blank means no arguments.
fn call_arguments(call: &ToolCall) -> Result<Value> {
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.arguments).map_err(|err| {
        AgentError::Protocol(format!(
            "arguments of tool call `{}` are not valid JSON: {err}",
            call.name
        ))
    })
}

/// Splits `data:<mime>;base64,<data>` into its media type and payload.
fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, data))
}

fn synthesized_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

// ─── Scripted model ─────────────────────────────────────────────────────────

/// Replays canned responses in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<ModelResponse> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| AgentError::LanguageModel("scripted model ran out of responses".into()))
    }
}
