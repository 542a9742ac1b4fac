use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::message::{ContentPart, ImageUrl, MessageContent};

/// A named, schema-described callable the model may invoke during a run.
///
/// The default [`Tool::call`] reports "not implemented"; concrete tools
/// (local functions, remote tools, wrapped agents) override it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON schema for the arguments object.
    fn parameters(&self) -> Value;

    async fn call(&self, _args: Value) -> Result<ToolOutput> {
        Err(AgentError::not_implemented(self.name(), "tool has no invocation"))
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        data: String,
    },
    /// `data` is the base64-encoded image payload.
    Image {
        data: String,
        mime_type: String,
    },
}

/// Multi-part tool result. Item order is preserved through to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub content: Vec<ToolContent>,
}

impl ToolResponse {
    pub fn new(content: Vec<ToolContent>) -> Self {
        Self { content }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::new(vec![ToolContent::Text { data: data.into() }])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A value produced from a schema-typed Rust struct.
    Typed(Value),
    Text(String),
    Response(ToolResponse),
    Value(Value),
}

impl ToolOutput {
    pub fn typed<T: Serialize>(value: &T) -> Result<Self> {
        Ok(ToolOutput::Typed(serde_json::to_value(value)?))
    }

    /// Content for the `tool` message that reports this output back to the model.
    pub fn into_content(self) -> Result<MessageContent> {
        Ok(match self {
            ToolOutput::Text(text) => MessageContent::Text(text),
            ToolOutput::Typed(value) | ToolOutput::Value(value) => {
                MessageContent::Text(serde_json::to_string(&value)?)
            }
            ToolOutput::Response(response) => MessageContent::Parts(
                response
                    .content
                    .into_iter()
                    .map(|item| match item {
                        ToolContent::Text { data } => ContentPart::Text { text: data },
                        ToolContent::Image { data, mime_type } => ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{mime_type};base64,{data}"),
                            },
                        },
                    })
                    .collect(),
            ),
        })
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        ToolOutput::Text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        ToolOutput::Text(value.to_string())
    }
}

impl From<ToolResponse> for ToolOutput {
    fn from(value: ToolResponse) -> Self {
        ToolOutput::Response(value)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Value(value)
    }
}

// ─── Definitions ────────────────────────────────────────────────────────────

/// The plain tool shape: what gets advertised to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: Option<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }

    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().map(str::to_string),
            parameters: tool.parameters(),
        }
    }
}

#[async_trait]
impl Tool for ToolDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }
}

/// JSON schema for `T` with the meta-schema marker removed, ready to advertise.
pub fn schema_for<T: JsonSchema>() -> Result<Value> {
    let mut schema = serde_json::to_value(schemars::schema_for!(T))?;
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }
    Ok(schema)
}

// ─── Function tools ─────────────────────────────────────────────────────────

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Handler = dyn Fn(Value) -> BoxFuture<Result<ToolOutput>> + Send + Sync;

/// A local tool backed by an async closure.
pub struct FunctionTool {
    definition: ToolDefinition,
    handler: Arc<Handler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition::new(name, Some(description.into()), parameters),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Build a tool whose parameter schema is derived from `A` and whose
    /// arguments are deserialized into `A` before the handler runs.
    pub fn typed<A, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<Self>
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler = Arc::new(handler);
        Ok(Self::new(name, description, schema_for::<A>()?, move |args| {
            let handler = Arc::clone(&handler);
            let tool_name = tool_name.clone();
            async move {
                let args: A =
                    serde_json::from_value(args).map_err(|err| AgentError::tool(tool_name, err))?;
                handler(args).await
            }
        }))
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> Option<&str> {
        self.definition.description.as_deref()
    }

    fn parameters(&self) -> Value {
        self.definition.parameters.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolOutput> {
        (self.handler)(args).await
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Name-keyed tool namespace that remembers insertion order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tool. A replaced tool keeps its original position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Insert `tool` unless the name is taken. Returns whether it was added.
    pub fn merge(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.tools.contains_key(tool.name()) {
            return false;
        }
        self.register(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition::of(tool.as_ref()))
            .collect()
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.call(args).await
    }
}
