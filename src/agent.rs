use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::error::{AgentError, Result};
use crate::hooks::{AgentHooks, NoopHooks};
use crate::llm::{self, Choice, CompletionRequest, LanguageModel, ModelResponse, ResponseFormat};
use crate::mcp::{self, McpClient, RemoteToolEndpoint};
use crate::message::{Message, ToolCall};
use crate::tool::{schema_for, Tool, ToolOutput, ToolRegistry};

/// Final result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Text(String),
    /// Content that parsed and validated against the agent's output schema.
    Structured(Value),
}

impl AgentOutput {
    /// Wire text for the output: structured values become compact JSON.
    pub fn to_payload(&self) -> Result<String> {
        match self {
            AgentOutput::Text(text) => Ok(text.clone()),
            AgentOutput::Structured(value) => Ok(serde_json::to_string(value)?),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AgentOutput::Text(text) => Some(text),
            AgentOutput::Structured(_) => None,
        }
    }
}

/// A named JSON schema that final answers must satisfy.
#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        let validator = jsonschema::Validator::new(&schema)
            .map_err(|err| AgentError::Config(format!("invalid output schema: {err}")))?;
        Ok(Self {
            name: name.into(),
            schema,
            validator: Arc::new(validator),
        })
    }

    /// Derive the schema from a Rust type.
    pub fn of<T: JsonSchema>() -> Result<Self> {
        Self::new(T::schema_name(), schema_for::<T>()?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Parse `content` as JSON and check it against the schema.
    pub fn validate(&self, content: &str) -> Result<Value> {
        let value: Value = serde_json::from_str(content).map_err(|err| {
            AgentError::OutputValidation(format!("output is not valid JSON: {err}"))
        })?;
        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(AgentError::OutputValidation(errors.join("; ")));
        }
        Ok(value)
    }
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

/// An LLM-backed agent that alternates between completions and tool calls.
pub struct Agent {
    name: String,
    model: String,
    instructions: Option<String>,
    output_schema: Option<OutputSchema>,
    parameters: Map<String, Value>,
    tools: Vec<Arc<dyn Tool>>,
    endpoints: Vec<RemoteToolEndpoint>,
    hooks: Arc<dyn AgentHooks>,
    provider: Option<Arc<dyn LanguageModel>>,
}

impl Agent {
    /// `model` is provider-qualified, e.g. `openai/gpt-4o`.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: None,
            output_schema: None,
            parameters: Map::new(),
            tools: Vec::new(),
            endpoints: Vec::new(),
            hooks: Arc::new(NoopHooks),
            provider: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_endpoint(mut self, endpoint: RemoteToolEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_hooks<H: AgentHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Use `provider` instead of resolving one from the model id.
    pub fn with_provider(mut self, provider: Arc<dyn LanguageModel>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Endpoints may still be appended after construction, before a run.
    pub fn add_endpoint(&mut self, endpoint: RemoteToolEndpoint) {
        self.endpoints.push(endpoint);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn endpoints(&self) -> &[RemoteToolEndpoint] {
        &self.endpoints
    }

    /// Run one conversation to completion for `input`.
    ///
    /// Every remote tool client opened for the run is closed before this
    /// returns, whether the run succeeded or not.
    pub async fn run(&self, input: impl Into<String>) -> Result<AgentOutput> {
        let input = input.into();
        self.hooks.on_start(self).await?;

        let provider = match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => llm::resolve(&self.model)?,
        };

        let mut clients = Vec::with_capacity(self.endpoints.len());
        let outcome = self.converse(&mut clients, provider.as_ref(), input).await;
        for client in clients {
            if let Err(err) = client.close().await {
                warn!(agent = %self.name, error = %err, "failed to close remote tool client");
            }
        }
        outcome
    }

    async fn converse(
        &self,
        clients: &mut Vec<Arc<McpClient>>,
        provider: &dyn LanguageModel,
        input: String,
    ) -> Result<AgentOutput> {
        for endpoint in &self.endpoints {
            clients.push(mcp::connect(endpoint).await?);
        }

        let mut namespace = ToolRegistry::new();
        for tool in &self.tools {
            namespace.register(Arc::clone(tool));
        }
        for client in clients.iter() {
            client.initialize().await?;
            for tool in client.list_tools().await? {
                let name = tool.name().to_string();
                if !namespace.merge(tool) {
                    debug!(agent = %self.name, tool = %name, "skipping remote tool shadowed by an existing tool");
                }
            }
        }

        let mut messages = Vec::new();
        if let Some(instructions) = self.instructions.as_deref().filter(|text| !text.is_empty()) {
            messages.push(Message::system(instructions));
        }
        messages.push(Message::user(input));

        let mut request = CompletionRequest {
            model: self.model.clone(),
            messages,
            tools: namespace.definitions(),
            response_format: self.output_schema.as_ref().map(|schema| ResponseFormat {
                name: schema.name().to_string(),
                schema: schema.schema().clone(),
            }),
            parameters: self.parameters.clone(),
        };

        loop {
            let span = info_span!("chat_completion", model = %self.model);
            let response = provider.complete(&request).instrument(span).await?;
            let choices = match response {
                ModelResponse::Complete { choices } => choices,
                ModelResponse::Stream => {
                    return Err(AgentError::Protocol(
                        "unexpected streaming response from the completion provider".into(),
                    ))
                }
            };
            let message = match choices.into_iter().last() {
                Some(Choice::Message(message)) => message,
                Some(Choice::Delta) => {
                    return Err(AgentError::Protocol(
                        "unexpected streaming choice in completion response".into(),
                    ))
                }
                None => {
                    return Err(AgentError::Protocol(
                        "completion response contained no choices".into(),
                    ))
                }
            };

            if !message.tool_calls.is_empty() {
                request.messages.push(Message::tool_calls(
                    message.content,
                    message.tool_calls.clone(),
                ));
                for call in &message.tool_calls {
                    let reply = self.execute(&namespace, call).await?;
                    request.messages.push(reply);
                }
                continue;
            }

            let content = message.content.ok_or_else(|| {
                AgentError::Protocol("completion response contained no content".into())
            })?;
            let output = match &self.output_schema {
                Some(schema) => AgentOutput::Structured(schema.validate(&content)?),
                None => AgentOutput::Text(content),
            };
            self.hooks.on_end(self, &output).await?;
            return Ok(output);
        }
    }

    async fn execute(&self, namespace: &ToolRegistry, call: &ToolCall) -> Result<Message> {
        let tool = namespace
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        self.hooks
            .on_tool_start(self, tool.as_ref(), &call.arguments)
            .await?;

        let args: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.arguments).map_err(|err| AgentError::tool(&call.name, err))?
        };
        let output = tool.call(args).await.map_err(|err| {
            error!(agent = %self.name, tool = %call.name, error = %err, "tool invocation failed");
            err
        })?;

        let content = output.into_content()?;
        self.hooks
            .on_tool_end(self, tool.as_ref(), &content.to_text())
            .await?;
        Ok(Message::tool(&call.id, tool.name(), content))
    }

    /// Expose this agent as a tool other agents can call with text.
    ///
    /// There is no recursion guard: an agent reachable from its own tools
    /// will keep calling itself for as long as the model asks it to.
    pub fn as_tool(self: &Arc<Self>) -> AgentTool {
        AgentTool::new(Arc::clone(self))
    }
}

#[derive(Deserialize)]
struct AgentToolInput {
    input: String,
}

/// A tool that forwards its `input` text to a wrapped agent.
pub struct AgentTool {
    agent: Arc<Agent>,
    description: String,
}

impl AgentTool {
    pub fn new(agent: Arc<Agent>) -> Self {
        let description = format!(
            "An agent called {} you can pass text to and get a response.",
            agent.name()
        );
        Self { agent, description }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> Option<&str> {
        Some(&self.description)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"input": {"type": "string"}},
            "required": ["input"],
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput> {
        let args: AgentToolInput =
            serde_json::from_value(args).map_err(|err| AgentError::tool(self.name(), err))?;
        Ok(match self.agent.run(args.input).await? {
            AgentOutput::Text(text) => ToolOutput::Text(text),
            AgentOutput::Structured(value) => ToolOutput::Typed(value),
        })
    }
}
