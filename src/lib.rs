//! LLM agents with remote tool federation, served to a host process over a
//! gRPC plugin boundary.
//!
//! The crate provides:
//! - An [`Agent`] that loops between a language model and its tools until the
//!   model produces a final answer, optionally validated against a JSON schema.
//! - A [`Tool`] interface for local tools plus federation of tools served by
//!   remote MCP servers over stdio, SSE, websocket or streamable HTTP.
//! - A runtime that exposes one agent as the `AgentRuntime` gRPC service and
//!   hands the spans of each invocation back to the caller.

mod agent;
pub mod config;
mod error;
mod hooks;
pub mod llm;
pub mod mcp;
mod message;
pub mod runtime;
pub mod telemetry;
mod tool;

pub use agent::{Agent, AgentOutput, AgentTool, OutputSchema};
pub use config::{ProviderConfig, RuntimeConfig};
pub use error::{AgentError, Result};
pub use hooks::{AgentHooks, NoopHooks};
pub use llm::{CompletionRequest, LanguageModel, ModelResponse, ScriptedModel};
pub use mcp::{RemoteToolEndpoint, Transport};
pub use message::{ContentPart, ImageUrl, Message, MessageContent, Role, ToolCall};
pub use runtime::{serve, serve_with_config};
pub use tool::{
    schema_for, FunctionTool, Tool, ToolContent, ToolDefinition, ToolOutput, ToolRegistry,
    ToolResponse,
};
