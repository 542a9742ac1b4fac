use async_trait::async_trait;

use crate::agent::{Agent, AgentOutput};
use crate::error::Result;
use crate::tool::Tool;

/// Lifecycle callbacks for a single agent run.
///
/// Every method defaults to a no-op, so implementors override only what they
/// observe. An error returned from a hook aborts the run.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called before anything else in a run, including remote tool discovery.
    async fn on_start(&self, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    /// Called with the final output, only on success.
    async fn on_end(&self, _agent: &Agent, _output: &AgentOutput) -> Result<()> {
        Ok(())
    }

    /// `args` is the raw argument text as produced by the model.
    async fn on_tool_start(&self, _agent: &Agent, _tool: &dyn Tool, _args: &str) -> Result<()> {
        Ok(())
    }

    /// `result` is the normalized text sent back to the model.
    async fn on_tool_end(&self, _agent: &Agent, _tool: &dyn Tool, _result: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl AgentHooks for NoopHooks {}
