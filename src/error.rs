use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The completion provider answered in a shape the loop cannot consume.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any remote tool transport failure other than "listing unsupported".
    #[error("remote tool error: {0}")]
    RemoteTool(String),

    #[error("output validation failed: {0}")]
    OutputValidation(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Wrap an arbitrary failure raised while invoking the tool `name`.
    pub fn tool(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        AgentError::ToolInvocation {
            name: name.into(),
            source: source.into(),
        }
    }

    pub(crate) fn not_implemented(name: impl Into<String>, what: impl std::fmt::Display) -> Self {
        Self::tool(name, format!("not implemented: {what}"))
    }
}
