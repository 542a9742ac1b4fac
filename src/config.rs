use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

pub const ENV_HOST: &str = "AGENT_RUNTIME_HOST";
pub const ENV_PORT: &str = "AGENT_RUNTIME_PORT";
pub const ENV_LOG: &str = "AGENT_RUNTIME_LOG";
/// Set by the host process when it exposes its own tools to the agent over SSE.
pub const ENV_MCP_SERVER: &str = "REDPANDA_CONNECT_AGENT_RUNTIME_MCP_SERVER";


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// `0` binds an ephemeral port; the chosen one is announced on the discovery line.
    #[serde(default)]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_health_service")]
    pub service: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            service: default_health_service(),
        }
    }
}

fn default_health_service() -> String {
    "plugin".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// SSE URL of the host's tool server, appended to the agent's endpoints.
    #[serde(default)]
    pub mcp_server: Option<String>,
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| AgentError::Config(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var(ENV_HOST) {
            self.server.host = host;
        }
        if let Ok(port) = env::var(ENV_PORT) {
            self.server.port = port
                .parse::<u16>()
                .map_err(|err| AgentError::Config(format!("invalid {ENV_PORT} `{port}`: {err}")))?;
        }
        if let Ok(filter) = env::var(ENV_LOG) {
            self.logging.filter = filter;
        }
        if let Ok(url) = env::var(ENV_MCP_SERVER) {
            if !url.is_empty() {
                self.mcp_server = Some(url);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Connection settings for one completion provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Replaces the provider's public endpoint, e.g. a proxy or a local server.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderConfig {
    /// Reads `<PROVIDER>_API_KEY` and `<PROVIDER>_BASE_URL` for a model-id
    /// prefix, so `anthropic` uses `ANTHROPIC_API_KEY`.
    pub fn from_env(provider: &str) -> Self {
        let prefix = provider.to_ascii_uppercase();
        let mut cfg = Self::default();
        if let Ok(key) = env::var(format!("{prefix}_API_KEY")) {
            if !key.is_empty() {
                cfg.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var(format!("{prefix}_BASE_URL")) {
            if !url.is_empty() {
                cfg.base_url = Some(url.trim_end_matches('/').to_string());
            }
        }
        cfg
    }

    /// The configured endpoint, or `default` without a trailing slash.
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
