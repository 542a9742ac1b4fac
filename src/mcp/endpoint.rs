use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use super::McpToolDefinition;

/// Produces extra HTTP headers at connect time and for every outgoing request.
pub type HeaderHook = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// How to reach a remote tool server.
#[derive(Clone)]
pub enum Transport {
    /// Spawn a local process and speak newline-delimited JSON-RPC over stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
    Sse {
        url: String,
        headers: Option<HeaderHook>,
    },
    WebSocket {
        url: String,
    },
    StreamableHttp {
        url: String,
        headers: Option<HeaderHook>,
    },
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stdio {
                command, args, cwd, ..
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("cwd", cwd)
                .finish_non_exhaustive(),
            Transport::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("headers", &headers.is_some())
                .finish(),
            Transport::WebSocket { url } => f.debug_struct("WebSocket").field("url", url).finish(),
            Transport::StreamableHttp { url, headers } => f
                .debug_struct("StreamableHttp")
                .field("url", url)
                .field("headers", &headers.is_some())
                .finish(),
        }
    }
}

/// Configuration for one remote tool server plus its tool-list cache.
///
/// Clones share the cache, so every client built from the same endpoint value
/// (across runs and across clones) sees a list populated at most once.
#[derive(Clone)]
pub struct RemoteToolEndpoint {
    transport: Transport,
    cache_enabled: bool,
    cache: Arc<OnceLock<Vec<McpToolDefinition>>>,
}

impl RemoteToolEndpoint {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            cache_enabled: true,
            cache: Arc::new(OnceLock::new()),
        }
    }

    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Transport::Stdio {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
        })
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self::new(Transport::Sse {
            url: url.into(),
            headers: None,
        })
    }

    pub fn websocket(url: impl Into<String>) -> Self {
        Self::new(Transport::WebSocket { url: url.into() })
    }

    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self::new(Transport::StreamableHttp {
            url: url.into(),
            headers: None,
        })
    }

    /// Attach a header hook. Only HTTP-based transports carry headers; other
    /// variants are returned unchanged.
    pub fn with_headers<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> HashMap<String, String> + Send + Sync + 'static,
    {
        let hook: HeaderHook = Arc::new(hook);
        match &mut self.transport {
            Transport::Sse { headers, .. } | Transport::StreamableHttp { headers, .. } => {
                *headers = Some(hook);
            }
            Transport::Stdio { .. } | Transport::WebSocket { .. } => {}
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Transport::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        if let Transport::Stdio { cwd, .. } = &mut self.transport {
            *cwd = Some(dir.into());
        }
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// The cached tool definitions, if caching is on and a listing succeeded.
    pub fn cached_tools(&self) -> Option<&[McpToolDefinition]> {
        if !self.cache_enabled {
            return None;
        }
        self.cache.get().map(Vec::as_slice)
    }

    /// First writer wins; an empty list is never cached.
    pub(crate) fn store_tools(&self, tools: &[McpToolDefinition]) {
        if self.cache_enabled && !tools.is_empty() {
            // Already set by an earlier listing; that one stays.
            self.cache.set(tools.to_vec()).ok();
        }
    }
}

impl fmt::Debug for RemoteToolEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteToolEndpoint")
            .field("transport", &self.transport)
            .field("cache_enabled", &self.cache_enabled)
            .field("cached", &self.cache.get().map(Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(name: &str) -> McpToolDefinition {
        McpToolDefinition {
            name: name.into(),
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn clones_share_the_cache() {
        let endpoint = RemoteToolEndpoint::websocket("ws://localhost:1/mcp");
        let copy = endpoint.clone();
        copy.store_tools(&[definition("a")]);
        copy.store_tools(&[definition("b")]);

        let cached = endpoint.cached_tools().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "a");
    }

    #[test]
    fn disabled_cache_never_stores() {
        let endpoint = RemoteToolEndpoint::sse("http://localhost:1/sse").with_cache(false);
        endpoint.store_tools(&[definition("a")]);
        assert!(endpoint.cached_tools().is_none());
    }

    #[test]
    fn headers_only_attach_to_http_variants() {
        let sse = RemoteToolEndpoint::sse("http://localhost:1/sse").with_headers(HashMap::new);
        assert!(matches!(
            sse.transport(),
            Transport::Sse {
                headers: Some(_),
                ..
            }
        ));

        let stdio = RemoteToolEndpoint::stdio("server", ["--flag"])
            .with_headers(HashMap::new)
            .with_env("TOKEN", "x");
        match stdio.transport() {
            Transport::Stdio { args, env, .. } => {
                assert_eq!(args, &vec!["--flag".to_string()]);
                assert_eq!(env.get("TOKEN").map(String::as_str), Some("x"));
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }
}
