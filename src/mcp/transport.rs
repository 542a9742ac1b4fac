//! Stdio and streamable-HTTP transports, plus the shared transport contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::endpoint::HeaderHook;
use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::{AgentError, Result};

/// A bidirectional JSON-RPC channel to one remote tool server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response carrying the same id.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; nothing is awaited back.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub(crate) fn remote(context: &str, err: impl std::fmt::Display) -> AgentError {
    AgentError::RemoteTool(format!("{context}: {err}"))
}

/// Parse one inbound frame, returning it only when it answers request `id`.
pub(crate) fn match_response(raw: &str, id: u64) -> Result<Option<JsonRpcResponse>> {
    let message: JsonRpcResponse =
        serde_json::from_str(raw).map_err(|err| remote("malformed JSON-RPC message", err))?;
    if message.answers(id) {
        Ok(Some(message))
    } else {
        debug!(raw, "skipping unrelated JSON-RPC message");
        Ok(None)
    }
}

pub(crate) fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    hook: Option<&HeaderHook>,
) -> reqwest::RequestBuilder {
    if let Some(hook) = hook {
        for (name, value) in hook() {
            builder = builder.header(name, value);
        }
    }
    builder
}

#[derive(Debug, Default)]
pub(crate) struct RequestIds(AtomicU64);

impl RequestIds {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// ─── Stdio ──────────────────────────────────────────────────────────────────

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Talks to a child process over newline-delimited JSON on stdin/stdout.
/// The child is killed when the transport is closed or dropped.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    pipes: Mutex<Option<StdioPipes>>,
    ids: RequestIds,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| remote(&format!("failed to spawn `{command}`"), err))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::RemoteTool("tool server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::RemoteTool("tool server stdout not available".into()))?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            pipes: Mutex::new(Some(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
            })),
            ids: RequestIds::default(),
        })
    }

    async fn write_line(pipes: &mut StdioPipes, message: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        pipes
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| remote("failed to write to tool server", err))?;
        pipes
            .stdin
            .flush()
            .await
            .map_err(|err| remote("failed to flush tool server stdin", err))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.ids.next();
        request.id = Some(id);

        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| AgentError::RemoteTool("stdio transport is closed".into()))?;
        Self::write_line(pipes, &request).await?;

        loop {
            let mut line = String::new();
            let read = pipes
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|err| remote("failed to read from tool server", err))?;
            if read == 0 {
                return Err(AgentError::RemoteTool(
                    "tool server closed its stdout".into(),
                ));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = match_response(line, id)? {
                return Ok(response);
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| AgentError::RemoteTool("stdio transport is closed".into()))?;
        Self::write_line(pipes, &notification).await
    }

    async fn close(&self) -> Result<()> {
        // Dropping the pipes closes stdin, which well-behaved servers treat as EOF.
        self.pipes.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            child
                .kill()
                .await
                .map_err(|err| remote("failed to stop tool server", err))?;
        }
        Ok(())
    }
}

// ─── Streamable HTTP ────────────────────────────────────────────────────────

const SESSION_HEADER: &str = "mcp-session-id";

/// One POST per message; replies come back as JSON or as an SSE body.
pub struct StreamableHttpTransport {
    http: reqwest::Client,
    url: String,
    headers: Option<HeaderHook>,
    session: StdMutex<Option<String>>,
    ids: RequestIds,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>, headers: Option<HeaderHook>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            headers,
            session: StdMutex::new(None),
            ids: RequestIds::default(),
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder = apply_headers(builder, self.headers.as_ref());

        let response = builder
            .send()
            .await
            .map_err(|err| remote("HTTP request failed", err))?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(session.to_string());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteTool(format!(
                "tool server returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

/// Pull `data` payloads out of an SSE body until one answers `id`.
async fn read_event_stream(response: reqwest::Response, id: u64) -> Result<JsonRpcResponse> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| remote("event stream error", err))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(end) = buffer.find("\n\n") {
            let event: String = buffer.drain(..end + 2).collect();
            let data = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect::<Vec<_>>()
                .join("\n");
            if data.is_empty() {
                continue;
            }
            if let Some(response) = match_response(&data, id)? {
                return Ok(response);
            }
        }
    }
    Err(AgentError::RemoteTool(
        "event stream ended before a response arrived".into(),
    ))
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.ids.next();
        request.id = Some(id);
        debug!(url = %self.url, method = %request.method, id, "posting JSON-RPC request");

        let response = self.post(&request).await?;
        let is_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"));
        if is_stream {
            return read_event_stream(response, id).await;
        }

        let body = response
            .text()
            .await
            .map_err(|err| remote("failed to read response body", err))?;
        match_response(&body, id)?.ok_or_else(|| {
            AgentError::RemoteTool(format!("response does not answer request {id}"))
        })
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.post(&notification).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let Some(session) = self.session_id() else {
            return Ok(());
        };
        let builder = self.http.delete(&self.url).header(SESSION_HEADER, session);
        let response = apply_headers(builder, self.headers.as_ref())
            .send()
            .await
            .map_err(|err| remote("failed to end session", err))?;
        // Servers that do not support explicit termination answer 405.
        if !response.status().is_success()
            && response.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED
        {
            return Err(AgentError::RemoteTool(format!(
                "ending session returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
