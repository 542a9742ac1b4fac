#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use futures::SinkExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const SESSION_ID: &str = "mock-session-1";

/// In-process MCP server speaking streamable HTTP on `/mcp` and the legacy
/// SSE transport on `/sse` + `/messages`.
#[derive(Clone, Default)]
pub struct MockToolServer {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tools: Vec<Value>,
    tools_unsupported: bool,
    stream_responses: bool,
    list_calls: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    sessions_seen: Mutex<Vec<Option<String>>>,
    traceparents: Mutex<Vec<String>>,
    deleted: AtomicUsize,
    sse: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    subprotocols: Mutex<Vec<String>>,
}

impl MockToolServer {
    pub fn with_tools(names: &[&str]) -> Self {
        Self::build(names, false, false)
    }

    /// Every JSON-RPC answer on `/mcp` comes back as a one-event SSE body.
    pub fn streaming(names: &[&str]) -> Self {
        Self::build(names, false, true)
    }

    pub fn without_tools() -> Self {
        Self::build(&[], true, false)
    }

    fn build(names: &[&str], tools_unsupported: bool, stream_responses: bool) -> Self {
        let tools = names
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("remote {name}"),
                    "inputSchema": {
                        "type": "object",
                        "properties": {"city": {"type": "string"}},
                    },
                })
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                tools,
                tools_unsupported,
                stream_responses,
                ..Inner::default()
            }),
        }
    }

    pub async fn spawn(&self) -> SocketAddr {
        let app = Router::new()
            .route("/mcp", post(streamable_post).delete(streamable_delete))
            .route("/sse", get(sse_stream))
            .route("/messages", post(sse_message))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Serve one websocket connection with the same answers, echoing the
    /// requested subprotocol. Every answer is preceded by a server notification.
    pub async fn spawn_websocket(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = self.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let recorder = server.clone();
            let callback = move |request: &WsRequest,
                                 mut response: WsResponse|
                  -> std::result::Result<WsResponse, ErrorResponse> {
                if let Some(protocol) = request.headers().get("Sec-WebSocket-Protocol") {
                    recorder
                        .inner
                        .subprotocols
                        .lock()
                        .unwrap()
                        .push(protocol.to_str().unwrap().to_string());
                    response
                        .headers_mut()
                        .insert("Sec-WebSocket-Protocol", protocol.clone());
                }
                Ok(response)
            };
            let mut socket = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            while let Some(Ok(frame)) = socket.next().await {
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let request: Value = serde_json::from_str(&text).unwrap();
                if let Some(answer) = server.answer(&request) {
                    let progress = json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/progress",
                        "params": {},
                    });
                    socket.send(WsMessage::Text(progress.to_string())).await.unwrap();
                    socket.send(WsMessage::Text(answer.to_string())).await.unwrap();
                }
            }
        });
        addr
    }

    pub fn subprotocols(&self) -> Vec<String> {
        self.inner.subprotocols.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn sessions_seen(&self) -> Vec<Option<String>> {
        self.inner.sessions_seen.lock().unwrap().clone()
    }

    pub fn traceparents(&self) -> Vec<String> {
        self.inner.traceparents.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> usize {
        self.inner.deleted.load(Ordering::SeqCst)
    }

    fn record_headers(&self, headers: &HeaderMap) {
        if let Some(traceparent) = headers.get("traceparent").and_then(|v| v.to_str().ok()) {
            self.inner
                .traceparents
                .lock()
                .unwrap()
                .push(traceparent.to_string());
        }
    }

    /// The JSON-RPC answer for `request`, or `None` for notifications.
    fn answer(&self, request: &Value) -> Option<Value> {
        let id = request.get("id")?.clone();
        let method = request["method"].as_str().unwrap_or_default();
        let outcome = match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock-tools", "version": "1.0.0"},
            })),
            "tools/list" => {
                self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
                if self.inner.tools_unsupported {
                    Err(json!({"code": -32601, "message": "tools not supported"}))
                } else {
                    Ok(json!({"tools": self.inner.tools}))
                }
            }
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default().to_string();
                let arguments = request["params"]["arguments"].clone();
                self.inner
                    .calls
                    .lock()
                    .unwrap()
                    .push((name.clone(), arguments.clone()));
                if name == "explode" {
                    Ok(json!({"content": [], "isError": true}))
                } else {
                    let city = arguments["city"].as_str().unwrap_or("nowhere");
                    Ok(json!({
                        "content": [{"type": "text", "text": format!("{name}: sunny in {city}")}],
                        "isError": false,
                    }))
                }
            }
            other => Err(json!({"code": -32601, "message": format!("unknown method {other}")})),
        };
        Some(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        })
    }
}

async fn streamable_post(
    State(server): State<MockToolServer>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    server.record_headers(&headers);
    server.inner.sessions_seen.lock().unwrap().push(
        headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let Some(answer) = server.answer(&request) else {
        return (StatusCode::ACCEPTED, [("mcp-session-id", SESSION_ID)]).into_response();
    };
    if server.inner.stream_responses {
        let body = format!(
            "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{{}}}}\n\nevent: message\ndata: {answer}\n\n"
        );
        return (
            [
                (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                ("mcp-session-id", SESSION_ID),
            ],
            body,
        )
            .into_response();
    }
    ([("mcp-session-id", SESSION_ID)], Json(answer)).into_response()
}

async fn streamable_delete(State(server): State<MockToolServer>) -> StatusCode {
    server.inner.deleted.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn sse_stream(
    State(server): State<MockToolServer>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    server.record_headers(&headers);
    let (tx, rx) = mpsc::unbounded_channel();
    *server.inner.sse.lock().unwrap() = Some(tx);

    let endpoint = Event::default().event("endpoint").data("/messages?session=1");
    let events = stream::once(async move { endpoint })
        .chain(UnboundedReceiverStream::new(rx))
        .map(Ok);
    Sse::new(events)
}

async fn sse_message(
    State(server): State<MockToolServer>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> StatusCode {
    server.record_headers(&headers);
    if let Some(answer) = server.answer(&request) {
        let sender = server.inner.sse.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(Event::default().event("message").data(answer.to_string()));
        }
    }
    StatusCode::ACCEPTED
}
