use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use super::transport::{match_response, remote, McpTransport, RequestIds};
use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::{AgentError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-RPC over websocket text frames using the `mcp` subprotocol.
pub struct WebSocketTransport {
    socket: Mutex<Socket>,
    ids: RequestIds,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|err| remote(&format!("invalid websocket url `{url}`"), err))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mcp"));

        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| remote("websocket connect failed", err))?;
        Ok(Self {
            socket: Mutex::new(socket),
            ids: RequestIds::default(),
        })
    }

    async fn write(socket: &mut Socket, message: &JsonRpcRequest) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        socket
            .send(WsMessage::Text(payload))
            .await
            .map_err(|err| remote("websocket send failed", err))
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.ids.next();
        request.id = Some(id);

        let mut socket = self.socket.lock().await;
        Self::write(&mut socket, &request).await?;

        loop {
            let Some(frame) = socket.next().await else {
                return Err(AgentError::RemoteTool(
                    "websocket closed before a response arrived".into(),
                ));
            };
            match frame.map_err(|err| remote("websocket receive failed", err))? {
                WsMessage::Text(payload) => {
                    if let Some(response) = match_response(&payload, id)? {
                        return Ok(response);
                    }
                }
                WsMessage::Binary(payload) => {
                    let text = String::from_utf8_lossy(&payload);
                    if let Some(response) = match_response(&text, id)? {
                        return Ok(response);
                    }
                }
                WsMessage::Ping(payload) => {
                    socket
                        .send(WsMessage::Pong(payload))
                        .await
                        .map_err(|err| remote("websocket pong failed", err))?;
                }
                WsMessage::Close(_) => {
                    return Err(AgentError::RemoteTool(
                        "websocket closed before a response arrived".into(),
                    ));
                }
                _ => {}
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        let mut socket = self.socket.lock().await;
        Self::write(&mut socket, &notification).await
    }

    async fn close(&self) -> Result<()> {
        self.socket
            .lock()
            .await
            .close(None)
            .await
            .map_err(|err| remote("websocket close failed", err))
    }
}
