use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::endpoint::HeaderHook;
use super::transport::{apply_headers, match_response, remote, McpTransport, RequestIds};
use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::{AgentError, Result};

/// Legacy HTTP+SSE transport: a long-lived GET event stream carries server
/// messages, and client messages are POSTed to the URL the stream announces
/// in its first `endpoint` event.
pub struct SseTransport {
    http: reqwest::Client,
    headers: Option<HeaderHook>,
    post_url: Url,
    events: Mutex<EventSource>,
    ids: RequestIds,
}

impl SseTransport {
    pub async fn connect(url: &str, headers: Option<HeaderHook>) -> Result<Self> {
        let base = Url::parse(url).map_err(|err| remote(&format!("invalid SSE url `{url}`"), err))?;
        let http = reqwest::Client::new();

        let request = apply_headers(http.get(base.clone()), headers.as_ref());
        let mut events =
            EventSource::new(request).map_err(|err| remote("failed to open event stream", err))?;
        events.set_retry_policy(Box::new(retry::Never));

        let post_url = loop {
            match events.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) if message.event == "endpoint" => {
                    break base
                        .join(message.data.trim())
                        .map_err(|err| remote("invalid endpoint event", err))?;
                }
                Some(Ok(Event::Message(message))) => {
                    debug!(event = %message.event, "ignoring event before endpoint announcement");
                }
                Some(Err(err)) => {
                    events.close();
                    return Err(remote("event stream failed", err));
                }
                None => {
                    return Err(AgentError::RemoteTool(
                        "event stream closed before announcing an endpoint".into(),
                    ))
                }
            }
        };
        debug!(%post_url, "SSE transport connected");

        Ok(Self {
            http,
            headers,
            post_url,
            events: Mutex::new(events),
            ids: RequestIds::default(),
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> Result<()> {
        let builder = self.http.post(self.post_url.clone()).json(message);
        let response = apply_headers(builder, self.headers.as_ref())
            .send()
            .await
            .map_err(|err| remote("HTTP request failed", err))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::RemoteTool(format!(
                "tool server returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.ids.next();
        request.id = Some(id);

        // Hold the stream while posting so no reply can be consumed by another caller.
        let mut events = self.events.lock().await;
        self.post(&request).await?;

        loop {
            match events.next().await {
                Some(Ok(Event::Message(message))) if message.event == "message" => {
                    if let Some(response) = match_response(&message.data, id)? {
                        return Ok(response);
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(remote("event stream failed", err)),
                None => {
                    return Err(AgentError::RemoteTool(
                        "event stream closed before a response arrived".into(),
                    ))
                }
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<()> {
        self.post(&notification).await
    }

    async fn close(&self) -> Result<()> {
        self.events.lock().await.close();
        Ok(())
    }
}
