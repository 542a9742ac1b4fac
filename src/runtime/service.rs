use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use opentelemetry::Context;
use tracing::{error, info_span, Instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::payload::decode_input;
use super::proto::agent_runtime_server::AgentRuntime;
use super::proto::{message, InvokeAgentRequest, InvokeAgentResponse, Message, Trace, TraceContext};
use super::spans::{build_forest, collect_spans, SpanCollector};
use crate::agent::Agent;
use crate::error::{AgentError, Result};

/// Serves one [`Agent`] behind the `InvokeAgent` RPC.
#[derive(Clone)]
pub struct RuntimeService {
    agent: Arc<Agent>,
}

impl RuntimeService {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Run the agent once for `request`.
    ///
    /// The returned trace is present only when the caller sent a trace
    /// context, and holds the spans that ended while the agent ran.
    pub async fn invoke(&self, request: InvokeAgentRequest) -> Result<InvokeAgentResponse> {
        let remote = request
            .trace_context
            .as_ref()
            .map(remote_parent)
            .transpose()?;
        let inbound = request.message.unwrap_or_default();

        let collector = SpanCollector::new();
        let output = collect_spans(collector.clone(), async {
            let input = decode_input(&inbound)?;
            let span = info_span!("agent_invoke");
            if let Some(parent) = &remote {
                span.set_parent(Context::new().with_remote_span_context(parent.clone()));
            }
            self.agent.run(input).instrument(span).await
        })
        .await?;

        let trace = remote.map(|parent| Trace {
            spans: build_forest(&collector.take(), Some(parent.span_id())),
        });

        Ok(InvokeAgentResponse {
            message: Some(Message {
                metadata: inbound.metadata,
                payload: Some(message::Payload::Bytes(output.to_payload()?.into_bytes())),
            }),
            trace,
        })
    }
}

/// Remote span context for the caller's W3C ids. Empty flags mean unsampled.
fn remote_parent(trace: &TraceContext) -> Result<SpanContext> {
    let trace_id = TraceId::from_hex(&trace.trace_id)
        .map_err(|err| AgentError::Protocol(format!("invalid trace id {:?}: {err}", trace.trace_id)))?;
    let span_id = SpanId::from_hex(&trace.span_id)
        .map_err(|err| AgentError::Protocol(format!("invalid span id {:?}: {err}", trace.span_id)))?;
    let flags = if trace.trace_flags.is_empty() {
        0
    } else {
        u8::from_str_radix(&trace.trace_flags, 16).map_err(|err| {
            AgentError::Protocol(format!("invalid trace flags {:?}: {err}", trace.trace_flags))
        })?
    };
    Ok(SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    ))
}

#[async_trait]
impl AgentRuntime for RuntimeService {
    async fn invoke_agent(
        &self,
        request: tonic::Request<InvokeAgentRequest>,
    ) -> std::result::Result<tonic::Response<InvokeAgentResponse>, tonic::Status> {
        match self.invoke(request.into_inner()).await {
            Ok(response) => Ok(tonic::Response::new(response)),
            Err(err) => {
                error!(agent = %self.agent.name(), error = %err, "agent invocation failed");
                Err(tonic::Status::internal(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_w3c_trace_context() {
        let context = remote_parent(&TraceContext {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            span_id: "00f067aa0ba902b7".into(),
            trace_flags: "01".into(),
        })
        .unwrap();
        assert!(context.is_remote());
        assert!(context.is_sampled());
        assert_eq!(context.span_id().to_string(), "00f067aa0ba902b7");
        assert_eq!(
            context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[test]
    fn empty_flags_are_unsampled() {
        let context = remote_parent(&TraceContext {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
            span_id: "00f067aa0ba902b7".into(),
            trace_flags: String::new(),
        })
        .unwrap();
        assert!(!context.is_sampled());
    }

    #[test]
    fn malformed_ids_are_protocol_errors() {
        let err = remote_parent(&TraceContext {
            trace_id: "not-hex".into(),
            span_id: "00f067aa0ba902b7".into(),
            trace_flags: "01".into(),
        })
        .unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }
}
