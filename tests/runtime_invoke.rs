mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::MockToolServer;
use redpanda_agents::runtime::proto::agent_runtime_client::AgentRuntimeClient;
use redpanda_agents::runtime::proto::{
    message, value, InvokeAgentRequest, Message, Span, TraceContext, Value,
};
use redpanda_agents::runtime::{payload, run_server, RuntimeService};
use redpanda_agents::telemetry::{otel_layer, span_capture_provider};
use redpanda_agents::{Agent, ModelResponse, RemoteToolEndpoint, ScriptedModel, ToolCall};
use serde_json::json;
use tokio::net::TcpListener;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing_subscriber::layer::SubscriberExt;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const PARENT_SPAN_ID: &str = "00f067aa0ba902b7";

fn bytes_request(text: &str) -> InvokeAgentRequest {
    InvokeAgentRequest {
        message: Some(Message {
            metadata: BTreeMap::from([
                ("topic".to_string(), Value::string("questions")),
                ("partition".to_string(), Value::of(value::Kind::IntegerValue(3))),
            ]),
            payload: Some(message::Payload::Bytes(text.as_bytes().to_vec())),
        }),
        trace_context: None,
    }
}

fn traced(mut request: InvokeAgentRequest, flags: &str) -> InvokeAgentRequest {
    request.trace_context = Some(TraceContext {
        trace_id: TRACE_ID.into(),
        span_id: PARENT_SPAN_ID.into(),
        trace_flags: flags.into(),
    });
    request
}

fn output_text(message: &Option<Message>) -> String {
    match message.as_ref().and_then(|m| m.payload.as_ref()) {
        Some(message::Payload::Bytes(bytes)) => String::from_utf8(bytes.clone()).unwrap(),
        other => panic!("unexpected payload {other:?}"),
    }
}

fn names(spans: &[Span]) -> Vec<&str> {
    spans.iter().map(|span| span.name.as_str()).collect()
}

#[tokio::test]
async fn bytes_payload_round_trips_with_metadata() {
    let model = ScriptedModel::new(vec![ModelResponse::text("an answer")]);
    let service = RuntimeService::new(Arc::new(
        Agent::new("answerer", "openai/gpt-4o").with_provider(model.clone()),
    ));

    let request = bytes_request("a question");
    let response = service.invoke(request.clone()).await.unwrap();

    assert_eq!(output_text(&response.message), "an answer");
    assert_eq!(
        response.message.unwrap().metadata,
        request.message.unwrap().metadata
    );
    assert!(response.trace.is_none());
    assert_eq!(
        model.requests()[0].messages[0].text_content(),
        Some("a question")
    );
}

#[tokio::test]
async fn structured_payload_reaches_the_agent_as_canonical_json() {
    let model = ScriptedModel::new(vec![ModelResponse::text("ok")]);
    let service = RuntimeService::new(Arc::new(
        Agent::new("reader", "openai/gpt-4o").with_provider(model.clone()),
    ));

    let request = InvokeAgentRequest {
        message: Some(Message {
            metadata: BTreeMap::new(),
            payload: Some(message::Payload::Structured(payload::from_json(
                &json!({"b": "x", "a": 1, "c": [true, null]}),
            ))),
        }),
        trace_context: None,
    };
    service.invoke(request).await.unwrap();

    assert_eq!(
        model.requests()[0].messages[0].text_content(),
        Some(r#"{"a":1,"b":"x","c":[true,null]}"#)
    );
}

#[tokio::test]
async fn missing_message_is_empty_input() {
    let model = ScriptedModel::new(vec![ModelResponse::text("ok")]);
    let service = RuntimeService::new(Arc::new(
        Agent::new("reader", "openai/gpt-4o").with_provider(model.clone()),
    ));

    let response = service.invoke(InvokeAgentRequest::default()).await.unwrap();
    assert_eq!(output_text(&response.message), "ok");
    assert_eq!(model.requests()[0].messages[0].text_content(), Some(""));
}

#[tokio::test]
async fn traced_invocation_returns_its_span_forest() {
    let provider = span_capture_provider();
    let subscriber = tracing_subscriber::registry().with(otel_layer(&provider));
    let _default = tracing::subscriber::set_default(subscriber);

    let server = MockToolServer::with_tools(&["forecast"]);
    let addr = server.spawn().await;
    let model = ScriptedModel::new(vec![
        ModelResponse::tool_calls(vec![ToolCall::new(
            "call_1",
            "forecast",
            r#"{"city":"Bergen"}"#,
        )]),
        ModelResponse::text("sunny"),
    ]);
    let agent = Agent::new("planner", "openai/gpt-4o")
        .with_endpoint(RemoteToolEndpoint::streamable_http(format!("http://{addr}/mcp")))
        .with_provider(model);
    let service = RuntimeService::new(Arc::new(agent));

    let response = service
        .invoke(traced(bytes_request("plan"), "01"))
        .await
        .unwrap();
    assert_eq!(output_text(&response.message), "sunny");

    let spans = response.trace.expect("trace requested").spans;
    assert_eq!(names(&spans), vec!["agent_invoke"]);
    let root = &spans[0];
    assert_eq!(root.span_id.len(), 16);
    assert_ne!(root.span_id, PARENT_SPAN_ID);
    assert!(root.start_time.is_some() && root.end_time.is_some());
    assert_eq!(
        names(&root.child_spans),
        vec!["chat_completion", "tool_call", "chat_completion"]
    );

    let completion = &root.child_spans[0];
    assert_eq!(completion.attributes["model"], Value::string("openai/gpt-4o"));

    let tool_call = &root.child_spans[1];
    assert_eq!(tool_call.attributes["name"], Value::string("forecast"));
    assert_eq!(
        tool_call.attributes["arguments"],
        Value::string(r#"{"city":"Bergen"}"#)
    );
}

#[tokio::test]
async fn unsampled_caller_gets_an_empty_trace() {
    let provider = span_capture_provider();
    let subscriber = tracing_subscriber::registry().with(otel_layer(&provider));
    let _default = tracing::subscriber::set_default(subscriber);

    let model = ScriptedModel::new(vec![ModelResponse::text("ok")]);
    let service = RuntimeService::new(Arc::new(
        Agent::new("quiet", "openai/gpt-4o").with_provider(model),
    ));

    let response = service
        .invoke(traced(bytes_request("hi"), "00"))
        .await
        .unwrap();
    assert!(response.trace.expect("trace requested").spans.is_empty());
}

#[tokio::test]
async fn concurrent_invocations_keep_their_own_spans() {
    let provider = span_capture_provider();
    let subscriber = tracing_subscriber::registry().with(otel_layer(&provider));
    let _default = tracing::subscriber::set_default(subscriber);

    let service = |answer: &str| {
        RuntimeService::new(Arc::new(
            Agent::new("worker", "openai/gpt-4o")
                .with_provider(ScriptedModel::new(vec![ModelResponse::text(answer)])),
        ))
    };
    let (first, second) = (service("one"), service("two"));

    let (a, b) = tokio::join!(
        first.invoke(traced(bytes_request("x"), "01")),
        second.invoke(traced(bytes_request("y"), "01")),
    );
    for response in [a.unwrap(), b.unwrap()] {
        let spans = response.trace.unwrap().spans;
        assert_eq!(names(&spans), vec!["agent_invoke"]);
        assert_eq!(names(&spans[0].child_spans), vec!["chat_completion"]);
    }
}

#[tokio::test]
async fn grpc_round_trip_with_health_and_error_mapping() {
    let model = ScriptedModel::new(vec![ModelResponse::text("served")]);
    let agent = Arc::new(Agent::new("served", "openai/gpt-4o").with_provider(model));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_server(agent, listener, "plugin"));
    let url = format!("http://{addr}");

    let channel = tonic::transport::Endpoint::new(url.clone())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut health = HealthClient::new(channel);
    let status = health
        .check(HealthCheckRequest {
            service: "plugin".into(),
        })
        .await
        .unwrap()
        .into_inner()
        .status;
    assert_eq!(status, ServingStatus::Serving as i32);

    let mut client = AgentRuntimeClient::connect(url).await.unwrap();
    let response = client
        .invoke_agent(bytes_request("hello"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(output_text(&response.message), "served");

    // The script is exhausted, so the next run fails inside the agent.
    let status = client
        .invoke_agent(bytes_request("again"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert_eq!(
        status.message(),
        "language model error: scripted model ran out of responses"
    );
}

#[tokio::test]
async fn invalid_utf8_payload_is_reported_as_internal() {
    let model = ScriptedModel::new(vec![ModelResponse::text("never")]);
    let agent = Arc::new(Agent::new("strict", "openai/gpt-4o").with_provider(model.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_server(agent, listener, "plugin"));

    let mut client = AgentRuntimeClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let mut request = bytes_request("");
    if let Some(message) = request.message.as_mut() {
        message.payload = Some(message::Payload::Bytes(vec![0xc3, 0x28]));
    }
    let status = client.invoke_agent(request).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().starts_with("protocol error: payload is not valid UTF-8"));
    assert_eq!(model.request_count(), 0);
}
