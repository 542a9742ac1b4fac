use std::collections::HashMap;
use std::future::Future;
use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tracing::{error, info};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::proto::agent_runtime_server::AgentRuntimeServer;
use super::service::RuntimeService;
use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::mcp::RemoteToolEndpoint;
use crate::telemetry;

const CORE_PROTOCOL_VERSION: u32 = 1;
const APP_PROTOCOL_VERSION: u32 = 1;

/// Handshake line a host reads from stdout to find the plugin.
pub fn discovery_line(addr: SocketAddr) -> String {
    format!("{CORE_PROTOCOL_VERSION}|{APP_PROTOCOL_VERSION}|tcp|{addr}|grpc")
}

/// Serve `agent` with configuration from the environment until SIGINT or
/// SIGTERM.
pub async fn serve(agent: Agent) -> Result<()> {
    let config = RuntimeConfig::from_env()?;
    let _telemetry = telemetry::init_tracing(&config)?;
    serve_with_config(agent, &config).await
}

pub async fn serve_with_config(mut agent: Agent, config: &RuntimeConfig) -> Result<()> {
    if let Some(url) = &config.mcp_server {
        agent.add_endpoint(trace_propagating_endpoint(url));
    }

    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", discovery_line(addr))?;
        stdout.flush()?;
    }
    info!(%addr, agent = %agent.name(), "agent runtime listening");

    tokio::select! {
        served = run_server(Arc::new(agent), listener, &config.health.service) => served,
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping");
            Ok(())
        }
    }
}

/// Serve the agent runtime and health services on an already bound listener.
pub async fn run_server(agent: Arc<Agent>, listener: TcpListener, health_service: &str) -> Result<()> {
    let (mut reporter, health) = tonic_health::server::health_reporter();
    reporter
        .set_service_status(health_service, ServingStatus::Serving)
        .await;

    Server::builder()
        .add_service(health)
        .add_service(AgentRuntimeServer::new(RuntimeService::new(agent)))
        .serve_with_incoming(TcpListenerStream::new(listener))
        .await?;
    Ok(())
}

/// SSE endpoint whose requests carry the `traceparent` of the span current
/// at request time.
pub fn trace_propagating_endpoint(url: impl Into<String>) -> RemoteToolEndpoint {
    RemoteToolEndpoint::sse(url).with_headers(current_trace_headers)
}

fn current_trace_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let cx = tracing::Span::current().context();
    TraceContextPropagator::new().inject_context(&cx, &mut headers);
    headers
}

async fn shutdown_signal() {
    let ctrl_c = on_signal("SIGINT", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = on_signal("SIGTERM", async {
        let mut stream =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        stream.recv().await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Resolves once `signal` fires. A handler that cannot be installed never
/// resolves, so the server keeps running.
async fn on_signal<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        error!(signal = name, error = %err, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
}
