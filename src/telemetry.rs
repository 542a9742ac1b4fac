//! Process-wide tracing setup.
//!
//! Logs go to stderr so stdout stays free for the discovery line. Spans are
//! also bridged into OpenTelemetry, where the only span processor hands
//! finished spans to the invocation that produced them.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::runtime::spans::PassthroughProcessor;

pub const TRACER_NAME: &str = "redpanda.agents";

/// Keeps the tracer provider alive. Drop it on shutdown.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: TracerProvider,
}

impl TelemetryGuard {
    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }
}

/// Tracer provider whose spans are captured per invocation and never exported.
pub fn span_capture_provider() -> TracerProvider {
    TracerProvider::builder()
        .with_span_processor(PassthroughProcessor)
        .build()
}

/// `tracing` layer that turns INFO-and-above spans into OpenTelemetry spans
/// on `provider`.
pub fn otel_layer<S>(provider: &TracerProvider) -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber
        + for<'span> tracing_subscriber::registry::LookupSpan<'span>
        + Send
        + Sync,
{
    tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(TRACER_NAME))
        .with_location(false)
        .with_threads(false)
        .with_tracked_inactivity(false)
        .with_filter(LevelFilter::INFO)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured filter.
pub fn init_tracing(config: &RuntimeConfig) -> Result<TelemetryGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.filter).map_err(|err| {
            AgentError::Config(format!(
                "invalid log filter {:?}: {err}",
                config.logging.filter
            ))
        })?,
    };

    let fmt_layer = if config.logging.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_filter(filter)
            .boxed()
    };

    let provider = span_capture_provider();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer(&provider))
        .try_init()
        .map_err(|err| AgentError::Config(format!("tracing already initialized: {err}")))?;

    Ok(TelemetryGuard { provider })
}
