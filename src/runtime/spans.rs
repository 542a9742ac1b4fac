//! Per-invocation span capture and span forest reconstruction.
//!
//! The tracer provider's only processor is [`PassthroughProcessor`]. Every
//! span that ends is handed to the [`SpanCollector`] installed for the
//! current task by [`collect_spans`], so concurrent invocations never see
//! each other's spans. Spans ending outside any collection scope are dropped.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use opentelemetry::trace::{SpanId, TraceResult};
use opentelemetry::{Array, Context, KeyValue};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span, SpanProcessor};

use super::proto::{self, value};

tokio::task_local! {
    static CURRENT_SPANS: SpanCollector;
}

/// The parts of a finished span the runtime reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSpan {
    pub span_id: SpanId,
    pub parent_span_id: SpanId,
    pub name: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Vec<KeyValue>,
}

impl From<SpanData> for CapturedSpan {
    fn from(span: SpanData) -> Self {
        Self {
            span_id: span.span_context.span_id(),
            parent_span_id: span.parent_span_id,
            name: span.name.into_owned(),
            start_time: span.start_time,
            end_time: span.end_time,
            attributes: span.attributes,
        }
    }
}

/// Finished spans in the order they ended.
#[derive(Debug, Clone, Default)]
pub struct SpanCollector {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

impl SpanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, span: CapturedSpan) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
    }

    pub fn take(&self) -> Vec<CapturedSpan> {
        std::mem::take(&mut *self.spans.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `future` with `collector` receiving every span that ends inside it.
pub async fn collect_spans<F: Future>(collector: SpanCollector, future: F) -> F::Output {
    CURRENT_SPANS.scope(collector, future).await
}

/// Forwards ended spans to the task's [`SpanCollector`]; exports nothing.
#[derive(Debug, Default)]
pub struct PassthroughProcessor;

impl SpanProcessor for PassthroughProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        // Spans ending outside an invocation have no collector and are dropped.
        CURRENT_SPANS
            .try_with(|collector| collector.push(span.into()))
            .ok();
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> TraceResult<()> {
        Ok(())
    }
}

// ─── Forest reconstruction ──────────────────────────────────────────────────

/// Rebuild parent/child structure from a flat list of captured spans.
///
/// A span is a root when it has no parent, when its parent is the caller's
/// `remote_parent`, or when its parent was not captured. Siblings keep their
/// order from `spans`.
pub fn build_forest(spans: &[CapturedSpan], remote_parent: Option<SpanId>) -> Vec<proto::Span> {
    let captured: HashSet<SpanId> = spans.iter().map(|span| span.span_id).collect();
    let mut roots = Vec::new();
    let mut children: HashMap<SpanId, Vec<&CapturedSpan>> = HashMap::new();

    for span in spans {
        let parent = span.parent_span_id;
        if parent == SpanId::INVALID
            || Some(parent) == remote_parent
            || !captured.contains(&parent)
        {
            roots.push(span);
        } else {
            children.entry(parent).or_default().push(span);
        }
    }

    roots
        .into_iter()
        .map(|span| convert(span, &children))
        .collect()
}

fn convert(span: &CapturedSpan, children: &HashMap<SpanId, Vec<&CapturedSpan>>) -> proto::Span {
    let child_spans = children
        .get(&span.span_id)
        .map(|kids| kids.iter().map(|child| convert(child, children)).collect())
        .unwrap_or_default();

    proto::Span {
        span_id: span.span_id.to_string(),
        name: span.name.clone(),
        start_time: Some(span.start_time.into()),
        end_time: Some(span.end_time.into()),
        attributes: span
            .attributes
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), attribute_value(&kv.value)))
            .collect(),
        child_spans,
    }
}

/// Scalars keep their type; arrays are carried as JSON text.
fn attribute_value(attribute: &opentelemetry::Value) -> proto::Value {
    let kind = match attribute {
        opentelemetry::Value::Bool(flag) => value::Kind::BoolValue(*flag),
        opentelemetry::Value::I64(number) => value::Kind::IntegerValue(*number),
        opentelemetry::Value::F64(number) => value::Kind::DoubleValue(*number),
        opentelemetry::Value::String(text) => value::Kind::StringValue(text.as_str().to_string()),
        opentelemetry::Value::Array(array) => value::Kind::StringValue(array_json(array)),
    };
    proto::Value::of(kind)
}

fn array_json(array: &Array) -> String {
    let json = match array {
        Array::Bool(items) => serde_json::json!(items),
        Array::I64(items) => serde_json::json!(items),
        Array::F64(items) => serde_json::json!(items),
        Array::String(items) => serde_json::json!(items
            .iter()
            .map(|item| item.as_str())
            .collect::<Vec<_>>()),
    };
    json.to_string()
}
