//! Canonical text rendering of typed payload values.
//!
//! Structured payloads reach the agent as JSON text. Rendering is
//! deterministic: struct keys come out sorted, doubles use the shortest
//! round-trip form, bytes become standard base64 strings and timestamps
//! become RFC 3339 strings in UTC.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat};

use super::proto::{message, value, ListValue, Message, StructValue, Value};
use crate::error::{AgentError, Result};

/// Render `value` as canonical JSON text.
pub fn canonical_text(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Agent input for an inbound message. A missing payload is empty text.
pub fn decode_input(message: &Message) -> Result<String> {
    match &message.payload {
        Some(message::Payload::Bytes(bytes)) => String::from_utf8(bytes.clone())
            .map_err(|err| AgentError::Protocol(format!("payload is not valid UTF-8: {err}"))),
        Some(message::Payload::Structured(value)) => canonical_text(value),
        None => Ok(String::new()),
    }
}

fn write_value(value: &Value, out: &mut String) -> Result<()> {
    let Some(kind) = &value.kind else {
        return Err(AgentError::Protocol("typed value has no kind set".into()));
    };
    match kind {
        value::Kind::NullValue(_) => out.push_str("null"),
        value::Kind::BoolValue(flag) => out.push_str(if *flag { "true" } else { "false" }),
        value::Kind::IntegerValue(number) => out.push_str(&number.to_string()),
        value::Kind::DoubleValue(number) => out.push_str(&format_double(*number)),
        value::Kind::StringValue(text) => out.push_str(&serde_json::to_string(text)?),
        value::Kind::BytesValue(bytes) => {
            out.push_str(&serde_json::to_string(&STANDARD.encode(bytes))?)
        }
        value::Kind::TimestampValue(ts) => {
            out.push_str(&serde_json::to_string(&format_timestamp(ts)?)?)
        }
        value::Kind::ListValue(ListValue { values }) => {
            out.push('[');
            for (index, item) in values.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        value::Kind::StructValue(StructValue { fields }) => {
            out.push('{');
            for (index, (key, item)) in fields.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_value(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Shortest round-trip decimal; NaN and infinities have no JSON form.
fn format_double(number: f64) -> String {
    serde_json::Number::from_f64(number)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "null".to_string())
}

/// RFC 3339 in UTC with a `Z` suffix and 0, 3, 6 or 9 fractional digits.
pub(crate) fn format_timestamp(ts: &prost_types::Timestamp) -> Result<String> {
    let nanos = u32::try_from(ts.nanos)
        .map_err(|_| AgentError::Protocol(format!("timestamp has negative nanos: {}", ts.nanos)))?;
    let instant = DateTime::from_timestamp(ts.seconds, nanos).ok_or_else(|| {
        AgentError::Protocol(format!(
            "timestamp out of range: {}s {}ns",
            ts.seconds, ts.nanos
        ))
    })?;
    Ok(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Typed value for a JSON value. Integers that fit `i64` stay integers.
pub fn from_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    let kind = match json {
        Json::Null => return Value::null(),
        Json::Bool(flag) => value::Kind::BoolValue(*flag),
        Json::Number(number) => match number.as_i64() {
            Some(integer) => value::Kind::IntegerValue(integer),
            None => value::Kind::DoubleValue(number.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(text) => value::Kind::StringValue(text.clone()),
        Json::Array(items) => value::Kind::ListValue(ListValue {
            values: items.iter().map(from_json).collect(),
        }),
        Json::Object(map) => value::Kind::StructValue(StructValue {
            fields: map
                .iter()
                .map(|(key, item)| (key.clone(), from_json(item)))
                .collect(),
        }),
    };
    Value::of(kind)
}
