use serde_json::{json, Value};

use fastworkflow_core::types::TraceEvent;
use fastworkflow_runtime::StreamFormat;

/// Serialize a trace-event kind to its wire name (snake_case).
fn kind_name(event: &TraceEvent) -> String {
    serde_json::to_value(event.kind)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "event".to_string())
}

/// One wire frame for a trace event.
///
/// NDJSON: a single line `{"kind":..,"data":..,"ts":..}\n`.
/// SSE: `event: <kind>\ndata: <json>\n\n`.
pub fn format_trace(format: StreamFormat, event: &TraceEvent) -> String {
    match format {
        StreamFormat::Ndjson => {
            let line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
            format!("{line}\n")
        }
        StreamFormat::Sse => {
            let data = json!({ "data": event.data, "ts": event.ts });
            format!("event: {}\ndata: {}\n\n", kind_name(event), data)
        }
    }
}

/// The terminal frame carrying the invocation result.
pub fn format_result(format: StreamFormat, result: &Value) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    match format {
        StreamFormat::Ndjson => {
            let line = json!({ "kind": "result", "data": result, "ts": ts });
            format!("{line}\n")
        }
        StreamFormat::Sse => {
            let data = json!({ "data": result, "ts": ts });
            format!("event: result\ndata: {data}\n\n")
        }
    }
}

pub fn content_type(format: StreamFormat) -> &'static str {
    match format {
        StreamFormat::Ndjson => "application/x-ndjson",
        StreamFormat::Sse => "text/event-stream",
    }
}
