use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

use fastworkflow_core::types::{TraceEvent, TraceKind, TraceSink};

/// Collects trace events for one invocation.
///
/// Events are appended to an in-memory buffer (returned in the final
/// response) and mirrored to an optional live channel feeding the NDJSON/SSE
/// stream. Buffer order is the emission order; a slow stream consumer loses
/// live events but never buffer events.
pub struct TraceCollector {
    buffer: Mutex<Vec<TraceEvent>>,
    live: Option<mpsc::Sender<TraceEvent>>,
}

impl TraceCollector {
    pub fn new(live: Option<mpsc::Sender<TraceEvent>>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            live,
        }
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.buffer.into_inner().unwrap_or_default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.buffer.lock().unwrap().clone()
    }
}

impl TraceSink for TraceCollector {
    fn emit(&self, event: TraceEvent) {
        if let Some(live) = &self.live {
            if let Err(e) = live.try_send(event.clone()) {
                // The in-memory buffer still records the event; only the
                // live mirror is lossy under backpressure.
                warn!(error = %e, "live trace channel saturated");
            }
        }
        self.buffer.lock().unwrap().push(event);
    }
}

/// Emit helper for events constructed at the runtime layer.
pub fn emit(sink: &dyn TraceSink, kind: TraceKind, data: serde_json::Value) {
    sink.emit(TraceEvent::new(kind, data));
}
