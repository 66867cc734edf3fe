//! Opaque tracer port consumed by the dispatcher (§1 out-of-scope collaborators).
//!
//! The core never depends on a concrete tracing backend; it only calls
//! `start/finish/set_tag/set_error` on whatever span implementation the host
//! application wires in. The default [`TracingSpan`] backend uses the
//! `tracing` crate directly, matching the ambient logging stack (§1.1).

use std::fmt;

/// A single in-flight trace span.
pub trait Span: Send {
    fn set_tag(&mut self, key: &str, value: &str);
    fn set_error(&mut self, error: &str);
    fn finish(self: Box<Self>);
    fn trace_id(&self) -> String;
}

/// Opens spans for dispatch attempts.
pub trait Tracer: Send + Sync {
    fn start(&self, operation_name: &str) -> Box<dyn Span>;
}

/// Default tracer backed by `tracing` spans. `trace_id` is a freshly minted
/// UUID per span, matching the source's per-attempt `traceId` field (§3).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSpanTracer;

impl Tracer for TracingSpanTracer {
    fn start(&self, operation_name: &str) -> Box<dyn Span> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("dispatch", operation = operation_name, trace_id = %trace_id);
        Box::new(TracingSpanHandle {
            _guard: span,
            trace_id,
            errored: false,
        })
    }
}

struct TracingSpanHandle {
    _guard: tracing::Span,
    trace_id: String,
    errored: bool,
}

impl fmt::Debug for TracingSpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingSpanHandle")
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

impl Span for TracingSpanHandle {
    fn set_tag(&mut self, key: &str, value: &str) {
        tracing::debug!(tag.key = key, tag.value = value, "span tag");
    }

    fn set_error(&mut self, error: &str) {
        self.errored = true;
        tracing::warn!(error, trace_id = %self.trace_id, "span errored");
    }

    fn finish(self: Box<Self>) {
        tracing::debug!(trace_id = %self.trace_id, errored = self.errored, "span finished");
    }

    fn trace_id(&self) -> String {
        self.trace_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_assigns_a_trace_id() {
        let tracer = TracingSpanTracer;
        let span = tracer.start("dispatch.email");
        assert!(!span.trace_id().is_empty());
        span.finish();
    }

    #[test]
    fn distinct_spans_get_distinct_trace_ids() {
        let tracer = TracingSpanTracer;
        let a = tracer.start("a");
        let b = tracer.start("b");
        assert_ne!(a.trace_id(), b.trace_id());
    }
}
