//! Trace context propagation.
//!
//! Trace context travels between components in the W3C `traceparent` header
//! (`00-<trace id>-<span id>-<flags>`). A [`Telemetry`] value is built once
//! in `main` and handed to every component that handles or emits messages.

use uuid::Uuid;

use crate::bus::Headers;

pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";
const SAMPLED: &str = "01";

/// Identifiers of the active span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    /// Start a new trace.
    pub fn root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// A child span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }

    pub fn to_traceparent(&self) -> String {
        format!("{}-{}-{}-{}", VERSION, self.trace_id, self.span_id, SAMPLED)
    }

    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let _flags = parts.next()?;

        let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
        if version.len() != 2
            || trace_id.len() != 32
            || span_id.len() != 16
            || !is_hex(trace_id)
            || !is_hex(span_id)
            || trace_id.chars().all(|c| c == '0')
        {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_lowercase(),
            span_id: span_id.to_lowercase(),
        })
    }
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Telemetry handle of one engine instance.
#[derive(Debug, Clone)]
pub struct Telemetry {
    service_name: String,
}

impl Telemetry {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Continue the trace carried by `headers`, or start a new one.
    pub fn extract(&self, headers: &Headers) -> TraceContext {
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|value| TraceContext::parse_traceparent(value))
            .map(|parent| parent.child())
            .unwrap_or_else(TraceContext::root)
    }

    /// Headers for an outgoing message emitted under `ctx`.
    pub fn inject(&self, ctx: &TraceContext) -> Headers {
        let mut headers = Headers::new();
        headers.insert(TRACEPARENT_HEADER.to_string(), ctx.child().to_traceparent());
        headers
    }

    /// Span covering the handling of one message. `execution_id` is recorded
    /// by the handler once the payload is decoded.
    pub fn span(&self, name: &'static str, ctx: &TraceContext) -> tracing::Span {
        tracing::info_span!(
            "handle",
            service = %self.service_name,
            handler = name,
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            execution_id = tracing::field::Empty,
        )
    }
}
