//! Span data model.
//!
//! A [`Span`] records one unit of work: identity (trace id, span id, parent),
//! operation name, typed attributes, events, links to other spans, a status,
//! and start/end timestamps. Spans are created open, mutated while open, and
//! become immutable once finished.

use crate::attrs::Attributes;
use rand::Rng;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable span identity: 128-bit trace id shared by every span in a trace,
/// 64-bit span id unique within the process with overwhelming probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
}

impl SpanContext {
    /// Zero is not a valid id for either field.
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }
}

/// Span kind. Every span this layer produces is internal work; no
/// client/server/producer/consumer distinction is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Internal,
}

/// Span completion status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { description: String },
}

/// Status code accepted by the public status-setting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
}

/// A timestamped event attached to a span. Explicit events and log-derived
/// events share this shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nanos: u64,
    pub attributes: Attributes,
}

/// A reference from one span to another, used by the async-root pattern to
/// keep detached work discoverable from its originating trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanLink {
    pub trace_id: u128,
    pub span_id: u64,
    pub attributes: Attributes,
}

impl SpanLink {
    pub fn to(context: SpanContext) -> Self {
        Self {
            trace_id: context.trace_id,
            span_id: context.span_id,
            attributes: Attributes::new(),
        }
    }
}

/// A record of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub name: String,
    pub kind: SpanKind,
    pub context: SpanContext,
    pub parent_span_id: Option<u64>,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub status: SpanStatus,
    pub start_time_unix_nanos: u64,
    /// Zero while the span is open.
    pub end_time_unix_nanos: u64,
}

impl Span {
    /// Creates an open span starting now.
    pub fn new(context: SpanContext, parent_span_id: Option<u64>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpanKind::Internal,
            context,
            parent_span_id,
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
            status: SpanStatus::Unset,
            start_time_unix_nanos: now_unix_nanos(),
            end_time_unix_nanos: 0,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: crate::attrs::AttributeValue) {
        self.attributes.set(key, value);
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        self.events.push(SpanEvent {
            name: name.into(),
            time_unix_nanos: now_unix_nanos(),
            attributes,
        });
    }

    pub fn add_link(&mut self, link: SpanLink) {
        self.links.push(link);
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// Stamps the end timestamp. The first call wins; later calls are no-ops.
    pub fn finish(&mut self) {
        if self.end_time_unix_nanos == 0 {
            self.end_time_unix_nanos = now_unix_nanos();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time_unix_nanos != 0
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time_unix_nanos
            .saturating_sub(self.start_time_unix_nanos)
    }
}

/// An ordered batch of finished spans. Bounded by the batcher that built it;
/// never merged or split afterwards.
#[derive(Debug, Clone, Default)]
pub struct SpanBatch {
    pub spans: Vec<Span>,
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self { spans }
    }

    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Random span identity source.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new_trace_id(&self) -> u128 {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return id;
            }
        }
    }

    pub fn new_span_id(&self) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return id;
            }
        }
    }
}

pub(crate) fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeValue;

    fn span() -> Span {
        Span::new(
            SpanContext {
                trace_id: 1,
                span_id: 2,
            },
            None,
            "op",
        )
    }

    #[test]
    fn finish_stamps_end_once() {
        let mut s = span();
        assert!(!s.is_finished());
        s.finish();
        let first_end = s.end_time_unix_nanos;
        assert!(s.is_finished());
        s.finish();
        assert_eq!(s.end_time_unix_nanos, first_end);
    }

    #[test]
    fn attribute_last_write_wins() {
        let mut s = span();
        s.set_attribute("k", AttributeValue::I64(1));
        s.set_attribute("k", AttributeValue::I64(2));
        assert_eq!(s.attributes.len(), 1);
        assert_eq!(s.attributes.get("k"), Some(&AttributeValue::I64(2)));
    }

    #[test]
    fn generated_ids_are_nonzero() {
        let ids = IdGenerator;
        for _ in 0..64 {
            assert_ne!(ids.new_trace_id(), 0);
            assert_ne!(ids.new_span_id(), 0);
        }
    }

    #[test]
    fn link_copies_identity() {
        let ctx = SpanContext {
            trace_id: 7,
            span_id: 9,
        };
        let link = SpanLink::to(ctx);
        assert_eq!(link.trace_id, 7);
        assert_eq!(link.span_id, 9);
        assert!(link.attributes.is_empty());
    }
}
