//! Trace context and the span lifecycle API.
//!
//! A [`TraceContext`] is the ambient handle for "the currently active span":
//! an immutable value threaded explicitly through call chains and across task
//! boundaries. It carries no span, a remote parent extracted at a process
//! boundary, or exactly one active span; starting a span never mutates a
//! context, it returns a new one nesting the child.
//!
//! Every operation here is no-op-safe: calls against an absent, finished, or
//! non-recording span return silently. Tracing must never change application
//! control flow.

use crate::attrs::{convert_attrs, convert_value, AttrMap, Attributes};
use crate::provider::{global_tracer, Tracer};
use crate::span::{Span, SpanContext, SpanLink, SpanStatus, StatusCode};
use std::future::Future;
use std::sync::{Arc, Mutex};

/// The span carried by a [`TraceContext`], shared by all clones of the
/// context so every holder observes the same lifecycle.
pub(crate) struct ActiveSpan {
    tracer: Arc<Tracer>,
    context: SpanContext,
    /// `None` from creation for sampled-out spans; taken exactly once on
    /// finish, which is what makes finishing idempotent.
    data: Mutex<Option<Span>>,
}

impl ActiveSpan {
    pub(crate) fn context(&self) -> SpanContext {
        self.context
    }

    pub(crate) fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.data.lock().map_or(false, |guard| guard.is_some())
    }

    /// Runs `f` against the span if it is still recording.
    pub(crate) fn with_span(&self, f: impl FnOnce(&mut Span)) {
        if let Ok(mut guard) = self.data.lock() {
            if let Some(span) = guard.as_mut() {
                f(span);
            }
        }
    }

    /// Ends the span and hands it to the export pipeline. The span data is
    /// taken out under the lock, so a second call finds nothing to do; the
    /// handoff itself runs outside the lock because a block-policy queue may
    /// stall briefly.
    fn finish(&self) {
        let taken = match self.data.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut span) = taken {
            span.finish();
            self.tracer.on_span_finished(span);
        }
    }
}

#[derive(Clone, Default)]
enum ContextSlot {
    #[default]
    Empty,
    /// Parent identity extracted at a process boundary; not recording here.
    Remote(SpanContext),
    Active(Arc<ActiveSpan>),
}

/// Immutable ambient handle for the currently active span, plus baggage.
///
/// Cheap to clone and safe to send across tasks; pass it by value wherever
/// the work goes.
#[derive(Clone, Default)]
pub struct TraceContext {
    slot: ContextSlot,
    baggage: Arc<Vec<(String, String)>>,
}

impl TraceContext {
    /// A context carrying no span.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_remote(context: SpanContext, baggage: Vec<(String, String)>) -> Self {
        Self {
            slot: ContextSlot::Remote(context),
            baggage: Arc::new(baggage),
        }
    }

    fn child(&self, active: Arc<ActiveSpan>) -> Self {
        Self {
            slot: ContextSlot::Active(active),
            baggage: Arc::clone(&self.baggage),
        }
    }

    /// Identity of the span this context carries, if any. Remains available
    /// after the span finishes, so propagation keeps working.
    pub fn span_context(&self) -> Option<SpanContext> {
        match &self.slot {
            ContextSlot::Empty => None,
            ContextSlot::Remote(context) => Some(*context),
            ContextSlot::Active(active) => Some(active.context()),
        }
    }

    /// True while the carried span is open and recording.
    pub fn is_recording(&self) -> bool {
        match &self.slot {
            ContextSlot::Active(active) => active.is_recording(),
            _ => false,
        }
    }

    pub fn baggage(&self) -> impl Iterator<Item = (&str, &str)> {
        self.baggage.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new context with the baggage entry added or replaced.
    pub fn with_baggage_entry(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        let mut entries = (*self.baggage).clone();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
        Self {
            slot: self.slot.clone(),
            baggage: Arc::new(entries),
        }
    }

    pub(crate) fn active(&self) -> Option<&Arc<ActiveSpan>> {
        match &self.slot {
            ContextSlot::Active(active) => Some(active),
            _ => None,
        }
    }

    /// The tracer that created the carried span, if any.
    fn tracer(&self) -> Option<Arc<Tracer>> {
        self.active().map(|active| Arc::clone(active.tracer()))
    }
}

impl Tracer {
    /// Starts a span as a child of the span carried by `ctx` (active or
    /// remote), or as a new root. Returns a new context carrying the span.
    pub fn start_span(
        self: &Arc<Self>,
        ctx: &TraceContext,
        subsystem: &str,
        operation_name: &str,
        attrs: Option<AttrMap>,
    ) -> TraceContext {
        // reserved for future namespacing
        let _ = subsystem;

        let (trace_id, parent_span_id) = match ctx.span_context() {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (self.ids.new_trace_id(), None),
        };
        self.open_span(ctx, trace_id, parent_span_id, operation_name, attrs, Vec::new())
    }

    /// Starts a new root span (fresh trace id) linked back to the span active
    /// in `ctx`, when that span exists and is recording. Detached work must
    /// not be timed as a child of its originator — the originator may finish
    /// first — but the causal relationship stays discoverable via the link.
    pub fn async_span(
        self: &Arc<Self>,
        ctx: &TraceContext,
        subsystem: &str,
        operation_name: &str,
        attrs: Option<AttrMap>,
    ) -> TraceContext {
        let _ = subsystem;

        let links = match ctx.active() {
            Some(active) if active.is_recording() => vec![SpanLink::to(active.context())],
            _ => Vec::new(),
        };
        let trace_id = self.ids.new_trace_id();
        self.open_span(ctx, trace_id, None, operation_name, attrs, links)
    }

    fn open_span(
        self: &Arc<Self>,
        ctx: &TraceContext,
        trace_id: u128,
        parent_span_id: Option<u64>,
        operation_name: &str,
        attrs: Option<AttrMap>,
        links: Vec<SpanLink>,
    ) -> TraceContext {
        let context = SpanContext {
            trace_id,
            span_id: self.ids.new_span_id(),
        };
        let data = if self.sampler.should_sample() {
            let mut span = Span::new(context, parent_span_id, operation_name);
            if let Some(map) = attrs {
                span.attributes = convert_attrs(&map);
            }
            for link in links {
                span.add_link(link);
            }
            self.on_span_started();
            Some(span)
        } else {
            None
        };
        ctx.child(Arc::new(ActiveSpan {
            tracer: Arc::clone(self),
            context,
            data: Mutex::new(data),
        }))
    }
}

/// Starts a span as a child of whatever `ctx` carries, via the tracer that
/// created `ctx`'s span or the process-wide tracer. With neither available
/// the context is returned unchanged.
pub fn start_span(
    ctx: &TraceContext,
    subsystem: &str,
    operation_name: &str,
    attrs: Option<AttrMap>,
) -> TraceContext {
    match ctx.tracer().or_else(global_tracer) {
        Some(tracer) => tracer.start_span(ctx, subsystem, operation_name, attrs),
        None => ctx.clone(),
    }
}

/// Ends the span carried by `ctx` and hands it to the export pipeline.
/// Exactly one handoff happens no matter how many times this is called;
/// a context with no span is left alone.
pub fn finish_span(ctx: &TraceContext) {
    if let Some(active) = ctx.active() {
        active.finish();
    }
}

/// Attaches one attribute to the active span. Last write per key wins.
pub fn add_span_attribute(
    ctx: &TraceContext,
    key: &str,
    value: impl Into<serde_json::Value>,
) {
    let value = convert_value(&value.into());
    if let Some(active) = ctx.active() {
        active.with_span(|span| span.set_attribute(key, value));
    }
}

/// Appends an event with one attribute to the active span.
pub fn add_span_event(
    ctx: &TraceContext,
    event_name: &str,
    key: &str,
    value: impl Into<serde_json::Value>,
) {
    let value = convert_value(&value.into());
    if let Some(active) = ctx.active() {
        active.with_span(|span| {
            let mut attributes = Attributes::new();
            attributes.set(key, value);
            span.add_event(event_name, attributes);
        });
    }
}

/// Sets the active span's status to Ok or Error with a description.
pub fn set_span_status(ctx: &TraceContext, code: StatusCode, description: &str) {
    let status = match code {
        StatusCode::Ok => SpanStatus::Ok,
        StatusCode::Error => SpanStatus::Error {
            description: description.to_string(),
        },
    };
    if let Some(active) = ctx.active() {
        active.with_span(|span| span.set_status(status));
    }
}

/// Appends a pre-built attribute set as an event on the active span. Used by
/// the log correlation hook; in-memory mutation only, no I/O.
pub(crate) fn append_span_event(ctx: &TraceContext, event_name: &str, attributes: Attributes) {
    if let Some(active) = ctx.active() {
        active.with_span(|span| span.add_event(event_name, attributes));
    }
}

/// Starts a new root span linked back to `ctx`'s active recording span, if
/// any. See [`Tracer::async_span`].
pub fn async_span(
    ctx: &TraceContext,
    subsystem: &str,
    operation_name: &str,
    attrs: Option<AttrMap>,
) -> TraceContext {
    match ctx.tracer().or_else(global_tracer) {
        Some(tracer) => tracer.async_span(ctx, subsystem, operation_name, attrs),
        None => TraceContext::new(),
    }
}

/// Spawns detached work under its own async-linked root span. The span's
/// lifetime is bound to the spawned task, never the caller's stack: it is
/// finished when the task's future completes, however the caller's own span
/// ends in the meantime.
pub fn spawn_linked<F, Fut>(
    ctx: &TraceContext,
    subsystem: &str,
    operation_name: &str,
    attrs: Option<AttrMap>,
    f: F,
) -> tokio::task::JoinHandle<Fut::Output>
where
    F: FnOnce(TraceContext) -> Fut + Send + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let task_ctx = async_span(ctx, subsystem, operation_name, attrs);
    tokio::spawn(async move {
        let output = f(task_ctx.clone()).await;
        finish_span(&task_ctx);
        output
    })
}
