//! Request-tracing instrumentation layer
//!
//! Lets application code mark logical operations as spans, attach structured
//! metadata and log events to them, link fire-and-forget background work back
//! to its originating trace, and ship finished spans to one or more durable
//! sinks without blocking request-handling threads.
//!
//! The flow: [`start_span`]/[`finish_span`] manage span lifecycles on an
//! ambient [`TraceContext`] handle → finished spans enter the
//! [`pipeline::BatchPipeline`], which batches and fans them out to every
//! registered [`exporter::SpanExporter`] with per-sink queues and failure
//! isolation → log calls made through [`trace_log`] while a span is active
//! surface as span events in addition to reaching the shared log stream.
//!
//! Tracing is best-effort infrastructure: no operation here may fail an
//! application request. Span calls against absent or finished spans are
//! silent no-ops, and a sink's failure costs at most that sink's batch.

pub mod attrs;
pub mod context;
pub mod error;
pub mod exporter;
pub mod logging;
pub mod pipeline;
pub mod propagation;
pub mod provider;
pub mod span;

// Re-export main types
pub use attrs::{attrs_from, convert_attrs, AttrMap, AttributeValue, Attributes, KeyValue};
pub use context::{
    add_span_attribute, add_span_event, async_span, finish_span, set_span_status, spawn_linked,
    start_span, TraceContext,
};
pub use error::InitError;
pub use exporter::{
    ExportError, LogExporter, NullExporter, RetryConfig, RetryingExporter, SpanExporter,
    SpanExporterBoxed, StdoutExporter,
};
pub use logging::{init_logging, trace_log, LogConfig, LogSink, LoggerGuard, TraceLog};
pub use pipeline::{BatchConfig, BatchPipeline, ExportMetrics, ExporterConfig, QueuePolicy};
pub use propagation::{extract, inject};
pub use provider::{
    global_tracer, init_tracer, ExporterMode, Sampler, Tracer, TracerConfig, TracerHandle,
    TracerMetrics,
};
pub use span::{
    IdGenerator, Span, SpanBatch, SpanContext, SpanEvent, SpanKind, SpanLink, SpanStatus,
    StatusCode,
};
