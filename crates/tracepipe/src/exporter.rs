//! Span exporters.
//!
//! The [`SpanExporter`] contract is the seam between the batch pipeline and
//! any sink: the built-in log and stdout exporters here, or an external
//! remote exporter (e.g. a gRPC collector client) registered by the caller.
//! Uses native async fn in traits; for dynamic dispatch use the object-safe
//! [`SpanExporterBoxed`] twin.

use crate::attrs::Attributes;
use crate::logging::LogSink;
use crate::span::{Span, SpanBatch};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error types for span export operations
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The shared log sink is unusable
    #[error("log sink unusable: {0}")]
    SinkClosed(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
}

/// Trait for exporting span batches to various backends.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Box<dyn SpanExporterBoxed>` or
/// `Arc<dyn SpanExporterBoxed>`.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of spans.
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Releases sink resources, finishing within `deadline` on a best-effort
    /// basis. The default does nothing.
    fn shutdown(&self, deadline: Duration) -> impl Future<Output = Result<(), ExportError>> + Send {
        async move {
            let _ = deadline;
            Ok(())
        }
    }

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Object-safe version of [`SpanExporter`] for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    /// Exports a batch of spans (boxed future for object safety).
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Boxed form of [`SpanExporter::shutdown`].
    fn shutdown_boxed(
        &self,
        deadline: Duration,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Blanket implementation: any SpanExporter can be used as SpanExporterBoxed
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn shutdown_boxed(
        &self,
        deadline: Duration,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.shutdown(deadline))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// One JSON line per span, multiplexed into the shared log stream next to
/// ordinary log records and distinguished from them by `logType`.
#[derive(serde::Serialize)]
struct SpanRecord<'a> {
    #[serde(rename = "traceID")]
    trace_id: String,
    #[serde(rename = "spanID")]
    span_id: String,
    /// Zero span id when the span is a root.
    #[serde(rename = "pSpanID")]
    p_span_id: String,
    attr: &'a Attributes,
    #[serde(rename = "opName")]
    op_name: &'a str,
    links: Vec<LinkRecord<'a>>,
    #[serde(rename = "startTime")]
    start_time: u64,
    #[serde(rename = "endTime")]
    end_time: u64,
    events: Vec<EventRecord<'a>>,
    #[serde(rename = "logType")]
    log_type: &'static str,
}

#[derive(serde::Serialize)]
struct LinkRecord<'a> {
    #[serde(rename = "traceID")]
    trace_id: String,
    #[serde(rename = "spanID")]
    span_id: String,
    attr: &'a Attributes,
}

#[derive(serde::Serialize)]
struct EventRecord<'a> {
    name: &'a str,
    time: u64,
    attr: &'a Attributes,
}

impl<'a> SpanRecord<'a> {
    fn from_span(span: &'a Span) -> Self {
        Self {
            trace_id: format!("{:032x}", span.context.trace_id),
            span_id: format!("{:016x}", span.context.span_id),
            p_span_id: format!("{:016x}", span.parent_span_id.unwrap_or(0)),
            attr: &span.attributes,
            op_name: &span.name,
            links: span
                .links
                .iter()
                .map(|l| LinkRecord {
                    trace_id: format!("{:032x}", l.trace_id),
                    span_id: format!("{:016x}", l.span_id),
                    attr: &l.attributes,
                })
                .collect(),
            start_time: span.start_time_unix_nanos,
            end_time: span.end_time_unix_nanos,
            events: span
                .events
                .iter()
                .map(|e| EventRecord {
                    name: &e.name,
                    time: e.time_unix_nanos,
                    attr: &e.attributes,
                })
                .collect(),
            log_type: "span",
        }
    }
}

/// Exporter that renders finished spans into the shared log sink.
///
/// Performs no network I/O; fails only when the sink itself is unusable.
pub struct LogExporter {
    sink: LogSink,
}

impl LogExporter {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl SpanExporter for LogExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        for span in &batch.spans {
            let line = serde_json::to_vec(&SpanRecord::from_span(span))
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            self.sink
                .write_line(&line)
                .map_err(|e| ExportError::SinkClosed(e.to_string()))?;
        }
        Ok(())
    }

    async fn shutdown(&self, _deadline: Duration) -> Result<(), ExportError> {
        self.sink
            .flush_all()
            .map_err(|e| ExportError::SinkClosed(e.to_string()))
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Stdout exporter for local development and debugging
pub struct StdoutExporter {
    pretty: bool,
}

impl StdoutExporter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl SpanExporter for StdoutExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        use std::io::Write;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for span in &batch.spans {
            let record = SpanRecord::from_span(span);
            let rendered = if self.pretty {
                serde_json::to_string_pretty(&record)
            } else {
                serde_json::to_string(&record)
            }
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
            writeln!(out, "{rendered}").map_err(|e| ExportError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null exporter that discards all spans (for benchmarking and tests)
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// An exporter wrapper that retries failed exports with exponential backoff.
///
/// The batch pipeline itself never retries a dropped batch; a remote sink
/// that wants transport-level retry opts in by wrapping itself in this before
/// registration.
pub struct RetryingExporter<E: SpanExporter> {
    inner: E,
    config: RetryConfig,
    total_retries: std::sync::atomic::AtomicU64,
}

impl<E: SpanExporter> RetryingExporter<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: E) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Returns the total number of retry attempts made.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl<E: SpanExporter> SpanExporter for RetryingExporter<E> {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let max_attempts = self.config.max_retries + 1;

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.total_retries
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tokio::time::sleep(delay).await;
            }

            if self.inner.export(batch.clone()).await.is_ok() {
                return Ok(());
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), ExportError> {
        self.inner.shutdown(deadline).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
