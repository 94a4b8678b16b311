//! Tracer and process lifecycle.
//!
//! One [`Tracer`] owns the sampler, id generator, and started export
//! pipeline. [`init_tracer`] installs it process-wide exactly once; the
//! returned handle is shut down once at process exit, draining the pipeline.
//! Operations through an uninitialized global are silent no-ops.

use crate::error::InitError;
use crate::exporter::{LogExporter, SpanExporterBoxed, StdoutExporter};
use crate::logging::LogSink;
use crate::pipeline::{BatchPipeline, ExporterConfig, QueuePolicy};
use crate::span::{IdGenerator, Span};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Sampling decision source. This layer always samples by default; the
/// off switch exists for load shedding, not for a sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sampler {
    #[default]
    AlwaysOn,
    AlwaysOff,
}

impl Sampler {
    pub(crate) fn should_sample(&self) -> bool {
        matches!(self, Sampler::AlwaysOn)
    }
}

/// Which sinks the provider registers, selected by the config collaborator's
/// exporter string. Unknown selections fall through to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExporterMode {
    /// Remote collector plus the log sink.
    Jaeger,
    /// Stdout only, for local runs.
    Stdout,
    /// Log sink plus the remote exporter when one is supplied.
    #[default]
    RemoteAndLog,
}

impl ExporterMode {
    pub fn from_selection(selection: &str) -> Self {
        match selection {
            "jaeger" => ExporterMode::Jaeger,
            "stdout" => ExporterMode::Stdout,
            _ => ExporterMode::RemoteAndLog,
        }
    }
}

/// Process-wide span counters.
#[derive(Debug, Default)]
pub struct TracerMetrics {
    spans_started: AtomicU64,
    spans_finished: AtomicU64,
}

impl TracerMetrics {
    pub fn spans_started(&self) -> u64 {
        self.spans_started.load(Ordering::Relaxed)
    }

    pub fn spans_finished(&self) -> u64 {
        self.spans_finished.load(Ordering::Relaxed)
    }

    pub fn open_spans(&self) -> u64 {
        self.spans_started()
            .saturating_sub(self.spans_finished())
    }
}

/// Holds the tracing configuration and the running export pipeline.
///
/// Constructed directly for tests and embedded use; normal processes install
/// one via [`init_tracer`].
pub struct Tracer {
    service_name: String,
    pub(crate) sampler: Sampler,
    pub(crate) ids: IdGenerator,
    pipeline: BatchPipeline,
    metrics: TracerMetrics,
}

impl Tracer {
    /// Takes ownership of a pipeline whose exporters are already registered.
    pub fn new(service_name: impl Into<String>, sampler: Sampler, pipeline: BatchPipeline) -> Self {
        Self {
            service_name: service_name.into(),
            sampler,
            ids: IdGenerator,
            pipeline,
            metrics: TracerMetrics::default(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn metrics(&self) -> &TracerMetrics {
        &self.metrics
    }

    pub(crate) fn on_span_started(&self) {
        self.metrics.spans_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepts a finished span and hands it to the pipeline. The tracer holds
    /// no reference afterwards.
    pub(crate) fn on_span_finished(&self, span: Span) {
        self.metrics.spans_finished.fetch_add(1, Ordering::Relaxed);
        self.pipeline.enqueue(span);
    }

    /// Drains the pipeline, waiting up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.pipeline.shutdown(timeout).await;
    }
}

/// Configuration assembled from the config collaborator's already-parsed
/// values plus an optional pre-built remote exporter.
pub struct TracerConfig {
    pub service_name: String,
    pub mode: ExporterMode,
    /// Remote collector address; consumed by whoever builds the remote
    /// exporter, recorded here for diagnostics.
    pub collector_endpoint: Option<String>,
    /// Any exporter satisfying the contract; its transport owns timeout and
    /// retry policy.
    pub remote_exporter: Option<Arc<dyn SpanExporterBoxed>>,
    pub sampler: Sampler,
    /// Pretty-print flag for the stdout exporter.
    pub pretty_print: bool,
    /// Queue tuning for the log-sink lane. Drop-on-full protects caller
    /// latency.
    pub log_queue: ExporterConfig,
    /// Queue tuning for the remote lane. Bounded blocking is acceptable for
    /// a best-effort remote sink.
    pub remote_queue: ExporterConfig,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown_service".to_string(),
            mode: ExporterMode::default(),
            collector_endpoint: None,
            remote_exporter: None,
            sampler: Sampler::default(),
            pretty_print: false,
            log_queue: ExporterConfig {
                policy: QueuePolicy::DropOnFull,
                ..Default::default()
            },
            remote_queue: ExporterConfig {
                policy: QueuePolicy::BlockWithTimeout(Duration::from_secs(5)),
                ..Default::default()
            },
        }
    }
}

static GLOBAL_TRACER: OnceLock<Arc<Tracer>> = OnceLock::new();

/// The process-wide tracer, if one was initialized.
pub fn global_tracer() -> Option<Arc<Tracer>> {
    GLOBAL_TRACER.get().cloned()
}

/// Handle returned by [`init_tracer`]; shut it down once at process exit.
pub struct TracerHandle {
    tracer: Arc<Tracer>,
}

impl TracerHandle {
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Stops span intake and drains the pipeline, waiting up to `timeout`.
    /// Data still in flight when the deadline elapses is discarded; that is
    /// the documented outcome of an impatient shutdown, not an error. The
    /// global stays installed but inert afterwards.
    pub async fn shutdown(self, timeout: Duration) {
        self.tracer.shutdown(timeout).await;
    }
}

/// Initializes the process-wide tracer. Must be called from within a tokio
/// runtime (exporter workers are spawned here) and exactly once per process.
pub fn init_tracer(config: TracerConfig, log_sink: LogSink) -> Result<TracerHandle, InitError> {
    if GLOBAL_TRACER.get().is_some() {
        return Err(InitError::AlreadyInitialized);
    }

    let TracerConfig {
        service_name,
        mode,
        collector_endpoint,
        remote_exporter,
        sampler,
        pretty_print,
        log_queue,
        remote_queue,
    } = config;

    let mut pipeline = BatchPipeline::new();
    match mode {
        ExporterMode::Stdout => {
            pipeline.register(Arc::new(StdoutExporter::new(pretty_print)), log_queue);
        }
        ExporterMode::Jaeger | ExporterMode::RemoteAndLog => {
            pipeline.register(Arc::new(LogExporter::new(log_sink)), log_queue);
            match remote_exporter {
                Some(remote) => {
                    tracing::info!(
                        exporter = remote.name(),
                        endpoint = collector_endpoint.as_deref().unwrap_or("unset"),
                        "remote span exporter registered"
                    );
                    pipeline.register(remote, remote_queue);
                }
                None => {
                    tracing::warn!(
                        "no remote span exporter supplied, exporting to the log sink only"
                    );
                }
            }
        }
    }

    let tracer = Arc::new(Tracer::new(service_name, sampler, pipeline));
    GLOBAL_TRACER
        .set(Arc::clone(&tracer))
        .map_err(|_| InitError::AlreadyInitialized)?;
    tracing::info!(service = %tracer.service_name(), "tracer initialized");
    Ok(TracerHandle { tracer })
}
