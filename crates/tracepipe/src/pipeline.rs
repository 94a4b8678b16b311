//! Batch export pipeline.
//!
//! Decouples "a span finished" (caller thread) from "a span was durably
//! exported" (background worker) and fans each finished span out to every
//! registered sink. Each registration owns a bounded queue and a worker task;
//! one sink's backpressure or failure never blocks or corrupts delivery to
//! another, and never reaches the application thread that produced the span.

use crate::exporter::SpanExporterBoxed;
use crate::span::{Span, SpanBatch};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What `enqueue` does when a registration's queue is full. The policy is
/// explicit and chosen per exporter at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Drop the span immediately. Protects caller latency; preferred for the
    /// log sink.
    DropOnFull,
    /// Block the caller up to the given timeout, then drop. Acceptable for a
    /// best-effort remote sink.
    BlockWithTimeout(Duration),
}

/// Batch accumulation thresholds: a batch is flushed when it reaches
/// `max_batch_size` spans or when `linger` elapses since the last flush,
/// whichever comes first.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub linger: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 512,
            linger: Duration::from_secs(5),
        }
    }
}

/// Per-registration configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub queue_capacity: usize,
    pub policy: QueuePolicy,
    pub batch: BatchConfig,
    /// Worker polling interval.
    pub poll_interval: Duration,
    /// Maximum spans drained from the queue per poll.
    pub max_drain_per_poll: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            policy: QueuePolicy::DropOnFull,
            batch: BatchConfig::default(),
            poll_interval: Duration::from_millis(100),
            max_drain_per_poll: 10_000,
        }
    }
}

/// Thread-safe per-registration counters.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    spans_enqueued: AtomicU64,
    spans_dropped: AtomicU64,
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_errors: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_enqueued(&self) -> u64 {
        self.spans_enqueued.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    fn record_enqueued(&self) {
        self.spans_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.spans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pure batching state: pending spans plus the size/linger flush decision.
struct SpanBatcher {
    pending: Vec<Span>,
    config: BatchConfig,
    last_flush: Instant,
}

impl SpanBatcher {
    fn new(config: BatchConfig) -> Self {
        Self {
            pending: Vec::new(),
            config,
            last_flush: Instant::now(),
        }
    }

    fn add(&mut self, span: Span) {
        self.pending.push(span);
    }

    fn should_flush(&self) -> bool {
        !self.pending.is_empty()
            && (self.pending.len() >= self.config.max_batch_size
                || self.last_flush.elapsed() >= self.config.linger)
    }

    /// Takes up to `max_batch_size` pending spans as one batch. Returns `None`
    /// when nothing is pending.
    fn take_batch(&mut self) -> Option<SpanBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let n = self.pending.len().min(self.config.max_batch_size);
        let spans: Vec<Span> = self.pending.drain(..n).collect();
        self.last_flush = Instant::now();
        Some(SpanBatch::with_spans(spans))
    }
}

/// One registered exporter: its queue, policy, worker, and counters.
struct ExporterLane {
    name: String,
    tx: Sender<Span>,
    policy: QueuePolicy,
    metrics: Arc<ExportMetrics>,
    shutdown_tx: Mutex<Option<oneshot::Sender<Duration>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExporterLane {
    fn offer(&self, span: Span) {
        self.metrics.record_enqueued();
        let rejected = match self.policy {
            QueuePolicy::DropOnFull => match self.tx.try_send(span) {
                Ok(()) => false,
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => true,
            },
            QueuePolicy::BlockWithTimeout(limit) => self.tx.send_timeout(span, limit).is_err(),
        };
        if rejected {
            self.metrics.record_dropped();
            tracing::debug!(exporter = %self.name, "span queue full, span dropped");
        }
    }
}

/// Fan-out pipeline: one bounded queue and one worker task per registered
/// exporter.
///
/// Workers must be registered from within a tokio runtime; they poll their
/// queue at `poll_interval`, drain in bounded chunks, and flush batches per
/// [`BatchConfig`]. An export failure is logged and the batch dropped; retry,
/// if any, lives inside the exporter's own transport.
pub struct BatchPipeline {
    lanes: Vec<ExporterLane>,
    accepting: AtomicBool,
}

impl Default for BatchPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchPipeline {
    pub fn new() -> Self {
        Self {
            lanes: Vec::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Registers an exporter and spawns its worker. Returns the
    /// registration's counters.
    pub fn register(
        &mut self,
        exporter: Arc<dyn SpanExporterBoxed>,
        config: ExporterConfig,
    ) -> Arc<ExportMetrics> {
        let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let metrics = Arc::new(ExportMetrics::default());
        let name = exporter.name().to_string();

        let worker = tokio::spawn(run_worker(
            name.clone(),
            rx,
            exporter,
            config.clone(),
            Arc::clone(&metrics),
            shutdown_rx,
        ));

        self.lanes.push(ExporterLane {
            name,
            tx,
            policy: config.policy,
            metrics: Arc::clone(&metrics),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        });
        metrics
    }

    /// Hands a finished span to every registration under that registration's
    /// own overflow policy. After shutdown this is a no-op.
    pub fn enqueue(&self, span: Span) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        for lane in &self.lanes {
            lane.offer(span.clone());
        }
    }

    /// Stops accepting spans, asks each worker to drain and flush, and waits
    /// up to `timeout` overall. Workers still running when the deadline
    /// elapses are abandoned; losing their in-flight data is the documented
    /// outcome of an impatient shutdown, not an error.
    pub async fn shutdown(&self, timeout: Duration) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + timeout;
        for lane in &self.lanes {
            let tx = lane.shutdown_tx.lock().ok().and_then(|mut slot| slot.take());
            if let Some(tx) = tx {
                let _ = tx.send(timeout);
            }
        }
        for lane in &self.lanes {
            let worker = lane.worker.lock().ok().and_then(|mut slot| slot.take());
            if let Some(mut worker) = worker {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                    worker.abort();
                    tracing::warn!(
                        exporter = %lane.name,
                        "shutdown deadline elapsed, abandoning exporter worker"
                    );
                }
            }
        }
    }
}

async fn run_worker(
    name: String,
    rx: Receiver<Span>,
    exporter: Arc<dyn SpanExporterBoxed>,
    config: ExporterConfig,
    metrics: Arc<ExportMetrics>,
    mut shutdown_rx: oneshot::Receiver<Duration>,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    let mut batcher = SpanBatcher::new(config.batch.clone());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut drained = 0;
                while drained < config.max_drain_per_poll {
                    match rx.try_recv() {
                        Ok(span) => {
                            batcher.add(span);
                            drained += 1;
                        }
                        Err(_) => break,
                    }
                }
                while batcher.should_flush() {
                    match batcher.take_batch() {
                        Some(batch) => flush(&name, exporter.as_ref(), batch, &metrics).await,
                        None => break,
                    }
                }
            }
            deadline = &mut shutdown_rx => {
                while let Ok(span) = rx.try_recv() {
                    batcher.add(span);
                }
                while let Some(batch) = batcher.take_batch() {
                    flush(&name, exporter.as_ref(), batch, &metrics).await;
                }
                let deadline = deadline.unwrap_or_default();
                if let Err(e) = exporter.shutdown_boxed(deadline).await {
                    tracing::warn!(exporter = %name, error = %e, "exporter shutdown failed");
                }
                break;
            }
        }
    }
}

async fn flush(
    name: &str,
    exporter: &dyn SpanExporterBoxed,
    batch: SpanBatch,
    metrics: &ExportMetrics,
) {
    let span_count = batch.len() as u64;
    match exporter.export_boxed(batch).await {
        Ok(()) => metrics.record_success(span_count),
        Err(e) => {
            metrics.record_error();
            tracing::warn!(
                exporter = %name,
                error = %e,
                spans = span_count,
                "span batch export failed, batch dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{ExportError, NullExporter, SpanExporter};
    use crate::span::{Span, SpanContext};

    fn test_span(seq: u64) -> Span {
        let mut span = Span::new(
            SpanContext {
                trace_id: 1,
                span_id: seq + 1,
            },
            None,
            format!("op-{seq}"),
        );
        span.finish();
        span
    }

    struct CaptureExporter {
        spans: std::sync::Mutex<Vec<Span>>,
    }

    impl CaptureExporter {
        fn new() -> Self {
            Self {
                spans: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn exported_count(&self) -> usize {
            self.spans.lock().unwrap().len()
        }
    }

    impl SpanExporter for CaptureExporter {
        async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
            self.spans.lock().unwrap().extend(batch.spans);
            Ok(())
        }

        fn name(&self) -> &str {
            "capture"
        }
    }

    fn fast_config() -> ExporterConfig {
        ExporterConfig {
            poll_interval: Duration::from_millis(10),
            batch: BatchConfig {
                max_batch_size: 4,
                linger: Duration::from_millis(20),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delivers_all_spans_through_batches() {
        let exporter = Arc::new(CaptureExporter::new());
        let mut pipeline = BatchPipeline::new();
        pipeline.register(exporter.clone(), fast_config());

        for seq in 0..10 {
            pipeline.enqueue(test_span(seq));
        }
        pipeline.shutdown(Duration::from_secs(2)).await;

        assert_eq!(exporter.exported_count(), 10);
    }

    #[tokio::test]
    async fn batches_are_capped_at_max_size() {
        let exporter = Arc::new(CaptureExporter::new());
        let mut pipeline = BatchPipeline::new();
        let metrics = pipeline.register(exporter.clone(), fast_config());

        for seq in 0..10 {
            pipeline.enqueue(test_span(seq));
        }
        pipeline.shutdown(Duration::from_secs(2)).await;

        // 10 spans with max_batch_size 4 → 3 batches
        assert_eq!(metrics.batches_exported(), 3);
        assert_eq!(metrics.spans_exported(), 10);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_a_noop() {
        let exporter = Arc::new(CaptureExporter::new());
        let mut pipeline = BatchPipeline::new();
        let metrics = pipeline.register(exporter.clone(), fast_config());

        pipeline.shutdown(Duration::from_secs(1)).await;
        pipeline.enqueue(test_span(0));

        assert_eq!(metrics.spans_enqueued(), 0);
        assert_eq!(exporter.exported_count(), 0);
    }

    #[tokio::test]
    async fn second_shutdown_is_a_noop() {
        let mut pipeline = BatchPipeline::new();
        pipeline.register(Arc::new(NullExporter::new()), fast_config());

        pipeline.shutdown(Duration::from_secs(1)).await;
        pipeline.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn linger_flushes_partial_batches() {
        let exporter = Arc::new(CaptureExporter::new());
        let mut pipeline = BatchPipeline::new();
        pipeline.register(
            exporter.clone(),
            ExporterConfig {
                poll_interval: Duration::from_millis(5),
                batch: BatchConfig {
                    max_batch_size: 1000,
                    linger: Duration::from_millis(10),
                },
                ..Default::default()
            },
        );

        pipeline.enqueue(test_span(0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // exported by linger expiry, well before any size threshold
        assert_eq!(exporter.exported_count(), 1);
        pipeline.shutdown(Duration::from_secs(1)).await;
    }
}
