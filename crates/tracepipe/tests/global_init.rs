//! Process-wide tracer lifecycle. Lives in its own test binary: the global
//! can be initialized exactly once per process, so everything here runs in a
//! single test, in order.

use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracepipe::{
    attrs_from, finish_span, global_tracer, init_tracer, spawn_linked, start_span, trace_log,
    ExportError, ExporterConfig, ExporterMode, InitError, LogSink, Span, SpanBatch, SpanExporter,
    TraceContext, TracerConfig,
};

struct TestExporter {
    spans: Mutex<Vec<Span>>,
}

impl TestExporter {
    fn new() -> Self {
        Self {
            spans: Mutex::new(Vec::new()),
        }
    }

    fn all_spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }
}

impl SpanExporter for TestExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "remote-test"
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn global_tracer_lifecycle() {
    // before init: every operation through the global is a no-op
    assert!(global_tracer().is_none());
    let early = start_span(&TraceContext::new(), "", "early", None);
    assert!(early.span_context().is_none());
    finish_span(&early);

    let buf = SharedBuf::default();
    let remote = Arc::new(TestExporter::new());
    let fast = ExporterConfig {
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let handle = init_tracer(
        TracerConfig {
            service_name: "global-itest".to_string(),
            mode: ExporterMode::RemoteAndLog,
            collector_endpoint: Some("localhost:4317".to_string()),
            remote_exporter: Some(remote.clone()),
            log_queue: fast.clone(),
            remote_queue: fast,
            ..Default::default()
        },
        LogSink::new(buf.clone()),
    )
    .unwrap();
    assert!(global_tracer().is_some());

    // a second init is a contract violation, reported as fatal
    let again = init_tracer(TracerConfig::default(), LogSink::new(std::io::sink()));
    assert!(matches!(again, Err(InitError::AlreadyInitialized)));

    // one request with correlated logging and a linked background task
    let root = start_span(
        &TraceContext::new(),
        "rpc",
        "handle",
        Some(attrs_from(json!({"request.id": 7}))),
    );
    trace_log(&root).field("phase", "begin").info("handling request");
    let background = spawn_linked(&root, "rpc", "background_flush", None, |ctx| async move {
        trace_log(&ctx).info("background work done");
    });
    finish_span(&root);
    background.await.unwrap();

    handle.shutdown(Duration::from_secs(2)).await;

    // both sinks saw both spans
    let exported = remote.all_spans();
    assert_eq!(exported.len(), 2);
    let root_span = exported.iter().find(|s| s.name == "handle").unwrap();
    let linked = exported.iter().find(|s| s.name == "background_flush").unwrap();
    assert_eq!(linked.links.len(), 1);
    assert_eq!(linked.links[0].span_id, root_span.context.span_id);
    assert_ne!(linked.context.trace_id, root_span.context.trace_id);
    assert_eq!(root_span.events.len(), 1);

    let span_records: Vec<serde_json::Value> = buf
        .lines()
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .filter(|record: &serde_json::Value| record["logType"] == "span")
        .collect();
    assert_eq!(span_records.len(), 2);

    // after shutdown the global stays installed but inert: spans finish into
    // nothing, without errors
    let late = start_span(&TraceContext::new(), "", "late", None);
    assert!(late.span_context().is_some());
    finish_span(&late);
    assert_eq!(remote.all_spans().len(), 2);
}
