//! End-to-end logging path: real subscriber, non-blocking rolling appender,
//! and the span log exporter multiplexing into the same file. Own test
//! binary because the global subscriber and tracer can be installed only
//! once per process.

use std::time::Duration;
use tracepipe::{
    finish_span, init_logging, init_tracer, start_span, trace_log, ExporterConfig, ExporterMode,
    LogConfig, TraceContext, TracerConfig,
};

fn read_log_dir(dir: &std::path::Path) -> String {
    let mut content = String::new();
    for entry in std::fs::read_dir(dir).unwrap().flatten() {
        content.push_str(&std::fs::read_to_string(entry.path()).unwrap_or_default());
    }
    content
}

#[tokio::test]
async fn span_records_and_log_records_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, logger_guard) = init_logging(&LogConfig {
        directory: dir.path().to_path_buf(),
        file_name: "trace.log".to_string(),
        level: "trace".to_string(),
        pretty_print: false,
    })
    .unwrap();

    let handle = init_tracer(
        TracerConfig {
            service_name: "logging-itest".to_string(),
            mode: ExporterMode::RemoteAndLog,
            log_queue: ExporterConfig {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        },
        sink,
    )
    .unwrap();

    let ctx = start_span(&TraceContext::new(), "itest", "write_things", None);
    trace_log(&ctx).field("n", 1).info("correlated record");
    finish_span(&ctx);

    handle.shutdown(Duration::from_secs(2)).await;
    // flushes the non-blocking writer
    drop(logger_guard);

    let content = read_log_dir(dir.path());
    let mut saw_span_record = false;
    let mut saw_log_record = false;
    for line in content.lines() {
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        if record["logType"] == "span" {
            assert_eq!(record["opName"], "write_things");
            assert_eq!(record["events"][0]["name"], "correlated record");
            saw_span_record = true;
        } else if line.contains("correlated record") {
            saw_log_record = true;
        }
    }
    assert!(saw_span_record, "no span record in: {content}");
    assert!(saw_log_record, "no base log record in: {content}");
}
