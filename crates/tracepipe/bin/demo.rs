//! End-to-end tracing demo.
//!
//! Walks one simulated request through the whole layer: logging init, tracer
//! init, nested spans with attributes/events/status, context-correlated log
//! records, trace propagation across a process boundary, and a linked
//! fire-and-forget task, then a drained shutdown.
//!
//! The process acts as its own config collaborator: exporter selection, log
//! level, and collector endpoint arrive as environment values, already
//! "parsed".
//!
//! ```bash
//! # span records land in ./logs/demo.log
//! cargo run -p tracepipe --bin demo
//!
//! # or print span records to stdout instead
//! TRACE_EXPORTER=stdout cargo run -p tracepipe --bin demo
//! ```

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracepipe::{
    add_span_attribute, add_span_event, attrs_from, extract, finish_span, init_logging,
    init_tracer, inject, set_span_status, spawn_linked, start_span, trace_log, ExporterMode,
    LogConfig, StatusCode, TraceContext, TracerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let selection = std::env::var("TRACE_EXPORTER").unwrap_or_default();
    let level = std::env::var("TRACE_LOG_LEVEL").unwrap_or_else(|_| "trace".to_string());
    let endpoint = std::env::var("TRACE_COLLECTOR_ENDPOINT").ok();

    let (sink, _logger_guard) = init_logging(&LogConfig {
        file_name: "demo.log".to_string(),
        level,
        ..Default::default()
    })?;

    let handle = init_tracer(
        TracerConfig {
            service_name: "tracepipe-demo".to_string(),
            mode: ExporterMode::from_selection(&selection),
            collector_endpoint: endpoint,
            pretty_print: selection == "stdout",
            ..Default::default()
        },
        sink,
    )?;

    handle_request().await;

    handle.shutdown(Duration::from_secs(5)).await;
    println!("done; span records are in ./logs/demo.log (or above, with TRACE_EXPORTER=stdout)");
    Ok(())
}

async fn handle_request() {
    let ctx = start_span(
        &TraceContext::new(),
        "demo",
        "handle_request",
        Some(attrs_from(json!({"request.id": 42, "client": "cli"}))),
    );
    trace_log(&ctx).field("phase", "accepted").info("request accepted");

    // nested unit of work
    let profile_ctx = start_span(
        &ctx,
        "demo",
        "load_profile",
        Some(attrs_from(json!({"user.id": "u-1001"}))),
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    add_span_event(&profile_ctx, "cache_miss", "key", "profile:u-1001");
    finish_span(&profile_ctx);

    // hand the trace across a process boundary and back
    let mut carrier = HashMap::new();
    inject(&ctx.with_baggage_entry("tenant", "acme"), &mut carrier);
    let remote_ctx = extract(&carrier);
    let downstream = start_span(&remote_ctx, "demo", "downstream_call", None);
    tokio::time::sleep(Duration::from_millis(2)).await;
    finish_span(&downstream);

    // fire-and-forget work: its span is a linked root with its own trace id,
    // so it may safely outlive handle_request
    let audit = spawn_linked(&ctx, "demo", "audit_append", None, |audit_ctx| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trace_log(&audit_ctx).field("entries", 1).info("audit entry written");
    });

    add_span_attribute(&ctx, "response.code", 200);
    set_span_status(&ctx, StatusCode::Ok, "served");
    finish_span(&ctx);

    let _ = audit.await;
}
