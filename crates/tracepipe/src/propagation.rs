//! Text-map trace context propagation.
//!
//! Composite codec over the W3C `traceparent` header and a `baggage` header,
//! for carrying trace identity across process boundaries. Extraction is
//! lenient: absent or malformed headers degrade to an empty context, never an
//! error.

use crate::context::TraceContext;
use crate::span::SpanContext;
use std::collections::HashMap;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const BAGGAGE_HEADER: &str = "baggage";

/// Writes the context's span identity and baggage into a header carrier.
/// A context with no span contributes only baggage.
pub fn inject(ctx: &TraceContext, carrier: &mut HashMap<String, String>) {
    if let Some(context) = ctx.span_context() {
        if context.is_valid() {
            carrier.insert(
                TRACEPARENT_HEADER.to_string(),
                format!("00-{:032x}-{:016x}-01", context.trace_id, context.span_id),
            );
        }
    }
    let baggage: Vec<String> = ctx
        .baggage()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    if !baggage.is_empty() {
        carrier.insert(BAGGAGE_HEADER.to_string(), baggage.join(","));
    }
}

/// Reads a context out of a header carrier. The result carries a remote
/// parent when a well-formed `traceparent` is present, and whatever baggage
/// parses; anything malformed is ignored.
pub fn extract(carrier: &HashMap<String, String>) -> TraceContext {
    let baggage = carrier
        .get(BAGGAGE_HEADER)
        .map(|raw| parse_baggage(raw))
        .unwrap_or_default();

    match carrier
        .get(TRACEPARENT_HEADER)
        .and_then(|header| parse_traceparent(header))
    {
        Some(context) => TraceContext::with_remote(context, baggage),
        None => baggage
            .into_iter()
            .fold(TraceContext::new(), |ctx, (key, value)| {
                ctx.with_baggage_entry(key, value)
            }),
    }
}

fn parse_traceparent(header: &str) -> Option<SpanContext> {
    let mut parts = header.trim().split('-');
    let version = parts.next()?;
    let trace = parts.next()?;
    let span = parts.next()?;
    let _flags = parts.next()?;
    if parts.next().is_some() || version != "00" || trace.len() != 32 || span.len() != 16 {
        return None;
    }
    let context = SpanContext {
        trace_id: u128::from_str_radix(trace, 16).ok()?,
        span_id: u64::from_str_radix(span, 16).ok()?,
    };
    context.is_valid().then_some(context)
}

fn parse_baggage(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_identity_and_baggage() {
        let remote = SpanContext {
            trace_id: 0x0123_4567_89ab_cdef_0123_4567_89ab_cdef,
            span_id: 0xfedc_ba98_7654_3210,
        };
        let ctx = TraceContext::with_remote(remote, vec![("tenant".into(), "acme".into())]);

        let mut carrier = HashMap::new();
        inject(&ctx, &mut carrier);
        assert_eq!(
            carrier.get(TRACEPARENT_HEADER).map(String::as_str),
            Some("00-0123456789abcdef0123456789abcdef-fedcba9876543210-01"),
        );

        let extracted = extract(&carrier);
        assert_eq!(extracted.span_context(), Some(remote));
        assert_eq!(
            extracted.baggage().collect::<Vec<_>>(),
            vec![("tenant", "acme")],
        );
    }

    #[test]
    fn malformed_traceparent_degrades_to_empty() {
        for header in [
            "",
            "00-short-fedcba9876543210-01",
            "ff-0123456789abcdef0123456789abcdef-fedcba9876543210-01",
            "00-0123456789abcdef0123456789abcdef-fedcba9876543210",
            "00-00000000000000000000000000000000-fedcba9876543210-01",
            "not a header at all",
        ] {
            let mut carrier = HashMap::new();
            carrier.insert(TRACEPARENT_HEADER.to_string(), header.to_string());
            assert!(extract(&carrier).span_context().is_none(), "{header:?}");
        }
    }

    #[test]
    fn baggage_survives_without_traceparent() {
        let mut carrier = HashMap::new();
        carrier.insert(BAGGAGE_HEADER.to_string(), "a=1, b=2,,bad".to_string());
        let ctx = extract(&carrier);
        assert!(ctx.span_context().is_none());
        assert_eq!(
            ctx.baggage().collect::<Vec<_>>(),
            vec![("a", "1"), ("b", "2")],
        );
    }

    #[test]
    fn empty_context_injects_nothing() {
        let mut carrier = HashMap::new();
        inject(&TraceContext::new(), &mut carrier);
        assert!(carrier.is_empty());
    }
}
