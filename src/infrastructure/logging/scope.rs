//! Context-scoped logging
//!
//! Stores a tracing span and a trace id in the call-chain context so nested
//! calls log under the span of the request that started the chain.

use std::sync::Arc;

use tracing::Span;

use crate::shared::context::{Context, ContextKey};

const SPAN_KEY: ContextKey<Span> = ContextKey::new("logging.span");
const TRACE_ID_KEY: ContextKey<String> = ContextKey::new("logging.trace_id");

/// Derive a context that logs under `span`.
pub fn with_span(ctx: &Context, span: Span) -> Context {
    ctx.with_value(SPAN_KEY, Arc::new(span))
}

/// Span stored in the context, or the current span.
pub fn span(ctx: &Context) -> Span {
    ctx.value(SPAN_KEY)
        .map(|span| (*span).clone())
        .unwrap_or_else(Span::current)
}

pub fn with_trace_id(ctx: &Context, trace_id: impl Into<String>) -> Context {
    ctx.with_value(TRACE_ID_KEY, Arc::new(trace_id.into()))
}

pub fn trace_id(ctx: &Context) -> Option<Arc<String>> {
    ctx.value(TRACE_ID_KEY)
}

/// Fresh root context carrying only the trace id and span of `parent`.
///
/// Anything else, including an active transaction frame, is left behind.
/// Use it to start an independent call chain (e.g. a spawned task) from a
/// request's context.
pub fn detach(parent: &Context) -> Context {
    let mut ctx = Context::background();
    if let Some(id) = trace_id(parent) {
        ctx = ctx.with_value(TRACE_ID_KEY, id);
    }
    if let Some(span) = parent.value(SPAN_KEY) {
        ctx = ctx.with_value(SPAN_KEY, span);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTHER: ContextKey<u32> = ContextKey::new("other");

    #[test]
    fn test_trace_id_round_trip() {
        let ctx = with_trace_id(&Context::background(), "req-42");
        assert_eq!(trace_id(&ctx).as_deref().map(String::as_str), Some("req-42"));
        assert!(trace_id(&Context::background()).is_none());
    }

    #[test]
    fn test_detach_keeps_only_logging_values() {
        let parent = with_span(
            &with_trace_id(&Context::background(), "req-7"),
            tracing::info_span!("request"),
        )
        .with_value(OTHER, Arc::new(1));

        let detached = detach(&parent);
        assert_eq!(
            trace_id(&detached).as_deref().map(String::as_str),
            Some("req-7")
        );
        assert!(detached.value(SPAN_KEY).is_some());
        assert!(detached.value(OTHER).is_none());
    }
}
