//! Generic call wrapping: time any callable and record one span
//!
//! The span is closed by a guard tied to scope exit, so it is recorded on
//! every path out of the callable, including a panic, and the panic then
//! propagates unchanged. Errors returned by the callable pass through
//! untouched as well; the wrapper never masks an outcome.
//!
//! Deferred results are a typed sum rather than shape-sniffing: a callable
//! hands back [`CallOutcome::Immediate`] or [`CallOutcome::Deferred`] and the
//! wrapper pattern-matches. An immediate span closes at return; a deferred
//! span closes only when the returned future settles, while the future's
//! output reaches the original caller unchanged.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::clock::Micros;
use crate::context::TraceContext;

/// Open span that records itself exactly once, at `finish` or at drop,
/// whichever comes first.
#[derive(Debug)]
pub struct SpanGuard {
    ctx: TraceContext,
    name: String,
    start: Micros,
    args: Option<serde_json::Value>,
    finished: bool,
}

impl SpanGuard {
    /// Open a span named `name`, starting now.
    pub fn enter(ctx: &TraceContext, name: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            name: name.into(),
            start: ctx.now(),
            args: None,
            finished: false,
        }
    }

    /// Attach metadata recorded with the event.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Close the span now.
    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let end = self.ctx.now();
        self.ctx
            .record_span(mem::take(&mut self.name), self.start, end, self.args.take());
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Invoke `f` exactly once, recording one event named `name` that spans its
/// execution. The event is recorded regardless of outcome; a panic still
/// closes the span and then unwinds to the caller.
pub fn wrap<T>(ctx: &TraceContext, name: impl Into<String>, f: impl FnOnce() -> T) -> T {
    let _guard = SpanGuard::enter(ctx, name);
    f()
}

/// Result of a wrapped call: either available now or settling later.
#[derive(Debug)]
pub enum CallOutcome<T, F> {
    /// The call produced its value synchronously.
    Immediate(T),
    /// The call returned a future; the value arrives when it settles.
    Deferred(F),
}

impl<T, F> CallOutcome<T, F> {
    /// The immediate value, if this outcome is one.
    pub fn immediate(self) -> Option<T> {
        match self {
            Self::Immediate(value) => Some(value),
            Self::Deferred(_) => None,
        }
    }

    /// The deferred future, if this outcome is one.
    pub fn deferred(self) -> Option<F> {
        match self {
            Self::Immediate(_) => None,
            Self::Deferred(future) => Some(future),
        }
    }
}

/// Wrap a callable whose result may be deferred. An immediate result closes
/// the span before returning; a deferred result is handed back wrapped in a
/// [`TimedFuture`] that closes the span when it settles. Either way the
/// caller receives the original value or future semantics unchanged.
pub fn wrap_call<T, F>(
    ctx: &TraceContext,
    name: impl Into<String>,
    f: impl FnOnce() -> CallOutcome<T, F>,
) -> CallOutcome<T, TimedFuture<F>>
where
    F: Future,
{
    let guard = SpanGuard::enter(ctx, name);
    match f() {
        CallOutcome::Immediate(value) => {
            guard.finish();
            CallOutcome::Immediate(value)
        }
        CallOutcome::Deferred(future) => {
            CallOutcome::Deferred(TimedFuture::with_guard(future, Some(guard)))
        }
    }
}

/// Time an already-constructed future: the span opens now and closes when
/// the future settles.
pub fn wrap_future<F: Future>(ctx: &TraceContext, name: impl Into<String>, future: F) -> TimedFuture<F> {
    let guard = SpanGuard::enter(ctx, name);
    TimedFuture::with_guard(future, Some(guard))
}

/// Future adapter that closes its span on first settlement. The guard is
/// taken out at `Poll::Ready`, so the span can close at most once even if the
/// future is polled again defensively; dropping the adapter before
/// settlement closes the span at drop.
#[pin_project::pin_project]
#[derive(Debug)]
pub struct TimedFuture<F> {
    #[pin]
    inner: F,
    guard: Option<SpanGuard>,
}

impl<F> TimedFuture<F> {
    pub(crate) fn with_guard(inner: F, guard: Option<SpanGuard>) -> Self {
        Self { inner, guard }
    }
}

impl<F: Future> Future for TimedFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(output) => {
                if let Some(guard) = this.guard.take() {
                    guard.finish();
                }
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceConfig;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;
    use std::time::Duration;

    fn scratch_context() -> (tempfile::TempDir, TraceContext) {
        let dir = tempfile::tempdir().unwrap();
        let config = TraceConfig::new()
            .with_output_path(dir.path().join("perf.json"))
            .with_flush_delay(Duration::from_secs(3600));
        (dir, TraceContext::new(config))
    }

    #[test]
    fn test_wrap_returns_value_and_records() {
        let (_dir, ctx) = scratch_context();
        let answer = wrap(&ctx, "compute", || {
            thread::sleep(Duration::from_millis(2));
            42
        });
        assert_eq!(answer, 42);

        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "compute");
        assert!(events[0].dur >= 2_000);
    }

    #[test]
    fn test_wrap_passes_result_err_through() {
        let (_dir, ctx) = scratch_context();
        let outcome: std::result::Result<(), &str> = wrap(&ctx, "fallible", || Err("boom"));
        assert_eq!(outcome, Err("boom"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_wrap_records_even_on_panic() {
        let (_dir, ctx) = scratch_context();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            wrap(&ctx, "explodes", || {
                thread::sleep(Duration::from_millis(2));
                panic!("original panic");
            })
        }));
        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"original panic"));

        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "explodes");
        assert!(events[0].dur >= 2_000);
    }

    #[test]
    fn test_nested_wrap_closes_inner_first() {
        let (_dir, ctx) = scratch_context();
        wrap(&ctx, "outer", || {
            wrap(&ctx, "inner", || ());
        });
        let events = ctx.events();
        assert_eq!(events[0].name, "inner");
        assert_eq!(events[1].name, "outer");
        assert!(events[1].dur >= events[0].dur);
    }

    #[test]
    fn test_wrap_call_immediate_closes_at_return() {
        let (_dir, ctx) = scratch_context();
        let outcome = wrap_call(&ctx, "sync path", || {
            CallOutcome::<_, std::future::Ready<()>>::Immediate("value")
        });
        assert_eq!(outcome.immediate(), Some("value"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_span_guard_finish_records_once() {
        let (_dir, ctx) = scratch_context();
        let guard = SpanGuard::enter(&ctx, "manual");
        guard.finish();
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_span_guard_drop_records() {
        let (_dir, ctx) = scratch_context();
        {
            let _guard = SpanGuard::enter(&ctx, "scoped").with_args(serde_json::json!({"k": 1}));
        }
        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].args, Some(serde_json::json!({"k": 1})));
    }
}
