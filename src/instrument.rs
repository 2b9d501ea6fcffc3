//! Automatic instrumentation of a type's methods
//!
//! Instead of reflecting over "every callable property", callers hand each
//! method to a [`ClassInstrumenter`] explicitly and get back a wrapped
//! callable to install in place of the original. On every invocation the
//! wrapper renders the actual arguments into the event name,
//! `"Owner:method(arg, arg)"`, so each distinct call signature shows up as
//! its own named span instead of aggregating under one name.
//!
//! Static and instance registration passes go through the same instrumenter,
//! which tracks method names and wraps each one exactly once: a method
//! reachable through both passes is returned unwrapped the second time, so
//! its calls are never double-timed.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use crate::context::TraceContext;
use crate::wrap::{wrap, SpanGuard, TimedFuture};

/// Argument tuple that can render itself for an event name.
///
/// Implemented for `()` and tuples of `Debug` values up to arity four, which
/// covers the method shapes this crate instruments.
pub trait ArgList {
    /// Textual rendering of the arguments, without surrounding parentheses.
    fn render(&self) -> String;
}

impl ArgList for () {
    fn render(&self) -> String {
        String::new()
    }
}

macro_rules! arglist_tuple {
    ($($ty:ident : $idx:tt),+) => {
        impl<$($ty: fmt::Debug),+> ArgList for ($($ty,)+) {
            fn render(&self) -> String {
                let parts = [$(format!("{:?}", self.$idx)),+];
                parts.join(", ")
            }
        }
    };
}

arglist_tuple!(A: 0);
arglist_tuple!(A: 0, B: 1);
arglist_tuple!(A: 0, B: 1, C: 2);
arglist_tuple!(A: 0, B: 1, C: 2, D: 3);

/// Wraps the methods of one owner type so every call records a span.
#[derive(Debug)]
pub struct ClassInstrumenter {
    ctx: TraceContext,
    owner: String,
    wrapped: HashSet<String>,
}

impl ClassInstrumenter {
    /// Instrumenter for the type whose display name is `owner`.
    pub fn new(ctx: &TraceContext, owner: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            owner: owner.into(),
            wrapped: HashSet::new(),
        }
    }

    /// Display name of the owner type.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Wrap a synchronous method. Each invocation records one event named
    /// from the owner, the method, and the rendered arguments, with full
    /// call-wrapper semantics (panics still close the span, then propagate).
    pub fn wrap_method<A, R, F>(&mut self, method: &str, f: F) -> Box<dyn Fn(A) -> R>
    where
        A: ArgList + 'static,
        R: 'static,
        F: Fn(A) -> R + 'static,
    {
        if !self.claim(method) {
            return Box::new(f);
        }
        let ctx = self.ctx.clone();
        let name = self.qualified(method);
        Box::new(move |args: A| {
            let span = format!("{}({})", name, args.render());
            wrap(&ctx, span, || f(args))
        })
    }

    /// Wrap a method returning a future. The span opens at invocation and
    /// closes when the returned future settles, not when it is constructed.
    pub fn wrap_async_method<A, Fut, F>(
        &mut self,
        method: &str,
        f: F,
    ) -> Box<dyn Fn(A) -> TimedFuture<Fut>>
    where
        A: ArgList + 'static,
        Fut: Future + 'static,
        F: Fn(A) -> Fut + 'static,
    {
        let timed = self.claim(method);
        let ctx = self.ctx.clone();
        let name = self.qualified(method);
        Box::new(move |args: A| {
            let guard = timed.then(|| {
                let span = format!("{}({})", name, args.render());
                SpanGuard::enter(&ctx, span)
            });
            TimedFuture::with_guard(f(args), guard)
        })
    }

    /// Record `method` as wrapped; false when it already was.
    fn claim(&mut self, method: &str) -> bool {
        if self.wrapped.insert(method.to_string()) {
            true
        } else {
            tracing::debug!(
                owner = %self.owner,
                method,
                "method already instrumented; leaving callable unwrapped"
            );
            false
        }
    }

    fn qualified(&self, method: &str) -> String {
        format!("{}:{}", self.owner, method)
    }
}
