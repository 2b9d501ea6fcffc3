//! Module-load interception
//!
//! The process-wide load path is modeled as an injectable [`ModuleLoader`]
//! behind a [`LoaderHook`] slot rather than a mutated global function
//! reference. Installing tracing swaps the current loader for a decorator
//! that records a `"require <name>"` span around every delegation to the
//! original loader, returning its result unchanged.
//!
//! Loads nest naturally: a module that loads another module during its own
//! load re-enters the hook, and the recursive wrap calls nest via the call
//! stack. The hook reads its slot under a short lock and releases it before
//! delegating, so recursion cannot deadlock. Installation happens once per
//! hook and is never undone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::context::TraceContext;
use crate::error::{Result, TraceError};
use crate::wrap::wrap;

/// A module load that the host could not complete. Opaque to this crate;
/// the interceptor passes it through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load module {request}: {reason}")]
pub struct LoadError {
    /// The module name as requested.
    pub request: String,
    /// Host-provided failure description.
    pub reason: String,
}

/// The process's module-resolution capability: resolve a request string to a
/// loaded module of type `M`.
pub trait ModuleLoader<M>: Send + Sync {
    fn load(&self, request: &str) -> std::result::Result<M, LoadError>;
}

/// Replaceable slot holding the currently installed loader.
pub struct LoaderHook<M> {
    slot: Mutex<Arc<dyn ModuleLoader<M>>>,
    traced: AtomicBool,
}

impl<M: 'static> LoaderHook<M> {
    /// Hook starting out with the host's real loader installed.
    pub fn new(loader: Arc<dyn ModuleLoader<M>>) -> Self {
        Self {
            slot: Mutex::new(loader),
            traced: AtomicBool::new(false),
        }
    }

    /// The currently installed loader.
    pub fn current(&self) -> Arc<dyn ModuleLoader<M>> {
        match self.slot.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically swap in `loader`, returning the previous one.
    pub fn replace(&self, loader: Arc<dyn ModuleLoader<M>>) -> Arc<dyn ModuleLoader<M>> {
        let mut guard = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, loader)
    }

    /// Wrap the installed loader so every subsequent load is timed. May be
    /// called once per hook; a second call fails with
    /// [`TraceError::HookInstalled`] and changes nothing.
    pub fn install_tracing(&self, ctx: &TraceContext) -> Result<()> {
        if self.traced.swap(true, Ordering::SeqCst) {
            return Err(TraceError::HookInstalled);
        }
        let inner = self.current();
        self.replace(Arc::new(TracingLoader {
            ctx: ctx.clone(),
            inner,
        }));
        tracing::debug!("module loader tracing installed");
        Ok(())
    }

    /// Whether tracing has been installed on this hook.
    pub fn is_traced(&self) -> bool {
        self.traced.load(Ordering::SeqCst)
    }

    /// Load a module through whatever loader is currently installed. The
    /// slot lock is released before delegation so nested loads can re-enter.
    pub fn load(&self, request: &str) -> std::result::Result<M, LoadError> {
        let loader = self.current();
        loader.load(request)
    }
}

impl<M: 'static> std::fmt::Debug for LoaderHook<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderHook")
            .field("traced", &self.is_traced())
            .finish_non_exhaustive()
    }
}

/// Decorator that times each load as a `"require <name>"` span.
struct TracingLoader<M> {
    ctx: TraceContext,
    inner: Arc<dyn ModuleLoader<M>>,
}

impl<M> ModuleLoader<M> for TracingLoader<M> {
    fn load(&self, request: &str) -> std::result::Result<M, LoadError> {
        wrap(&self.ctx, format!("require {request}"), || {
            self.inner.load(request)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceConfig;
    use std::sync::OnceLock;
    use std::time::Duration;

    fn scratch_context() -> (tempfile::TempDir, TraceContext) {
        let dir = tempfile::tempdir().unwrap();
        let config = TraceConfig::new()
            .with_output_path(dir.path().join("perf.json"))
            .with_flush_delay(Duration::from_secs(3600));
        (dir, TraceContext::new(config))
    }

    struct FlatLoader;

    impl ModuleLoader<String> for FlatLoader {
        fn load(&self, request: &str) -> std::result::Result<String, LoadError> {
            if request == "broken" {
                return Err(LoadError {
                    request: request.to_string(),
                    reason: "not found".to_string(),
                });
            }
            Ok(format!("module {request}"))
        }
    }

    #[test]
    fn test_load_before_install_records_nothing() {
        let (_dir, ctx) = scratch_context();
        let hook = LoaderHook::new(Arc::new(FlatLoader));
        assert_eq!(hook.load("fs").unwrap(), "module fs");
        assert!(ctx.is_empty());
        assert!(!hook.is_traced());
    }

    #[test]
    fn test_traced_load_records_require_span() {
        let (_dir, ctx) = scratch_context();
        let hook = LoaderHook::new(Arc::new(FlatLoader));
        hook.install_tracing(&ctx).unwrap();

        assert_eq!(hook.load("fs").unwrap(), "module fs");
        let events = ctx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "require fs");
    }

    #[test]
    fn test_failed_load_still_records_and_propagates() {
        let (_dir, ctx) = scratch_context();
        let hook = LoaderHook::new(Arc::new(FlatLoader));
        hook.install_tracing(&ctx).unwrap();

        let err = hook.load("broken").unwrap_err();
        assert_eq!(err.request, "broken");
        assert_eq!(ctx.events()[0].name, "require broken");
    }

    #[test]
    fn test_second_install_fails() {
        let (_dir, ctx) = scratch_context();
        let hook = LoaderHook::new(Arc::new(FlatLoader));
        hook.install_tracing(&ctx).unwrap();
        let err = hook.install_tracing(&ctx).unwrap_err();
        assert!(matches!(err, TraceError::HookInstalled));
        assert!(hook.is_traced());
    }

    /// Loader whose modules load their dependencies through the hook,
    /// exercising nested interception.
    struct NestedLoader {
        hook: OnceLock<Arc<LoaderHook<String>>>,
    }

    impl ModuleLoader<String> for NestedLoader {
        fn load(&self, request: &str) -> std::result::Result<String, LoadError> {
            if request == "app" {
                let hook = self.hook.get().expect("hook wired up");
                hook.load("util")?;
            }
            Ok(format!("module {request}"))
        }
    }

    #[test]
    fn test_nested_loads_close_inner_first() {
        let (_dir, ctx) = scratch_context();
        let nested = Arc::new(NestedLoader {
            hook: OnceLock::new(),
        });
        let hook = Arc::new(LoaderHook::new(
            Arc::clone(&nested) as Arc<dyn ModuleLoader<String>>
        ));
        nested.hook.set(Arc::clone(&hook)).ok().unwrap();
        hook.install_tracing(&ctx).unwrap();

        assert_eq!(hook.load("app").unwrap(), "module app");

        let events = ctx.events();
        assert_eq!(events.len(), 2);
        // The dependency's span closes before the module that required it.
        assert_eq!(events[0].name, "require util");
        assert_eq!(events[1].name, "require app");
        assert!(events[1].ts <= events[0].ts);
        assert!(events[1].dur >= events[0].dur);
    }

    #[test]
    fn test_replace_returns_previous_loader() {
        let (_dir, _ctx) = scratch_context();
        let hook = LoaderHook::new(Arc::new(FlatLoader));
        let previous = hook.replace(Arc::new(FlatLoader));
        assert_eq!(previous.load("x").unwrap(), "module x");
    }
}
