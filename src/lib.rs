//! Perftrace - Chrome Trace Event recorder with automatic instrumentation
//!
//! This library records named time intervals into an in-memory buffer and
//! persists them, debounced, as a Chrome Trace Event array viewable in
//! chrome://tracing or Perfetto. Phases can be timed manually with
//! start/end pairs, any callable can be wrapped so one span covers its
//! execution (including deferred settlement of returned futures), a type's
//! methods can be instrumented per call signature, and module loads can be
//! intercepted for a startup cost breakdown.

pub mod clock;
pub mod context;
pub mod error;
pub mod event;
pub mod instrument;
pub mod loader;
pub mod timer;
pub mod wrap;

mod writer;
