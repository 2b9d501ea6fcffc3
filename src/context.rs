//! Tracing context: event buffer, timer map, and flush scheduling
//!
//! A `TraceContext` is the single explicitly-constructed instance of the
//! tracing subsystem. It owns the clock, the append-only event buffer, the
//! named-timer stacks, and the flush-pending flag. The buffer and the flag
//! live behind one mutex because an append and the decision to arm a flush
//! must be observed atomically together: that is what bounds the system to at
//! most one pending flush at a time.
//!
//! The context is cheaply cloneable so instrumented objects and the module
//! loader hook can each hold a handle. The buffer grows for the life of the
//! process; it is a diagnostic tool, not a data store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::Sender;

use crate::clock::{Clock, Micros};
use crate::error::{Result, TraceError};
use crate::event::TraceEvent;
use crate::timer::TimerStack;
use crate::writer::{self, FlushCmd};

/// Default output path, relative to the working directory.
pub const DEFAULT_OUTPUT_PATH: &str = "perf.json";

/// Default debounce window before a scheduled flush fires.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(10_000);

/// Configuration for a tracing context.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Where the serialized trace-event array is written.
    pub output_path: PathBuf,
    /// How long a scheduled flush waits before writing. Every record inside
    /// this window rides along with the same write.
    pub flush_delay: Duration,
    /// Constant process tag stamped on every event.
    pub pid: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            flush_delay: DEFAULT_FLUSH_DELAY,
            pid: 1,
        }
    }
}

impl TraceConfig {
    /// Configuration with the default output path, delay, and pid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output path.
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Set the flush debounce window.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }
}

/// Mutable tracing state. Buffer, timers, and the pending-flush flag share
/// one mutex; see the module docs for why.
#[derive(Debug, Default)]
pub(crate) struct TraceState {
    pub(crate) events: Vec<TraceEvent>,
    pub(crate) timers: TimerStack,
    pub(crate) flush_scheduled: bool,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) clock: Clock,
    pub(crate) config: TraceConfig,
    pub(crate) state: Mutex<TraceState>,
    pub(crate) flusher: Sender<FlushCmd>,
}

impl Shared {
    /// Lock the state, recovering from poisoning. A span guard records during
    /// unwinding, so a poisoned lock must not turn one panic into an abort.
    pub(crate) fn lock(&self) -> MutexGuard<'_, TraceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Handle to the tracing subsystem. Clones share the same buffer, timers,
/// and flusher.
#[derive(Debug, Clone)]
pub struct TraceContext {
    shared: Arc<Shared>,
}

impl TraceContext {
    /// Create a context and spawn its background flusher thread. The thread
    /// holds only a weak reference and exits once every handle is dropped.
    pub fn new(config: TraceConfig) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let delay = config.flush_delay;
        let shared = Arc::new(Shared {
            clock: Clock::new(),
            config,
            state: Mutex::new(TraceState::default()),
            flusher: tx,
        });
        writer::spawn_flusher(Arc::downgrade(&shared), rx, delay);
        Self { shared }
    }

    /// Context with the default configuration (`./perf.json`, 10s debounce).
    pub fn with_defaults() -> Self {
        Self::new(TraceConfig::default())
    }

    /// Current timestamp on this context's clock.
    pub fn now(&self) -> Micros {
        self.shared.clock.now()
    }

    /// Configuration this context was built with.
    pub fn config(&self) -> &TraceConfig {
        &self.shared.config
    }

    /// Begin a named phase. Nested and recursive starts under the same name
    /// are permitted; each must be matched by exactly one [`end`](Self::end).
    pub fn start(&self, name: &str) {
        let start = self.now();
        self.shared.lock().timers.push(name, start);
    }

    /// Finish the most recent start for `name` and record one event spanning
    /// the interval. Fails with [`TraceError::NoMatchingStart`] when no start
    /// is outstanding; nothing is recorded in that case.
    pub fn end(&self, name: &str) -> Result<()> {
        let end = self.now();
        let mut state = self.shared.lock();
        let start = state
            .timers
            .pop(name)
            .ok_or_else(|| TraceError::NoMatchingStart(name.to_string()))?;
        let event = TraceEvent::complete(name, self.shared.config.pid, start, end);
        self.push_locked(&mut state, event);
        Ok(())
    }

    /// Record a completed span directly from its endpoints.
    pub fn record_span(
        &self,
        name: impl Into<String>,
        start: Micros,
        end: Micros,
        args: Option<serde_json::Value>,
    ) {
        let mut event = TraceEvent::complete(name, self.shared.config.pid, start, end);
        if let Some(args) = args {
            event = event.with_args(args);
        }
        let mut state = self.shared.lock();
        self.push_locked(&mut state, event);
    }

    /// Append under the held lock and arm a flush if none is pending.
    fn push_locked(&self, state: &mut TraceState, event: TraceEvent) {
        state.events.push(event);
        if !state.flush_scheduled {
            state.flush_scheduled = true;
            if self.shared.flusher.send(FlushCmd::Arm).is_err() {
                // Flusher already gone (teardown); nothing is actually pending.
                state.flush_scheduled = false;
            } else {
                tracing::debug!(buffered = state.events.len(), "armed trace flush");
            }
        }
    }

    /// Snapshot of every event recorded so far, in span-close order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.shared.lock().events.clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synchronously serialize the entire buffer to the output path,
    /// bypassing the debounce window. Clears the pending flag on success or
    /// failure so a later record can re-arm.
    pub fn flush_now(&self) -> Result<()> {
        let snapshot = self.events();
        let result = writer::write_events(&self.shared.config.output_path, &snapshot);
        self.shared.lock().flush_scheduled = false;
        result
    }

    /// Drop all events and pending timers. Intended for test isolation; a
    /// running program never truncates its buffer mid-run.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        state.events.clear();
        state.timers.clear();
        state.flush_scheduled = false;
    }
}
