//! Named timer stacks for manual phase timing
//!
//! Each name maps to a stack of pending start timestamps so re-entrant and
//! recursive phases under the same name pair up LIFO: the most recent start
//! is matched by the next end. A start with no matching end simply leaves its
//! slot behind; there is no timeout or cancellation for the diagnostic use
//! case.

use std::collections::HashMap;

use crate::clock::Micros;

/// Name -> stack of outstanding start timestamps.
#[derive(Debug, Default)]
pub struct TimerStack {
    stacks: HashMap<String, Vec<Micros>>,
}

impl TimerStack {
    /// Create an empty timer stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a start timestamp for `name`, creating its stack if absent.
    pub fn push(&mut self, name: &str, start: Micros) {
        self.stacks.entry(name.to_string()).or_default().push(start);
    }

    /// Pop the most recent start for `name`. Returns `None` when the name has
    /// no stack or an empty stack; the caller turns that into a pairing error.
    pub fn pop(&mut self, name: &str) -> Option<Micros> {
        self.stacks.get_mut(name)?.pop()
    }

    /// Number of unmatched starts for `name`.
    pub fn outstanding(&self, name: &str) -> usize {
        self.stacks.get(name).map_or(0, Vec::len)
    }

    /// Drop all pending starts (test isolation teardown).
    pub fn clear(&mut self) {
        self.stacks.clear();
    }
}
