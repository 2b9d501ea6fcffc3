//! Debounced, coalesced persistence of the event buffer
//!
//! The first record after an idle period arms a one-shot debounce window on a
//! background flusher thread; every record inside that window rides along
//! with the same write. When the window elapses the flusher serializes the
//! entire buffer (the output is a single JSON array, so writes are never
//! incremental) and clears the pending flag.
//!
//! A write failure is logged and never retried: tracing stays best-effort and
//! must not become a source of application failures.

use std::fs;
use std::path::Path;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::context::Shared;
use crate::error::{Result, TraceError};
use crate::event::TraceEvent;

/// Commands understood by the flusher thread.
#[derive(Debug)]
pub(crate) enum FlushCmd {
    /// Start one debounce window. At most one may be outstanding; the
    /// pending flag in [`TraceState`](crate::context) enforces that.
    Arm,
}

/// Spawn the background flusher. It holds only a weak reference to the
/// shared state and exits once every context handle is dropped.
pub(crate) fn spawn_flusher(shared: Weak<Shared>, rx: Receiver<FlushCmd>, delay: Duration) {
    thread::spawn(move || {
        while let Ok(FlushCmd::Arm) = rx.recv() {
            // Debounce window. Nothing else can arrive while a flush is
            // pending, so either outcome means the window is over.
            match rx.recv_timeout(delay) {
                Ok(FlushCmd::Arm) => {}
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            flush(&shared);
        }
    });
}

/// Serialize the full buffer, then clear the pending flag. The flag stays set
/// for the duration of the write so records arriving meanwhile do not arm
/// another window.
fn flush(shared: &Shared) {
    let snapshot = shared.lock().events.clone();
    let path = &shared.config.output_path;
    match write_events(path, &snapshot) {
        Ok(()) => {
            tracing::debug!(
                events = snapshot.len(),
                path = %path.display(),
                "wrote performance trace"
            );
        }
        Err(err) => {
            tracing::warn!("failed to write performance trace: {err}");
        }
    }
    shared.lock().flush_scheduled = false;
}

/// Write the events as one JSON array to `path`.
pub(crate) fn write_events(path: &Path, events: &[TraceEvent]) -> Result<()> {
    let json = serde_json::to_string(events)?;
    fs::write(path, json).map_err(|source| TraceError::Write {
        path: path.to_path_buf(),
        source,
    })
}
