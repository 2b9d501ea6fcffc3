//! Chrome Trace Event data model
//!
//! Field names match the JSON trace-event array format consumed by
//! chrome://tracing and Perfetto. This crate records only complete spans
//! (`ph == "X"`): an event is constructed once both endpoints are known and
//! never exists half-open in the buffer.

use serde::{Deserialize, Serialize};

use crate::clock::Micros;

/// Trace-event phase marker. Only the complete-span phase is recorded;
/// begin/end pairs and counters are not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Phase {
    /// A finished interval carrying its own start and duration.
    #[default]
    #[serde(rename = "X")]
    Complete,
}

/// One completed named time interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Phase name, `"Owner:method(args)"` for instrumented calls, or
    /// `"require <module>"` for intercepted loads.
    pub name: String,
    /// Phase marker, constant `"X"`.
    pub ph: Phase,
    /// Process tag. Required by the trace viewer; constant in this
    /// single-process model.
    pub pid: u32,
    /// Start timestamp in microseconds since the clock origin.
    pub ts: Micros,
    /// Duration in microseconds, `end - start`.
    pub dur: Micros,
    /// Optional free-form metadata (stringified call arguments, etc).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub args: Option<serde_json::Value>,
}

impl TraceEvent {
    /// Build a complete-span event from its two endpoints. Duration is
    /// saturating so a degenerate pair can never yield a negative value.
    pub fn complete(name: impl Into<String>, pid: u32, start: Micros, end: Micros) -> Self {
        Self {
            name: name.into(),
            ph: Phase::Complete,
            pid,
            ts: start,
            dur: end.saturating_sub(start),
            args: None,
        }
    }

    /// Attach metadata to the event.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_computes_duration() {
        let event = TraceEvent::complete("phase", 1, 1_000, 3_500);
        assert_eq!(event.name, "phase");
        assert_eq!(event.ph, Phase::Complete);
        assert_eq!(event.pid, 1);
        assert_eq!(event.ts, 1_000);
        assert_eq!(event.dur, 2_500);
        assert_eq!(event.args, None);
    }

    #[test]
    fn test_degenerate_span_saturates() {
        let event = TraceEvent::complete("weird", 1, 500, 400);
        assert_eq!(event.dur, 0);
    }

    #[test]
    fn test_serialized_field_names() {
        let event = TraceEvent::complete("require fs", 1, 10, 25);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"name":"require fs","ph":"X","pid":1,"ts":10,"dur":15}"#
        );
    }

    #[test]
    fn test_args_serialized_when_present() {
        let event = TraceEvent::complete("Widget:render(a)", 1, 0, 5)
            .with_args(serde_json::json!({"args": "a"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""args":{"args":"a"}"#));
    }

    #[test]
    fn test_roundtrip() {
        let event = TraceEvent::complete("phase", 1, 42, 84);
        let json = serde_json::to_string(&event).unwrap();
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
