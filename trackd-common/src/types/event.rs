//! Metric event types
//!
//! One metric event is a single reported data point for a task at a given
//! iteration. Payloads are a closed tagged variant over the three event
//! families (scalar, console line, plot blob); validation dispatches on
//! the tag rather than inspecting an open dictionary.
//!
//! Uniqueness key: `(task_id, metric, variant, iteration, value_kind)`.
//! A later write with the same key replaces the earlier one, resolved by
//! wall-clock arrival order, not by the embedded timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Variant used when a reporting client omits one
pub const DEFAULT_VARIANT: &str = "default";

/// Event family tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Scalar,
    ConsoleLine,
    PlotBlob,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Scalar => "scalar",
            ValueKind::ConsoleLine => "console_line",
            ValueKind::PlotBlob => "plot_blob",
        }
    }

    pub fn parse(s: &str) -> Option<ValueKind> {
        match s {
            "scalar" => Some(ValueKind::Scalar),
            "console_line" => Some(ValueKind::ConsoleLine),
            "plot_blob" => Some(ValueKind::PlotBlob),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload, tagged by family. A payload whose shape does not match
/// its `value_kind` tag fails deserialization, which the gateway reports
/// as a `MalformedPayload` rejection for that event alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// Numeric training metric (loss, accuracy, ...)
    Scalar(f64),
    /// One console/log line emitted by the training job
    ConsoleLine(String),
    /// Serialized plot (opaque to this core)
    PlotBlob(String),
}

impl EventPayload {
    pub fn kind(&self) -> ValueKind {
        match self {
            EventPayload::Scalar(_) => ValueKind::Scalar,
            EventPayload::ConsoleLine(_) => ValueKind::ConsoleLine,
            EventPayload::PlotBlob(_) => ValueKind::PlotBlob,
        }
    }
}

/// Raw event exactly as submitted by a reporting client, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub task_id: Uuid,
    pub metric: String,
    #[serde(default)]
    pub variant: Option<String>,
    pub iteration: i64,
    /// Client-reported timestamp; defaults to arrival time when omitted
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Normalized event produced by the validator; immutable once stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub task_id: Uuid,
    pub metric: String,
    pub variant: String,
    pub iteration: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl MetricEvent {
    /// Full uniqueness key for upsert semantics
    pub fn key(&self) -> EventKey {
        EventKey {
            task_id: self.task_id,
            metric: self.metric.clone(),
            variant: self.variant.clone(),
            iteration: self.iteration,
            value_kind: self.payload.kind(),
        }
    }

    /// Aggregate-view key (iteration-independent)
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            task_id: self.task_id,
            metric: self.metric.clone(),
            variant: self.variant.clone(),
        }
    }
}

/// Uniqueness key of one stored event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub task_id: Uuid,
    pub metric: String,
    pub variant: String,
    pub iteration: i64,
    pub value_kind: ValueKind,
}

/// Key of one aggregate view: `(task_id, metric, variant)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub task_id: Uuid,
    pub metric: String,
    pub variant: String,
}

impl SeriesKey {
    pub fn new(task_id: Uuid, metric: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            task_id,
            metric: metric.into(),
            variant: variant.into(),
        }
    }
}

/// Classified per-event rejection reason.
///
/// The validator emits the first four; `storage_unavailable` is added by
/// the ingestion gateway when storage retries were exhausted for one
/// event (retryable by the client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnknownTask,
    TerminalTask,
    MalformedPayload,
    StaleTimestamp,
    StorageUnavailable,
}

/// One rejected event: classified reason plus a human-readable detail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tag_dispatch() {
        assert_eq!(EventPayload::Scalar(1.0).kind(), ValueKind::Scalar);
        assert_eq!(
            EventPayload::ConsoleLine("epoch done".into()).kind(),
            ValueKind::ConsoleLine
        );
        assert_eq!(
            EventPayload::PlotBlob("{}".into()).kind(),
            ValueKind::PlotBlob
        );
    }

    #[test]
    fn test_raw_event_deserializes_tagged_payload() {
        let raw: RawEvent = serde_json::from_value(serde_json::json!({
            "task_id": "00000000-0000-0000-0000-000000000001",
            "metric": "loss",
            "variant": "train",
            "iteration": 3,
            "value_kind": "scalar",
            "payload": 0.25,
        }))
        .expect("valid raw event");
        assert_eq!(raw.payload, EventPayload::Scalar(0.25));
        assert_eq!(raw.variant.as_deref(), Some("train"));
    }

    #[test]
    fn test_mismatched_payload_shape_fails_deserialization() {
        // scalar tag with string payload is a malformed event
        let result = serde_json::from_value::<RawEvent>(serde_json::json!({
            "task_id": "00000000-0000-0000-0000-000000000001",
            "metric": "loss",
            "iteration": 0,
            "value_kind": "scalar",
            "payload": "not a number",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_value_kind_fails_deserialization() {
        let result = serde_json::from_value::<RawEvent>(serde_json::json!({
            "task_id": "00000000-0000-0000-0000-000000000001",
            "metric": "loss",
            "iteration": 0,
            "value_kind": "histogram",
            "payload": 1,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_value_kind_string_round_trip() {
        for kind in [ValueKind::Scalar, ValueKind::ConsoleLine, ValueKind::PlotBlob] {
            assert_eq!(ValueKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ValueKind::parse("vector"), None);
    }
}
