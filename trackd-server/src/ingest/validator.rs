//! Event validation and normalization
//!
//! Front gate of the ingestion pipeline. Given a raw event and a snapshot
//! of its owning task, either produces a normalized `MetricEvent` or a
//! classified rejection. Rejections are plain values handed back to the
//! caller; nothing here panics and nothing is dropped silently.
//!
//! Payload/kind shape mismatches are caught one step earlier, when the
//! gateway deserializes the raw JSON into the tagged `RawEvent`; by the
//! time an event reaches `validate` its payload already matches its tag.

use trackd_common::time;
use trackd_common::types::{
    EventPayload, MetricEvent, RawEvent, RejectReason, Rejection, Task, DEFAULT_VARIANT,
};

/// Validate one raw event against its owning task snapshot
/// (`None` when no such task exists).
pub fn validate(raw: RawEvent, task: Option<&Task>) -> Result<MetricEvent, Rejection> {
    let Some(task) = task else {
        return Err(Rejection::new(
            RejectReason::UnknownTask,
            format!("unknown task {}", raw.task_id),
        ));
    };

    if task.status.is_terminal() {
        return Err(Rejection::new(
            RejectReason::TerminalTask,
            format!("task {} is {} and no longer accepts events", task.id, task.status),
        ));
    }

    if raw.iteration < 0 {
        return Err(Rejection::new(
            RejectReason::MalformedPayload,
            format!("negative iteration {}", raw.iteration),
        ));
    }

    let metric = raw.metric.trim();
    if metric.is_empty() {
        return Err(Rejection::new(
            RejectReason::MalformedPayload,
            "empty metric name",
        ));
    }

    if let EventPayload::Scalar(value) = raw.payload {
        if !value.is_finite() {
            return Err(Rejection::new(
                RejectReason::MalformedPayload,
                format!("non-finite scalar value {value}"),
            ));
        }
    }

    // Missing timestamp defaults to arrival time; a timestamp predating
    // the task is a reporting-client clock problem, not a storable event
    let timestamp = raw.timestamp.unwrap_or_else(time::now);
    if timestamp < task.created_at {
        return Err(Rejection::new(
            RejectReason::StaleTimestamp,
            format!(
                "event timestamp {timestamp} predates task creation {}",
                task.created_at
            ),
        ));
    }

    let variant = raw
        .variant
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_VARIANT)
        .to_string();

    Ok(MetricEvent {
        task_id: task.id,
        metric: metric.to_string(),
        variant,
        iteration: raw.iteration,
        timestamp,
        payload: raw.payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use trackd_common::types::TaskStatus;
    use uuid::Uuid;

    fn task(status: TaskStatus) -> Task {
        let now = time::now();
        Task {
            id: Uuid::new_v4(),
            project_id: None,
            name: "t".to_string(),
            status,
            status_reason: None,
            created_at: now - Duration::hours(1),
            last_update: now,
            last_iteration: 0,
        }
    }

    fn raw(task_id: Uuid, iteration: i64, payload: EventPayload) -> RawEvent {
        RawEvent {
            task_id,
            metric: "loss".to_string(),
            variant: Some("train".to_string()),
            iteration,
            timestamp: None,
            payload,
        }
    }

    #[test]
    fn test_accepts_and_normalizes() {
        let task = task(TaskStatus::InProgress);
        let mut event = raw(task.id, 3, EventPayload::Scalar(0.5));
        event.metric = "  loss ".to_string();
        event.variant = None;
        let normalized = validate(event, Some(&task)).expect("accepted");
        assert_eq!(normalized.metric, "loss");
        assert_eq!(normalized.variant, DEFAULT_VARIANT);
        assert_eq!(normalized.iteration, 3);
    }

    #[test]
    fn test_unknown_task() {
        let event = raw(Uuid::new_v4(), 0, EventPayload::Scalar(1.0));
        let rejection = validate(event, None).expect_err("rejected");
        assert_eq!(rejection.reason, RejectReason::UnknownTask);
    }

    #[test]
    fn test_terminal_task_blocks_ingestion() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Stopped,
            TaskStatus::Published,
        ] {
            let task = task(status);
            let event = raw(task.id, 5, EventPayload::Scalar(1.0));
            let rejection = validate(event, Some(&task)).expect_err("rejected");
            assert_eq!(rejection.reason, RejectReason::TerminalTask, "{status}");
        }
    }

    #[test]
    fn test_negative_iteration_is_malformed() {
        let task = task(TaskStatus::InProgress);
        let event = raw(task.id, -1, EventPayload::Scalar(1.0));
        let rejection = validate(event, Some(&task)).expect_err("rejected");
        assert_eq!(rejection.reason, RejectReason::MalformedPayload);
    }

    #[test]
    fn test_non_finite_scalar_is_malformed() {
        let task = task(TaskStatus::InProgress);
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let event = raw(task.id, 0, EventPayload::Scalar(value));
            let rejection = validate(event, Some(&task)).expect_err("rejected");
            assert_eq!(rejection.reason, RejectReason::MalformedPayload);
        }
    }

    #[test]
    fn test_timestamp_before_task_creation_is_stale() {
        let task = task(TaskStatus::InProgress);
        let mut event = raw(task.id, 0, EventPayload::Scalar(1.0));
        event.timestamp = Some(task.created_at - Duration::minutes(5));
        let rejection = validate(event, Some(&task)).expect_err("rejected");
        assert_eq!(rejection.reason, RejectReason::StaleTimestamp);
    }

    #[test]
    fn test_console_line_accepted_for_created_task() {
        // events may legally arrive before the scheduler starts the task
        let task = task(TaskStatus::Created);
        let event = raw(task.id, 0, EventPayload::ConsoleLine("starting".to_string()));
        assert!(validate(event, Some(&task)).is_ok());
    }
}
