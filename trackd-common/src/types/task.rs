//! Task lifecycle types and the task state machine
//!
//! A task is one tracked experiment run. Status changes happen only
//! through `TaskStatus::transition`, which enforces the lifecycle graph:
//!
//! ```text
//! created -> queued -> in_progress -> {completed, stopped, failed}
//! in_progress -> in_progress            (heartbeat no-op)
//! created/queued -> stopped             (explicit stop)
//! completed/failed/stopped -> published (read-only archival)
//! ```
//!
//! Terminal states block further metric-event ingestion and freeze the
//! iteration counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Queued,
    InProgress,
    Stopped,
    Completed,
    Failed,
    Published,
}

impl TaskStatus {
    /// Storage representation of the status
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Published => "published",
        }
    }

    /// Parse a stored status string
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "created" => Some(TaskStatus::Created),
            "queued" => Some(TaskStatus::Queued),
            "in_progress" => Some(TaskStatus::InProgress),
            "stopped" => Some(TaskStatus::Stopped),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "published" => Some(TaskStatus::Published),
            _ => None,
        }
    }

    /// Terminal states freeze the iteration counter and block event
    /// ingestion. `published` is additionally read-only archival.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Stopped | TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Published
        )
    }

    /// Whether an edge from `self` to `to` exists in the lifecycle graph
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::{Completed, Created, Failed, InProgress, Published, Queued, Stopped};
        matches!(
            (self, to),
            (Created, Queued)
                | (Queued, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                // any non-terminal state may be stopped explicitly
                | (Created, Stopped)
                | (Queued, Stopped)
                | (InProgress, Stopped)
                | (Completed, Published)
                | (Failed, Published)
                | (Stopped, Published)
        )
    }

    /// Validate a transition, returning the new status or `InvalidTransition`
    pub fn transition(self, to: TaskStatus) -> Result<TaskStatus, InvalidTransition> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted status transition not present in the lifecycle graph.
/// The task's state is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// One tracked experiment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: String,
    pub status: TaskStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_iteration: i64,
}
