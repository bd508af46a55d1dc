//! Task lifecycle endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use trackd_common::types::{Task, TaskStatus};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::reconcile::watchdog::is_stalled;
use crate::AppState;

/// Task snapshot returned by the API; `stalled` is the derived watchdog
/// flag, not part of the stored status
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub stalled: bool,
}

impl TaskView {
    fn new(task: Task, state: &AppState) -> Self {
        let stalled = is_stalled(&state.stalled, task.id);
        Self { task, stalled }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub project_id: Option<Uuid>,
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<Json<TaskView>> {
    let task = state.meta.create_task(&req.name, req.project_id).await?;
    info!("created task {} ({})", task.id, task.name);
    Ok(Json(TaskView::new(task, &state)))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskView>> {
    let task = state
        .meta
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {id}")))?;
    Ok(Json(TaskView::new(task, &state)))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target_state: TaskStatus,
    pub status_reason: Option<String>,
}

/// POST /api/tasks/:id/transition
///
/// Request a status edge. A disallowed edge returns 409 and leaves the
/// task unchanged.
pub async fn transition_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<Json<TaskView>> {
    let task = state
        .meta
        .transition(id, req.target_state, req.status_reason)
        .await?;
    info!("task {} -> {}", id, task.status.as_str());
    Ok(Json(TaskView::new(task, &state)))
}

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub deleted: bool,
    pub events_removed: u64,
}

/// DELETE /api/tasks/:id
///
/// Cascade delete: events first (so a crash mid-delete leaves an empty
/// but consistent task), then derived views, then the task row itself.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteTaskResponse>> {
    if state.meta.get_task(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {id}")));
    }

    let events_removed = state.events.delete_task(id).await?;
    state.aggregator.invalidate_task(id);
    let deleted = state.meta.delete_task(id).await?;
    {
        let mut flags = state
            .stalled
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        flags.remove(&id);
    }

    info!("deleted task {} ({} events removed)", id, events_removed);
    Ok(Json(DeleteTaskResponse {
        deleted,
        events_removed,
    }))
}
