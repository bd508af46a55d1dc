//! Project endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use trackd_common::types::{Project, Task};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<Json<Project>> {
    let project = state.meta.create_project(&req.name).await?;
    info!("created project {} ({})", project.id, project.name);
    Ok(Json(project))
}

/// GET /api/projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    let projects = state.meta.list_projects().await?;
    Ok(Json(projects))
}

/// GET /api/projects/:id/tasks
pub async fn project_tasks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Task>>> {
    if state.meta.get_project(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("project {id}")));
    }
    let tasks = state.meta.project_tasks(id).await?;
    Ok(Json(tasks))
}
