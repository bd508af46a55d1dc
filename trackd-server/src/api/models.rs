//! Model registration endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use trackd_common::types::Model;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub artifact_uri: String,
}

/// POST /api/tasks/:id/models
pub async fn create_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateModelRequest>,
) -> ApiResult<Json<Model>> {
    let model = state
        .meta
        .create_model(id, &req.name, &req.artifact_uri)
        .await?;
    info!("registered model {} for task {}", model.id, id);
    Ok(Json(model))
}

/// GET /api/tasks/:id/models
pub async fn task_models(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Model>>> {
    if state.meta.get_task(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {id}")));
    }
    let models = state.meta.task_models(id).await?;
    Ok(Json(models))
}
