//! Event ingestion and retrieval endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trackd_common::types::MetricEvent;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::ingest::BatchResult;
use crate::AppState;

/// POST /api/events/batch
///
/// Submit a batch of metric events. The response always carries one
/// outcome per submitted event; rejected events never fail the batch.
/// An empty batch is a caller error.
pub async fn add_batch(
    State(state): State<AppState>,
    Json(batch): Json<Vec<serde_json::Value>>,
) -> ApiResult<Json<BatchResult>> {
    if batch.is_empty() {
        return Err(ApiError::BadRequest("empty event batch".to_string()));
    }

    let size = batch.len();
    let result = state.gateway.add_batch(batch).await;
    debug!(
        "event batch: {} submitted, {} added, {} rejected",
        size, result.added, result.errors
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct EventScanQuery {
    pub metric: Option<String>,
    pub variant: Option<String>,
    pub min_iter: Option<i64>,
    pub max_iter: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub task_id: Uuid,
    pub events: Vec<MetricEvent>,
}

/// GET /api/tasks/:id/events
///
/// Full iteration-ordered scan of a task's stored events (all families,
/// including console lines and plot blobs), optionally filtered by
/// metric, variant, and iteration window. Reads in pages internally.
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventScanQuery>,
) -> ApiResult<Json<EventListResponse>> {
    if state.meta.get_task(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {id}")));
    }

    let range = match (query.min_iter, query.max_iter) {
        (None, None) => None,
        (min, max) => Some((min.unwrap_or(0), max.unwrap_or(i64::MAX))),
    };
    let mut scan = state.events.scan(id, query.metric, query.variant, range);
    let events = scan.collect_all().await?;
    Ok(Json(EventListResponse { task_id: id, events }))
}
