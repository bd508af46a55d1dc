//! Metric query endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use trackd_common::types::SeriesKey;
use uuid::Uuid;

use crate::aggregate::SeriesView;
use crate::error::{ApiError, ApiResult};
use crate::query::TaskLatest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub min_iter: Option<i64>,
    pub max_iter: Option<i64>,
    /// Maximum points in the response; defaults to the configured cap
    pub cap: Option<usize>,
}

/// GET /api/tasks/:id/metrics/:metric/:variant
///
/// Downsampled scalar series for one aggregate key. `min_iter`/`max_iter`
/// restrict the iteration window; `cap` bounds the response size.
pub async fn get_series(
    State(state): State<AppState>,
    Path((id, metric, variant)): Path<(Uuid, String, String)>,
    Query(query): Query<SeriesQuery>,
) -> ApiResult<Json<SeriesView>> {
    require_task(&state, id).await?;

    let range = match (query.min_iter, query.max_iter) {
        (None, None) => None,
        (min, max) => {
            let (min, max) = (min.unwrap_or(0), max.unwrap_or(i64::MAX));
            if min > max {
                return Err(ApiError::BadRequest(format!(
                    "min_iter {min} exceeds max_iter {max}"
                )));
            }
            Some((min, max))
        }
    };

    let key = SeriesKey::new(id, &metric, &variant);
    let view = state
        .aggregator
        .series(&key, query.cap, range, &CancellationToken::new())
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct MetricInventoryEntry {
    pub metric: String,
    pub variant: String,
}

#[derive(Debug, Serialize)]
pub struct MetricInventory {
    pub task_id: Uuid,
    pub metrics: Vec<MetricInventoryEntry>,
}

/// GET /api/tasks/:id/metrics
///
/// Distinct metric/variant pairs the task has ever reported.
pub async fn get_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MetricInventory>> {
    require_task(&state, id).await?;

    let metrics = state
        .events
        .metrics_and_variants(id)
        .await?
        .into_iter()
        .map(|(metric, variant)| MetricInventoryEntry { metric, variant })
        .collect();
    Ok(Json(MetricInventory { task_id: id, metrics }))
}

/// GET /api/tasks/:id/latest
///
/// Latest scalar per metric/variant, plus the task's counter.
pub async fn get_latest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskLatest>> {
    let latest = state.query.latest_scalars(id).await?;
    Ok(Json(latest))
}

async fn require_task(state: &AppState, id: Uuid) -> ApiResult<()> {
    if state.meta.get_task(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {id}")));
    }
    Ok(())
}
