//! Multi-task comparison endpoint

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use trackd_common::types::DEFAULT_VARIANT;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::query::CompareResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    /// Comma-separated task ids
    pub ids: String,
    pub metric: String,
    pub variant: Option<String>,
    pub cap: Option<usize>,
}

/// GET /api/tasks/compare?ids=..&metric=..&variant=..&cap=..
///
/// One downsampled series per task that reports the metric. Tasks
/// without data are omitted; per-task failures are listed alongside the
/// successful series instead of failing the request.
pub async fn compare_tasks(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> ApiResult<Json<CompareResult>> {
    let task_ids = parse_ids(&query.ids)?;
    if task_ids.is_empty() {
        return Err(ApiError::BadRequest("no task ids given".to_string()));
    }
    let metric = query.metric.trim();
    if metric.is_empty() {
        return Err(ApiError::BadRequest("metric is empty".to_string()));
    }
    let variant = query.variant.as_deref().unwrap_or(DEFAULT_VARIANT);

    let result = state
        .query
        .compare(&task_ids, metric, variant, query.cap, &CancellationToken::new())
        .await;
    Ok(Json(result))
}

fn parse_ids(raw: &str) -> ApiResult<Vec<Uuid>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| ApiError::BadRequest(format!("invalid task id: {s}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_accepts_comma_list() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ids = parse_ids(&format!("{a}, {b}")).expect("parse");
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_parse_ids_rejects_garbage() {
        assert!(parse_ids("not-a-uuid").is_err());
    }
}
