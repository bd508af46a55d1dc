//! Comparison query engine
//!
//! Read path combining metadata-store attributes with aggregator output.
//! Multi-task comparison tolerates partial availability: tasks that never
//! reported the selected metric are omitted, and a per-task aggregation
//! failure is reported alongside the successful series instead of failing
//! the whole query.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trackd_common::types::{SeriesKey, TaskStatus};
use trackd_common::{Error, Result};
use uuid::Uuid;

use crate::aggregate::{Aggregator, SeriesPoint};
use crate::reconcile::watchdog::{is_stalled, StalledFlags};
use crate::store::{EventStore, LatestScalar, MetadataStore};

#[derive(Clone)]
pub struct QueryEngine {
    meta: MetadataStore,
    events: EventStore,
    aggregator: Arc<Aggregator>,
    stalled: StalledFlags,
}

/// One task's series in a comparison response
#[derive(Debug, Clone, Serialize)]
pub struct TaskSeries {
    pub task_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    /// Derived watchdog flag; never part of the task's actual status
    pub stalled: bool,
    pub points: Vec<SeriesPoint>,
    pub latest: Option<SeriesPoint>,
}

/// One task's failure in a comparison response
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub task_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct CompareResult {
    pub series: Vec<TaskSeries>,
    pub failures: Vec<TaskFailure>,
}

/// Latest scalar snapshot for one task across all its metrics
#[derive(Debug, Serialize)]
pub struct TaskLatest {
    pub task_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub stalled: bool,
    pub last_iteration: i64,
    pub metrics: Vec<LatestScalar>,
}

impl QueryEngine {
    pub fn new(
        meta: MetadataStore,
        events: EventStore,
        aggregator: Arc<Aggregator>,
        stalled: StalledFlags,
    ) -> Self {
        Self {
            meta,
            events,
            aggregator,
            stalled,
        }
    }

    /// One aggregate series per task that actually reports the metric.
    /// Unknown tasks and per-task aggregation errors land in `failures`;
    /// tasks with no data for the selector are simply omitted.
    pub async fn compare(
        &self,
        task_ids: &[Uuid],
        metric: &str,
        variant: &str,
        cap: Option<usize>,
        cancel: &CancellationToken,
    ) -> CompareResult {
        let lookups = task_ids
            .iter()
            .map(|&task_id| self.one_task(task_id, metric, variant, cap, cancel));
        let outcomes = join_all(lookups).await;

        let mut series = Vec::new();
        let mut failures = Vec::new();
        for (task_id, outcome) in task_ids.iter().copied().zip(outcomes) {
            match outcome {
                Ok(Some(task_series)) => series.push(task_series),
                Ok(None) => {} // no data for this selector: omitted, not errored
                Err(e) => failures.push(TaskFailure {
                    task_id,
                    error: e.to_string(),
                }),
            }
        }
        CompareResult { series, failures }
    }

    async fn one_task(
        &self,
        task_id: Uuid,
        metric: &str,
        variant: &str,
        cap: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Option<TaskSeries>> {
        let task = self
            .meta
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        let key = SeriesKey::new(task_id, metric, variant);
        let view = self.aggregator.series(&key, cap, None, cancel).await?;
        if view.points.is_empty() {
            return Ok(None);
        }

        Ok(Some(TaskSeries {
            task_id,
            name: task.name,
            status: task.status,
            stalled: is_stalled(&self.stalled, task_id),
            points: view.points,
            latest: view.latest,
        }))
    }

    /// Latest scalar value per metric/variant for one task, plus the
    /// task's counter and watchdog flag
    pub async fn latest_scalars(&self, task_id: Uuid) -> Result<TaskLatest> {
        let task = self
            .meta
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        let metrics = self.events.latest_scalars(task_id).await?;

        Ok(TaskLatest {
            task_id,
            name: task.name,
            status: task.status,
            stalled: is_stalled(&self.stalled, task_id),
            last_iteration: task.last_iteration,
            metrics,
        })
    }
}
