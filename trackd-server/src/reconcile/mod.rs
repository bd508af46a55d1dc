//! Event stream reconciliation
//!
//! Network-delivered telemetry arrives out of order and sometimes
//! duplicated. Storage itself is keyed (the event store upsert handles
//! duplicates), so the reconciler's job is keeping the task's
//! `last_iteration` counter honest and flagging tasks that stopped
//! reporting (see `watchdog`).

pub mod watchdog;

pub use watchdog::{StalledFlags, Watchdog};

use tracing::debug;
use trackd_common::Result;
use uuid::Uuid;

use crate::store::{EventStore, MetadataStore};

#[derive(Clone)]
pub struct Reconciler {
    meta: MetadataStore,
    events: EventStore,
    skew_tolerance: i64,
}

impl Reconciler {
    pub fn new(meta: MetadataStore, events: EventStore, skew_tolerance: i64) -> Self {
        Self {
            meta,
            events,
            skew_tolerance,
        }
    }

    /// Called for every accepted event. An iteration far below the task's
    /// counter (beyond the configured skew tolerance) means the counter
    /// may have drifted from reality, so it is recomputed as the true
    /// maximum over stored events. A single stray low-iteration event can
    /// therefore never reset lifecycle heuristics.
    pub async fn observe(&self, task_id: Uuid, iteration: i64) -> Result<()> {
        let Some(task) = self.meta.get_task(task_id).await? else {
            // task deleted between validation and reconciliation
            return Ok(());
        };
        if iteration >= task.last_iteration - self.skew_tolerance {
            return Ok(());
        }

        let true_max = self.events.max_iteration(task_id).await?;
        self.meta.set_last_iteration(task_id, true_max).await?;
        debug!("recomputed last_iteration for task {task_id}: {true_max}");
        Ok(())
    }
}
