//! Ingestion gateway
//!
//! Entry point for metric-event batches. Each event is independently
//! deserialized, validated, durably upserted, and handed to the
//! reconciler; the per-event outcome list always has one entry per
//! submitted event, so partial batch success is the normal case, not an
//! error. After the batch, every touched task gets one heartbeat
//! (counter advance + last_update refresh) through the serialized
//! metadata store.

pub mod validator;

use std::collections::HashMap;
use std::sync::Arc;
use serde::Serialize;
use tracing::warn;
use trackd_common::types::{RawEvent, RejectReason, Rejection, Task};
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::reconcile::Reconciler;
use crate::store::{EventStore, MetadataStore};

#[derive(Clone)]
pub struct IngestGateway {
    meta: MetadataStore,
    events: EventStore,
    reconciler: Reconciler,
    aggregator: Arc<Aggregator>,
}

/// Outcome for one event of a batch
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub index: usize,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EventOutcome {
    fn accepted(index: usize) -> Self {
        Self {
            index,
            accepted: true,
            reason: None,
            message: None,
        }
    }

    fn rejected(index: usize, rejection: Rejection) -> Self {
        Self {
            index,
            accepted: false,
            reason: Some(rejection.reason),
            message: Some(rejection.message),
        }
    }
}

/// Batch response: counts plus one outcome per submitted event
#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub added: usize,
    pub errors: usize,
    pub results: Vec<EventOutcome>,
}

impl IngestGateway {
    pub fn new(
        meta: MetadataStore,
        events: EventStore,
        reconciler: Reconciler,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            meta,
            events,
            reconciler,
            aggregator,
        }
    }

    /// Process a batch of raw events. Never fails as a whole: every
    /// submitted event is answered with exactly one outcome.
    pub async fn add_batch(&self, batch: Vec<serde_json::Value>) -> BatchResult {
        let mut results = Vec::with_capacity(batch.len());
        // task snapshots fetched once per batch, shared across its events
        let mut tasks: HashMap<Uuid, Option<Task>> = HashMap::new();
        // highest accepted iteration per task, for the post-batch heartbeat
        let mut touched: HashMap<Uuid, i64> = HashMap::new();

        for (index, value) in batch.into_iter().enumerate() {
            let outcome = self.process_one(index, value, &mut tasks, &mut touched).await;
            results.push(outcome);
        }

        for (task_id, max_iteration) in touched {
            if let Err(e) = self.meta.heartbeat(task_id, max_iteration).await {
                // events are already durable; a missed heartbeat is
                // recovered by the next batch or the reconciler
                warn!("heartbeat failed for task {task_id}: {e}");
            }
        }

        let added = results.iter().filter(|r| r.accepted).count();
        BatchResult {
            added,
            errors: results.len() - added,
            results,
        }
    }

    async fn process_one(
        &self,
        index: usize,
        value: serde_json::Value,
        tasks: &mut HashMap<Uuid, Option<Task>>,
        touched: &mut HashMap<Uuid, i64>,
    ) -> EventOutcome {
        // shape errors (unknown value_kind, payload/tag mismatch, missing
        // fields) reject this event alone
        let raw: RawEvent = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                return EventOutcome::rejected(
                    index,
                    Rejection::new(RejectReason::MalformedPayload, format!("malformed event: {e}")),
                );
            }
        };

        let task = match tasks.entry(raw.task_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                match self.meta.get_task(raw.task_id).await {
                    Ok(task) => entry.insert(task),
                    Err(e) => {
                        return EventOutcome::rejected(
                            index,
                            Rejection::new(RejectReason::StorageUnavailable, e.to_string()),
                        );
                    }
                }
            }
        };

        let event = match validator::validate(raw, task.as_ref()) {
            Ok(event) => event,
            Err(rejection) => return EventOutcome::rejected(index, rejection),
        };

        if let Err(e) = self.events.put(&event).await {
            // the task row vanished between the snapshot and the write;
            // the schema's foreign key turned that into a rejected insert
            let rejection = match &e {
                trackd_common::Error::Database(sqlx::Error::Database(db))
                    if db.is_foreign_key_violation() =>
                {
                    Rejection::new(
                        RejectReason::UnknownTask,
                        format!("task {} deleted during ingestion", event.task_id),
                    )
                }
                _ => Rejection::new(RejectReason::StorageUnavailable, e.to_string()),
            };
            return EventOutcome::rejected(index, rejection);
        }

        // derived views must never be staler than one ingestion cycle
        self.aggregator.invalidate(&event.series_key());

        // reconciliation is advisory; its failure never un-accepts the
        // durable event
        if let Err(e) = self.reconciler.observe(event.task_id, event.iteration).await {
            warn!("reconcile failed for task {}: {e}", event.task_id);
        }

        touched
            .entry(event.task_id)
            .and_modify(|max| *max = (*max).max(event.iteration))
            .or_insert(event.iteration);

        EventOutcome::accepted(index)
    }
}
