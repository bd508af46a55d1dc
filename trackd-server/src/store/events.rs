//! Event store adapter
//!
//! Append-only store of metric events keyed by
//! `(task_id, metric, variant, iteration, value_kind)`. `put` is an atomic
//! upsert: a later write with the same key replaces the earlier one,
//! resolved by arrival order (`arrival_seq`), never by the embedded
//! timestamp, to tolerate clock skew across reporting clients. Writes to
//! different keys proceed in parallel; same-key writes are linearized by
//! the upsert itself. Rows are clustered by `task_id` via the primary key
//! for cheap cascade delete and range scans.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use trackd_common::types::{EventPayload, MetricEvent, SeriesKey, ValueKind};
use trackd_common::{time, Error, Result};
use uuid::Uuid;

use super::retry::{with_retry, RetryPolicy};

#[derive(Clone)]
pub struct EventStore {
    db: SqlitePool,
    retry: RetryPolicy,
    page_size: i64,
    arrival_seq: Arc<AtomicI64>,
}

/// Latest scalar value for one `(metric, variant)` of a task
#[derive(Debug, Clone, serde::Serialize)]
pub struct LatestScalar {
    pub metric: String,
    pub variant: String,
    pub iteration: i64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl EventStore {
    /// Open the adapter over an initialized pool. The arrival counter
    /// resumes from the highest stored sequence number.
    pub async fn new(db: SqlitePool, retry: RetryPolicy, page_size: i64) -> Result<Self> {
        let start: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(arrival_seq), 0) FROM task_events")
            .fetch_one(&db)
            .await?;
        Ok(Self {
            db,
            retry,
            page_size,
            arrival_seq: Arc::new(AtomicI64::new(start)),
        })
    }

    /// Upsert one event (last-write-wins by arrival order).
    /// Atomic per key: concurrent same-key writers never leave a
    /// half-updated row.
    pub async fn put(&self, event: &MetricEvent) -> Result<()> {
        let seq = self.arrival_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = event.task_id.to_string();
        let kind = event.payload.kind().as_str();
        let ts = time::to_millis(event.timestamp);
        let (scalar_value, text_value) = match &event.payload {
            EventPayload::Scalar(v) => (Some(*v), None),
            EventPayload::ConsoleLine(s) => (None, Some(s.as_str())),
            EventPayload::PlotBlob(s) => (None, Some(s.as_str())),
        };

        with_retry(self.retry, "event put", || async {
            sqlx::query(
                "INSERT INTO task_events \
                 (task_id, metric, variant, iteration, value_kind, timestamp, scalar_value, text_value, arrival_seq) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(task_id, metric, variant, iteration, value_kind) DO UPDATE SET \
                 timestamp = excluded.timestamp, \
                 scalar_value = excluded.scalar_value, \
                 text_value = excluded.text_value, \
                 arrival_seq = excluded.arrival_seq",
            )
            .bind(&task_id)
            .bind(&event.metric)
            .bind(&event.variant)
            .bind(event.iteration)
            .bind(kind)
            .bind(ts)
            .bind(scalar_value)
            .bind(text_value)
            .bind(seq)
            .execute(&self.db)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Start a lazy, restartable, iteration-ordered scan over one task's
    /// events. Consume with `next_page`; an exhausted or abandoned scan
    /// can be restarted from the top with `restart`.
    pub fn scan(
        &self,
        task_id: Uuid,
        metric: Option<String>,
        variant: Option<String>,
        iteration_range: Option<(i64, i64)>,
    ) -> EventScan {
        EventScan {
            db: self.db.clone(),
            retry: self.retry,
            page_size: self.page_size,
            task_id,
            metric,
            variant,
            iteration_range,
            cursor: None,
            done: false,
        }
    }

    /// Highest-iteration event for an aggregate key, optionally filtered
    /// to one event family. O(lookup) through the primary-key index.
    pub async fn latest(
        &self,
        key: &SeriesKey,
        kind: Option<ValueKind>,
    ) -> Result<Option<MetricEvent>> {
        let task_id = key.task_id.to_string();
        let mut sql = String::from(
            "SELECT metric, variant, iteration, value_kind, timestamp, scalar_value, text_value \
             FROM task_events WHERE task_id = ? AND metric = ? AND variant = ?",
        );
        if kind.is_some() {
            sql.push_str(" AND value_kind = ?");
        }
        sql.push_str(" ORDER BY iteration DESC LIMIT 1");

        let row = with_retry(self.retry, "event latest", || async {
            let mut query = sqlx::query_as::<_, EventRow>(&sql)
                .bind(&task_id)
                .bind(&key.metric)
                .bind(&key.variant);
            if let Some(kind) = kind {
                query = query.bind(kind.as_str());
            }
            query.fetch_optional(&self.db).await
        })
        .await?;

        row.map(|r| r.into_event(key.task_id)).transpose()
    }

    /// Latest scalar value per `(metric, variant)` for one task
    pub async fn latest_scalars(&self, task_id: Uuid) -> Result<Vec<LatestScalar>> {
        let id = task_id.to_string();
        let rows = with_retry(self.retry, "latest scalars", || async {
            sqlx::query_as::<_, (String, String, i64, Option<f64>, i64)>(
                "SELECT e.metric, e.variant, e.iteration, e.scalar_value, e.timestamp \
                 FROM task_events e \
                 JOIN (SELECT metric, variant, MAX(iteration) AS max_iter \
                       FROM task_events WHERE task_id = ? AND value_kind = 'scalar' \
                       GROUP BY metric, variant) m \
                   ON e.metric = m.metric AND e.variant = m.variant AND e.iteration = m.max_iter \
                 WHERE e.task_id = ? AND e.value_kind = 'scalar' \
                 ORDER BY e.metric, e.variant",
            )
            .bind(&id)
            .bind(&id)
            .fetch_all(&self.db)
            .await
        })
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(metric, variant, iteration, value, ts)| {
                value.map(|value| LatestScalar {
                    metric,
                    variant,
                    iteration,
                    value,
                    timestamp: time::from_millis(ts),
                })
            })
            .collect())
    }

    /// One page of `(iteration, value)` scalar points in iteration order,
    /// starting strictly after `after`. Backing read for the aggregator.
    pub async fn scalar_points(
        &self,
        key: &SeriesKey,
        iteration_range: Option<(i64, i64)>,
        after: Option<i64>,
        limit: i64,
    ) -> Result<Vec<(i64, f64)>> {
        let task_id = key.task_id.to_string();
        let mut sql = String::from(
            "SELECT iteration, scalar_value FROM task_events \
             WHERE task_id = ? AND metric = ? AND variant = ? \
             AND value_kind = 'scalar' AND scalar_value IS NOT NULL",
        );
        if iteration_range.is_some() {
            sql.push_str(" AND iteration >= ? AND iteration <= ?");
        }
        if after.is_some() {
            sql.push_str(" AND iteration > ?");
        }
        sql.push_str(" ORDER BY iteration LIMIT ?");

        let rows = with_retry(self.retry, "scalar points", || async {
            let mut query = sqlx::query_as::<_, (i64, f64)>(&sql)
                .bind(&task_id)
                .bind(&key.metric)
                .bind(&key.variant);
            if let Some((min, max)) = iteration_range {
                query = query.bind(min).bind(max);
            }
            if let Some(after) = after {
                query = query.bind(after);
            }
            query.bind(limit).fetch_all(&self.db).await
        })
        .await?;

        Ok(rows)
    }

    /// True maximum iteration across all stored events for a task
    /// (0 for a task with no events)
    pub async fn max_iteration(&self, task_id: Uuid) -> Result<i64> {
        let id = task_id.to_string();
        with_retry(self.retry, "max iteration", || async {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(iteration), 0) FROM task_events WHERE task_id = ?",
            )
            .bind(&id)
            .fetch_one(&self.db)
            .await
        })
        .await
    }

    /// Distinct `(metric, variant)` pairs reported by a task
    pub async fn metrics_and_variants(&self, task_id: Uuid) -> Result<Vec<(String, String)>> {
        let id = task_id.to_string();
        with_retry(self.retry, "metric inventory", || async {
            sqlx::query_as::<_, (String, String)>(
                "SELECT DISTINCT metric, variant FROM task_events \
                 WHERE task_id = ? ORDER BY metric, variant",
            )
            .bind(&id)
            .fetch_all(&self.db)
            .await
        })
        .await
    }

    /// Cascade-delete every event of a task; returns deleted row count
    pub async fn delete_task(&self, task_id: Uuid) -> Result<u64> {
        let id = task_id.to_string();
        with_retry(self.retry, "event delete", || async {
            sqlx::query("DELETE FROM task_events WHERE task_id = ?")
                .bind(&id)
                .execute(&self.db)
                .await
                .map(|r| r.rows_affected())
        })
        .await
    }

    /// Number of stored events for a task
    pub async fn count_for_task(&self, task_id: Uuid) -> Result<i64> {
        let id = task_id.to_string();
        with_retry(self.retry, "event count", || async {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_events WHERE task_id = ?")
                .bind(&id)
                .fetch_one(&self.db)
                .await
        })
        .await
    }
}

/// Lazy paged scan over one task's events, ordered by
/// `(iteration, metric, variant, value_kind)`. The cursor is the last row
/// returned, so the scan is restartable and tolerates interleaved writes
/// (new rows behind the cursor are simply not revisited).
pub struct EventScan {
    db: SqlitePool,
    retry: RetryPolicy,
    page_size: i64,
    task_id: Uuid,
    metric: Option<String>,
    variant: Option<String>,
    iteration_range: Option<(i64, i64)>,
    cursor: Option<ScanCursor>,
    done: bool,
}

struct ScanCursor {
    iteration: i64,
    metric: String,
    variant: String,
    value_kind: String,
}

impl EventScan {
    /// Fetch the next page; an empty page means the scan is exhausted
    pub async fn next_page(&mut self) -> Result<Vec<MetricEvent>> {
        if self.done {
            return Ok(Vec::new());
        }

        let task_id = self.task_id.to_string();
        let mut sql = String::from(
            "SELECT metric, variant, iteration, value_kind, timestamp, scalar_value, text_value \
             FROM task_events WHERE task_id = ?",
        );
        if self.metric.is_some() {
            sql.push_str(" AND metric = ?");
        }
        if self.variant.is_some() {
            sql.push_str(" AND variant = ?");
        }
        if self.iteration_range.is_some() {
            sql.push_str(" AND iteration >= ? AND iteration <= ?");
        }
        if self.cursor.is_some() {
            sql.push_str(" AND (iteration, metric, variant, value_kind) > (?, ?, ?, ?)");
        }
        sql.push_str(" ORDER BY iteration, metric, variant, value_kind LIMIT ?");

        let rows = with_retry(self.retry, "event scan", || async {
            let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(&task_id);
            if let Some(metric) = &self.metric {
                query = query.bind(metric);
            }
            if let Some(variant) = &self.variant {
                query = query.bind(variant);
            }
            if let Some((min, max)) = self.iteration_range {
                query = query.bind(min).bind(max);
            }
            if let Some(cursor) = &self.cursor {
                query = query
                    .bind(cursor.iteration)
                    .bind(&cursor.metric)
                    .bind(&cursor.variant)
                    .bind(&cursor.value_kind);
            }
            query.bind(self.page_size).fetch_all(&self.db).await
        })
        .await?;

        if let Some(last) = rows.last() {
            self.cursor = Some(ScanCursor {
                iteration: last.iteration,
                metric: last.metric.clone(),
                variant: last.variant.clone(),
                value_kind: last.value_kind.clone(),
            });
        }
        if (rows.len() as i64) < self.page_size {
            self.done = true;
        }

        rows.into_iter()
            .map(|row| row.into_event(self.task_id))
            .collect()
    }

    /// Rewind to the beginning of the sequence
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }

    /// Drain the remaining pages into one vector
    pub async fn collect_all(&mut self) -> Result<Vec<MetricEvent>> {
        let mut all = Vec::new();
        loop {
            let page = self.next_page().await?;
            if page.is_empty() {
                break;
            }
            all.extend(page);
        }
        Ok(all)
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    metric: String,
    variant: String,
    iteration: i64,
    value_kind: String,
    timestamp: i64,
    scalar_value: Option<f64>,
    text_value: Option<String>,
}

impl EventRow {
    fn into_event(self, task_id: Uuid) -> Result<MetricEvent> {
        let payload = match ValueKind::parse(&self.value_kind) {
            Some(ValueKind::Scalar) => self.scalar_value.map(EventPayload::Scalar),
            Some(ValueKind::ConsoleLine) => self.text_value.map(EventPayload::ConsoleLine),
            Some(ValueKind::PlotBlob) => self.text_value.map(EventPayload::PlotBlob),
            None => None,
        }
        .ok_or_else(|| {
            Error::Internal(format!(
                "corrupt event row for task {task_id}: kind {} without payload",
                self.value_kind
            ))
        })?;

        Ok(MetricEvent {
            task_id,
            metric: self.metric,
            variant: self.variant,
            iteration: self.iteration,
            timestamp: time::from_millis(self.timestamp),
            payload,
        })
    }
}
