//! Downsampled series and latest-value aggregation
//!
//! Read-path work over the event store. Series are recomputed lazily on
//! query and cached per `(task, metric, variant)`; the ingestion gateway
//! invalidates a key on every write to it, so cache staleness is bounded
//! by one ingestion cycle. Each key carries a generation counter bumped
//! on invalidation, so a computation racing a write can never install a
//! view that predates the write. Downsampling is fixed-bucket decimation:
//! divide the iteration span into `cap` buckets and keep the
//! highest-iteration point of each, which is deterministic for a given
//! snapshot of the store regardless of computation order.
//!
//! Aggregation reads paged snapshots of immutable rows (the upsert is
//! atomic per key), so a partially-written event is never observed, and
//! computations over large series honor a per-request cancellation token
//! between pages without ever poisoning the cache.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use trackd_common::types::{SeriesKey, ValueKind};
use trackd_common::{Error, Result};
use uuid::Uuid;

use crate::store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub iteration: i64,
    pub value: f64,
}

/// Downsampled series plus the single latest value for one aggregate key
#[derive(Debug, Clone, Serialize)]
pub struct SeriesView {
    pub points: Vec<SeriesPoint>,
    pub latest: Option<SeriesPoint>,
    /// Stored point count before decimation
    pub total_points: usize,
}

struct CacheEntry {
    cap: usize,
    view: SeriesView,
}

/// Cached view plus a write-generation counter. Invalidation bumps the
/// generation, so a computation that started before the write sees a
/// changed generation and cannot re-install its stale view. Slots are
/// never removed: dropping one would reset its generation and let an
/// in-flight reader that captured the old value slip back in.
#[derive(Default)]
struct CacheSlot {
    generation: u64,
    entry: Option<CacheEntry>,
}

pub struct Aggregator {
    events: EventStore,
    cache: RwLock<HashMap<SeriesKey, CacheSlot>>,
    default_cap: usize,
    page_size: i64,
}

impl Aggregator {
    pub fn new(events: EventStore, default_cap: usize, page_size: i64) -> Self {
        Self {
            events,
            cache: RwLock::new(HashMap::new()),
            default_cap,
            page_size: page_size.max(1),
        }
    }

    /// Compute (or serve from cache) the downsampled scalar series for a
    /// key. Full-range queries at a given cap are cacheable;
    /// range-restricted queries always recompute.
    pub async fn series(
        &self,
        key: &SeriesKey,
        cap: Option<usize>,
        iteration_range: Option<(i64, i64)>,
        cancel: &CancellationToken,
    ) -> Result<SeriesView> {
        let cap = cap.unwrap_or(self.default_cap).max(1);

        // generation captured before any page is read; a write landing
        // during the scan bumps it and the result is not cached
        let mut generation = 0;
        if iteration_range.is_none() {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = cache.get(key) {
                if let Some(entry) = &slot.entry {
                    if entry.cap == cap {
                        return Ok(entry.view.clone());
                    }
                }
                generation = slot.generation;
            }
        }

        let mut points: Vec<SeriesPoint> = Vec::new();
        let mut after: Option<i64> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let page = self
                .events
                .scalar_points(key, iteration_range, after, self.page_size)
                .await?;
            let exhausted = (page.len() as i64) < self.page_size;
            if let Some(&(iteration, _)) = page.last() {
                after = Some(iteration);
            }
            points.extend(
                page.into_iter()
                    .map(|(iteration, value)| SeriesPoint { iteration, value }),
            );
            if exhausted {
                break;
            }
        }

        let total_points = points.len();
        let latest = points.last().copied();
        let view = SeriesView {
            points: decimate(points, cap),
            latest,
            total_points,
        };

        if iteration_range.is_none() {
            self.store_if_current(key, generation, cap, view.clone());
        }
        Ok(view)
    }

    /// Install a computed view only if no invalidation happened since
    /// `generation` was captured
    fn store_if_current(&self, key: &SeriesKey, generation: u64, cap: usize, view: SeriesView) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let slot = cache.entry(key.clone()).or_default();
        if slot.generation == generation {
            slot.entry = Some(CacheEntry { cap, view });
        }
    }

    /// Single highest-iteration scalar for a key, straight off the
    /// store's key index
    pub async fn latest(&self, key: &SeriesKey) -> Result<Option<SeriesPoint>> {
        let event = self.events.latest(key, Some(ValueKind::Scalar)).await?;
        Ok(event.and_then(|e| match e.payload {
            trackd_common::types::EventPayload::Scalar(value) => Some(SeriesPoint {
                iteration: e.iteration,
                value,
            }),
            _ => None,
        }))
    }

    /// Drop the cached view for one key and bump its generation (called
    /// on every put to the key). The bump covers keys never cached yet,
    /// so an in-flight computation for a brand-new key is defeated too.
    pub fn invalidate(&self, key: &SeriesKey) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let slot = cache.entry(key.clone()).or_default();
        slot.generation += 1;
        slot.entry = None;
    }

    /// Drop every cached view of a task (called on task delete)
    pub fn invalidate_task(&self, task_id: Uuid) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for (key, slot) in cache.iter_mut() {
            if key.task_id == task_id {
                slot.generation += 1;
                slot.entry = None;
            }
        }
    }
}

/// Fixed-bucket decimation: divide the iteration span into `cap` buckets
/// and keep the highest-iteration point per bucket. Returns the input
/// unchanged when it already fits the cap.
fn decimate(points: Vec<SeriesPoint>, cap: usize) -> Vec<SeriesPoint> {
    if points.len() <= cap {
        return points;
    }
    let min = points[0].iteration;
    let max = points[points.len() - 1].iteration;
    let span = (max - min + 1) as f64;
    let bucket_width = span / cap as f64;

    let mut out: Vec<SeriesPoint> = Vec::with_capacity(cap);
    let mut current_bucket: Option<usize> = None;
    for point in points {
        let bucket = (((point.iteration - min) as f64) / bucket_width) as usize;
        let bucket = bucket.min(cap - 1);
        if current_bucket == Some(bucket) {
            // later iteration in the same bucket wins
            let last = out.len() - 1;
            out[last] = point;
        } else {
            out.push(point);
            current_bucket = Some(bucket);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackd_common::db::init_memory_database;
    use trackd_common::time;
    use trackd_common::types::{EventPayload, MetricEvent};
    use crate::store::RetryPolicy;

    fn point(iteration: i64, value: f64) -> SeriesPoint {
        SeriesPoint { iteration, value }
    }

    #[test]
    fn test_decimate_under_cap_is_identity() {
        let points: Vec<SeriesPoint> = (0..10).map(|i| point(i, i as f64)).collect();
        assert_eq!(decimate(points.clone(), 10), points);
    }

    #[test]
    fn test_decimate_keeps_last_point_per_bucket() {
        // iterations 0..=9 into 5 buckets of width 2: keep 1,3,5,7,9
        let points: Vec<SeriesPoint> = (0..10).map(|i| point(i, i as f64 * 10.0)).collect();
        let out = decimate(points, 5);
        let iterations: Vec<i64> = out.iter().map(|p| p.iteration).collect();
        assert_eq!(iterations, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_decimate_bounded_by_cap() {
        let points: Vec<SeriesPoint> = (0..10_000).map(|i| point(i, 0.0)).collect();
        let out = decimate(points, 100);
        assert!(out.len() <= 100);
        assert_eq!(out.last().map(|p| p.iteration), Some(9_999));
    }

    #[test]
    fn test_decimate_sparse_iterations() {
        // large gaps must not panic or merge everything into one bucket
        let points = vec![point(0, 1.0), point(1_000_000, 2.0)];
        let out = decimate(points.clone(), 1);
        assert_eq!(out, vec![point(1_000_000, 2.0)]);
        let out = decimate(points.clone(), 2);
        assert_eq!(out, points);
    }

    #[test]
    fn test_decimate_is_deterministic() {
        let points: Vec<SeriesPoint> = (0..5_000).map(|i| point(i * 3, (i % 17) as f64)).collect();
        assert_eq!(decimate(points.clone(), 256), decimate(points, 256));
    }

    async fn setup() -> (EventStore, Aggregator, Uuid) {
        let pool = init_memory_database().await.expect("db");
        let task_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tasks (id, name, status, created_at, last_update, last_iteration) \
             VALUES (?, 'seeded', 'created', 0, 0, 0)",
        )
        .bind(task_id.to_string())
        .execute(&pool)
        .await
        .expect("seed task");
        let events = EventStore::new(pool, RetryPolicy::fast(), 50)
            .await
            .expect("events");
        let aggregator = Aggregator::new(events.clone(), 100, 50);
        (events, aggregator, task_id)
    }

    fn scalar(task_id: Uuid, iteration: i64, value: f64) -> MetricEvent {
        MetricEvent {
            task_id,
            metric: "loss".to_string(),
            variant: "train".to_string(),
            iteration,
            timestamp: time::now(),
            payload: EventPayload::Scalar(value),
        }
    }

    #[tokio::test]
    async fn test_series_spans_multiple_pages() {
        let (events, aggregator, task_id) = setup().await;
        for i in 0..175 {
            events.put(&scalar(task_id, i, i as f64)).await.expect("put");
        }
        let key = SeriesKey::new(task_id, "loss", "train");
        let view = aggregator
            .series(&key, Some(1000), None, &CancellationToken::new())
            .await
            .expect("series");
        assert_eq!(view.total_points, 175);
        assert_eq!(view.points.len(), 175);
        assert_eq!(view.latest, Some(point(174, 174.0)));
    }

    #[tokio::test]
    async fn test_cache_hit_and_invalidation() {
        let (events, aggregator, task_id) = setup().await;
        events.put(&scalar(task_id, 0, 1.0)).await.expect("put");
        let key = SeriesKey::new(task_id, "loss", "train");
        let cancel = CancellationToken::new();

        let first = aggregator.series(&key, None, None, &cancel).await.expect("series");
        assert_eq!(first.points.len(), 1);

        // without invalidation the cached view is served
        events.put(&scalar(task_id, 1, 2.0)).await.expect("put");
        let cached = aggregator.series(&key, None, None, &cancel).await.expect("series");
        assert_eq!(cached.points.len(), 1);

        // invalidation (what the gateway does on every put) refreshes it
        aggregator.invalidate(&key);
        let fresh = aggregator.series(&key, None, None, &cancel).await.expect("series");
        assert_eq!(fresh.points.len(), 2);
        assert_eq!(fresh.latest, Some(point(1, 2.0)));
    }

    #[tokio::test]
    async fn test_range_query_bypasses_cache() {
        let (events, aggregator, task_id) = setup().await;
        for i in 0..20 {
            events.put(&scalar(task_id, i, i as f64)).await.expect("put");
        }
        let key = SeriesKey::new(task_id, "loss", "train");
        let view = aggregator
            .series(&key, None, Some((5, 9)), &CancellationToken::new())
            .await
            .expect("series");
        let iterations: Vec<i64> = view.points.iter().map(|p| p.iteration).collect();
        assert_eq!(iterations, vec![5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_cancelled_request_fails_without_poisoning_cache() {
        let (events, aggregator, task_id) = setup().await;
        for i in 0..10 {
            events.put(&scalar(task_id, i, 0.0)).await.expect("put");
        }
        let key = SeriesKey::new(task_id, "loss", "train");

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = aggregator
            .series(&key, None, None, &cancelled)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));

        // a subsequent request computes the full result
        let view = aggregator
            .series(&key, None, None, &CancellationToken::new())
            .await
            .expect("series");
        assert_eq!(view.total_points, 10);
    }

    #[tokio::test]
    async fn test_write_during_compute_discards_stale_cache_insert() {
        let (events, aggregator, task_id) = setup().await;
        events.put(&scalar(task_id, 0, 1.0)).await.expect("put");
        let key = SeriesKey::new(task_id, "loss", "train");

        // a slow computation snapshots the store (one point) and the
        // generation before a concurrent write lands
        let stale_generation = 0;
        let stale_view = SeriesView {
            points: vec![point(0, 1.0)],
            latest: Some(point(0, 1.0)),
            total_points: 1,
        };

        // the write and its invalidation arrive mid-computation
        events.put(&scalar(task_id, 1, 2.0)).await.expect("put");
        aggregator.invalidate(&key);

        // the slow computation finishes and tries to cache its result;
        // the bumped generation must reject it
        aggregator.store_if_current(&key, stale_generation, 100, stale_view);

        let view = aggregator
            .series(&key, None, None, &CancellationToken::new())
            .await
            .expect("series");
        assert_eq!(view.total_points, 2);
        assert_eq!(view.latest, Some(point(1, 2.0)));
    }

    #[tokio::test]
    async fn test_determinism_for_fixed_snapshot() {
        let (events, aggregator, task_id) = setup().await;
        for i in 0..500 {
            events.put(&scalar(task_id, i * 2, (i % 7) as f64)).await.expect("put");
        }
        let key = SeriesKey::new(task_id, "loss", "train");
        let cancel = CancellationToken::new();

        let a = aggregator.series(&key, Some(64), None, &cancel).await.expect("a");
        aggregator.invalidate(&key); // force recompute from the same snapshot
        let b = aggregator.series(&key, Some(64), None, &cancel).await.expect("b");
        assert_eq!(a.points, b.points);
        assert_eq!(a.latest, b.latest);
    }

    #[tokio::test]
    async fn test_latest_is_highest_iteration() {
        let (events, aggregator, task_id) = setup().await;
        for (iteration, value) in [(0, 1.0), (2, 3.0), (1, 2.0)] {
            events.put(&scalar(task_id, iteration, value)).await.expect("put");
        }
        let key = SeriesKey::new(task_id, "loss", "train");
        let latest = aggregator.latest(&key).await.expect("latest");
        assert_eq!(latest, Some(point(2, 3.0)));
    }
}
