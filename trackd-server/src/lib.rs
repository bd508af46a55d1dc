//! trackd-server library - experiment tracking backend
//!
//! Ingests high-volume metric event batches, keeps task lifecycle state
//! honest under out-of-order delivery, and serves downsampled series and
//! multi-task comparisons over HTTP.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use axum::Router;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use trackd_common::config::TrackdConfig;

pub mod aggregate;
pub mod api;
pub mod error;
pub mod ingest;
pub mod locks;
pub mod query;
pub mod reconcile;
pub mod store;

use aggregate::Aggregator;
use ingest::IngestGateway;
use locks::TaskLocks;
use query::QueryEngine;
use reconcile::{Reconciler, StalledFlags, Watchdog};
use store::{EventStore, MetadataStore, RetryPolicy};
use trackd_common::Result;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrackdConfig>,
    pub db: SqlitePool,
    pub meta: MetadataStore,
    pub events: EventStore,
    pub gateway: IngestGateway,
    pub aggregator: Arc<Aggregator>,
    pub query: QueryEngine,
    /// Advisory watchdog flags, replaced wholesale each sweep
    pub stalled: StalledFlags,
}

impl AppState {
    /// Wire the component graph over an initialized database pool
    pub async fn new(config: TrackdConfig, db: SqlitePool) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config);
        let locks = TaskLocks::new();
        let meta = MetadataStore::new(db.clone(), locks, retry);
        let events = EventStore::new(db.clone(), retry, config.scan_page_size).await?;
        let aggregator = Arc::new(Aggregator::new(
            events.clone(),
            config.downsample_cap,
            config.scan_page_size,
        ));
        let reconciler = Reconciler::new(meta.clone(), events.clone(), config.skew_tolerance);
        let gateway = IngestGateway::new(
            meta.clone(),
            events.clone(),
            reconciler,
            aggregator.clone(),
        );
        let stalled: StalledFlags = Arc::new(RwLock::new(HashSet::new()));
        let query = QueryEngine::new(
            meta.clone(),
            events.clone(),
            aggregator.clone(),
            stalled.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            meta,
            events,
            gateway,
            aggregator,
            query,
            stalled,
        })
    }

    /// Spawn the stall-detection sweep for this state's task set
    pub fn start_watchdog(&self) -> JoinHandle<()> {
        Watchdog::new(
            self.meta.clone(),
            self.stalled.clone(),
            self.config.staleness_threshold_secs,
            self.config.watchdog_interval_secs,
        )
        .start()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    // /api/tasks/compare must be registered before /api/tasks/:id so the
    // literal segment wins over the path parameter
    Router::new()
        .route("/api/events/batch", post(api::events::add_batch))
        .route("/api/tasks", post(api::tasks::create_task))
        .route("/api/tasks/compare", get(api::compare::compare_tasks))
        .route(
            "/api/tasks/:id",
            get(api::tasks::get_task).delete(api::tasks::delete_task),
        )
        .route("/api/tasks/:id/transition", post(api::tasks::transition_task))
        .route("/api/tasks/:id/events", get(api::events::list_events))
        .route(
            "/api/tasks/:id/metrics/:metric/:variant",
            get(api::metrics::get_series),
        )
        .route("/api/tasks/:id/metrics", get(api::metrics::get_inventory))
        .route("/api/tasks/:id/latest", get(api::metrics::get_latest))
        .route(
            "/api/tasks/:id/models",
            post(api::models::create_model).get(api::models::task_models),
        )
        .route(
            "/api/projects",
            post(api::projects::create_project).get(api::projects::list_projects),
        )
        .route("/api/projects/:id/tasks", get(api::projects::project_tasks))
        .merge(api::health::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
