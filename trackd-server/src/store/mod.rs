//! Storage adapters
//!
//! `meta` owns structured entities (tasks, projects, models) and their
//! lifecycle; `events` owns the append-only keyed metric-event records.
//! Both wrap every call in a timeout plus bounded-backoff retry so
//! transient SQLite contention never reaches the caller directly.

pub mod events;
pub mod meta;
pub mod retry;

pub use events::{EventScan, EventStore, LatestScalar};
pub use meta::MetadataStore;
pub use retry::{with_retry, RetryPolicy};
