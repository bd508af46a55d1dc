//! Timestamp utilities
//!
//! All timestamps are UTC. The database stores them as integer
//! milliseconds since the epoch so range comparisons stay plain
//! integer comparisons in SQL.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a timestamp to epoch milliseconds for storage
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp.
/// Out-of-range values clamp to the epoch rather than panic.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
