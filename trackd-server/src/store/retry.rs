//! Timeout and bounded-backoff retry for storage calls
//!
//! Transient failures (lock contention, timeouts) are retried with
//! exponential backoff; only exhaustion surfaces to the caller, as
//! `Error::Unavailable`, which maps to a retryable API failure.

use std::future::Future;
use std::time::Duration;
use tracing::warn;
use trackd_common::config::TrackdConfig;
use trackd_common::{Error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TrackdConfig) -> Self {
        Self {
            attempts: config.storage_retry_attempts.max(1),
            base_delay: Duration::from_millis(config.storage_retry_base_ms),
            timeout: Duration::from_millis(config.storage_timeout_ms),
        }
    }

    /// Fast policy for tests: one quick retry, short timeout
    pub fn fast() -> Self {
        Self {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Whether retrying can possibly help. Missing rows and constraint
/// violations are answers, not outages.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::RowNotFound => false,
        sqlx::Error::Database(db) => {
            !(db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation())
        }
        _ => true,
    }
}

/// Run a storage operation under the policy. Non-transient failures
/// (missing rows, constraint violations) fail immediately; everything
/// else (including a timed-out call) is retried until attempts are
/// exhausted.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = policy.base_delay;
    let mut last_error = String::new();

    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !is_transient(&e) => {
                return Err(Error::Database(e));
            }
            Ok(Err(e)) => {
                warn!("{op} failed (attempt {attempt}/{}): {e}", policy.attempts);
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    "{op} timed out after {:?} (attempt {attempt}/{})",
                    policy.timeout, policy.attempts
                );
                last_error = format!("timed out after {:?}", policy.timeout);
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    Err(Error::Unavailable(format!("{op}: {last_error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let result = with_retry(RetryPolicy::fast(), "noop", || async { Ok::<_, sqlx::Error>(7) })
            .await
            .expect("succeeds");
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::fast(), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .expect("second attempt succeeds");
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_unavailable() {
        let result: Result<()> = with_retry(RetryPolicy::fast(), "down", || async {
            Err(sqlx::Error::PoolTimedOut)
        })
        .await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_constraint_violation_is_not_retried() {
        let pool = trackd_common::db::init_memory_database().await.expect("db");
        let calls = AtomicU32::new(0);
        // foreign key violation: no such task row exists
        let result: Result<()> = with_retry(RetryPolicy::fast(), "orphan insert", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "INSERT INTO task_events \
                     (task_id, metric, variant, iteration, value_kind, timestamp, arrival_seq) \
                     VALUES ('missing', 'loss', 'train', 0, 'scalar', 0, 1)",
                )
                .execute(&pool)
                .await
                .map(|_| ())
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_row_not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(RetryPolicy::fast(), "missing", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(matches!(result, Err(Error::Database(sqlx::Error::RowNotFound))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
