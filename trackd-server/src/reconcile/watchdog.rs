//! Stall-detection watchdog
//!
//! Periodic background sweep over task snapshots: an `in_progress` task
//! whose `last_update` is older than the staleness threshold gets a
//! derived `stalled` flag. The flag is advisory and lives outside the
//! state machine; the task's actual status only ever changes through an
//! explicit transition request, so the sweep can never race one. The
//! sweep reads without ingestion-path locks and tolerates slightly stale
//! data. Sweep failures are retried with backoff and never block the
//! write path.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use trackd_common::Result;
use uuid::Uuid;

use crate::store::MetadataStore;

/// Shared set of currently-stalled task ids, replaced wholesale on each
/// sweep so recovered tasks drop their flag automatically
pub type StalledFlags = Arc<RwLock<HashSet<Uuid>>>;

const ERROR_BACKOFF_BASE: Duration = Duration::from_secs(1);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(60);

pub struct Watchdog {
    meta: MetadataStore,
    flags: StalledFlags,
    staleness_secs: u64,
    interval: Duration,
}

impl Watchdog {
    pub fn new(
        meta: MetadataStore,
        flags: StalledFlags,
        staleness_secs: u64,
        interval_secs: u64,
    ) -> Self {
        Self {
            meta,
            flags,
            staleness_secs,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Spawn the periodic sweep task
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            let mut backoff = ERROR_BACKOFF_BASE;

            info!(
                "Watchdog sweep started ({}s interval, {}s staleness threshold)",
                self.interval.as_secs(),
                self.staleness_secs
            );

            loop {
                interval.tick().await;
                match self.sweep().await {
                    Ok(stalled) => {
                        backoff = ERROR_BACKOFF_BASE;
                        if stalled > 0 {
                            debug!("watchdog sweep flagged {stalled} stalled task(s)");
                        }
                    }
                    Err(e) => {
                        warn!("watchdog sweep failed: {e}; backing off {:?}", backoff);
                        time::sleep(backoff).await;
                        backoff = (backoff * 2).min(ERROR_BACKOFF_MAX);
                    }
                }
            }
        })
    }

    /// One sweep pass; returns the number of stalled tasks found
    pub async fn sweep(&self) -> Result<usize> {
        let cutoff =
            trackd_common::time::now() - chrono::Duration::seconds(self.staleness_secs as i64);
        let stale = self.meta.stale_in_progress(cutoff).await?;
        let count = stale.len();

        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        *flags = stale.into_iter().collect();
        Ok(count)
    }
}

/// Read one task's stalled flag
pub fn is_stalled(flags: &StalledFlags, task_id: Uuid) -> bool {
    flags
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&task_id)
}
