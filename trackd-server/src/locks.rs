//! Per-task lock registry
//!
//! Serializes status transitions and iteration-counter updates for one
//! task without any global lock: two tasks never contend, two writers on
//! the same task are linearized. Event rows themselves are not covered
//! here; same-key event writes are linearized by the event store's atomic
//! upsert instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct TaskLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one task, creating it on first use.
    /// The guard is owned so it can be held across await points.
    pub async fn acquire(&self, task_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(task_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for a deleted task
    pub fn remove(&self, task_id: Uuid) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(&task_id);
    }
}
