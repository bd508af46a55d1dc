//! Metadata store adapter
//!
//! Owns structured entities (tasks, projects, models) and their lifecycle.
//! Status transitions and iteration-counter updates for one task are
//! serialized through the per-task lock registry, so concurrent
//! transition attempts on the same task cannot lose updates; different
//! tasks never contend.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use trackd_common::types::{Model, Project, Task, TaskStatus};
use trackd_common::{time, Error, Result};
use uuid::Uuid;

use super::retry::{with_retry, RetryPolicy};
use crate::locks::TaskLocks;

#[derive(Clone)]
pub struct MetadataStore {
    db: SqlitePool,
    locks: TaskLocks,
    retry: RetryPolicy,
}

impl MetadataStore {
    pub fn new(db: SqlitePool, locks: TaskLocks, retry: RetryPolicy) -> Self {
        Self { db, locks, retry }
    }

    pub fn locks(&self) -> &TaskLocks {
        &self.locks
    }

    // ---- projects ----

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("project name is empty".to_string()));
        }
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: time::now(),
        };
        let id = project.id.to_string();
        let created = time::to_millis(project.created_at);
        with_retry(self.retry, "project create", || async {
            sqlx::query("INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(&project.name)
                .bind(created)
                .execute(&self.db)
                .await
                .map(|_| ())
        })
        .await?;
        Ok(project)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = with_retry(self.retry, "project list", || async {
            sqlx::query_as::<_, (String, String, i64)>(
                "SELECT id, name, created_at FROM projects ORDER BY name",
            )
            .fetch_all(&self.db)
            .await
        })
        .await?;

        rows.into_iter()
            .map(|(id, name, created_at)| {
                Ok(Project {
                    id: parse_uuid(&id)?,
                    name,
                    created_at: time::from_millis(created_at),
                })
            })
            .collect()
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let key = id.to_string();
        let row = with_retry(self.retry, "project get", || async {
            sqlx::query_as::<_, (String, String, i64)>(
                "SELECT id, name, created_at FROM projects WHERE id = ?",
            )
            .bind(&key)
            .fetch_optional(&self.db)
            .await
        })
        .await?;

        row.map(|(id, name, created_at)| {
            Ok(Project {
                id: parse_uuid(&id)?,
                name,
                created_at: time::from_millis(created_at),
            })
        })
        .transpose()
    }

    /// Tasks referencing the project (back-reference set, not ownership)
    pub async fn project_tasks(&self, project_id: Uuid) -> Result<Vec<Task>> {
        let key = project_id.to_string();
        let rows = with_retry(self.retry, "project tasks", || async {
            sqlx::query_as::<_, TaskRow>(
                "SELECT id, project_id, name, status, status_reason, created_at, last_update, last_iteration \
                 FROM tasks WHERE project_id = ? ORDER BY created_at",
            )
            .bind(&key)
            .fetch_all(&self.db)
            .await
        })
        .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    // ---- tasks ----

    pub async fn create_task(&self, name: &str, project_id: Option<Uuid>) -> Result<Task> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("task name is empty".to_string()));
        }
        if let Some(project_id) = project_id {
            if self.get_project(project_id).await?.is_none() {
                return Err(Error::NotFound(format!("project {project_id}")));
            }
        }

        let now = time::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            status: TaskStatus::Created,
            status_reason: None,
            created_at: now,
            last_update: now,
            last_iteration: 0,
        };
        let id = task.id.to_string();
        let project = task.project_id.map(|p| p.to_string());
        let ts = time::to_millis(now);
        with_retry(self.retry, "task create", || async {
            sqlx::query(
                "INSERT INTO tasks (id, project_id, name, status, status_reason, created_at, last_update, last_iteration) \
                 VALUES (?, ?, ?, ?, NULL, ?, ?, 0)",
            )
            .bind(&id)
            .bind(&project)
            .bind(&task.name)
            .bind(TaskStatus::Created.as_str())
            .bind(ts)
            .bind(ts)
            .execute(&self.db)
            .await
            .map(|_| ())
        })
        .await?;
        Ok(task)
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let key = id.to_string();
        let row = with_retry(self.retry, "task get", || async {
            sqlx::query_as::<_, TaskRow>(
                "SELECT id, project_id, name, status, status_reason, created_at, last_update, last_iteration \
                 FROM tasks WHERE id = ?",
            )
            .bind(&key)
            .fetch_optional(&self.db)
            .await
        })
        .await?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Apply a lifecycle transition. Atomic per task: the per-task lock
    /// serializes concurrent attempts, the state graph decides legality,
    /// and an illegal transition leaves the row untouched.
    pub async fn transition(
        &self,
        id: Uuid,
        target: TaskStatus,
        status_reason: Option<String>,
    ) -> Result<Task> {
        let _guard = self.locks.acquire(id).await;
        let mut task = self
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        task.status = task.status.transition(target)?;
        task.status_reason = status_reason;
        task.last_update = time::now();

        let key = id.to_string();
        let ts = time::to_millis(task.last_update);
        with_retry(self.retry, "task transition", || async {
            sqlx::query("UPDATE tasks SET status = ?, status_reason = ?, last_update = ? WHERE id = ?")
                .bind(task.status.as_str())
                .bind(&task.status_reason)
                .bind(ts)
                .bind(&key)
                .execute(&self.db)
                .await
                .map(|_| ())
        })
        .await?;
        Ok(task)
    }

    /// Ingestion heartbeat: advance the iteration counter to
    /// `max(current, iteration)` and refresh `last_update`. A no-op for
    /// terminal tasks (their counter is frozen); status never changes.
    pub async fn heartbeat(&self, id: Uuid, iteration: i64) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let key = id.to_string();
        let ts = time::to_millis(time::now());
        with_retry(self.retry, "task heartbeat", || async {
            sqlx::query(
                "UPDATE tasks SET last_iteration = MAX(last_iteration, ?), last_update = ? \
                 WHERE id = ? AND status NOT IN ('stopped', 'completed', 'failed', 'published')",
            )
            .bind(iteration)
            .bind(ts)
            .bind(&key)
            .execute(&self.db)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Reconciler correction: overwrite the iteration counter with the
    /// recomputed true maximum. Serialized like every counter update.
    pub async fn set_last_iteration(&self, id: Uuid, iteration: i64) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let key = id.to_string();
        with_retry(self.retry, "task counter rewrite", || async {
            sqlx::query(
                "UPDATE tasks SET last_iteration = ? \
                 WHERE id = ? AND status NOT IN ('stopped', 'completed', 'failed', 'published')",
            )
            .bind(iteration)
            .bind(&key)
            .execute(&self.db)
            .await
            .map(|_| ())
        })
        .await
    }

    /// Delete the task row; owned models and event rows cascade via
    /// foreign key. Returns false when the task did not exist. The caller
    /// still deletes events through the event store first to report the
    /// removed-row count.
    pub async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let deleted = {
            let _guard = self.locks.acquire(id).await;
            let key = id.to_string();
            with_retry(self.retry, "task delete", || async {
                sqlx::query("DELETE FROM tasks WHERE id = ?")
                    .bind(&key)
                    .execute(&self.db)
                    .await
                    .map(|r| r.rows_affected() > 0)
            })
            .await?
        };
        self.locks.remove(id);
        Ok(deleted)
    }

    /// Tasks still `in_progress` whose `last_update` is older than the
    /// cutoff. Snapshot read for the watchdog sweep: takes no task locks,
    /// slightly stale data is acceptable.
    pub async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let cutoff_ms = time::to_millis(cutoff);
        let rows = with_retry(self.retry, "stale sweep", || async {
            sqlx::query_as::<_, (String,)>(
                "SELECT id FROM tasks WHERE status = 'in_progress' AND last_update < ?",
            )
            .bind(cutoff_ms)
            .fetch_all(&self.db)
            .await
        })
        .await?;

        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }

    // ---- models ----

    pub async fn create_model(&self, task_id: Uuid, name: &str, artifact_uri: &str) -> Result<Model> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("model name is empty".to_string()));
        }
        if self.get_task(task_id).await?.is_none() {
            return Err(Error::NotFound(format!("task {task_id}")));
        }
        let model = Model {
            id: Uuid::new_v4(),
            task_id,
            name: name.to_string(),
            artifact_uri: artifact_uri.to_string(),
            created_at: time::now(),
        };
        let id = model.id.to_string();
        let task_key = task_id.to_string();
        let created = time::to_millis(model.created_at);
        with_retry(self.retry, "model create", || async {
            sqlx::query(
                "INSERT INTO models (id, task_id, name, artifact_uri, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&task_key)
            .bind(&model.name)
            .bind(&model.artifact_uri)
            .bind(created)
            .execute(&self.db)
            .await
            .map(|_| ())
        })
        .await?;
        Ok(model)
    }

    pub async fn task_models(&self, task_id: Uuid) -> Result<Vec<Model>> {
        let key = task_id.to_string();
        let rows = with_retry(self.retry, "model list", || async {
            sqlx::query_as::<_, (String, String, String, String, i64)>(
                "SELECT id, task_id, name, artifact_uri, created_at \
                 FROM models WHERE task_id = ? ORDER BY created_at",
            )
            .bind(&key)
            .fetch_all(&self.db)
            .await
        })
        .await?;

        rows.into_iter()
            .map(|(id, task_id, name, artifact_uri, created_at)| {
                Ok(Model {
                    id: parse_uuid(&id)?,
                    task_id: parse_uuid(&task_id)?,
                    name,
                    artifact_uri,
                    created_at: time::from_millis(created_at),
                })
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: Option<String>,
    name: String,
    status: String,
    status_reason: Option<String>,
    created_at: i64,
    last_update: i64,
    last_iteration: i64,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| Error::Internal(format!("unknown task status '{}' in store", self.status)))?;
        Ok(Task {
            id: parse_uuid(&self.id)?,
            project_id: self.project_id.as_deref().map(parse_uuid).transpose()?,
            name: self.name,
            status,
            status_reason: self.status_reason,
            created_at: time::from_millis(self.created_at),
            last_update: time::from_millis(self.last_update),
            last_iteration: self.last_iteration,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("corrupt uuid '{s}' in store: {e}")))
}
