//! Project and model metadata types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grouping of tasks. Holds a non-owning back-reference set: member tasks
/// point at the project via `project_id`, the project does not own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Trained model registered against a task. The artifact itself lives in
/// external binary storage; `artifact_uri` is opaque to this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: Uuid,
    pub task_id: Uuid,
    pub name: String,
    pub artifact_uri: String,
    pub created_at: DateTime<Utc>,
}
