//! Domain types shared across trackd crates

pub mod event;
pub mod project;
pub mod task;

pub use event::{
    EventKey, EventPayload, MetricEvent, RawEvent, RejectReason, Rejection, SeriesKey, ValueKind,
    DEFAULT_VARIANT,
};
pub use project::{Model, Project};
pub use task::{InvalidTransition, Task, TaskStatus};
