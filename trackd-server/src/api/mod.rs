//! HTTP API handlers

pub mod compare;
pub mod events;
pub mod health;
pub mod metrics;
pub mod models;
pub mod projects;
pub mod tasks;
