//! Per-service IPC handlers.

pub mod groups;
pub mod tools;
