//! Core types for the tool hub.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ToolId, GroupId, InvocationId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, transport and invocation
//! - **Context**: Per-request cancellation and deadline signal

mod config;
mod context;
mod errors;
mod ids;

pub use config::{Config, InvocationConfig, IpcConfig, ObservabilityConfig, ServerConfig};
pub use context::{CancelReason, RequestContext};
pub use errors::{Error, ExecutionFailure, Result};
pub use ids::{GroupId, InvocationId, ToolId};
