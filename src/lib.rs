//! # Tool Hub - Admission-Gated Tool Invocation
//!
//! Exposes a registry of command-line tools to callers (typically an LLM
//! agent) through a uniform invoke-by-name API:
//! - Per-group admission control with lazily created counting permits
//! - Command template resolution (positional and `sh -c` pipeline forms)
//! - Timeout precedence (request override, then tool default)
//! - Process execution with captured output and forced termination on timeout
//! - Append-only invocation records for every attempt
//! - TCP+msgpack IPC transport for external clients
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────────────────────────────┐
//!   IPC requests  →   │               ToolHub                │
//!                     │  ┌──────────┐   ┌─────────────────┐  │
//!                     │  │   Tool   │   │   Dispatcher    │  │
//!                     │  │ Registry │ → │ template/timeout│  │
//!                     │  └──────────┘   │ admit → invoke  │  │
//!                     │                 └────────┬────────┘  │
//!                     │  ┌──────────┐   ┌────────┴────────┐  │
//!                     │  │Admission │ ← │ Invocation Log  │  │
//!                     │  │Controller│   │  (fire&forget)  │  │
//!                     │  └──────────┘   └─────────────────┘  │
//!                     └──────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod admission;
pub mod hub;
pub mod invocation;
pub mod ipc;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use admission::{Admission, AdmissionController, GroupPermit};
pub use hub::ToolHub;
pub use invocation::{Dispatcher, InvocationRequest, InvocationResult};
pub use types::{Config, Error, InvocationConfig, IpcConfig, RequestContext, Result};
