//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant maps to a status class: client-caused failures (validation) versus
//! server-caused failures (configuration, admission, execution).

use std::time::Duration;

use thiserror::Error;

use super::context::CancelReason;
use super::ids::GroupId;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the tool hub.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request, unparseable request timeout, unknown caller
    /// (map to 400 / INVALID_ARGUMENT).
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed tool definition: empty command, bad default timeout
    /// (map to 500 / FAILED_PRECONDITION).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown tool, service or method (map to 404 / NOT_FOUND).
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrency group permit was not granted (map to 500).
    #[error("failed to acquire concurrency group {group} permit: {reason}")]
    Admission { group: GroupId, reason: CancelReason },

    /// Process failed to start, exited non-zero, or was killed (map to 500).
    #[error("command execution failed: {0}")]
    Execution(#[from] ExecutionFailure),

    /// Internal errors (map to 500 / INTERNAL).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a process run did not succeed.
#[derive(Error, Debug)]
pub enum ExecutionFailure {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited unsuccessfully ({status}): {stderr}")]
    Exit {
        status: String,
        code: Option<i32>,
        stderr: String,
        elapsed: Duration,
    },

    #[error("process timed out after {elapsed:?} (limit {timeout:?})")]
    TimedOut { timeout: Duration, elapsed: Duration },

    #[error("process killed after {elapsed:?}: {reason}")]
    Cancelled {
        reason: CancelReason,
        elapsed: Duration,
    },

    #[error("process i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionFailure {
    /// Wall-clock time the process ran before failing, when it ran at all.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            ExecutionFailure::Exit { elapsed, .. }
            | ExecutionFailure::TimedOut { elapsed, .. }
            | ExecutionFailure::Cancelled { elapsed, .. } => Some(*elapsed),
            ExecutionFailure::Spawn { .. } | ExecutionFailure::Io(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFailure::TimedOut { .. })
    }
}

impl Error {
    /// HTTP-style status class for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Configuration(_)
            | Error::Admission { .. }
            | Error::Execution(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Io(_) => 500,
        }
    }

    /// True when the caller caused the failure.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Convert to the IPC error code carried in error frames.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Configuration(_) => "FAILED_PRECONDITION",
            Error::Admission { reason, .. } => match reason {
                CancelReason::Cancelled => "CANCELLED",
                CancelReason::DeadlineExceeded => "DEADLINE_EXCEEDED",
                CancelReason::PoolClosed => "UNAVAILABLE",
            },
            Error::Execution(ExecutionFailure::TimedOut { .. }) => "DEADLINE_EXCEEDED",
            Error::Execution(ExecutionFailure::Cancelled { .. }) => "CANCELLED",
            Error::Execution(_) | Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => {
                "INTERNAL"
            }
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn admission(group: GroupId, reason: CancelReason) -> Self {
        Self::Admission { group, reason }
    }
}
