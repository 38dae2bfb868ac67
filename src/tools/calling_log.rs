//! Invocation records and the log that stores them.
//!
//! One record is written per invocation attempt, success or failure. Records
//! are append-only; nothing in the hub mutates or deletes them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::catalog::{CommandLineTool, Tool, ToolKind};
use crate::types::{InvocationId, Result, ToolId};

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: InvocationId,
    pub created_at: DateTime<Utc>,
    /// `None` when the caller is outside the hub.
    pub caller_id: Option<ToolId>,
    pub caller_type: Option<ToolKind>,
    pub callee_id: ToolId,
    pub callee_type: ToolKind,
    /// The request as JSON.
    pub input: String,
    /// Lossy UTF-8 of stdout; empty on failure.
    pub output: String,
    /// Failure message; empty on success.
    pub error: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl InvocationRecord {
    /// Start a record for a call to `callee`, optionally made by `caller`.
    pub fn new(caller: Option<&Tool>, callee: &CommandLineTool, input: String) -> Self {
        Self {
            id: InvocationId::new(),
            created_at: Utc::now(),
            caller_id: caller.map(|t| t.id),
            caller_type: caller.map(|t| t.kind),
            callee_id: callee.id(),
            callee_type: callee.tool.kind,
            input,
            output: String::new(),
            error: String::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Append-only store for invocation records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvocationLog: Send + Sync {
    async fn append(&self, record: InvocationRecord) -> Result<()>;
}

/// Invocation log held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryInvocationLog {
    records: RwLock<Vec<InvocationRecord>>,
}

impl InMemoryInvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in append order.
    pub async fn records(&self) -> Vec<InvocationRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl InvocationLog for InMemoryInvocationLog {
    async fn append(&self, record: InvocationRecord) -> Result<()> {
        tracing::debug!(
            record = %record.id,
            callee = %record.callee_id,
            success = record.is_success(),
            "appending invocation record"
        );
        self.records.write().await.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn callee() -> CommandLineTool {
        CommandLineTool {
            tool: Tool {
                id: ToolId::new(3),
                name: "echo".to_string(),
                description: String::new(),
                parameters: String::new(),
                kind: ToolKind::CommandLine,
                log_life_span: String::new(),
            },
            working_dir: String::new(),
            cmd: vec!["echo".to_string()],
            env: HashMap::new(),
            timeout: String::new(),
            concurrency_group_id: None,
            concurrency_group: None,
        }
    }

    #[test]
    fn test_external_caller_has_no_identity() {
        let record = InvocationRecord::new(None, &callee(), "{}".to_string());
        assert!(record.caller_id.is_none());
        assert!(record.caller_type.is_none());
        assert_eq!(record.callee_id, ToolId::new(3));
        assert!(record.is_success());
    }

    #[test]
    fn test_internal_caller_identity() {
        let caller = Tool {
            id: ToolId::new(9),
            name: "agent".to_string(),
            description: String::new(),
            parameters: String::new(),
            kind: ToolKind::Service,
            log_life_span: String::new(),
        };
        let record = InvocationRecord::new(Some(&caller), &callee(), "{}".to_string());
        assert_eq!(record.caller_id, Some(ToolId::new(9)));
        assert_eq!(record.caller_type, Some(ToolKind::Service));
    }

    #[test]
    fn test_duration_serializes_humantime() {
        let mut record = InvocationRecord::new(None, &callee(), "{}".to_string());
        record.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["duration"], "1s 500ms");
        assert_eq!(json["caller_id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_in_memory_append_order() {
        let log = InMemoryInvocationLog::new();
        assert!(log.is_empty().await);

        let first = InvocationRecord::new(None, &callee(), "1".to_string());
        let mut second = InvocationRecord::new(None, &callee(), "2".to_string());
        second.error = "boom".to_string();
        log.append(first).await.unwrap();
        log.append(second).await.unwrap();

        let records = log.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].input, "1");
        assert!(!records[1].is_success());
    }
}
