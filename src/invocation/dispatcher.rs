//! One invocation end to end.
//!
//! Order of operations for a command-line tool:
//!
//! 1. resolve the caller (if named) against the registry
//! 2. reject an empty command template
//! 3. resolve argv, environment, timeout and working directory
//! 4. acquire the tool's concurrency-group permit, if it has a group
//! 5. run the process
//! 6. hand an [`InvocationRecord`] to the invocation log
//!
//! The permit is an RAII guard held until the process has finished, so it is
//! returned on every exit path. The record is appended on a spawned task and
//! never delays or fails the response.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;

use super::invoker::{InvocationResult, InvokeOptions, Invoker};
use super::{template, timeout};
use crate::admission::{AdmissionController, GroupPermit};
use crate::tools::{CommandLineTool, InvocationLog, InvocationRecord, Tool, ToolRegistry};
use crate::types::{Error, GroupId, InvocationConfig, RequestContext, Result};

/// Per-call parameters. Every field may be omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationRequest {
    /// Values for `$key` placeholders in the command template.
    pub args: HashMap<String, String>,
    pub stdin: String,
    /// Applied on top of the tool's default environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Overrides the tool's working directory when non-empty.
    pub working_dir: String,
    /// Overrides the tool's default timeout when non-empty.
    pub timeout: String,
    /// Name of the registered tool making this call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// Composes template, timeout, admission and execution for one call.
pub struct Dispatcher {
    registry: Arc<dyn ToolRegistry>,
    admission: Arc<AdmissionController>,
    log: Arc<dyn InvocationLog>,
    invoker: Invoker,
    config: InvocationConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("admission", &self.admission)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        admission: Arc<AdmissionController>,
        log: Arc<dyn InvocationLog>,
        config: InvocationConfig,
    ) -> Self {
        Self {
            registry,
            admission,
            log,
            invoker: Invoker::new(),
            config,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Invoke `tool` for `request` and record the attempt.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        tool: &CommandLineTool,
        request: InvocationRequest,
    ) -> Result<InvocationResult> {
        let start = Instant::now();
        let input = serde_json::to_string(&request).unwrap_or_else(|e| {
            tracing::warn!(tool = %tool.name(), error = %e, "failed to serialize request");
            String::new()
        });

        let caller = self.resolve_caller(request.caller.as_deref()).await;
        let mut record =
            InvocationRecord::new(caller.as_ref().ok().and_then(Option::as_ref), tool, input);

        let outcome = match caller {
            Ok(_) => self.run(ctx, tool, request).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) => {
                record.output = String::from_utf8_lossy(&result.stdout).into_owned();
                record.duration = result.duration;
                tracing::debug!(tool = %tool.name(), duration = ?result.duration, "invocation succeeded");
            }
            Err(e) => {
                record.error = e.to_string();
                record.duration = match e {
                    Error::Execution(failure) => failure.elapsed(),
                    _ => None,
                }
                .unwrap_or_else(|| start.elapsed());
                tracing::debug!(tool = %tool.name(), error = %e, "invocation failed");
            }
        }
        self.record(record);

        outcome
    }

    async fn resolve_caller(&self, caller: Option<&str>) -> Result<Option<Tool>> {
        let Some(name) = caller.filter(|name| !name.is_empty()) else {
            return Ok(None);
        };
        match self.registry.find_tool(name).await {
            Ok(Some(tool)) => Ok(Some(tool)),
            Ok(None) => Err(Error::validation(format!(
                "invalid request caller tool: {} not found",
                name
            ))),
            Err(e) => Err(Error::validation(format!(
                "invalid request caller tool: {}",
                e
            ))),
        }
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        tool: &CommandLineTool,
        request: InvocationRequest,
    ) -> Result<InvocationResult> {
        if tool.cmd.is_empty() {
            return Err(Error::configuration("command is empty"));
        }

        let resolved = template::resolve(
            &tool.cmd,
            &tool.env,
            &request.args,
            request.env.as_ref(),
        );
        let timeout = timeout::resolve_timeout(&request.timeout, &tool.timeout)?;
        let working_dir = [request.working_dir.as_str(), tool.working_dir.as_str()]
            .into_iter()
            .find(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let _permit = match group_of(tool) {
            Some((group, max_concurrent)) => Some(self.admit(ctx, group, max_concurrent).await?),
            None => None,
        };

        tracing::debug!(
            tool = %tool.name(),
            argv = ?resolved.argv,
            ?timeout,
            "running command"
        );
        let options = InvokeOptions {
            working_dir,
            env: resolved.env,
            stdin: Bytes::from(request.stdin),
            timeout,
        };
        self.invoker.run(ctx, &resolved.argv, options).await
    }

    async fn admit(
        &self,
        ctx: &RequestContext,
        group: GroupId,
        max_concurrent: u32,
    ) -> Result<GroupPermit> {
        let admission_ctx = match self.config.admission_timeout {
            Some(limit) => ctx.child().with_timeout(limit),
            None => ctx.clone(),
        };
        self.admission
            .acquire(&admission_ctx, group, max_concurrent)
            .await
            .into_result(group)
    }

    fn record(&self, record: InvocationRecord) {
        let log = Arc::clone(&self.log);
        tokio::spawn(
            async move {
                let id = record.id.clone();
                if let Err(e) = log.append(record).await {
                    tracing::warn!(record = %id, error = %e, "failed to append invocation record");
                }
            }
            .instrument(tracing::Span::current()),
        );
    }
}

/// Group id and capacity a tool is admitted under. A bare group id with no
/// resolved definition admits one at a time unless its pool already exists.
fn group_of(tool: &CommandLineTool) -> Option<(GroupId, u32)> {
    match (&tool.concurrency_group, tool.concurrency_group_id) {
        (Some(group), _) => Some((group.id, group.max_concurrent)),
        (None, Some(id)) => Some((id, 0)),
        (None, None) => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
