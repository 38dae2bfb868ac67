//! The hub: registry, admission controller and dispatcher behind one handle.
//!
//! The transport holds an `Arc<ToolHub>` and calls into it per request. All
//! shared state is internally synchronized, so no outer lock is needed.

use std::sync::Arc;

use crate::admission::{AdmissionController, GroupStats};
use crate::invocation::{Dispatcher, InvocationRequest, InvocationResult};
use crate::tools::{InvocationLog, Tool, ToolKind, ToolRegistry};
use crate::types::{Error, GroupId, InvocationConfig, RequestContext, Result};

/// Shared service state for tool invocation.
pub struct ToolHub {
    registry: Arc<dyn ToolRegistry>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for ToolHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHub")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ToolHub {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        log: Arc<dyn InvocationLog>,
        config: InvocationConfig,
    ) -> Self {
        Self::with_admission(registry, Arc::new(AdmissionController::new()), log, config)
    }

    /// Build a hub around an existing admission controller.
    pub fn with_admission(
        registry: Arc<dyn ToolRegistry>,
        admission: Arc<AdmissionController>,
        log: Arc<dyn InvocationLog>,
        config: InvocationConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&registry), admission, log, config);
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        self.dispatcher.admission()
    }

    /// Resolve `name` to a command-line tool and invoke it.
    ///
    /// Unknown names and tools of other kinds are `NotFound`.
    pub async fn invoke_by_name(
        &self,
        ctx: &RequestContext,
        name: &str,
        request: InvocationRequest,
    ) -> Result<InvocationResult> {
        let tool = match self.registry.command_tool(name).await? {
            Some(tool) => tool,
            None => {
                return Err(match self.registry.find_tool(name).await? {
                    Some(tool) => Error::not_found(format!(
                        "tool {} is {}; only command_line tools can be invoked",
                        name, tool.kind
                    )),
                    None => Error::not_found(format!("unknown tool: {}", name)),
                });
            }
        };
        tracing::debug!(tool = %name, id = %tool.id(), "invoking tool");
        self.dispatcher.invoke(ctx, &tool, request).await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.registry.list_tools().await
    }

    /// Definition of one tool. Command-line tools include their command.
    pub async fn get_tool(&self, name: &str) -> Result<serde_json::Value> {
        if let Some(tool) = self.registry.command_tool(name).await? {
            return Ok(serde_json::to_value(tool)?);
        }
        match self.registry.find_tool(name).await? {
            Some(tool) if tool.kind != ToolKind::CommandLine => Ok(serde_json::to_value(tool)?),
            _ => Err(Error::not_found(format!("unknown tool: {}", name))),
        }
    }

    /// Discard the permit pool of `group`. Returns whether one existed.
    pub fn reset_group(&self, group: GroupId) -> bool {
        let existed = self.admission().reset(group);
        tracing::info!(group = %group, existed, "concurrency group reset");
        existed
    }

    pub fn group_stats(&self) -> Vec<GroupStats> {
        self.admission().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CommandLineTool, InMemoryInvocationLog, ToolCatalog};
    use crate::types::ToolId;
    use std::collections::HashMap;

    fn hub() -> ToolHub {
        let catalog = ToolCatalog::from_json(
            r#"{
                "groups": [{"id": 1, "name": "serial", "max_concurrent": 1}],
                "command_tools": [
                    {"id": 1, "name": "echo", "cmd": ["echo", "$message"],
                     "concurrency_group_id": 1}
                ],
                "tools": [{"id": 2, "name": "weather", "type": "http"}]
            }"#,
        )
        .unwrap();
        ToolHub::new(
            Arc::new(catalog),
            Arc::new(InMemoryInvocationLog::new()),
            InvocationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_invoke_by_name() {
        let hub = hub();
        let request = InvocationRequest {
            args: HashMap::from([("message".to_string(), "hi".to_string())]),
            ..Default::default()
        };
        let result = hub
            .invoke_by_name(&RequestContext::new(), "echo", request)
            .await
            .unwrap();
        assert_eq!(result.stdout.as_ref(), b"hi\n");

        let stats = hub.group_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].available, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let err = hub()
            .invoke_by_name(&RequestContext::new(), "nope", InvocationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_non_command_tool_not_invocable() {
        let err = hub()
            .invoke_by_name(&RequestContext::new(), "weather", InvocationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("http"));
    }

    #[tokio::test]
    async fn test_get_tool_includes_command() {
        let hub = hub();
        let value = hub.get_tool("echo").await.unwrap();
        let tool: CommandLineTool = serde_json::from_value(value).unwrap();
        assert_eq!(tool.id(), ToolId::new(1));
        assert_eq!(tool.cmd, vec!["echo", "$message"]);

        let weather = hub.get_tool("weather").await.unwrap();
        assert_eq!(weather["type"], "http");
        assert!(hub.get_tool("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_group() {
        let hub = hub();
        assert!(!hub.reset_group(GroupId::new(1)));
        hub.invoke_by_name(&RequestContext::new(), "echo", InvocationRequest::default())
            .await
            .unwrap();
        assert!(hub.reset_group(GroupId::new(1)));
        assert!(hub.group_stats().is_empty());
    }
}
