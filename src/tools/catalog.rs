//! Tool catalog: typed tool definitions and the registry that serves them.
//!
//! The hub only executes command-line tools. HTTP and service tools are
//! catalogued so callers can be resolved and listed, but dispatch for them
//! lives elsewhere.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Error, GroupId, Result, ToolId};

// =============================================================================
// Definitions
// =============================================================================

/// What backs a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    CommandLine,
    Http,
    Service,
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::CommandLine => "command_line",
            ToolKind::Http => "http",
            ToolKind::Service => "service",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry row shared by every tool kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments, stored as text.
    #[serde(default)]
    pub parameters: String,
    #[serde(rename = "type", default)]
    pub kind: ToolKind,
    /// How long invocation records for this tool are kept, e.g. `24h`.
    #[serde(default)]
    pub log_life_span: String,
}

/// Capacity bound shared by the tools that reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyGroup {
    pub id: GroupId,
    pub name: String,
    /// 0 behaves like 1.
    #[serde(default)]
    pub max_concurrent: u32,
}

/// A tool executed as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLineTool {
    #[serde(flatten)]
    pub tool: Tool,
    #[serde(default)]
    pub working_dir: String,
    /// Argument-vector template, e.g. `["echo", "$message"]` or
    /// `["/bin/bash", "-c", "cat | grep $pattern"]`.
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Default timeout in humantime syntax; empty means none.
    #[serde(default)]
    pub timeout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_group: Option<ConcurrencyGroup>,
}

impl CommandLineTool {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn id(&self) -> ToolId {
        self.tool.id
    }
}

// =============================================================================
// Registry trait
// =============================================================================

/// Name-to-definition lookup used by the dispatcher and the transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Any tool kind by unique name.
    async fn find_tool(&self, name: &str) -> Result<Option<Tool>>;

    /// Command-line tool by name, with its concurrency group resolved.
    async fn command_tool(&self, name: &str) -> Result<Option<CommandLineTool>>;

    /// All tools ordered by name.
    async fn list_tools(&self) -> Result<Vec<Tool>>;
}

// =============================================================================
// In-memory catalog
// =============================================================================

/// On-disk catalog layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    groups: Vec<ConcurrencyGroup>,
    command_tools: Vec<CommandLineTool>,
    tools: Vec<Tool>,
}

#[derive(Debug, Default)]
struct CatalogState {
    tools: HashMap<String, Tool>,
    command_tools: HashMap<String, CommandLineTool>,
    groups: HashMap<GroupId, ConcurrencyGroup>,
}

/// In-memory tool registry.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    state: RwLock<CatalogState>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON catalog file with `groups`, `command_tools` and `tools`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid catalog: {}", e)))?;

        let catalog = Self::new();
        // Groups first so tools can reference them by id.
        for group in file.groups {
            catalog.register_group(group);
        }
        for tool in file.command_tools {
            catalog.register_command_tool(tool)?;
        }
        for tool in file.tools {
            catalog.register_tool(tool)?;
        }
        Ok(catalog)
    }

    /// Add or replace a concurrency group definition.
    pub fn register_group(&self, group: ConcurrencyGroup) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.groups.insert(group.id, group);
    }

    /// Register a command-line tool.
    ///
    /// A `concurrency_group_id` without an inline group is resolved against
    /// the registered groups; an unknown id is a configuration error. An
    /// inline group must match any group already registered under its id.
    pub fn register_command_tool(&self, mut tool: CommandLineTool) -> Result<()> {
        tool.tool.kind = ToolKind::CommandLine;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::check_name(&state, &tool.tool.name)?;

        match (tool.concurrency_group.clone(), tool.concurrency_group_id) {
            (Some(group), _) => {
                if let Some(registered) = state.groups.get(&group.id) {
                    if *registered != group {
                        return Err(Error::configuration(format!(
                            "tool {} redefines concurrency group {} (max_concurrent {} vs {})",
                            tool.tool.name, group.id, group.max_concurrent, registered.max_concurrent
                        )));
                    }
                }
                tool.concurrency_group_id = Some(group.id);
                state.groups.insert(group.id, group);
            }
            (None, Some(group_id)) => {
                let group = state.groups.get(&group_id).cloned().ok_or_else(|| {
                    Error::configuration(format!(
                        "tool {} references unknown concurrency group {}",
                        tool.tool.name, group_id
                    ))
                })?;
                tool.concurrency_group = Some(group);
            }
            (None, None) => {}
        }

        tracing::debug!(tool = %tool.tool.name, id = %tool.tool.id, "registered command tool");
        state.tools.insert(tool.tool.name.clone(), tool.tool.clone());
        state.command_tools.insert(tool.tool.name.clone(), tool);
        Ok(())
    }

    /// Register a non-command tool (listed and resolvable as a caller only).
    pub fn register_tool(&self, tool: Tool) -> Result<()> {
        if tool.kind == ToolKind::CommandLine {
            return Err(Error::validation(format!(
                "tool {} is command_line; register it with its command",
                tool.name
            )));
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::check_name(&state, &tool.name)?;
        state.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    fn check_name(state: &CatalogState, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::validation("tool name cannot be empty"));
        }
        if state.tools.contains_key(name) {
            return Err(Error::validation(format!("tool {} already registered", name)));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ToolRegistry for ToolCatalog {
    async fn find_tool(&self, name: &str) -> Result<Option<Tool>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.tools.get(name).cloned())
    }

    async fn command_tool(&self, name: &str) -> Result<Option<CommandLineTool>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.command_tools.get(name).cloned())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut tools: Vec<Tool> = state.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }
}

// =============================================================================
// Tests
// =============================================================================
