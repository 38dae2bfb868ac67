//! Tool definitions, the registry that resolves them by name, and the log of
//! invocations made against them.

pub mod calling_log;
pub mod catalog;

pub use calling_log::{InMemoryInvocationLog, InvocationLog, InvocationRecord};
pub use catalog::{CommandLineTool, ConcurrencyGroup, Tool, ToolCatalog, ToolKind, ToolRegistry};
