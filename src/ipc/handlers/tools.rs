//! Tools service handler: invocation and catalog lookups.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::hub::ToolHub;
use crate::invocation::InvocationRequest;
use crate::ipc::router::str_field;
use crate::types::{Error, RequestContext, Result};

pub async fn handle(
    hub: &ToolHub,
    ctx: &RequestContext,
    method: &str,
    body: Value,
) -> Result<Value> {
    match method {
        "Invoke" => {
            let tool = str_field(&body, "tool")?;
            let request: InvocationRequest = serde_json::from_value(body)
                .map_err(|e| Error::validation(format!("Invalid invocation request: {}", e)))?;

            let result = hub.invoke_by_name(ctx, &tool, request).await?;

            Ok(serde_json::json!({
                "output": String::from_utf8_lossy(&result.stdout),
                "output_base64": STANDARD.encode(&result.stdout),
                "duration_ms": u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            }))
        }

        "ListTools" => {
            let tools = hub.list_tools().await?;
            let count = tools.len();

            Ok(serde_json::json!({
                "tools": tools,
                "count": count,
            }))
        }

        "GetTool" => {
            let name = str_field(&body, "name")?;
            hub.get_tool(&name).await
        }

        _ => Err(Error::not_found(format!("Unknown tools method: {}", method))),
    }
}
