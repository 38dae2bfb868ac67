//! Top-level IPC router. Routes by service and delegates to handlers.

use serde_json::Value;

use crate::hub::ToolHub;
use crate::ipc::handlers;
use crate::types::{Error, RequestContext, Result};

/// Route an IPC request to the appropriate service handler.
pub async fn route_request(
    hub: &ToolHub,
    ctx: &RequestContext,
    service: &str,
    method: &str,
    body: Value,
) -> Result<Value> {
    match service {
        "tools" => handlers::tools::handle(hub, ctx, method, body).await,
        "groups" => handlers::groups::handle(hub, method, body).await,
        "hub" => match method {
            "Ping" => Ok(serde_json::json!({ "pong": true })),
            _ => Err(Error::not_found(format!("Unknown hub method: {}", method))),
        },
        _ => Err(Error::not_found(format!("Unknown service: {}", service))),
    }
}

// =============================================================================
// Shared helpers for the handler modules
// =============================================================================

pub fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}

pub fn u64_field(body: &Value, key: &str) -> Result<u64> {
    body.get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_helpers() {
        let body = serde_json::json!({"name": "echo", "group_id": 3, "bad": -1});
        assert_eq!(str_field(&body, "name").unwrap(), "echo");
        assert_eq!(u64_field(&body, "group_id").unwrap(), 3);
        assert!(matches!(u64_field(&body, "bad"), Err(Error::Validation(_))));
        assert!(str_field(&body, "missing").is_err());
    }
}
