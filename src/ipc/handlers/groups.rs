//! Groups service handler: concurrency group inspection and reset.

use serde_json::Value;

use crate::hub::ToolHub;
use crate::ipc::router::u64_field;
use crate::types::{Error, GroupId, Result};

pub async fn handle(hub: &ToolHub, method: &str, body: Value) -> Result<Value> {
    match method {
        "Reset" => {
            let group = GroupId::new(u64_field(&body, "group_id")?);
            let existed = hub.reset_group(group);

            Ok(serde_json::json!({
                "reset": true,
                "existed": existed,
            }))
        }

        "Stats" => {
            let groups = serde_json::to_value(hub.group_stats())?;

            Ok(serde_json::json!({ "groups": groups }))
        }

        _ => Err(Error::not_found(format!("Unknown groups method: {}", method))),
    }
}
