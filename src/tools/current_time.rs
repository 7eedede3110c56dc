//! current_time 工具：返回当前 UTC 时间

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time (UTC)."
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let now = Utc::now();
        Ok(ToolResult::Conversational(json!({
            "iso": now.to_rfc3339(),
            "weekday": now.format("%A").to_string(),
            "timezone": "UTC",
        })))
    }
}
