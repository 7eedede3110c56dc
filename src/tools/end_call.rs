//! end_call 工具：结束通话

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::ControlMessage;
use crate::tools::{Tool, ToolContext, ToolResult};

/// 结束通话（direct-control），不再让模型继续说话
pub struct EndCallTool;

#[async_trait]
impl Tool for EndCallTool {
    fn name(&self) -> &str {
        "end_call"
    }

    fn description(&self) -> &str {
        "End the phone call once the caller's request is fully resolved or they say goodbye."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "Short reason for ending the call"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("conversation complete");
        Ok(ToolResult::DirectControl(ControlMessage::end_with(&json!({
            "reasonCode": "end-call",
            "reason": reason,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_end_call_carries_reason() {
        let ctx = ToolContext::detached("s1");
        let result = EndCallTool
            .execute(json!({"reason": "caller said goodbye"}), &ctx)
            .await
            .unwrap();
        let ToolResult::DirectControl(ControlMessage::End { handoff_data: Some(data) }) = result else {
            panic!("expected end control message");
        };
        let data: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(data["reasonCode"], "end-call");
        assert_eq!(data["reason"], "caller said goodbye");
    }
}
