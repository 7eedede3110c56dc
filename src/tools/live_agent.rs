//! live_agent_handoff 工具：转接人工坐席
//!
//! 以 end 指令结束 AI 会话，handoffData 中携带原因与摘要，由后续流程（排队 / 坐席平台）接手。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::ControlMessage;
use crate::tools::{Tool, ToolContext, ToolResult};

pub struct LiveAgentHandoffTool;

#[async_trait]
impl Tool for LiveAgentHandoffTool {
    fn name(&self) -> &str {
        "live_agent_handoff"
    }

    fn description(&self) -> &str {
        "Transfer the caller to a human agent when they ask for one or the request cannot be handled."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {"type": "string", "description": "Why the caller needs a human"},
                "summary": {"type": "string", "description": "One-paragraph summary of the conversation so far"}
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String> {
        let reason = args
            .get("reason")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .ok_or("reason is required")?;
        let summary = args.get("summary").and_then(Value::as_str).unwrap_or("");
        Ok(ToolResult::DirectControl(ControlMessage::end_with(&json!({
            "reasonCode": "live-agent-handoff",
            "reason": reason,
            "summary": summary,
            "sessionId": ctx.session_id,
        }))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handoff_requires_reason() {
        let ctx = ToolContext::detached("s1");
        assert!(LiveAgentHandoffTool.execute(json!({}), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_handoff_data() {
        let ctx = ToolContext::detached("VX42");
        let result = LiveAgentHandoffTool
            .execute(json!({"reason": "billing dispute", "summary": "Caller disputes a charge"}), &ctx)
            .await
            .unwrap();
        let ToolResult::DirectControl(ControlMessage::End { handoff_data: Some(data) }) = result else {
            panic!("expected end control message");
        };
        let data: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(data["reasonCode"], "live-agent-handoff");
        assert_eq!(data["sessionId"], "VX42");
    }
}
