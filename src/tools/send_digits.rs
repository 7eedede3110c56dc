//! send_digits 工具：在通话中发送按键音（DTMF）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::ControlMessage;
use crate::tools::{Tool, ToolContext, ToolResult};

/// 合法字符：数字、*、#，以及 w / W（半秒 / 一秒停顿）
fn is_dtmf(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'w' | 'W')
}

pub struct SendDigitsTool;

#[async_trait]
impl Tool for SendDigitsTool {
    fn name(&self) -> &str {
        "send_digits"
    }

    fn description(&self) -> &str {
        "Send touch-tone digits on the call, e.g. to navigate an IVR menu or enter an extension."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "digits": {"type": "string", "description": "Digits to send: 0-9, * and #; w pauses"}
            },
            "required": ["digits"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
        let digits = args
            .get("digits")
            .and_then(Value::as_str)
            .ok_or("digits is required")?;
        if digits.is_empty() || !digits.chars().all(is_dtmf) {
            return Err(format!("invalid DTMF sequence: {digits:?}"));
        }
        Ok(ToolResult::DirectControl(ControlMessage::SendDigits {
            digits: digits.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_digits() {
        let ctx = ToolContext::detached("s1");
        let result = SendDigitsTool.execute(json!({"digits": "1w234#"}), &ctx).await.unwrap();
        assert_eq!(
            result,
            ToolResult::DirectControl(ControlMessage::SendDigits { digits: "1w234#".into() })
        );
    }

    #[tokio::test]
    async fn test_invalid_digits_rejected() {
        let ctx = ToolContext::detached("s1");
        assert!(SendDigitsTool.execute(json!({"digits": "12a"}), &ctx).await.is_err());
        assert!(SendDigitsTool.execute(json!({"digits": ""}), &ctx).await.is_err());
        assert!(SendDigitsTool.execute(json!({}), &ctx).await.is_err());
    }
}
