//! switch_language 工具：切换通话的合成 / 识别语言
//!
//! 通过 ToolContext 的控制句柄立即下发 language 指令，同时返回 conversational 结果，
//! 让模型用新语言继续回复。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::ControlMessage;
use crate::tools::{Tool, ToolContext, ToolResult};

pub struct SwitchLanguageTool;

#[async_trait]
impl Tool for SwitchLanguageTool {
    fn name(&self) -> &str {
        "switch_language"
    }

    fn description(&self) -> &str {
        "Switch the spoken and transcribed language of the call, e.g. when the caller prefers Spanish."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": {"type": "string", "description": "BCP-47 code such as es-ES or en-US"}
            },
            "required": ["language"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, String> {
        let language = args
            .get("language")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or("language is required")?;

        let sent = ctx.control.emit(ControlMessage::Language {
            tts_language: Some(language.to_string()),
            transcription_language: Some(language.to_string()),
        });
        if !sent {
            return Err("call was interrupted before the language could be switched".to_string());
        }
        Ok(ToolResult::Conversational(json!({
            "status": "switched",
            "language": language,
        })))
    }
}
