//! 工具结果分类与执行上下文
//!
//! 工具结果分三条通道：conversational 写回对话供模型继续生成；direct-control 绕过模型
//! 直接交给传输层；context-error 作为 system 可见的错误写入对话。

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::protocol::ControlMessage;

/// 单次工具执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Conversational(Value),
    DirectControl(ControlMessage),
    ContextError(String),
}

impl ToolResult {
    /// 按 JSON 约定分类工具输出：`{kind, payload}` 显式标注的按标注处理，其余一律视为 conversational
    pub fn classify(value: Value) -> Self {
        let tagged = value.as_object().and_then(|obj| {
            let kind = obj.get("kind")?.as_str()?;
            let payload = obj.get("payload")?;
            (obj.len() == 2).then(|| (kind.to_string(), payload.clone()))
        });
        let Some((kind, payload)) = tagged else {
            return ToolResult::Conversational(value);
        };
        match kind.as_str() {
            "conversational" => ToolResult::Conversational(payload),
            "direct-control" => match serde_json::from_value::<ControlMessage>(payload) {
                Ok(msg) => ToolResult::DirectControl(msg),
                Err(e) => ToolResult::ContextError(format!("malformed direct-control payload: {e}")),
            },
            "context-error" => ToolResult::ContextError(match payload {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => ToolResult::Conversational(value),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ToolResult::Conversational(_) => "conversational",
            ToolResult::DirectControl(_) => "direct-control",
            ToolResult::ContextError(_) => "context-error",
        }
    }
}

impl From<Value> for ToolResult {
    fn from(value: Value) -> Self {
        ToolResult::classify(value)
    }
}

/// 控制指令回调
pub type ControlSink = Arc<dyn Fn(ControlMessage) + Send + Sync>;

/// 交给工具的控制指令发送句柄；本轮被打断后发送会被丢弃
#[derive(Clone)]
pub struct ControlEmitter {
    sink: ControlSink,
    cancel: CancellationToken,
}

impl ControlEmitter {
    pub fn new(sink: ControlSink, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    /// 不连接任何传输端（测试 / 离线执行）
    pub fn detached() -> Self {
        Self::new(Arc::new(|_| {}), CancellationToken::new())
    }

    /// 发送控制指令；已被打断时返回 false
    pub fn emit(&self, msg: ControlMessage) -> bool {
        if self.cancel.is_cancelled() {
            tracing::debug!(?msg, "Dropping control message emitted after interrupt");
            return false;
        }
        (self.sink)(msg);
        true
    }
}

impl fmt::Debug for ControlEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlEmitter")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// 工具执行上下文
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub control: ControlEmitter,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, control: ControlEmitter) -> Self {
        Self {
            session_id: session_id.into(),
            control,
        }
    }

    pub fn detached(session_id: impl Into<String>) -> Self {
        Self::new(session_id, ControlEmitter::detached())
    }
}
