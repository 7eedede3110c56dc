//! 中继错误类型
//!
//! 工具相关错误（参数解析、未知工具、执行失败）在执行器边界被转换为 context-error 写回对话，
//! 不会终止会话；只有 Backend 错误会上抛到传输层，由传输层决定是否挂断。

use thiserror::Error;

use crate::llm::LlmError;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum RelayError {
    /// 模型后端连接 / 流协议错误（不在内部重试）
    #[error("LLM backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    /// 入站消息格式错误或时序错误（如重复 setup、setup 之前的事件）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 指令 / 工具目录无效，旧配置保持生效
    #[error("Reconfigure rejected: {0}")]
    Reconfigure(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Config error: {0}")]
    Config(String),
}
