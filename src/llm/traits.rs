//! LLM 客户端抽象
//!
//! 后端被视为一个能力：「提交对话状态，得到一个可取消的内容 / 工具调用事件流」。
//! 具体后端（OpenAI 兼容 / 脚本化 Mock）实现 LlmClient::stream。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 后端错误：连接失败或流在中途断开
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("stream broken: {0}")]
    Stream(String),
}

/// 一个工具调用的流式片段；name 可能整体给出，也可能分多次追加
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// 后端流事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// 文本片段
    Content(String),
    /// 工具调用片段
    ToolCallDelta(ToolCallFragment),
    /// 当前打开的工具调用参数已完整
    ToolCallComplete,
    /// 本次生成结束
    Done,
}

/// 后端事件流
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// 一次生成请求：指令、完整对话、当前工具目录
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub instructions: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 打开一次流式生成
    async fn stream(&self, request: GenerationRequest<'_>) -> Result<EventStream, LlmError>;

    /// 用于日志
    fn name(&self) -> &str {
        "llm"
    }
}
