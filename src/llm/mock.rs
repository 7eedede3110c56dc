//! 脚本化 Mock LLM 客户端（用于测试，无需 API）
//!
//! 每次 stream 调用按顺序消费一段预置脚本；脚本耗尽后回显最后一条 user 消息并结束。
//! 所有请求都会被记录，便于断言每轮发送给后端的对话与工具目录。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{EventStream, GenerationRequest, LlmClient, LlmError, StreamEvent, ToolCallFragment};
use crate::memory::{Message, Role};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(StreamEvent),
    /// 在下一个事件前等待
    Pause(Duration),
    /// 流中途出错
    Fail(LlmError),
    /// 永远不再产生事件（模拟卡住的连接）
    Hang,
}

/// 一次流式生成的脚本
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
    /// 打开流本身失败
    open_error: Option<LlmError>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打开即失败的脚本
    pub fn failing(error: LlmError) -> Self {
        Self {
            steps: Vec::new(),
            open_error: Some(error),
        }
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::Content(text.into())));
        self
    }

    /// 一个工具调用的起始片段（id + name）
    pub fn tool_start(mut self, id: &str, name: &str) -> Self {
        self.steps
            .push(ScriptStep::Event(StreamEvent::ToolCallDelta(ToolCallFragment {
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: String::new(),
            })));
        self
    }

    pub fn tool_args(mut self, fragment: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Event(StreamEvent::ToolCallDelta(ToolCallFragment {
                id: None,
                name: None,
                arguments: fragment.into(),
            })));
        self
    }

    pub fn tool_complete(mut self) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::ToolCallComplete));
        self
    }

    pub fn done(mut self) -> Self {
        self.steps.push(ScriptStep::Event(StreamEvent::Done));
        self
    }

    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(duration));
        self
    }

    pub fn fail(mut self, error: LlmError) -> Self {
        self.steps.push(ScriptStep::Fail(error));
        self
    }

    pub fn hang(mut self) -> Self {
        self.steps.push(ScriptStep::Hang);
        self
    }

    /// 一次完整的工具调用：参数按给定片段依次到达
    pub fn tool_call(self, id: &str, name: &str, fragments: &[&str]) -> Self {
        let mut script = self.tool_start(id, name);
        for fragment in fragments {
            script = script.tool_args(*fragment);
        }
        script.tool_complete()
    }
}

/// 被记录下来的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub instructions: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// 脚本化客户端
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn echo_script(messages: &[Message]) -> Script {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Script::new().content(format!("Echo: {last_user}")).done()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn stream(&self, request: GenerationRequest<'_>) -> Result<EventStream, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                instructions: request.instructions.to_string(),
                messages: request.messages.to_vec(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            });

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Self::echo_script(request.messages));

        if let Some(error) = script.open_error {
            return Err(error);
        }

        let events = stream::unfold(script.steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    ScriptStep::Event(event) => return Some((Ok(event), steps)),
                    ScriptStep::Fail(error) => return Some((Err(error), steps)),
                    ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Hang => futures_util::future::pending::<()>().await,
                }
            }
        });
        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
