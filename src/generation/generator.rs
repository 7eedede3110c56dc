//! 流式回复生成器
//!
//! 一个会话一个实例。generate(role, prompt) 把提示写入对话，然后以完整对话 + 指令 + 工具目录
//! 向后端发起流式请求，逐事件处理：
//!
//! - 文本片段：追加到本轮缓冲并立即经 on_content 发出 `{token, last:false}`
//! - 工具调用片段：拼入当前唯一的累加器；不同 id 的片段会先结束当前调用
//! - 工具调用完成：经执行器执行后按结果通道分流
//!   - conversational：调用与结果成对写入对话，当前流结束后发起后续轮（循环而非递归）
//!   - direct-control：经 on_control 直接下发，写一条 system 说明，不发起后续轮
//!   - context-error：写一条 system 错误条目，不发起后续轮
//! - 结束（Done 或流耗尽）：缓冲非空则写为 assistant 轮次，发出 `{token:"", last:true}`
//!
//! 每个事件边界都检查打断开关，读流时与令牌竞争，因此打断不必等待网络进度。
//! 被打断的轮次不发结束标记，也不写入半截文本或半截工具调用。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::AssistantProfile;
use crate::core::RelayError;
use crate::generation::{InterruptSwitch, ToolCallAccumulator};
use crate::llm::{EventStream, GenerationRequest, LlmClient, StreamEvent};
use crate::memory::{ConversationState, HeardOutcome, Role, ToolInvocation};
use crate::protocol::TextToken;
use crate::tools::{
    ControlEmitter, ControlSink, ToolBox, ToolContext, ToolExecutor, ToolRegistry, ToolResult,
    ToolSpec,
};

/// 单次 generate 内默认最多的后续轮数
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// 文本片段回调
pub type ContentSink = Arc<dyn Fn(TextToken) + Send + Sync>;
/// 工具结果观察回调（日志 / 测试）
pub type ToolResultSink = Arc<dyn Fn(&ToolInvocation, &ToolResult) + Send + Sync>;

/// 构造时确定的具名回调槽
#[derive(Clone)]
pub struct GeneratorHooks {
    pub on_content: ContentSink,
    pub on_control: ControlSink,
    pub on_tool_result: Option<ToolResultSink>,
}

impl GeneratorHooks {
    pub fn new(on_content: ContentSink, on_control: ControlSink) -> Self {
        Self {
            on_content,
            on_control,
            on_tool_result: None,
        }
    }

    pub fn with_tool_result(mut self, sink: ToolResultSink) -> Self {
        self.on_tool_result = Some(sink);
        self
    }

    /// 丢弃所有输出
    pub fn silent() -> Self {
        Self::new(Arc::new(|_| {}), Arc::new(|_| {}))
    }
}

/// generate 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Interrupted,
}

/// 单轮流的结束方式
enum CycleEnd {
    Finished,
    FollowUp,
    Interrupted,
}

/// 工具调用处理后的去向
enum ToolStep {
    Continue,
    FollowUp,
    Interrupted,
}

/// 流式回复生成器
pub struct ResponseGenerator {
    llm: Arc<dyn LlmClient>,
    toolbox: Arc<ToolBox>,
    executor: ToolExecutor,
    instructions: String,
    conversation: ConversationState,
    hooks: GeneratorHooks,
    interrupt: InterruptSwitch,
    session_id: String,
    max_tool_rounds: usize,
}

impl ResponseGenerator {
    /// 按助手档案构建；工具目录中有工具箱没有的实现时返回 Reconfigure 错误
    pub fn new(
        llm: Arc<dyn LlmClient>,
        toolbox: Arc<ToolBox>,
        profile: &AssistantProfile,
        hooks: GeneratorHooks,
    ) -> Result<Self, RelayError> {
        let registry = ToolRegistry::from_catalog(&profile.tools, &toolbox)?;
        Ok(Self {
            llm,
            toolbox,
            executor: ToolExecutor::new(Arc::new(registry)),
            instructions: profile.instructions.clone(),
            conversation: ConversationState::new(),
            hooks,
            interrupt: InterruptSwitch::new(),
            session_id: String::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        })
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// 写入提示并生成回复，直到完成或被打断
    pub async fn generate(
        &mut self,
        role: Role,
        prompt: impl Into<String>,
    ) -> Result<GenerationOutcome, RelayError> {
        let token = self.reset_interrupt();
        self.conversation.push_turn(role, prompt)?;

        let mut rounds = 0usize;
        loop {
            match self.run_cycle(&token).await? {
                CycleEnd::Finished => return Ok(GenerationOutcome::Completed),
                CycleEnd::Interrupted => {
                    tracing::debug!(session_id = %self.session_id, "Generation interrupted");
                    return Ok(GenerationOutcome::Interrupted);
                }
                CycleEnd::FollowUp => {
                    rounds += 1;
                    if token.is_cancelled() {
                        return Ok(GenerationOutcome::Interrupted);
                    }
                    if rounds > self.max_tool_rounds {
                        tracing::warn!(
                            session_id = %self.session_id,
                            max = self.max_tool_rounds,
                            "Tool follow-up limit reached, finishing turn"
                        );
                        (self.hooks.on_content)(TextToken::last());
                        return Ok(GenerationOutcome::Completed);
                    }
                }
            }
        }
    }

    /// 一轮流式请求
    async fn run_cycle(&mut self, token: &CancellationToken) -> Result<CycleEnd, RelayError> {
        tracing::debug!(
            session_id = %self.session_id,
            backend = self.llm.name(),
            messages = self.conversation.len(),
            "Opening generation stream"
        );
        let request = GenerationRequest {
            instructions: &self.instructions,
            messages: self.conversation.messages(),
            tools: self.executor.catalog(),
        };
        let mut stream: EventStream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(CycleEnd::Interrupted),
            opened = self.llm.stream(request) => opened?,
        };

        let mut buffer = String::new();
        let mut open: Option<ToolCallAccumulator> = None;
        let mut follow_up = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(CycleEnd::Interrupted),
                next = stream.next() => next,
            };
            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Generation stream failed");
                    return Err(e.into());
                }
            };

            let step = match event {
                StreamEvent::Content(text) => {
                    if !text.is_empty() {
                        buffer.push_str(&text);
                        (self.hooks.on_content)(TextToken::partial(text));
                    }
                    ToolStep::Continue
                }
                StreamEvent::ToolCallDelta(fragment) => {
                    let mut step = ToolStep::Continue;
                    if open.as_ref().is_some_and(|acc| !acc.accepts(&fragment)) {
                        if let Some(previous) = open.take() {
                            step = self.complete_tool_call(previous, &mut buffer, token).await;
                        }
                    }
                    open.get_or_insert_with(ToolCallAccumulator::new)
                        .absorb(fragment);
                    step
                }
                StreamEvent::ToolCallComplete => match open.take() {
                    Some(acc) => self.complete_tool_call(acc, &mut buffer, token).await,
                    None => {
                        tracing::debug!("Tool call completion without an open call");
                        ToolStep::Continue
                    }
                },
                StreamEvent::Done => {
                    let step = match open.take() {
                        Some(acc) => self.complete_tool_call(acc, &mut buffer, token).await,
                        None => ToolStep::Continue,
                    };
                    match step {
                        ToolStep::Interrupted => return Ok(CycleEnd::Interrupted),
                        ToolStep::FollowUp => follow_up = true,
                        ToolStep::Continue => {}
                    }
                    break;
                }
            };

            match step {
                ToolStep::Interrupted => return Ok(CycleEnd::Interrupted),
                ToolStep::FollowUp => follow_up = true,
                ToolStep::Continue => {}
            }
        }

        if let Some(acc) = open.take() {
            tracing::warn!(
                session_id = %self.session_id,
                tool = acc.name(),
                "Stream ended with an unfinished tool call, discarding it"
            );
        }

        self.commit_spoken(&mut buffer);
        if follow_up {
            return Ok(CycleEnd::FollowUp);
        }
        (self.hooks.on_content)(TextToken::last());
        Ok(CycleEnd::Finished)
    }

    /// 执行一个已拼装完成的调用并按结果通道分流
    async fn complete_tool_call(
        &mut self,
        acc: ToolCallAccumulator,
        buffer: &mut String,
        token: &CancellationToken,
    ) -> ToolStep {
        let invocation = acc.finish();
        let ctx = ToolContext::new(
            self.session_id.clone(),
            ControlEmitter::new(self.hooks.on_control.clone(), token.clone()),
        );
        // 已开始的工具总是执行到底
        let result = self.executor.execute(&invocation, &ctx).await;
        if let Some(observe) = &self.hooks.on_tool_result {
            observe(&invocation, &result);
        }
        let interrupted = token.is_cancelled();

        match result {
            ToolResult::Conversational(payload) => {
                let spoken = std::mem::take(buffer);
                self.conversation
                    .record_tool_exchange(invocation, spoken, payload.to_string());
                if interrupted {
                    ToolStep::Interrupted
                } else {
                    ToolStep::FollowUp
                }
            }
            ToolResult::DirectControl(msg) => {
                if interrupted {
                    tracing::debug!(tool = %invocation.name, "Interrupted, control message not dispatched");
                    return ToolStep::Interrupted;
                }
                self.commit_spoken(buffer);
                let note = msg.describe();
                (self.hooks.on_control)(msg);
                self.push_system(note);
                ToolStep::Continue
            }
            ToolResult::ContextError(description) => {
                self.commit_spoken(buffer);
                self.push_system(format!(
                    "Tool {} could not be completed: {description}",
                    invocation.name
                ));
                if interrupted {
                    ToolStep::Interrupted
                } else {
                    ToolStep::Continue
                }
            }
        }
    }

    /// 把已播报的文本写为 assistant 轮次
    fn commit_spoken(&mut self, buffer: &mut String) {
        if !buffer.is_empty() {
            self.push_turn_logged(Role::Assistant, std::mem::take(buffer));
        }
    }

    fn push_system(&mut self, content: String) {
        self.push_turn_logged(Role::System, content);
    }

    fn push_turn_logged(&mut self, role: Role, content: String) {
        if let Err(e) = self.conversation.push_turn(role, content) {
            tracing::warn!(error = %e, "Failed to record turn");
        }
    }

    /// 打断当前轮（幂等）
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn reset_interrupt(&self) -> CancellationToken {
        self.interrupt.reset()
    }

    /// 可在其它任务中使用的打断句柄
    pub fn interrupt_handle(&self) -> InterruptSwitch {
        self.interrupt.clone()
    }

    /// 追加普通轮次，不触发生成
    pub fn insert_message(&mut self, role: Role, content: impl Into<String>) -> Result<(), RelayError> {
        self.conversation.push_turn(role, content)
    }

    /// 按来电者实际听到的文本修正最近的回复
    pub fn record_heard(&mut self, heard: &str) -> HeardOutcome {
        let outcome = self.conversation.record_heard(heard);
        tracing::debug!(session_id = %self.session_id, ?outcome, "Recorded heard reply");
        outcome
    }

    /// 整体替换指令与工具集；校验失败时保持旧配置
    pub fn reconfigure(
        &mut self,
        instructions: impl Into<String>,
        catalog: &[ToolSpec],
    ) -> Result<(), RelayError> {
        let instructions = instructions.into();
        if instructions.trim().is_empty() {
            return Err(RelayError::Reconfigure("instructions must not be empty".to_string()));
        }
        let registry = ToolRegistry::from_catalog(catalog, &self.toolbox)?;
        tracing::info!(
            session_id = %self.session_id,
            tools = ?registry.tool_names(),
            "Reconfigured assistant"
        );
        self.executor = ToolExecutor::new(Arc::new(registry));
        self.instructions = instructions;
        Ok(())
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }
}
