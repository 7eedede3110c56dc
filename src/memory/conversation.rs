//! 对话状态
//!
//! 有序记录 system / user / assistant / tool 各轮次。工具调用（assistant 携带 tool_call）
//! 与工具结果（tool 携带同一 call id）只能通过 record_tool_exchange 成对写入，
//! 因此「每个工具调用后紧跟唯一匹配的结果」在结构上始终成立。

use serde::{Deserialize, Serialize};

use crate::core::RelayError;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// 一次完整的函数调用（由流式片段拼装完成）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// 关联 ID（结果条目携带同一 ID）
    pub id: String,
    pub name: String,
    /// 模型给出的原始参数串（未解析）
    pub arguments: String,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 发起的工具调用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolInvocation>,
    /// tool 结果对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn is_tool_invocation(&self) -> bool {
        self.tool_call.is_some()
    }
}

/// record_heard 对对话的影响
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeardOutcome {
    /// 已提交的回复被截断为听到的部分
    Truncated,
    /// 新追加了一条 assistant 轮次
    Appended,
    Ignored,
}

/// 一通电话的对话记录
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加普通轮次；tool 角色只能随调用一起写入
    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) -> Result<(), RelayError> {
        if role == Role::Tool {
            return Err(RelayError::Protocol(
                "tool results can only be recorded together with their invocation".to_string(),
            ));
        }
        self.messages.push(Message::new(role, content));
        Ok(())
    }

    /// 原子写入一对「工具调用 + 工具结果」
    ///
    /// `spoken` 为本轮在调用之前已经播报给来电者的文本，挂在调用条目上。
    pub fn record_tool_exchange(
        &mut self,
        invocation: ToolInvocation,
        spoken: String,
        result: String,
    ) {
        let call_id = invocation.id.clone();
        self.messages.push(Message {
            role: Role::Assistant,
            content: spoken,
            tool_call: Some(invocation),
            tool_call_id: None,
        });
        self.messages.push(Message {
            role: Role::Tool,
            content: result,
            tool_call: None,
            tool_call_id: Some(call_id),
        });
    }

    /// 记录来电者打断时实际听到的 assistant 文本
    ///
    /// 最后一条是已提交的普通 assistant 轮次时，它就是正在播报的回复：以听到的文本开头则截断为
    /// 听到的部分，否则保持不变。被打断的轮次没有提交任何内容时才追加一条新的 assistant 轮次。
    pub fn record_heard(&mut self, heard: &str) -> HeardOutcome {
        let heard = heard.trim();
        if heard.is_empty() {
            return HeardOutcome::Ignored;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant && last.tool_call.is_none() => {
                if last.content.trim() == heard {
                    HeardOutcome::Ignored
                } else if last.content.trim_start().starts_with(heard) {
                    last.content = heard.to_string();
                    HeardOutcome::Truncated
                } else {
                    HeardOutcome::Ignored
                }
            }
            _ => {
                self.messages.push(Message::assistant(heard));
                HeardOutcome::Appended
            }
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 校验调用 / 结果配对不变量
    pub fn is_consistent(&self) -> bool {
        let mut iter = self.messages.iter().peekable();
        while let Some(msg) = iter.next() {
            if let Some(call) = &msg.tool_call {
                match iter.next() {
                    Some(next)
                        if next.role == Role::Tool
                            && next.tool_call_id.as_deref() == Some(call.id.as_str()) => {}
                    _ => return false,
                }
            } else if msg.role == Role::Tool {
                return false;
            }
        }
        true
    }
}
