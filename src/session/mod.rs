//! 会话层：协议处理、每会话工作任务与会话目录
//!
//! SessionHandler 在 setup 之后持有一个工作任务（独占 ResponseGenerator）和一个静默监控，
//! 把入站事件路由到对应处理，并把两条出站通道（文本 / 控制指令）汇入同一个 SessionOutput 通道。

pub mod directory;
pub mod handler;
pub mod worker;

use std::sync::Arc;

use crate::config::{AppConfig, AssistantProfile};
use crate::generation::DEFAULT_MAX_TOOL_ROUNDS;
use crate::inactivity::InactivityConfig;
use crate::llm::LlmClient;
use crate::protocol::OutboundMessage;
use crate::tools::ToolBox;

pub use directory::SessionDirectory;
pub use handler::SessionHandler;
pub use worker::{Command, SessionHandle};

/// 静默提醒时以 system 身份交给模型的默认提示
pub const DEFAULT_REMINDER_PROMPT: &str =
    "The caller has been silent for a while. Briefly check whether they are still on the line.";

/// 交给传输层的输出
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    Message(OutboundMessage),
    /// 后端错误，由传输层决定如何处理
    Failed { error: String },
}

/// 会话运行参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub inactivity: InactivityConfig,
    pub reminder_prompt: String,
    pub max_tool_rounds: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity: InactivityConfig::default(),
            reminder_prompt: DEFAULT_REMINDER_PROMPT.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            inactivity: config.inactivity.monitor_config(),
            reminder_prompt: config.inactivity.reminder_prompt.clone(),
            max_tool_rounds: config.generation.max_tool_rounds,
        }
    }
}

/// 所有会话共享的依赖
pub struct RelayContext {
    pub llm: Arc<dyn LlmClient>,
    pub toolbox: Arc<ToolBox>,
    pub profile: AssistantProfile,
    pub settings: SessionSettings,
    pub directory: SessionDirectory,
}

impl RelayContext {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        toolbox: Arc<ToolBox>,
        profile: AssistantProfile,
        settings: SessionSettings,
    ) -> Self {
        Self {
            llm,
            toolbox,
            profile,
            settings,
            directory: SessionDirectory::new(),
        }
    }
}
