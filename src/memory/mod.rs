//! 记忆层：单通电话内的对话状态（进程生命周期内，不做持久化）

pub mod conversation;

pub use conversation::{ConversationState, HeardOutcome, Message, Role, ToolInvocation};
