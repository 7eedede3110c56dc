//! LLM 层：后端能力抽象与实现（OpenAI 兼容流式 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{Script, ScriptStep, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{
    EventStream, GenerationRequest, LlmClient, LlmError, StreamEvent, ToolCallFragment,
};
