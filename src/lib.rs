//! voxrelay - 语音通话与 LLM 之间的实时对话中继
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与助手档案
//! - **core**: 错误类型、优雅关闭
//! - **generation**: 流式回复生成器（工具调用拼装、后续轮、打断）
//! - **inactivity**: 静默监控（提醒 / 挂断）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容流式 / 脚本化 Mock）
//! - **memory**: 对话状态
//! - **observability**: 日志初始化
//! - **protocol**: 传输端消息协议
//! - **session**: 会话协议处理、工作任务、会话目录
//! - **tools**: 工具契约、注册表、执行器与内置工具
//! - **transport**: WebSocket 端点与管理 API（feature `server`）

pub mod config;
pub mod core;
pub mod generation;
pub mod inactivity;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod tools;
#[cfg(feature = "server")]
pub mod transport;
