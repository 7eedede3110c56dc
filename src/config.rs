//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VOXRELAY__*` 覆盖（双下划线表示嵌套，如 `VOXRELAY__LLM__MODEL=gpt-4o`）。
//! 助手档案（指令文本 + 工具目录）单独从 profile 目录加载：instructions.md 与 tools.json。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::RelayError;
use crate::inactivity::InactivityConfig;
use crate::tools::{ToolBox, ToolSpec};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub server: ServerSection,
    pub assistant: AssistantSection,
    pub inactivity: InactivitySection,
    pub generation: GenerationSection,
}

/// [llm] 段：OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: None,
        }
    }
}

/// [server] 段：语音传输 WebSocket 与管理 API 的监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_addr() -> String {
    "127.0.0.1:8081".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

/// [assistant] 段：助手档案目录
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantSection {
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("config/assistant")
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
        }
    }
}

/// [inactivity] 段：静默提醒阈值与次数
#[derive(Debug, Clone, Deserialize)]
pub struct InactivitySection {
    /// 静默多少秒后提醒
    #[serde(default = "default_reminder_secs")]
    pub reminder_secs: u64,
    /// 第 N 次超时即挂断（之前共提醒 N-1 次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 提醒时以 system 身份交给模型的提示
    #[serde(default = "default_reminder_prompt")]
    pub reminder_prompt: String,
}

fn default_reminder_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reminder_prompt() -> String {
    crate::session::DEFAULT_REMINDER_PROMPT.to_string()
}

impl Default for InactivitySection {
    fn default() -> Self {
        Self {
            reminder_secs: default_reminder_secs(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            reminder_prompt: default_reminder_prompt(),
        }
    }
}

impl InactivitySection {
    pub fn monitor_config(&self) -> InactivityConfig {
        InactivityConfig {
            reminder_after: Duration::from_secs(self.reminder_secs),
            max_retries: self.max_retries,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// [generation] 段
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    /// 单次 generate 内最多的工具后续轮数，防止模型反复调用工具
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_max_tool_rounds() -> usize {
    8
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 VOXRELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VOXRELAY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VOXRELAY")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 助手档案：指令文本 + 工具目录
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantProfile {
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
}

impl AssistantProfile {
    pub fn new(instructions: impl Into<String>, tools: Vec<ToolSpec>) -> Self {
        Self {
            instructions: instructions.into(),
            tools,
        }
    }

    /// 没有档案文件时的兜底：通用指令 + 工具箱中的全部工具
    pub fn fallback(toolbox: &ToolBox) -> Self {
        Self::new(
            "You are a friendly voice assistant on a phone call. Keep answers short and speakable: \
             no markdown, no lists, no emoji.",
            toolbox.full_catalog(),
        )
    }
}

/// 从目录加载助手档案：instructions.md（必需）、tools.json（可选，缺省为空目录）
pub fn load_profile(dir: &Path) -> Result<AssistantProfile, RelayError> {
    let instructions_path = dir.join("instructions.md");
    let instructions = std::fs::read_to_string(&instructions_path).map_err(|e| {
        RelayError::Config(format!("cannot read {}: {e}", instructions_path.display()))
    })?;
    if instructions.trim().is_empty() {
        return Err(RelayError::Config(format!(
            "{} is empty",
            instructions_path.display()
        )));
    }

    let tools_path = dir.join("tools.json");
    let tools = if tools_path.exists() {
        let raw = std::fs::read_to_string(&tools_path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", tools_path.display())))?;
        serde_json::from_str::<Vec<ToolSpec>>(&raw)
            .map_err(|e| RelayError::Config(format!("invalid {}: {e}", tools_path.display())))?
    } else {
        Vec::new()
    };

    Ok(AssistantProfile::new(instructions.trim_end(), tools))
}
