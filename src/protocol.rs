//! 语音传输端消息协议
//!
//! 入站：setup / prompt / interrupt / dtmf / info / error，均以 `type` 字段区分。
//! 出站：两条独立通道复用同一连接：对话文本 `{type:"text", token, last}`，
//! 以及直接发给传输层的控制指令（end / sendDigits / play / language）。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RelayError;

/// 已知的入站事件类型
const INBOUND_TYPES: [&str; 6] = ["setup", "prompt", "interrupt", "dtmf", "info", "error"];

/// setup 事件携带的通话元数据
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetupInfo {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: Map<String, Value>,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Setup(SetupInfo),
    Prompt {
        #[serde(rename = "voiceText")]
        voice_text: String,
    },
    Interrupt {
        #[serde(rename = "partialUtterance", default)]
        partial_utterance: String,
    },
    Dtmf {
        digit: String,
    },
    Info {
        #[serde(flatten)]
        details: Map<String, Value>,
    },
    Error {
        #[serde(default)]
        description: String,
    },
}

impl InboundEvent {
    /// 解析一条原始 JSON；未知 type 返回 UnknownEvent，格式错误返回 Protocol
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RelayError::Protocol(format!("invalid JSON: {e}")))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("missing \"type\" field".to_string()))?
            .to_string();
        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Err(RelayError::UnknownEvent(kind));
        }
        serde_json::from_value(value)
            .map_err(|e| RelayError::Protocol(format!("malformed {kind} event: {e}")))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Setup(_) => "setup",
            InboundEvent::Prompt { .. } => "prompt",
            InboundEvent::Interrupt { .. } => "interrupt",
            InboundEvent::Dtmf { .. } => "dtmf",
            InboundEvent::Info { .. } => "info",
            InboundEvent::Error { .. } => "error",
        }
    }

    /// 是否算作对话活动（重置静默计时）；info / error 不算
    pub fn is_qualifying(&self) -> bool {
        matches!(
            self,
            InboundEvent::Prompt { .. } | InboundEvent::Interrupt { .. } | InboundEvent::Dtmf { .. }
        )
    }
}

/// 对话文本片段；last=true 表示一轮助手回复结束
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "text")]
pub struct TextToken {
    pub token: String,
    pub last: bool,
}

impl TextToken {
    pub fn partial(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            last: false,
        }
    }

    pub fn last() -> Self {
        Self {
            token: String::new(),
            last: true,
        }
    }
}

/// 绕过模型、直接交给传输层的控制指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// 结束会话；handoffData 为 JSON 字符串，交给后续流程（如转人工）
    End {
        #[serde(rename = "handoffData", default, skip_serializing_if = "Option::is_none")]
        handoff_data: Option<String>,
    },
    SendDigits {
        digits: String,
    },
    Play {
        source: String,
        #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
        loop_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preemptible: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interruptible: Option<bool>,
    },
    Language {
        #[serde(rename = "ttsLanguage", default, skip_serializing_if = "Option::is_none")]
        tts_language: Option<String>,
        #[serde(
            rename = "transcriptionLanguage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        transcription_language: Option<String>,
    },
}

impl ControlMessage {
    /// 携带结构化交接数据的 end 指令
    pub fn end_with(handoff: &Value) -> Self {
        ControlMessage::End {
            handoff_data: Some(handoff.to_string()),
        }
    }

    /// 写回对话的简短说明，供模型在后续轮次了解已发生的动作
    pub fn describe(&self) -> String {
        match self {
            ControlMessage::End { handoff_data } => match handoff_data {
                Some(data) => format!("The call is being ended (handoff: {data})."),
                None => "The call is being ended.".to_string(),
            },
            ControlMessage::SendDigits { digits } => {
                format!("Touch-tone digits \"{digits}\" were sent on the call.")
            }
            ControlMessage::Play { source, .. } => format!("Audio {source} is playing to the caller."),
            ControlMessage::Language {
                tts_language,
                transcription_language,
            } => format!(
                "Call language switched (speech: {}, transcription: {}).",
                tts_language.as_deref().unwrap_or("unchanged"),
                transcription_language.as_deref().unwrap_or("unchanged")
            ),
        }
    }
}

/// 出站消息（两条通道）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Text(TextToken),
    Control(ControlMessage),
}

impl From<TextToken> for OutboundMessage {
    fn from(token: TextToken) -> Self {
        OutboundMessage::Text(token)
    }
}

impl From<ControlMessage> for OutboundMessage {
    fn from(msg: ControlMessage) -> Self {
        OutboundMessage::Control(msg)
    }
}
