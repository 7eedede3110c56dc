//! OpenAI 兼容流式客户端
//!
//! 通过 async_openai 的 byot 接口调用任意 OpenAI 兼容端点（可配置 base_url），请求体与流式 chunk
//! 均使用本地定义的类型，再由 ChunkDecoder 转换为统一的 StreamEvent。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmSection;
use crate::llm::{EventStream, GenerationRequest, LlmClient, LlmError, StreamEvent, ToolCallFragment};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
        }
    }

    pub fn from_config(section: &LlmSection) -> Self {
        let mut client = Self::new(
            section.base_url.as_deref(),
            &section.model,
            section.api_key.as_deref(),
        );
        client.temperature = section.temperature;
        client
    }

    fn build_body(&self, request: &GenerationRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "stream": true,
            "messages": to_wire_messages(request.instructions, request.messages),
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn stream(&self, request: GenerationRequest<'_>) -> Result<EventStream, LlmError> {
        let body = self.build_body(&request);
        let chunks = self
            .client
            .chat()
            .create_stream_byot(body)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let mut decoder = ChunkDecoder::default();
        let events = chunks.flat_map(move |chunk: Result<ChatChunk, OpenAIError>| {
            let decoded: Vec<Result<StreamEvent, LlmError>> = match chunk {
                Ok(chunk) => decoder.decode(chunk).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(LlmError::Stream(e.to_string()))],
            };
            stream::iter(decoded)
        });
        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 对话转为 chat.completions 的 messages；指令始终作为第一条 system
fn to_wire_messages(instructions: &str, messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if !instructions.is_empty() {
        wire.push(json!({"role": "system", "content": instructions}));
    }
    for m in messages {
        let value = match (&m.role, &m.tool_call) {
            (Role::Assistant, Some(call)) => json!({
                "role": "assistant",
                "content": if m.content.is_empty() { Value::Null } else { json!(m.content) },
                "tool_calls": [{
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                }],
            }),
            (Role::Tool, _) => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }),
            (role, _) => json!({"role": role.to_string(), "content": m.content}),
        };
        wire.push(value);
    }
    wire
}

/// chat.completion.chunk（只取用到的字段）
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// 流式 chunk 解码状态：记录当前打开的 tool_call index
///
/// 后端并行返回多个调用时，index 变化即视为上一个调用参数已完整，
/// 保证下游同一时刻只有一个打开的累加器。
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    open_index: Option<u32>,
}

impl ChunkDecoder {
    pub fn decode(&mut self, chunk: ChatChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(StreamEvent::Content(text));
                }
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                if let Some(open) = self.open_index {
                    if open != call.index {
                        events.push(StreamEvent::ToolCallComplete);
                    }
                }
                self.open_index = Some(call.index);
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                events.push(StreamEvent::ToolCallDelta(ToolCallFragment {
                    id: call.id,
                    name,
                    arguments,
                }));
            }
            match choice.finish_reason.as_deref() {
                None => {}
                Some("tool_calls") | Some("function_call") => {
                    if self.open_index.take().is_some() {
                        events.push(StreamEvent::ToolCallComplete);
                    }
                }
                Some(_) => {
                    if self.open_index.take().is_some() {
                        events.push(StreamEvent::ToolCallComplete);
                    }
                    events.push(StreamEvent::Done);
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ConversationState, ToolInvocation};
    use crate::tools::ToolSpec;

    fn chunk(value: Value) -> ChatChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_content_and_stop() {
        let mut decoder = ChunkDecoder::default();
        let events = decoder.decode(chunk(json!({
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}, "finish_reason": null}]
        })));
        assert_eq!(events, vec![StreamEvent::Content("Hel".into())]);

        let events = decoder.decode(chunk(json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })));
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn test_decode_tool_call_fragments() {
        let mut decoder = ChunkDecoder::default();
        let first = decoder.decode(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "type": "function", "function": {"name": "send_digits", "arguments": ""}}
            ]}}]
        })));
        let second = decoder.decode(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"digits\":"}}
            ]}}]
        })));
        let done = decoder.decode(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        })));

        assert_eq!(
            first,
            vec![StreamEvent::ToolCallDelta(ToolCallFragment {
                id: Some("call_a".into()),
                name: Some("send_digits".into()),
                arguments: String::new(),
            })]
        );
        assert_eq!(
            second,
            vec![StreamEvent::ToolCallDelta(ToolCallFragment {
                id: None,
                name: None,
                arguments: "{\"digits\":".into(),
            })]
        );
        assert_eq!(done, vec![StreamEvent::ToolCallComplete]);
    }

    #[test]
    fn test_index_change_closes_previous_call() {
        let mut decoder = ChunkDecoder::default();
        decoder.decode(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "a", "function": {"name": "x", "arguments": "{}"}}]}}]
        })));
        let events = decoder.decode(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{"index": 1, "id": "b", "function": {"name": "y", "arguments": "{}"}}]}}]
        })));
        assert_eq!(events[0], StreamEvent::ToolCallComplete);
        assert!(matches!(&events[1], StreamEvent::ToolCallDelta(f) if f.id.as_deref() == Some("b")));
    }

    #[test]
    fn test_wire_messages_carry_tool_exchange() {
        let mut state = ConversationState::new();
        state.push_turn(Role::User, "what time is it").unwrap();
        state.record_tool_exchange(
            ToolInvocation {
                id: "call_1".into(),
                name: "current_time".into(),
                arguments: "{}".into(),
            },
            String::new(),
            "{\"iso\":\"2024-01-01T00:00:00Z\"}".into(),
        );

        let wire = to_wire_messages("Be brief.", state.messages());
        assert_eq!(wire[0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(wire[1], json!({"role": "user", "content": "what time is it"}));
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "current_time");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_body_includes_tools_only_when_present() {
        let client = OpenAiClient::new(Some("http://localhost:1/v1"), "gpt-4o-mini", Some("sk-test"));
        let messages = vec![Message::user("hi")];
        let body = client.build_body(&GenerationRequest {
            instructions: "",
            messages: &messages,
            tools: &[],
        });
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());

        let tools = vec![ToolSpec::new("end_call", "Hang up", json!({"type": "object"}))];
        let body = client.build_body(&GenerationRequest {
            instructions: "",
            messages: &messages,
            tools: &tools,
        });
        assert_eq!(body["tools"][0]["function"]["name"], "end_call");
    }
}
