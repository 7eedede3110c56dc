//! 会话协议处理
//!
//! 只接受一次 setup；之后的事件按类型路由：
//! - prompt / interrupt / dtmf 重置静默计时；info / error 不重置
//! - prompt 以 user 身份生成（会取代进行中的轮次），interrupt 立即打断
//! - 未知类型、格式错误、setup 之前的事件与重复 setup 只记录日志，不中断会话

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::core::RelayError;
use crate::generation::{GeneratorHooks, ResponseGenerator};
use crate::inactivity::{InactivityMonitor, MonitorState, SilenceCallback, SilenceNotice};
use crate::memory::{Message, Role};
use crate::protocol::{ControlMessage, InboundEvent, SetupInfo};
use crate::session::{RelayContext, SessionHandle, SessionOutput};
use crate::tools::ToolSpec;

struct ActiveSession {
    handle: SessionHandle,
    monitor: InactivityMonitor,
}

/// 单个连接的协议处理器
pub struct SessionHandler {
    ctx: Arc<RelayContext>,
    outputs: mpsc::UnboundedSender<SessionOutput>,
    active: Option<ActiveSession>,
}

impl SessionHandler {
    /// 创建处理器，返回其输出通道
    pub fn new(ctx: Arc<RelayContext>) -> (Self, mpsc::UnboundedReceiver<SessionOutput>) {
        let (outputs, rx) = mpsc::unbounded_channel();
        (
            Self {
                ctx,
                outputs,
                active: None,
            },
            rx,
        )
    }

    /// 处理一条原始 JSON；任何错误只记录日志
    pub async fn handle_raw(&mut self, raw: &str) {
        let result = match InboundEvent::parse(raw) {
            Ok(event) => self.handle(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(session_id = self.session_id().unwrap_or("-"), error = %e, "Ignoring inbound event");
        }
    }

    pub async fn handle(&mut self, event: InboundEvent) -> Result<(), RelayError> {
        if let InboundEvent::Setup(info) = event {
            return self.setup(info).await;
        }
        let active = self.active.as_ref().ok_or_else(|| {
            RelayError::Protocol(format!("{} event received before setup", event.kind()))
        })?;
        let session_id = active.handle.session_id();
        if event.is_qualifying() {
            active.monitor.touch();
        }

        match event {
            InboundEvent::Prompt { voice_text } => {
                if voice_text.trim().is_empty() {
                    tracing::debug!(session_id, "Empty prompt ignored");
                    return Ok(());
                }
                tracing::info!(session_id, chars = voice_text.chars().count(), "Caller prompt");
                active.handle.prompt(voice_text)?;
            }
            InboundEvent::Interrupt { partial_utterance } => {
                tracing::info!(session_id, heard = %partial_utterance, "Caller interrupted");
                active.handle.interrupt();
                if !partial_utterance.trim().is_empty() {
                    active.handle.record_heard(partial_utterance)?;
                }
            }
            InboundEvent::Dtmf { digit } => {
                tracing::info!(session_id, %digit, "DTMF received");
            }
            InboundEvent::Info { details } => {
                tracing::debug!(session_id, ?details, "Transport info");
            }
            InboundEvent::Error { description } => {
                tracing::warn!(session_id, %description, "Transport reported error");
            }
            // 已在上面处理
            InboundEvent::Setup(_) => {}
        }
        Ok(())
    }

    async fn setup(&mut self, info: SetupInfo) -> Result<(), RelayError> {
        if let Some(active) = &self.active {
            return Err(RelayError::Protocol(format!(
                "duplicate setup for session {}",
                active.handle.session_id()
            )));
        }
        let session_id = info
            .session_id
            .clone()
            .or_else(|| info.call_sid.clone())
            .unwrap_or_else(|| format!("session_{}", uuid::Uuid::new_v4()));

        let text_tx = self.outputs.clone();
        let control_tx = self.outputs.clone();
        let hooks = GeneratorHooks::new(
            Arc::new(move |token| {
                let _ = text_tx.send(SessionOutput::Message(token.into()));
            }),
            Arc::new(move |msg| {
                let _ = control_tx.send(SessionOutput::Message(msg.into()));
            }),
        );
        let mut generator = ResponseGenerator::new(
            Arc::clone(&self.ctx.llm),
            Arc::clone(&self.ctx.toolbox),
            &self.ctx.profile,
            hooks,
        )?
        .with_session_id(session_id.clone())
        .with_max_tool_rounds(self.ctx.settings.max_tool_rounds);
        generator.insert_message(Role::System, call_summary(&session_id, &info))?;

        let handle = SessionHandle::spawn(generator, self.outputs.clone());
        let monitor = InactivityMonitor::new(
            self.ctx.settings.inactivity,
            silence_callback(
                handle.clone(),
                self.outputs.clone(),
                self.ctx.settings.reminder_prompt.clone(),
            ),
        );
        monitor.start();
        self.ctx.directory.insert(handle.clone()).await;

        tracing::info!(
            session_id = %session_id,
            from = info.from.as_deref().unwrap_or("-"),
            to = info.to.as_deref().unwrap_or("-"),
            "Session started"
        );
        self.active = Some(ActiveSession { handle, monitor });
        Ok(())
    }

    /// 追加一条轮次（不生成）；tool 角色被拒绝
    pub async fn insert_message(&self, role: Role, content: impl Into<String>) -> Result<(), RelayError> {
        if role == Role::Tool {
            return Err(RelayError::Protocol(
                "tool turns cannot be inserted directly".to_string(),
            ));
        }
        self.active_handle()?.insert_message(role, content).await
    }

    /// 替换指令与工具目录；失败时旧配置保持生效
    pub async fn reconfigure(
        &self,
        instructions: impl Into<String>,
        tools: Vec<ToolSpec>,
    ) -> Result<(), RelayError> {
        self.active_handle()?.reconfigure(instructions, tools).await
    }

    pub async fn history(&self) -> Result<Vec<Message>, RelayError> {
        self.active_handle()?.history().await
    }

    /// 停止监控与工作任务并从目录移除；可重复调用
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.monitor.cleanup();
        active.handle.shutdown();
        self.ctx.directory.remove(active.handle.session_id()).await;
        tracing::info!(session_id = %active.handle.session_id(), "Session closed");
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.handle.session_id())
    }

    pub fn inactivity_state(&self) -> Option<MonitorState> {
        self.active.as_ref().map(|a| a.monitor.state())
    }

    fn active_handle(&self) -> Result<&SessionHandle, RelayError> {
        self.active
            .as_ref()
            .map(|a| &a.handle)
            .ok_or_else(|| RelayError::Protocol("no active session".to_string()))
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.monitor.cleanup();
            active.handle.shutdown();
        }
    }
}

/// 写在对话开头的通话元数据
fn call_summary(session_id: &str, info: &SetupInfo) -> String {
    let metadata = json!({
        "sessionId": session_id,
        "callSid": info.call_sid,
        "from": info.from,
        "to": info.to,
        "direction": info.direction,
        "customParameters": info.custom_parameters,
        "startedAt": chrono::Utc::now().to_rfc3339(),
    });
    format!("Call metadata: {metadata}")
}

fn silence_callback(
    handle: SessionHandle,
    outputs: mpsc::UnboundedSender<SessionOutput>,
    reminder_prompt: String,
) -> SilenceCallback {
    Arc::new(move |notice| match notice {
        SilenceNotice::Reminder { attempt } => {
            tracing::info!(session_id = %handle.session_id(), attempt, "Caller silent, sending reminder");
            if let Err(e) = handle.remind(reminder_prompt.clone()) {
                tracing::warn!(session_id = %handle.session_id(), error = %e, "Reminder not delivered");
            }
        }
        SilenceNotice::Terminate { reason } => {
            tracing::warn!(session_id = %handle.session_id(), reason = reason.code(), "Ending unresponsive call");
            handle.terminate();
            let end = ControlMessage::end_with(&json!({
                "reasonCode": reason.code(),
                "reason": "No response from caller",
                "sessionId": handle.session_id(),
            }));
            let _ = outputs.send(SessionOutput::Message(end.into()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantProfile;
    use crate::inactivity::InactivityConfig;
    use crate::llm::{LlmError, Script, ScriptedLlmClient};
    use crate::protocol::{OutboundMessage, TextToken};
    use crate::session::SessionSettings;
    use crate::tools::ToolBox;
    use std::time::Duration;

    fn context(llm: Arc<ScriptedLlmClient>) -> Arc<RelayContext> {
        let toolbox = Arc::new(ToolBox::with_builtin_tools());
        let profile = AssistantProfile::fallback(&toolbox);
        let settings = SessionSettings {
            inactivity: InactivityConfig {
                reminder_after: Duration::from_secs(5),
                max_retries: 3,
                poll_interval: Duration::from_secs(1),
            },
            ..SessionSettings::default()
        };
        Arc::new(RelayContext::new(llm, toolbox, profile, settings))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionOutput>) -> Vec<SessionOutput> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    const SETUP: &str = r#"{"type":"setup","sessionId":"VX100","callSid":"CA100","from":"+15550001","to":"+15550002","direction":"inbound","customParameters":{"tier":"gold"}}"#;

    #[tokio::test]
    async fn test_events_before_setup_are_rejected() {
        let (mut handler, mut rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        let err = handler
            .handle(InboundEvent::Prompt { voice_text: "hello".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
        handler.handle_raw(r#"{"type":"dtmf","digit":"1"}"#).await;
        assert!(drain(&mut rx).is_empty());
        assert!(handler.session_id().is_none());
    }

    #[tokio::test]
    async fn test_setup_seeds_conversation_and_registers_session() {
        let ctx = context(ScriptedLlmClient::new([]));
        let (mut handler, _rx) = SessionHandler::new(ctx.clone());
        handler.handle_raw(SETUP).await;

        assert_eq!(handler.session_id(), Some("VX100"));
        assert!(ctx.directory.get("VX100").await.is_some());
        let history = handler.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert!(history[0].content.contains("CA100"));
        assert!(history[0].content.contains("gold"));

        let err = handler.handle(InboundEvent::parse(SETUP).unwrap()).await.unwrap_err();
        assert!(matches!(err, RelayError::Protocol(msg) if msg.contains("duplicate")));
        assert_eq!(handler.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_id_falls_back_to_call_sid() {
        let (mut handler, _rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        handler.handle_raw(r#"{"type":"setup","callSid":"CA9"}"#).await;
        assert_eq!(handler.session_id(), Some("CA9"));

        let (mut handler, _rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        handler.handle_raw(r#"{"type":"setup"}"#).await;
        assert!(handler.session_id().unwrap().starts_with("session_"));
    }

    #[tokio::test]
    async fn test_prompt_streams_reply() {
        let llm = ScriptedLlmClient::new([Script::new().content("Hi, ").content("how can I help?").done()]);
        let (mut handler, mut rx) = SessionHandler::new(context(llm));
        handler.handle_raw(SETUP).await;
        handler.handle_raw(r#"{"type":"prompt","voiceText":"hello"}"#).await;

        let history = handler.history().await.unwrap();
        assert_eq!(history.last().unwrap().content, "Hi, how can I help?");
        let out = drain(&mut rx);
        assert_eq!(
            out,
            vec![
                SessionOutput::Message(TextToken::partial("Hi, ").into()),
                SessionOutput::Message(TextToken::partial("how can I help?").into()),
                SessionOutput::Message(TextToken::last().into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupt_records_partial_utterance() {
        let (mut handler, _rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        handler.handle_raw(SETUP).await;
        handler
            .handle_raw(r#"{"type":"interrupt","partialUtterance":"Your order ships"}"#)
            .await;
        handler.handle_raw(r#"{"type":"interrupt","partialUtterance":""}"#).await;

        let history = handler.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Your order ships");
    }

    #[tokio::test]
    async fn test_interrupt_after_completed_turn_trims_reply() {
        let llm = ScriptedLlmClient::new([Script::new().content("Your order ships tomorrow by noon.").done()]);
        let (mut handler, _rx) = SessionHandler::new(context(llm));
        handler.handle_raw(SETUP).await;
        handler
            .handle_raw(r#"{"type":"prompt","voiceText":"when will it arrive?"}"#)
            .await;
        handler.history().await.unwrap();
        handler
            .handle_raw(r#"{"type":"interrupt","partialUtterance":"Your order ships"}"#)
            .await;

        let history = handler.history().await.unwrap();
        let replies: Vec<_> = history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(replies, vec!["Your order ships"]);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_as_output() {
        let llm = ScriptedLlmClient::new([Script::failing(LlmError::Request("connection refused".into()))]);
        let (mut handler, mut rx) = SessionHandler::new(context(llm));
        handler.handle_raw(SETUP).await;
        handler.handle_raw(r#"{"type":"prompt","voiceText":"hello"}"#).await;
        handler.history().await.unwrap();

        let out = drain(&mut rx);
        assert!(matches!(&out[..], [SessionOutput::Failed { error }] if error.contains("connection refused")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_does_not_reset_silence_but_prompt_does() {
        let (mut handler, _rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        handler.handle_raw(SETUP).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        handler.handle_raw(r#"{"type":"info","name":"heartbeat"}"#).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.inactivity_state(), Some(MonitorState::Warning(1)));

        handler.handle_raw(r#"{"type":"dtmf","digit":"5"}"#).await;
        assert_eq!(handler.inactivity_state(), Some(MonitorState::Armed));
        tokio::time::sleep(Duration::from_secs(4)).await;
        handler.handle_raw(r#"{"type":"prompt","voiceText":"still here"}"#).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.inactivity_state(), Some(MonitorState::Armed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_caller_gets_reminders_then_end() {
        let (mut handler, mut rx) = SessionHandler::new(context(ScriptedLlmClient::new([])));
        handler.handle_raw(SETUP).await;

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(handler.inactivity_state(), Some(MonitorState::Terminated));

        let history = handler.history().await.unwrap();
        let reminders = history
            .iter()
            .filter(|m| m.role == Role::System && m.content.contains("silent"))
            .count();
        assert_eq!(reminders, 2);

        let ends: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|o| match o {
                SessionOutput::Message(OutboundMessage::Control(ControlMessage::End { handoff_data })) => handoff_data,
                _ => None,
            })
            .collect();
        assert_eq!(ends.len(), 1);
        assert!(ends[0].contains("\"reasonCode\":\"unresponsive\""));
    }

    #[tokio::test]
    async fn test_out_of_band_operations_and_close() {
        let ctx = context(ScriptedLlmClient::new([]));
        let (mut handler, _rx) = SessionHandler::new(ctx.clone());
        assert!(handler.insert_message(Role::System, "early").await.is_err());
        handler.handle_raw(SETUP).await;

        handler.insert_message(Role::System, "Account verified").await.unwrap();
        assert!(handler.insert_message(Role::Tool, "{}").await.is_err());
        assert!(handler.reconfigure("x", vec![ToolSpec::named("nope")]).await.is_err());
        handler
            .reconfigure("Spanish only.", vec![ToolSpec::named("switch_language")])
            .await
            .unwrap();
        assert_eq!(handler.history().await.unwrap().len(), 2);

        handler.close().await;
        handler.close().await;
        assert!(ctx.directory.get("VX100").await.is_none());
        assert!(handler.history().await.is_err());
        assert_eq!(handler.inactivity_state(), None);
    }
}
