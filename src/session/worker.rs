//! 会话工作任务
//!
//! 每个会话一个后台任务独占 ResponseGenerator，入站命令经 mpsc 排队依次执行，
//! 因此同一会话的 generate 不会重叠。新的 prompt 先打断正在进行的轮次再入队；
//! 排队期间已被更新的 prompt 取代的旧 prompt 只记录、不生成。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::RelayError;
use crate::generation::{InterruptSwitch, ResponseGenerator};
use crate::memory::{Message, Role};
use crate::session::SessionOutput;
use crate::tools::ToolSpec;

/// 排队给工作任务的命令
pub enum Command {
    Generate {
        role: Role,
        prompt: String,
        epoch: u64,
    },
    Insert {
        role: Role,
        content: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    /// 打断时来电者实际听到的回复
    Heard {
        text: String,
    },
    Reconfigure {
        instructions: String,
        tools: Vec<ToolSpec>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    History {
        reply: oneshot::Sender<Vec<Message>>,
    },
}

/// 会话句柄（可克隆），供 handler、静默监控回调与管理 API 使用
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::UnboundedSender<Command>,
    interrupt: InterruptSwitch,
    epoch: Arc<AtomicU64>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// 启动工作任务并返回句柄
    pub fn spawn(
        generator: ResponseGenerator,
        outputs: mpsc::UnboundedSender<SessionOutput>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            session_id: generator.session_id().to_string(),
            commands: tx,
            interrupt: generator.interrupt_handle(),
            epoch: Arc::new(AtomicU64::new(0)),
            closed: CancellationToken::new(),
        };
        tokio::spawn(run_worker(
            generator,
            rx,
            Arc::clone(&handle.epoch),
            handle.closed.clone(),
            outputs,
            handle.session_id.clone(),
        ));
        handle
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 来电者说话：打断进行中的轮次，新的 prompt 取代所有排队中的 prompt
    pub fn prompt(&self, text: impl Into<String>) -> Result<(), RelayError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.interrupt.interrupt();
        self.send(Command::Generate {
            role: Role::User,
            prompt: text.into(),
            epoch,
        })
    }

    /// 以 system 身份触发一轮生成（如静默提醒）；若之后来电者先开口则被跳过
    pub fn remind(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.send(Command::Generate {
            role: Role::System,
            prompt: text.into(),
            epoch: self.epoch.load(Ordering::SeqCst),
        })
    }

    /// 打断当前轮（立即生效，不排队）
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// 排队记录打断时听到的文本，不等待结果
    pub fn record_heard(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.send(Command::Heard { text: text.into() })
    }

    /// 通话因静默被结束：跳过排队中的提醒，之后的轮次不再播报
    pub fn terminate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.interrupt.halt();
    }

    pub async fn insert_message(&self, role: Role, content: impl Into<String>) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Insert {
            role,
            content: content.into(),
            reply,
        })?;
        rx.await.map_err(|_| RelayError::SessionClosed)?
    }

    /// 在当前轮结束后替换指令与工具目录
    pub async fn reconfigure(
        &self,
        instructions: impl Into<String>,
        tools: Vec<ToolSpec>,
    ) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconfigure {
            instructions: instructions.into(),
            tools,
            reply,
        })?;
        rx.await.map_err(|_| RelayError::SessionClosed)?
    }

    pub async fn history(&self) -> Result<Vec<Message>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { reply })?;
        rx.await.map_err(|_| RelayError::SessionClosed)
    }

    /// 停止工作任务；可重复调用
    pub fn shutdown(&self) {
        self.closed.cancel();
        self.interrupt.interrupt();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), RelayError> {
        if self.closed.is_cancelled() {
            return Err(RelayError::SessionClosed);
        }
        self.commands
            .send(command)
            .map_err(|_| RelayError::SessionClosed)
    }
}

async fn run_worker(
    mut generator: ResponseGenerator,
    mut rx: mpsc::UnboundedReceiver<Command>,
    epoch: Arc<AtomicU64>,
    closed: CancellationToken,
    outputs: mpsc::UnboundedSender<SessionOutput>,
    session_id: String,
) {
    tracing::debug!(session_id = %session_id, "Session worker started");
    loop {
        let command = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Generate {
                role,
                prompt,
                epoch: queued_at,
            } => {
                if queued_at < epoch.load(Ordering::SeqCst) {
                    if role == Role::User {
                        tracing::debug!(session_id = %session_id, "Prompt superseded while queued, recording only");
                        if let Err(e) = generator.insert_message(role, prompt) {
                            tracing::warn!(session_id = %session_id, error = %e, "Failed to record prompt");
                        }
                    } else {
                        tracing::debug!(session_id = %session_id, %role, "Skipping stale prompt");
                    }
                    continue;
                }
                match generator.generate(role, prompt).await {
                    Ok(outcome) => {
                        tracing::debug!(session_id = %session_id, ?outcome, "Generation finished")
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Generation failed");
                        let _ = outputs.send(SessionOutput::Failed {
                            error: e.to_string(),
                        });
                    }
                }
            }
            Command::Insert {
                role,
                content,
                reply,
            } => {
                let _ = reply.send(generator.insert_message(role, content));
            }
            Command::Heard { text } => {
                generator.record_heard(&text);
            }
            Command::Reconfigure {
                instructions,
                tools,
                reply,
            } => {
                let result = generator.reconfigure(instructions, &tools);
                if let Err(e) = &result {
                    tracing::warn!(session_id = %session_id, error = %e, "Reconfigure rejected");
                }
                let _ = reply.send(result);
            }
            Command::History { reply } => {
                let _ = reply.send(generator.conversation().messages().to_vec());
            }
        }
    }
    tracing::debug!(session_id = %session_id, "Session worker stopped");
}
