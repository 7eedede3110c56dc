//! 静默监控
//!
//! 状态机：idle -> armed -> warning(n) -> terminated。
//! 每个 poll_interval 检查一次距上次对话活动的时间：超过阈值且 n+1 < max 时提醒，
//! 否则终止（原因码 unresponsive）并永久停止计时。阈值 T、次数 N 时恰好提醒 N-1 次后终止。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 监控参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactivityConfig {
    pub reminder_after: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            reminder_after: Duration::from_secs(10),
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Armed,
    /// 已发出的提醒次数
    Warning(u32),
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Unresponsive,
}

impl TerminationReason {
    pub fn code(&self) -> &'static str {
        match self {
            TerminationReason::Unresponsive => "unresponsive",
        }
    }
}

/// 经回调发出的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceNotice {
    Reminder { attempt: u32 },
    Terminate { reason: TerminationReason },
}

pub type SilenceCallback = Arc<dyn Fn(SilenceNotice) + Send + Sync>;

/// 计时状态：上次活动时间、提醒计数、当前状态
#[derive(Debug, Clone)]
pub struct SilenceState {
    last_activity: Instant,
    retries: u32,
    state: MonitorState,
}

impl SilenceState {
    pub fn idle(now: Instant) -> Self {
        Self {
            last_activity: now,
            retries: 0,
            state: MonitorState::Idle,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        if self.state == MonitorState::Idle {
            self.last_activity = now;
            self.retries = 0;
            self.state = MonitorState::Armed;
        }
    }

    /// 对话活动：回到 armed，计时与计数清零
    pub fn touch(&mut self, now: Instant) {
        if matches!(self.state, MonitorState::Armed | MonitorState::Warning(_)) {
            self.last_activity = now;
            self.retries = 0;
            self.state = MonitorState::Armed;
        }
    }

    pub fn poll(&mut self, now: Instant, config: &InactivityConfig) -> Option<SilenceNotice> {
        if !matches!(self.state, MonitorState::Armed | MonitorState::Warning(_)) {
            return None;
        }
        if now.saturating_duration_since(self.last_activity) < config.reminder_after {
            return None;
        }
        if self.retries + 1 < config.max_retries {
            self.retries += 1;
            self.last_activity = now;
            self.state = MonitorState::Warning(self.retries);
            Some(SilenceNotice::Reminder {
                attempt: self.retries,
            })
        } else {
            self.state = MonitorState::Terminated;
            Some(SilenceNotice::Terminate {
                reason: TerminationReason::Unresponsive,
            })
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }
}

/// 每个会话一个；后台任务在 tokio 时钟上轮询
pub struct InactivityMonitor {
    config: InactivityConfig,
    state: Arc<Mutex<SilenceState>>,
    callback: SilenceCallback,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityMonitor {
    pub fn new(config: InactivityConfig, callback: SilenceCallback) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SilenceState::idle(Instant::now()))),
            callback,
            task: Mutex::new(None),
        }
    }

    /// 开始计时；重复调用无效果
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.is_some() {
            return;
        }
        lock(&self.state).arm(Instant::now());

        let state = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        let config = self.config;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let notice = lock(&state).poll(Instant::now(), &config);
                let Some(notice) = notice else { continue };
                tracing::debug!(?notice, "Silence threshold reached");
                callback(notice);
                if matches!(notice, SilenceNotice::Terminate { .. }) {
                    break;
                }
            }
        }));
    }

    /// 收到对话活动（prompt / interrupt / dtmf）
    pub fn touch(&self) {
        lock(&self.state).touch(Instant::now());
    }

    pub fn state(&self) -> MonitorState {
        lock(&self.state).state()
    }

    /// 停止计时；可重复调用
    pub fn cleanup(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        let mut state = lock(&self.state);
        if state.state() != MonitorState::Terminated {
            *state = SilenceState::idle(Instant::now());
        }
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
