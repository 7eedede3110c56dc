//! 打断开关
//!
//! 每轮 generate 开始时换上一个新的 CancellationToken；interrupt() 取消当前令牌。
//! 流式循环在每个事件边界和工具返回后检查令牌，读流时用 select! 与令牌竞争。
//! halt() 之后 reset 只会返回已取消的令牌，通话结束后不再有任何轮次播报。

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct SwitchState {
    current: CancellationToken,
    halted: bool,
}

/// 可克隆的打断开关；克隆体共享同一个当前令牌
#[derive(Debug, Clone, Default)]
pub struct InterruptSwitch {
    state: Arc<Mutex<SwitchState>>,
}

impl InterruptSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打断当前轮；重复调用无副作用
    pub fn interrupt(&self) {
        self.lock().current.cancel();
    }

    /// 打断当前轮并永久锁住开关
    pub fn halt(&self) {
        let mut state = self.lock();
        state.halted = true;
        state.current.cancel();
    }

    /// 换上新令牌并返回
    pub fn reset(&self) -> CancellationToken {
        let mut state = self.lock();
        let token = CancellationToken::new();
        if state.halted {
            token.cancel();
        }
        state.current = token.clone();
        token
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_is_idempotent_and_reset_recovers() {
        let switch = InterruptSwitch::new();
        let token = switch.reset();
        let handle = switch.clone();

        handle.interrupt();
        handle.interrupt();
        assert!(token.is_cancelled());

        let fresh = switch.reset();
        assert!(!fresh.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_halt_outlives_reset() {
        let switch = InterruptSwitch::new();
        let token = switch.reset();
        switch.clone().halt();
        assert!(token.is_cancelled());
        assert!(switch.reset().is_cancelled());
        assert!(switch.reset().is_cancelled());
    }
}
