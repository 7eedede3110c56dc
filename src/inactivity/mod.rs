//! 静默监控：按对话活动重置的计时器，超时先提醒、最终挂断

pub mod monitor;

pub use monitor::{
    InactivityConfig, InactivityMonitor, MonitorState, SilenceCallback, SilenceNotice,
    SilenceState, TerminationReason,
};
