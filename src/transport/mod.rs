//! 传输层（feature `server`）：语音 WebSocket 端点与管理 HTTP API

pub mod api;
pub mod ws;

pub use api::{router, serve_admin};
pub use ws::serve_voice;
