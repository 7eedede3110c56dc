//! 语音传输 WebSocket 端点
//!
//! 每个连接一个 SessionHandler：入站文本帧交给 handle_raw，SessionOutput 序列化后经写任务发回。
//! 后端错误只记录日志，通话保持。

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::session::{RelayContext, SessionHandler, SessionOutput};

/// 接受连接直到 shutdown 被取消
pub async fn serve_voice(listener: TcpListener, ctx: Arc<RelayContext>, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Voice transport listening on ws://{}", addr);
    }
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let ctx = Arc::clone(&ctx);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, ctx, shutdown).await {
                            tracing::error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => tracing::error!("Accept error: {}", e),
            },
        }
    }
    tracing::info!("Voice transport stopped");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<RelayContext>,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (mut handler, mut outputs) = SessionHandler::new(ctx);

    tracing::info!("New voice connection from {}", addr);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    tokio::spawn(async move {
        while let Some(output) = outputs.recv().await {
            match output {
                SessionOutput::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Serialize error: {}", e),
                },
                SessionOutput::Failed { error } => {
                    tracing::warn!("Backend failure on {}: {}", addr, error);
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let Some(frame) = frame else { break };
        match frame {
            Ok(WsMessage::Text(text)) => handler.handle_raw(&text).await,
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => handler.handle_raw(text).await,
                Err(_) => tracing::debug!("Ignoring non UTF-8 binary frame"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    handler.close().await;
    tracing::info!("Voice connection from {} closed", addr);
    Ok(())
}
