//! WebSocket 传输端测试（需要 feature `server`）

#![cfg(feature = "server")]

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use voxrelay::config::AssistantProfile;
use voxrelay::llm::{Script, ScriptedLlmClient};
use voxrelay::session::{RelayContext, SessionSettings};
use voxrelay::tools::ToolBox;
use voxrelay::transport::serve_voice;

#[tokio::test]
async fn test_websocket_call_flow() {
    let llm = ScriptedLlmClient::new([Script::new()
        .content("Goodbye!")
        .tool_call("call_end", "end_call", &[r#"{"reason":"caller done"}"#])
        .done()]);
    let toolbox = Arc::new(ToolBox::with_builtin_tools());
    let profile = AssistantProfile::fallback(&toolbox);
    let ctx = Arc::new(RelayContext::new(llm, toolbox, profile, SessionSettings::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve_voice(listener, ctx.clone(), shutdown.clone()));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws.send(WsMessage::Text(r#"{"type":"setup","sessionId":"WS1"}"#.into()))
        .await
        .unwrap();
    ws.send(WsMessage::Text(r#"{"type":"bogus"}"#.into())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type":"prompt","voiceText":"that's all"}"#.into()))
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
        let frame: Value = serde_json::from_str(&text).unwrap();
        let last = frame["last"] == true;
        frames.push(frame);
        if last {
            break;
        }
    }

    assert_eq!(frames[0], serde_json::json!({"type": "text", "token": "Goodbye!", "last": false}));
    assert_eq!(frames[1]["type"], "end");
    assert!(frames[1]["handoffData"].as_str().unwrap().contains("end-call"));
    assert_eq!(frames.last().unwrap()["last"], true);
    assert!(ctx.directory.get("WS1").await.is_some());

    ws.close(None).await.unwrap();
    shutdown.cancel();
}
