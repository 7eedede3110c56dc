//! voxrelay - 语音中继服务
//!
//! 入口：初始化日志、加载配置与助手档案，启动语音 WebSocket 端点与管理 API，
//! 收到 Ctrl+C / SIGTERM 后优雅关闭。
//!
//! 运行方式：
//! ```bash
//! cargo run --features server -- [config.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use voxrelay::config::{load_config, load_profile, AssistantProfile};
use voxrelay::core::{ShutdownManager, ShutdownReason};
use voxrelay::llm::{LlmClient, OpenAiClient};
use voxrelay::session::{RelayContext, SessionSettings};
use voxrelay::tools::{ToolBox, ToolRegistry};
use voxrelay::transport::{serve_admin, serve_voice};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voxrelay::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let toolbox = Arc::new(ToolBox::with_builtin_tools());
    let profile = match load_profile(&cfg.assistant.profile_dir) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!("{}; using built-in assistant profile", e);
            AssistantProfile::fallback(&toolbox)
        }
    };
    // 目录中的工具必须都有实现，启动时就检查
    ToolRegistry::from_catalog(&profile.tools, &toolbox).context("Invalid tool catalog")?;

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_config(&cfg.llm));
    tracing::info!(model = %cfg.llm.model, tools = profile.tools.len(), "Backend configured");

    let ctx = Arc::new(RelayContext::new(
        llm,
        toolbox,
        profile,
        SessionSettings::from_config(&cfg),
    ));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let voice_listener = TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind_addr))?;
    let admin_listener = TcpListener::bind(&cfg.server.admin_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.admin_addr))?;

    let voice = tokio::spawn(serve_voice(voice_listener, Arc::clone(&ctx), shutdown.token()));
    let admin_shutdown = Arc::clone(&shutdown);
    let admin_ctx = Arc::clone(&ctx);
    let admin = tokio::spawn(async move {
        if let Err(e) = serve_admin(admin_listener, admin_ctx, admin_shutdown.token()).await {
            tracing::error!("Admin API failed: {}", e);
            admin_shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
        }
    });

    tracing::info!("Press Ctrl+C to stop");
    shutdown.wait_for_shutdown().await;

    tracing::info!("Shutting down...");
    let _ = voice.await;
    let _ = admin.await;
    let evicted = ctx.directory.evict_closed().await;
    tracing::info!(evicted, "Stopped");
    Ok(())
}
