//! 管理 API（带外操作）
//!
//! - `GET /health`
//! - `POST /sessions/:id/messages` `{role, content}`
//! - `POST /sessions/:id/reconfigure` `{instructions, tools}`
//! - `GET /sessions/:id/history`

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::RelayError;
use crate::memory::{Message, Role};
use crate::session::{RelayContext, SessionHandle};
use crate::tools::ToolSpec;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Debug, Deserialize)]
struct InsertMessageRequest {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReconfigureRequest {
    instructions: String,
    #[serde(default)]
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Serialize)]
struct Ack {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<Message>,
}

pub fn router(ctx: Arc<RelayContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/:id/messages", post(insert_message))
        .route("/sessions/:id/reconfigure", post(reconfigure))
        .route("/sessions/:id/history", get(history))
        .with_state(ctx)
}

pub async fn serve_admin(
    listener: TcpListener,
    ctx: Arc<RelayContext>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Admin API: http://{}", addr);
    }
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health(State(ctx): State<Arc<RelayContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: ctx.directory.len().await,
    })
}

async fn insert_message(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    Json(req): Json<InsertMessageRequest>,
) -> ApiResult<Ack> {
    if req.role == Role::Tool {
        return Err((StatusCode::BAD_REQUEST, "role \"tool\" cannot be inserted".to_string()));
    }
    let handle = lookup(&ctx, &id).await?;
    handle
        .insert_message(req.role, req.content)
        .await
        .map_err(error_response)?;
    Ok(Json(Ack { ok: true }))
}

async fn reconfigure(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    Json(req): Json<ReconfigureRequest>,
) -> ApiResult<Ack> {
    let handle = lookup(&ctx, &id).await?;
    handle
        .reconfigure(req.instructions, req.tools)
        .await
        .map_err(error_response)?;
    Ok(Json(Ack { ok: true }))
}

async fn history(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
) -> ApiResult<HistoryResponse> {
    let handle = lookup(&ctx, &id).await?;
    let messages = handle.history().await.map_err(error_response)?;
    Ok(Json(HistoryResponse {
        session_id: id,
        messages,
    }))
}

async fn lookup(ctx: &RelayContext, id: &str) -> Result<SessionHandle, (StatusCode, String)> {
    ctx.directory
        .get(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("session {id} not found")))
}

fn error_response(e: RelayError) -> (StatusCode, String) {
    let status = match e {
        RelayError::SessionClosed => StatusCode::NOT_FOUND,
        RelayError::Reconfigure(_) | RelayError::Protocol(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantProfile;
    use crate::generation::{GeneratorHooks, ResponseGenerator};
    use crate::llm::ScriptedLlmClient;
    use crate::session::SessionSettings;
    use crate::tools::ToolBox;
    use tokio::sync::mpsc;

    async fn context_with_session(id: &str) -> Arc<RelayContext> {
        let toolbox = Arc::new(ToolBox::with_builtin_tools());
        let profile = AssistantProfile::fallback(&toolbox);
        let llm = ScriptedLlmClient::new([]);
        let ctx = Arc::new(RelayContext::new(
            llm.clone(),
            toolbox.clone(),
            profile.clone(),
            SessionSettings::default(),
        ));
        let generator = ResponseGenerator::new(llm, toolbox, &profile, GeneratorHooks::silent())
            .unwrap()
            .with_session_id(id);
        let (tx, _rx) = mpsc::unbounded_channel();
        ctx.directory.insert(SessionHandle::spawn(generator, tx)).await;
        ctx
    }

    #[tokio::test]
    async fn test_health_counts_sessions() {
        let ctx = context_with_session("s1").await;
        let Json(body) = health(State(ctx)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.sessions, 1);
    }

    #[tokio::test]
    async fn test_insert_and_history() {
        let ctx = context_with_session("s1").await;
        insert_message(
            State(ctx.clone()),
            Path("s1".to_string()),
            Json(InsertMessageRequest {
                role: Role::System,
                content: "Caller is a premium member".into(),
            }),
        )
        .await
        .unwrap();

        let Json(body) = history(State(ctx.clone()), Path("s1".to_string())).await.unwrap();
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].content, "Caller is a premium member");

        let err = insert_message(
            State(ctx),
            Path("s1".to_string()),
            Json(InsertMessageRequest {
                role: Role::Tool,
                content: "{}".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_reconfigure() {
        let ctx = context_with_session("s1").await;
        let err = history(State(ctx.clone()), Path("nope".to_string())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let err = reconfigure(
            State(ctx.clone()),
            Path("s1".to_string()),
            Json(ReconfigureRequest {
                instructions: "Be terse.".into(),
                tools: vec![ToolSpec::named("send_sms")],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        reconfigure(
            State(ctx),
            Path("s1".to_string()),
            Json(ReconfigureRequest {
                instructions: "Be terse.".into(),
                tools: vec![],
            }),
        )
        .await
        .unwrap();
    }
}
