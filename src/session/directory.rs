//! 会话目录：session_id -> SessionHandle
//!
//! setup 时插入、close 时移除；管理 API 通过它把带外请求关联到在线会话。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::SessionHandle;

#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入会话；同 id 的旧会话被替换并返回
    pub async fn insert(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let id = handle.session_id().to_string();
        let previous = self.sessions.write().await.insert(id.clone(), handle);
        tracing::info!(session_id = %id, replaced = previous.is_some(), "Session registered");
        previous
    }

    /// 查找在线会话；已关闭的句柄视为不存在
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::info!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// 清理已关闭但未移除的会话
    pub async fn evict_closed(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, h| !h.is_closed());
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantProfile;
    use crate::generation::{GeneratorHooks, ResponseGenerator};
    use crate::llm::ScriptedLlmClient;
    use crate::tools::ToolBox;
    use tokio::sync::mpsc;

    fn handle(id: &str) -> SessionHandle {
        let toolbox = Arc::new(ToolBox::with_builtin_tools());
        let profile = AssistantProfile::fallback(&toolbox);
        let generator = ResponseGenerator::new(
            ScriptedLlmClient::new([]),
            toolbox,
            &profile,
            GeneratorHooks::silent(),
        )
        .unwrap()
        .with_session_id(id);
        let (tx, _rx) = mpsc::unbounded_channel();
        SessionHandle::spawn(generator, tx)
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let directory = SessionDirectory::new();
        assert!(directory.insert(handle("b")).await.is_none());
        assert!(directory.insert(handle("a")).await.is_none());
        assert_eq!(directory.len().await, 2);

        assert!(directory.get("a").await.is_some());
        assert!(directory.remove("a").await.is_some());
        assert!(directory.get("a").await.is_none());
        assert!(directory.remove("a").await.is_none());
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_closed_sessions_are_hidden_and_evicted() {
        let directory = SessionDirectory::new();
        let h = handle("c");
        directory.insert(h.clone()).await;
        h.shutdown();

        assert!(directory.get("c").await.is_none());
        assert_eq!(directory.evict_closed().await, 1);
        assert!(directory.is_empty().await);
    }
}
