use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Session, SessionStore};
use crate::error::{GatewayError, Result};

#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有记录初始化
    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let map = sessions
            .into_iter()
            .map(|session| (session.session_id.clone(), session))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let guard = self.inner.read().await;
        Ok(guard.get(session_id).cloned())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&session.session_id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(GatewayError::NotFound(session.session_id.clone())),
        }
    }

    async fn create(&self, session: Session) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&session.session_id) {
            return Err(GatewayError::AlreadyExists(session.session_id));
        }
        guard.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let guard = self.inner.read().await;
        let mut sessions: Vec<Session> = guard.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_update_delete() {
        let store = InMemorySessionStore::new();
        store.create(Session::new("s1", "Support")).await.unwrap();
        assert!(matches!(
            store.create(Session::new("s1", "Dup")).await,
            Err(GatewayError::AlreadyExists(_))
        ));

        let mut session = store.get_by_id("s1").await.unwrap().unwrap();
        session.connected = true;
        session.assign_device("628123@s.whatsapp.net");
        store.update(&session).await.unwrap();

        let stored = store.get_by_id("s1").await.unwrap().unwrap();
        assert!(stored.connected);
        assert!(stored.is_paired());

        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.get_by_id("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let result = store.update(&Session::new("ghost", "")).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
