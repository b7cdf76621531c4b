use async_trait::async_trait;

use crate::error::Result;

use super::Session;

/// 会话元数据存储
///
/// 连接状态只通过这里落盘；同一会话的写入由该会话的连接句柄串行发出。
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_by_id(&self, session_id: &str) -> Result<Option<Session>>;
    async fn update(&self, session: &Session) -> Result<()>;
    async fn create(&self, session: Session) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Session>>;
}
