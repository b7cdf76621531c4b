use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::registry::HandlerRegistry;
use super::types::HandlerEvent;

/// 会话的处理器通知器
///
/// 连接句柄只做非阻塞的入队，实际调用在独立任务上按顺序执行，
/// 慢处理器不会阻塞事件路由。所有发送端释放后任务自然退出。
#[derive(Clone)]
pub struct HandlerDispatcher {
    session_id: Arc<str>,
    tx: mpsc::UnboundedSender<HandlerEvent>,
}

impl HandlerDispatcher {
    pub fn spawn(
        session_id: &str,
        registry: Arc<HandlerRegistry>,
        span: tracing::Span,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HandlerEvent>();
        let session: Arc<str> = Arc::from(session_id);
        let task_session = Arc::clone(&session);

        let handle = tokio::spawn(
            async move {
                while let Some(event) = rx.recv().await {
                    registry.dispatch(&task_session, &event).await;
                }
                tracing::debug!("handler dispatcher stopped");
            }
            .instrument(span),
        );

        (
            Self {
                session_id: session,
                tx,
            },
            handle,
        )
    }

    pub fn notify(&self, event: HandlerEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(
                session_id = %self.session_id,
                "handler dispatcher closed, event dropped"
            );
        }
    }
}
