use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::metrics::GatewayMetrics;

use super::types::{EventHandler, HandlerEvent, HandlerId};

#[derive(Clone)]
struct RegistryEntry {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// 事件处理器注册中心
///
/// 全局处理器接收所有会话的事件，会话处理器只接收所属会话的事件。
/// 分发时先在读锁下复制处理器列表，调用期间不持有锁。
pub struct HandlerRegistry {
    global: RwLock<Vec<RegistryEntry>>,
    sessions: RwLock<HashMap<String, Vec<RegistryEntry>>>,
    timeout: Duration,
    metrics: Option<GatewayMetrics>,
}

impl HandlerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            global: RwLock::new(Vec::new()),
            sessions: RwLock::new(HashMap::new()),
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn register_global(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId::new();
        self.global.write().await.push(RegistryEntry { id, handler });
        id
    }

    pub async fn register(&self, session_id: &str, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId::new();
        let mut guard = self.sessions.write().await;
        guard
            .entry(session_id.to_string())
            .or_default()
            .push(RegistryEntry { id, handler });
        id
    }

    /// 注销会话处理器，返回是否存在
    pub async fn unregister(&self, session_id: &str, handler_id: &HandlerId) -> bool {
        let mut guard = self.sessions.write().await;
        let Some(entries) = guard.get_mut(session_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != *handler_id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            guard.remove(session_id);
        }
        removed
    }

    /// 移除会话的全部处理器
    pub async fn remove_session(&self, session_id: &str) -> usize {
        let mut guard = self.sessions.write().await;
        guard.remove(session_id).map(|entries| entries.len()).unwrap_or(0)
    }

    pub async fn handler_count(&self, session_id: &str) -> usize {
        let guard = self.sessions.read().await;
        guard.get(session_id).map(Vec::len).unwrap_or(0)
    }

    async fn plan(&self, session_id: &str) -> Vec<RegistryEntry> {
        let mut entries = self.global.read().await.clone();
        if let Some(scoped) = self.sessions.read().await.get(session_id) {
            entries.extend(scoped.iter().cloned());
        }
        entries
    }

    /// 依次调用处理器；失败与超时只记录告警，不影响后续处理器
    pub async fn dispatch(&self, session_id: &str, event: &HandlerEvent) {
        for entry in self.plan(session_id).await {
            let fut = event.deliver(entry.handler.as_ref(), session_id);
            match tokio::time::timeout(self.timeout, fut).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        handler = %entry.handler.name(),
                        handler_id = %entry.id,
                        event = event.kind(),
                        error = %err,
                        "event handler failed"
                    );
                    self.record_failure(entry.handler.name());
                }
                Err(_) => {
                    tracing::warn!(
                        session_id = %session_id,
                        handler = %entry.handler.name(),
                        handler_id = %entry.id,
                        event = event.kind(),
                        "event handler timeout ignored"
                    );
                    self.record_failure(entry.handler.name());
                }
            }
        }
    }

    fn record_failure(&self, handler: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .handler_failures_total
                .with_label_values(&[handler])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{GatewayError, Result};

    #[derive(Default)]
    struct Counting {
        connections: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle_connection(&self, _session_id: &str, _connected: bool) -> Result<()> {
            self.connections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle_connection(&self, session_id: &str, _connected: bool) -> Result<()> {
            Err(GatewayError::Delivery {
                target: session_id.to_string(),
                reason: "boom".into(),
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle_connection(&self, _session_id: &str, _connected: bool) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scoped_and_global_handlers() {
        let registry = HandlerRegistry::new(Duration::from_secs(1));
        let global = Arc::new(Counting::default());
        let scoped = Arc::new(Counting::default());
        registry.register_global(global.clone()).await;
        registry.register("s1", scoped.clone()).await;

        let event = HandlerEvent::Connection { connected: true };
        registry.dispatch("s1", &event).await;
        registry.dispatch("s2", &event).await;

        assert_eq!(global.connections.load(Ordering::SeqCst), 2);
        assert_eq!(scoped.connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = HandlerRegistry::new(Duration::from_secs(1));
        let id = registry.register("s1", Arc::new(Counting::default())).await;
        assert_eq!(registry.handler_count("s1").await, 1);

        assert!(!registry.unregister("s1", &HandlerId::new()).await);
        assert!(!registry.unregister("s2", &id).await);
        assert!(registry.unregister("s1", &id).await);
        assert_eq!(registry.handler_count("s1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_timeouts_do_not_stop_dispatch() {
        let registry = HandlerRegistry::new(Duration::from_millis(100));
        let counting = Arc::new(Counting::default());
        registry.register("s1", Arc::new(Failing)).await;
        registry.register("s1", Arc::new(Slow)).await;
        registry.register("s1", counting.clone()).await;

        registry
            .dispatch("s1", &HandlerEvent::Connection { connected: false })
            .await;
        assert_eq!(counting.connections.load(Ordering::SeqCst), 1);
    }
}
