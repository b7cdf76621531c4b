//! 应用启动器 - 负责依赖注入和会话恢复
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;
use tracing::{info, warn};

use crate::config::{GatewayConfig, StoreKind};
use crate::domain::SessionStore;
use crate::hooks::adapters::WebhookEventHandler;
use crate::infrastructure::session_store::{InMemorySessionStore, PostgresSessionStore};
use crate::manager::SessionManager;
use crate::protocol::ProtocolClientFactory;

/// 应用上下文 - 包含所有已初始化的组件
pub struct ApplicationContext {
    pub manager: Arc<SessionManager>,
    pub metrics_registry: Registry,
}

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 构建应用上下文并恢复上次处于连接状态的会话
    pub async fn run(
        config: &GatewayConfig,
        factory: Arc<dyn ProtocolClientFactory>,
    ) -> Result<ApplicationContext> {
        let context = Self::create_context(config, factory).await?;
        let restored = context
            .manager
            .restore_sessions()
            .await
            .context("failed to restore sessions")?;
        info!(restored, "✅ Session gateway started");
        Ok(context)
    }

    /// 创建应用上下文
    pub async fn create_context(
        config: &GatewayConfig,
        factory: Arc<dyn ProtocolClientFactory>,
    ) -> Result<ApplicationContext> {
        let store = Self::build_store(config).await?;
        let metrics_registry = Registry::new();

        let manager = SessionManager::builder(factory, store)
            .config(config.manager.clone())
            .metrics_registry(metrics_registry.clone())
            .build()
            .context("failed to build session manager")?;

        if let Some(webhook) = &config.webhook {
            let handler = WebhookEventHandler::new(webhook).context("failed to build webhook")?;
            let endpoint = handler.endpoint().to_string();
            manager.register_global_handler(Arc::new(handler)).await;
            info!(endpoint = %endpoint, "webhook handler registered");
        }

        Ok(ApplicationContext {
            manager: Arc::new(manager),
            metrics_registry,
        })
    }

    /// 构建会话存储
    async fn build_store(config: &GatewayConfig) -> Result<Arc<dyn SessionStore>> {
        match config.store.kind {
            StoreKind::Memory => {
                warn!("using in-memory session store, sessions will not survive restart");
                Ok(Arc::new(InMemorySessionStore::new()))
            }
            StoreKind::Postgres => {
                let url = config
                    .store
                    .postgres_url
                    .as_deref()
                    .context("store.postgres_url is required for the postgres store")?;
                let store = PostgresSessionStore::connect(url, config.store.max_connections)
                    .await
                    .context("failed to connect session store")?;
                Ok(Arc::new(store))
            }
        }
    }

    /// 停止所有会话
    pub async fn shutdown(context: &ApplicationContext) {
        context.manager.shutdown().await;
        info!("✅ Session gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::domain::Session;
    use crate::testutil::MockFactory;

    #[tokio::test]
    async fn test_create_context_with_memory_store() {
        let config = GatewayConfig {
            webhook: Some(WebhookConfig {
                url: "http://127.0.0.1:9/hooks".into(),
                secret: Some("s3cret".into()),
                timeout_ms: 1_000,
                headers: Default::default(),
            }),
            ..GatewayConfig::default()
        };

        let context = ApplicationBootstrap::run(&config, MockFactory::new())
            .await
            .unwrap();
        assert_eq!(context.manager.health().await.total, 0);

        context.manager.create_session("s1", None).await.unwrap();
        let names: Vec<String> = context
            .metrics_registry
            .gather()
            .iter()
            .map(|family| family.name().to_string())
            .collect();
        assert!(names.iter().any(|name| name == "flare_link_sessions_total"));

        ApplicationBootstrap::shutdown(&context).await;
        assert_eq!(context.manager.health().await.total, 0);
    }

    #[tokio::test]
    async fn test_postgres_store_requires_url() {
        let mut config = GatewayConfig::default();
        config.store.kind = StoreKind::Postgres;
        let err = ApplicationBootstrap::create_context(&config, MockFactory::new())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("postgres_url"));
    }

    #[tokio::test]
    async fn test_store_row_is_reachable_through_manager() {
        let config = GatewayConfig::default();
        let context = ApplicationBootstrap::create_context(&config, MockFactory::new())
            .await
            .unwrap();
        context
            .manager
            .store()
            .create(Session::new("s1", "Sales"))
            .await
            .unwrap();
        assert_eq!(
            context.manager.get_status("s1").await.unwrap(),
            crate::domain::ConnectionStatus::Disconnected
        );
    }
}
