//! 会话注册表
//!
//! [`SessionManager`] 持有 `session_id -> ConnectionHandle` 的映射。映射锁只保护成员关系：
//! 查找后克隆句柄并立即释放锁，之后再调用句柄上可能耗时的操作。

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use prometheus::Registry;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::connection::{
    CodeRenderer, ConnectionHandle, DataUrlRenderer, HandleContext, HandleState, MessagePayload,
    PairingCode, PairingPhase, StatsSnapshot,
};
use crate::domain::{ChatPresence, ConnectionStatus, Presence, ProxyConfig, Session, SessionStore};
use crate::error::{GatewayError, Result};
use crate::hooks::{EventHandler, HandlerId, HandlerRegistry};
use crate::metrics::GatewayMetrics;
use crate::protocol::{ProtocolClientFactory, SendReceipt};
use crate::utils::{parse_recipient, validate_message_id, validate_proxy, validate_session_id};

/// 会话概览
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub status: ConnectionStatus,
    pub connected: bool,
    pub logged_in: bool,
    pub pairing: PairingPhase,
    pub has_qr_code: bool,
    pub device_id: Option<String>,
    pub last_error: Option<String>,
    pub stats: StatsSnapshot,
}

/// 健康检查汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub connected: usize,
    pub logged_in: usize,
}

pub struct SessionManagerBuilder {
    factory: Arc<dyn ProtocolClientFactory>,
    store: Arc<dyn SessionStore>,
    config: ManagerConfig,
    registry: Option<Registry>,
    renderer: Arc<dyn CodeRenderer>,
    span: Option<tracing::Span>,
}

impl SessionManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// 指标注册表，不设置时使用私有注册表
    pub fn metrics_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn CodeRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        let registry = self.registry.unwrap_or_default();
        let metrics = GatewayMetrics::new(&registry).map_err(|err| {
            GatewayError::Configuration(format!("failed to register metrics: {err}"))
        })?;
        let handlers = Arc::new(
            HandlerRegistry::new(self.config.handler_timeout()).with_metrics(metrics.clone()),
        );

        Ok(SessionManager {
            handles: RwLock::new(HashMap::new()),
            factory: self.factory,
            store: self.store,
            handlers,
            renderer: self.renderer,
            config: self.config,
            metrics,
            span: self
                .span
                .unwrap_or_else(|| crate::tracing::component_span("session_manager")),
        })
    }
}

/// 会话连接生命周期管理器
pub struct SessionManager {
    handles: RwLock<HashMap<String, ConnectionHandle>>,
    factory: Arc<dyn ProtocolClientFactory>,
    store: Arc<dyn SessionStore>,
    handlers: Arc<HandlerRegistry>,
    renderer: Arc<dyn CodeRenderer>,
    config: ManagerConfig,
    metrics: GatewayMetrics,
    span: tracing::Span,
}

impl SessionManager {
    pub fn builder(
        factory: Arc<dyn ProtocolClientFactory>,
        store: Arc<dyn SessionStore>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            factory,
            store,
            config: ManagerConfig::default(),
            registry: None,
            renderer: Arc::new(DataUrlRenderer),
            span: None,
        }
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    async fn get_handle(&self, session_id: &str) -> Option<ConnectionHandle> {
        self.handles.read().await.get(session_id).cloned()
    }

    async fn require_handle(&self, session_id: &str) -> Result<ConnectionHandle> {
        self.get_handle(session_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        match tokio::time::timeout(self.config.store_timeout(), self.store.get_by_id(session_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Store(format!(
                "loading session {session_id} timed out"
            ))),
        }
    }

    fn update_gauges(&self, total: usize) {
        self.metrics.sessions_total.set(total as i64);
    }

    /// 创建会话句柄
    ///
    /// 已有持久化记录时以记录中的设备身份重建客户端。两个并发创建者中只有一个会成功，
    /// 另一个得到 `AlreadyExists`。
    pub async fn create_session(&self, session_id: &str, proxy: Option<ProxyConfig>) -> Result<()> {
        validate_session_id(session_id)?;
        if let Some(proxy) = &proxy {
            validate_proxy(proxy)?;
        }
        if self.handles.read().await.contains_key(session_id) {
            return Err(GatewayError::AlreadyExists(session_id.to_string()));
        }

        let stored = self.load_session(session_id).await?;
        let device_id = stored.as_ref().and_then(|s| s.device_id.clone());
        let client = self
            .factory
            .create(session_id, device_id.as_deref())
            .await
            .map_err(|err| GatewayError::connection(session_id, "create_client", err))?;

        let handle = ConnectionHandle::spawn(HandleContext {
            session_id: session_id.to_string(),
            client,
            store: Arc::clone(&self.store),
            handlers: Arc::clone(&self.handlers),
            renderer: Arc::clone(&self.renderer),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            span: crate::tracing::session_span(&self.span, session_id),
            stored,
        });

        if let Some(proxy) = proxy {
            if let Err(err) = handle.set_proxy(Some(proxy)).await {
                let _ = handle.shutdown().await;
                return Err(err);
            }
        }

        let mut guard = self.handles.write().await;
        if guard.contains_key(session_id) {
            drop(guard);
            debug!(
                parent: &self.span,
                session_id = %session_id,
                "lost creation race, discarding handle"
            );
            let _ = handle.shutdown().await;
            return Err(GatewayError::AlreadyExists(session_id.to_string()));
        }
        guard.insert(session_id.to_string(), handle);
        let total = guard.len();
        drop(guard);

        self.update_gauges(total);
        info!(
            parent: &self.span,
            session_id = %session_id,
            paired = device_id.is_some(),
            "session handle created"
        );
        Ok(())
    }

    /// 连接会话；内存中没有句柄时从存储重建
    pub async fn connect_session(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let handle = match self.get_handle(session_id).await {
            Some(handle) => handle,
            None => {
                if self.load_session(session_id).await?.is_none() {
                    return Err(GatewayError::NotFound(session_id.to_string()));
                }
                match self.create_session(session_id, None).await {
                    Ok(()) | Err(GatewayError::AlreadyExists(_)) => {}
                    Err(err) => return Err(err),
                }
                self.require_handle(session_id).await?
            }
        };
        handle.connect().await
    }

    pub async fn disconnect_session(&self, session_id: &str) -> Result<()> {
        self.require_handle(session_id).await?.disconnect().await
    }

    /// 登出会话；无论客户端登出是否成功，句柄都会从注册表移除
    pub async fn logout_session(&self, session_id: &str) -> Result<()> {
        let handle = self.require_handle(session_id).await?;
        let result = handle.logout().await;

        self.detach(&handle).await;
        if let Err(err) = handle.shutdown().await {
            warn!(
                parent: &self.span,
                session_id = %session_id,
                error = %err,
                "failed to stop session actor"
            );
        }

        match &result {
            Ok(()) => info!(
                parent: &self.span,
                session_id = %session_id,
                "session logged out and removed"
            ),
            Err(err) => warn!(
                parent: &self.span,
                session_id = %session_id,
                error = %err,
                "session removed after failed logout"
            ),
        }
        result
    }

    /// 移除会话：已登录时先登出，停止 actor 并清理处理器
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let handle = self.require_handle(session_id).await?;
        let result = if handle.is_logged_in() {
            handle.logout().await
        } else {
            Ok(())
        };

        self.detach(&handle).await;
        let stopped = handle.shutdown().await;
        let removed = self.handlers.remove_session(session_id).await;
        info!(
            parent: &self.span,
            session_id = %session_id,
            handlers = removed,
            "session removed"
        );
        result.and(stopped)
    }

    /// 从映射中移除指定句柄（仅当映射中仍是同一个句柄）
    async fn detach(&self, handle: &ConnectionHandle) {
        let mut guard = self.handles.write().await;
        if guard
            .get(handle.session_id())
            .is_some_and(|current| current.same_as(handle))
        {
            guard.remove(handle.session_id());
        }
        let total = guard.len();
        drop(guard);
        self.update_gauges(total);
    }

    pub async fn get_qr_code(&self, session_id: &str) -> Result<PairingCode> {
        self.require_handle(session_id).await?.qr_code()
    }

    /// 设置代理，下次连接生效
    pub async fn set_proxy(&self, session_id: &str, proxy: ProxyConfig) -> Result<()> {
        validate_proxy(&proxy)?;
        self.require_handle(session_id)
            .await?
            .set_proxy(Some(proxy))
            .await
    }

    pub async fn clear_proxy(&self, session_id: &str) -> Result<()> {
        self.require_handle(session_id).await?.set_proxy(None).await
    }

    pub async fn get_proxy(&self, session_id: &str) -> Result<Option<ProxyConfig>> {
        Ok(self.require_handle(session_id).await?.snapshot().proxy)
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        to: &str,
        payload: MessagePayload,
    ) -> Result<SendReceipt> {
        let handle = self.require_handle(session_id).await?;
        let to = parse_recipient(to)?;
        if let MessagePayload::Text { body } = &payload {
            if body.trim().is_empty() {
                return Err(GatewayError::validation("body", "cannot be empty"));
            }
        }
        handle.send_message(&to, payload).await
    }

    pub async fn send_text(&self, session_id: &str, to: &str, body: &str) -> Result<SendReceipt> {
        self.send_message(
            session_id,
            to,
            MessagePayload::Text {
                body: body.to_string(),
            },
        )
        .await
    }

    /// 发送表情回应；`emoji` 为空表示撤回回应
    pub async fn send_reaction(
        &self,
        session_id: &str,
        to: &str,
        message_id: &str,
        emoji: &str,
        target_sender: Option<&str>,
    ) -> Result<SendReceipt> {
        let handle = self.require_handle(session_id).await?;
        let to = parse_recipient(to)?;
        validate_message_id(message_id)?;
        let target_sender = target_sender.map(parse_recipient).transpose()?;
        handle
            .send_reaction(&to, message_id, target_sender, emoji)
            .await
    }

    pub async fn send_presence(&self, session_id: &str, presence: Presence) -> Result<()> {
        self.require_handle(session_id)
            .await?
            .send_presence(presence)
            .await
    }

    pub async fn send_chat_presence(
        &self,
        session_id: &str,
        to: &str,
        state: ChatPresence,
    ) -> Result<()> {
        let handle = self.require_handle(session_id).await?;
        let to = parse_recipient(to)?;
        handle.send_chat_presence(&to, state).await
    }

    pub async fn edit_message(
        &self,
        session_id: &str,
        to: &str,
        message_id: &str,
        body: &str,
    ) -> Result<SendReceipt> {
        let handle = self.require_handle(session_id).await?;
        let to = parse_recipient(to)?;
        validate_message_id(message_id)?;
        if body.trim().is_empty() {
            return Err(GatewayError::validation("body", "cannot be empty"));
        }
        handle.edit_message(&to, message_id, body).await
    }

    pub async fn delete_message(
        &self,
        session_id: &str,
        to: &str,
        message_id: &str,
    ) -> Result<SendReceipt> {
        let handle = self.require_handle(session_id).await?;
        let to = parse_recipient(to)?;
        validate_message_id(message_id)?;
        handle.delete_message(&to, message_id).await
    }

    /// 注册会话处理器；会话需在注册表或存储中存在
    pub async fn register_event_handler(
        &self,
        session_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId> {
        validate_session_id(session_id)?;
        if self.get_handle(session_id).await.is_none()
            && self.load_session(session_id).await?.is_none()
        {
            return Err(GatewayError::NotFound(session_id.to_string()));
        }
        let id = self.handlers.register(session_id, handler).await;
        debug!(
            parent: &self.span,
            session_id = %session_id,
            handler_id = %id,
            "event handler registered"
        );
        Ok(id)
    }

    pub async fn unregister_event_handler(
        &self,
        session_id: &str,
        handler_id: &HandlerId,
    ) -> Result<()> {
        if self.handlers.unregister(session_id, handler_id).await {
            debug!(
                parent: &self.span,
                session_id = %session_id,
                handler_id = %handler_id,
                "event handler unregistered"
            );
            Ok(())
        } else {
            Err(GatewayError::HandlerNotFound {
                session_id: session_id.to_string(),
                handler_id: handler_id.to_string(),
            })
        }
    }

    /// 注册接收所有会话事件的处理器
    pub async fn register_global_handler(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.handlers.register_global(handler).await
    }

    pub async fn is_connected(&self, session_id: &str) -> bool {
        self.get_handle(session_id)
            .await
            .is_some_and(|handle| handle.is_connected())
    }

    pub async fn is_logged_in(&self, session_id: &str) -> bool {
        self.get_handle(session_id)
            .await
            .is_some_and(|handle| handle.is_logged_in())
    }

    /// 内存中没有句柄但存储中有记录时视为 Disconnected
    pub async fn get_status(&self, session_id: &str) -> Result<ConnectionStatus> {
        if let Some(handle) = self.get_handle(session_id).await {
            return Ok(handle.status());
        }
        match self.load_session(session_id).await? {
            Some(_) => Ok(ConnectionStatus::Disconnected),
            None => Err(GatewayError::NotFound(session_id.to_string())),
        }
    }

    pub async fn get_session_stats(&self, session_id: &str) -> Result<StatsSnapshot> {
        Ok(self.require_handle(session_id).await?.stats())
    }

    pub async fn subscribe_state(&self, session_id: &str) -> Result<watch::Receiver<HandleState>> {
        Ok(self.require_handle(session_id).await?.subscribe())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<ConnectionHandle> = self.handles.read().await.values().cloned().collect();
        let mut sessions: Vec<SessionInfo> = handles
            .iter()
            .map(|handle| {
                let state = handle.snapshot();
                SessionInfo {
                    session_id: handle.session_id().to_string(),
                    status: state.status,
                    connected: handle.is_connected(),
                    logged_in: handle.is_logged_in(),
                    pairing: state.pairing,
                    has_qr_code: state.qr.is_some(),
                    device_id: state.device_id,
                    last_error: state.last_error,
                    stats: handle.stats(),
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub async fn health(&self) -> HealthSummary {
        let handles: Vec<ConnectionHandle> = self.handles.read().await.values().cloned().collect();
        HealthSummary {
            total: handles.len(),
            connected: handles
                .iter()
                .filter(|handle| handle.status() == ConnectionStatus::Connected)
                .count(),
            logged_in: handles.iter().filter(|handle| handle.is_logged_in()).count(),
        }
    }

    /// 启动时恢复会话：只连接已配对且上次处于连接状态的会话
    pub async fn restore_sessions(&self) -> Result<usize> {
        let stored = tokio::time::timeout(self.config.store_timeout(), self.store.list())
            .await
            .map_err(|_| GatewayError::Store("listing sessions timed out".to_string()))??;

        let mut restored = 0;
        for session in stored
            .into_iter()
            .filter(|session| session.is_paired() && session.connected)
        {
            match self.connect_session(&session.session_id).await {
                Ok(()) => restored += 1,
                Err(err) => warn!(
                    parent: &self.span,
                    session_id = %session.session_id,
                    error = %err,
                    "failed to restore session"
                ),
            }
        }
        info!(parent: &self.span, restored, "sessions restored");
        Ok(restored)
    }

    /// 停止所有会话 actor 并断开传输；持久化的连接标记保持不变以便下次恢复
    pub async fn shutdown(&self) {
        let handles: Vec<ConnectionHandle> = {
            let mut guard = self.handles.write().await;
            guard.drain().map(|(_, handle)| handle).collect()
        };
        let count = handles.len();

        let results = join_all(handles.iter().map(|handle| handle.shutdown())).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    parent: &self.span,
                    session_id = %handle.session_id(),
                    error = %err,
                    "failed to stop session"
                );
            }
        }
        self.update_gauges(0);
        info!(parent: &self.span, sessions = count, "session manager stopped");
    }
}
