//! 会话连接句柄
//!
//! 每个会话一个 actor 任务（见 `actor`），独占状态、配对子状态、取消令牌和
//! 协议客户端的生命周期操作。[`ConnectionHandle`] 是它的可克隆邮箱：
//! - 生命周期操作（connect / disconnect / logout / set_proxy）经有界命令队列串行执行
//! - 只读视图从 `watch` 通道读取，不排在慢命令之后
//! - 消息发送直接调用协议客户端，客户端自身支持并发

mod actor;
mod pairing;
mod router;
mod stats;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ManagerConfig;
use crate::domain::{
    ChatPresence, ConnectionStatus, Jid, Presence, ProxyConfig, Session, SessionStore,
};
use crate::error::{GatewayError, Result};
use crate::hooks::{HandlerDispatcher, HandlerRegistry};
use crate::metrics::GatewayMetrics;
use crate::protocol::{MediaKind, OutgoingMessage, ProtocolClient, SendReceipt};

use actor::SessionActor;

pub use pairing::{CodeRenderer, DataUrlRenderer, PairingPhase};
pub use stats::{SessionStats, StatsSnapshot};

/// 当前待扫描的配对码
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingCode {
    pub code: String,
    /// 渲染后的图像（默认 data URL）
    pub image: String,
    pub expires_at: DateTime<Utc>,
}

/// actor 发布的只读状态快照
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HandleState {
    pub status: ConnectionStatus,
    pub pairing: PairingPhase,
    pub qr: Option<PairingCode>,
    pub device_id: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl HandleState {
    pub fn pairing_active(&self) -> bool {
        self.pairing.is_active()
    }
}

/// 待发送的消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text {
        body: String,
    },
    /// 媒体消息，发送前先上传
    Media {
        kind: MediaKind,
        data: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
        file_name: Option<String>,
    },
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Logout {
        reply: oneshot::Sender<Result<()>>,
    },
    SetProxy {
        proxy: Option<ProxyConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// 构造连接句柄所需的依赖
pub(crate) struct HandleContext {
    pub session_id: String,
    pub client: Arc<dyn ProtocolClient>,
    pub store: Arc<dyn SessionStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub renderer: Arc<dyn CodeRenderer>,
    pub config: ManagerConfig,
    pub metrics: GatewayMetrics,
    pub span: tracing::Span,
    /// 持久化记录（如有），用于恢复代理与设备身份
    pub stored: Option<Session>,
}

struct HandleInner {
    session_id: String,
    client: Arc<dyn ProtocolClient>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<HandleState>,
    stats: Arc<SessionStats>,
    metrics: GatewayMetrics,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    span: tracing::Span,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// 启动会话 actor 与处理器通知任务，并订阅协议客户端事件
    pub(crate) fn spawn(ctx: HandleContext) -> Self {
        let stats = Arc::new(SessionStats::new());
        let (commands_tx, commands_rx) = mpsc::channel(ctx.config.command_buffer.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let callback_stats = Arc::clone(&stats);
        let callback_metrics = ctx.metrics.clone();
        let callback_id = ctx.client.add_event_handler(Box::new(move |event| {
            if matches!(event, crate::domain::ProtocolEvent::Message(_)) {
                callback_stats.record_received();
                callback_metrics.messages_received_total.inc();
            }
            // actor 退出后事件直接丢弃
            let _ = events_tx.send(event);
        }));

        if let Some(proxy) = ctx.stored.as_ref().and_then(|s| s.proxy.as_ref()) {
            if let Err(err) = ctx.client.set_proxy(Some(proxy)) {
                tracing::warn!(
                    parent: &ctx.span,
                    error = %err,
                    "failed to apply stored proxy"
                );
            }
        }

        let initial = HandleState {
            device_id: ctx.client.device_id(),
            proxy: ctx.stored.as_ref().and_then(|s| s.proxy.clone()),
            last_error: ctx.stored.as_ref().and_then(|s| s.last_error.clone()),
            updated_at: Some(Utc::now()),
            ..HandleState::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);

        let (notifier, notifier_task) =
            HandlerDispatcher::spawn(&ctx.session_id, Arc::clone(&ctx.handlers), ctx.span.clone());

        let span = ctx.span.clone();
        let actor = SessionActor::new(
            ctx.session_id.clone(),
            Arc::clone(&ctx.client),
            ctx.store,
            notifier,
            ctx.renderer,
            ctx.config,
            ctx.metrics.clone(),
            state_tx,
            commands_rx,
            events_rx,
            callback_id,
        );
        let actor_task = tokio::spawn(actor.run().instrument(span.clone()));

        Self {
            inner: Arc::new(HandleInner {
                session_id: ctx.session_id,
                client: ctx.client,
                commands: commands_tx,
                state: state_rx,
                stats,
                metrics: ctx.metrics,
                tasks: Mutex::new(Some((actor_task, notifier_task))),
                span,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.inner.client
    }

    pub(crate) fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .await
            .map_err(|_| GatewayError::ActorUnavailable(self.inner.session_id.clone()))?;
        rx.await
            .map_err(|_| GatewayError::ActorUnavailable(self.inner.session_id.clone()))?
    }

    /// 启动（或重启）连接；返回时尝试已开始，结果通过状态观察
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    pub async fn set_proxy(&self, proxy: Option<ProxyConfig>) -> Result<()> {
        self.request(|reply| Command::SetProxy { proxy, reply }).await
    }

    /// 停止 actor 并等待其退出；重复调用是安全的
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(GatewayError::ActorUnavailable(_)) => {}
            Err(err) => return Err(err),
        }

        let tasks = self.inner.tasks.lock().await.take();
        if let Some((actor_task, notifier_task)) = tasks {
            if let Err(err) = actor_task.await {
                tracing::error!(
                    parent: &self.inner.span,
                    error = %err,
                    "session actor ended abnormally"
                );
            }
            if let Err(err) = notifier_task.await {
                tracing::error!(
                    parent: &self.inner.span,
                    error = %err,
                    "handler dispatcher ended abnormally"
                );
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> HandleState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HandleState> {
        self.inner.state.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.client.is_logged_in()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// 读取待扫描的配对码
    pub fn qr_code(&self) -> Result<PairingCode> {
        if self.inner.client.is_logged_in() {
            return Err(GatewayError::AlreadyLoggedIn(self.inner.session_id.clone()));
        }
        let state = self.inner.state.borrow();
        match (&state.qr, state.status) {
            (Some(qr), ConnectionStatus::Connecting) if qr.expires_at > Utc::now() => {
                Ok(qr.clone())
            }
            _ => Err(GatewayError::NoCodeAvailable(self.inner.session_id.clone())),
        }
    }

    fn ensure_logged_in(&self) -> Result<()> {
        if self.inner.client.is_logged_in() {
            Ok(())
        } else {
            Err(GatewayError::NotLoggedIn(self.inner.session_id.clone()))
        }
    }

    async fn deliver(
        &self,
        operation: &'static str,
        to: &Jid,
        message: OutgoingMessage,
    ) -> Result<SendReceipt> {
        match self.inner.client.send_message(to, message).await {
            Ok(receipt) => {
                self.inner.stats.record_sent();
                self.inner.metrics.messages_sent_total.inc();
                tracing::debug!(
                    parent: &self.inner.span,
                    operation,
                    to = %to,
                    message_id = %receipt.id,
                    "message sent"
                );
                Ok(receipt)
            }
            Err(err) => Err(self.send_failed(operation, err)),
        }
    }

    fn send_failed(
        &self,
        operation: &'static str,
        err: crate::protocol::ClientError,
    ) -> GatewayError {
        self.inner
            .metrics
            .send_failures_total
            .with_label_values(&[operation])
            .inc();
        tracing::warn!(
            parent: &self.inner.span,
            operation,
            error = %err,
            "outbound operation failed"
        );
        GatewayError::connection(&self.inner.session_id, operation, err)
    }

    pub async fn send_message(&self, to: &Jid, payload: MessagePayload) -> Result<SendReceipt> {
        self.ensure_logged_in()?;
        let message = match payload {
            MessagePayload::Text { body } => OutgoingMessage::Text { body },
            MessagePayload::Media {
                kind,
                data,
                mime_type,
                caption,
                file_name,
            } => {
                let upload = self
                    .inner
                    .client
                    .upload(data, kind)
                    .await
                    .map_err(|err| self.send_failed("upload", err))?;
                OutgoingMessage::Media {
                    kind,
                    upload,
                    mime_type,
                    caption,
                    file_name,
                }
            }
        };
        self.deliver("send_message", to, message).await
    }

    pub async fn send_reaction(
        &self,
        to: &Jid,
        target_id: &str,
        target_sender: Option<Jid>,
        emoji: &str,
    ) -> Result<SendReceipt> {
        self.ensure_logged_in()?;
        let message = OutgoingMessage::Reaction {
            target_id: target_id.to_string(),
            target_sender,
            emoji: emoji.to_string(),
        };
        self.deliver("send_reaction", to, message).await
    }

    pub async fn edit_message(&self, to: &Jid, target_id: &str, body: &str) -> Result<SendReceipt> {
        self.ensure_logged_in()?;
        let message = OutgoingMessage::Edit {
            target_id: target_id.to_string(),
            body: body.to_string(),
        };
        self.deliver("edit_message", to, message).await
    }

    pub async fn delete_message(&self, to: &Jid, target_id: &str) -> Result<SendReceipt> {
        self.ensure_logged_in()?;
        let message = OutgoingMessage::Revoke {
            target_id: target_id.to_string(),
        };
        self.deliver("delete_message", to, message).await
    }

    pub async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.ensure_logged_in()?;
        self.inner
            .client
            .send_presence(presence)
            .await
            .map_err(|err| self.send_failed("send_presence", err))?;
        self.inner.stats.touch();
        Ok(())
    }

    pub async fn send_chat_presence(&self, to: &Jid, state: ChatPresence) -> Result<()> {
        self.ensure_logged_in()?;
        self.inner
            .client
            .send_chat_presence(to, state)
            .await
            .map_err(|err| self.send_failed("send_chat_presence", err))?;
        self.inner.stats.touch();
        Ok(())
    }
}
