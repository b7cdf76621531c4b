//! 协议事件路由
//!
//! 对 [`ProtocolEvent`] 做穷尽匹配：连接类事件驱动状态机，配对类事件交给配对控制器，
//! 消息事件归一化后交给处理器，其余事件只记录日志。

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::{ConnectionStatus, Jid, NormalizedMessage, ProtocolEvent};
use crate::hooks::HandlerEvent;

use super::actor::SessionActor;
use super::pairing::PairingPhase;

impl SessionActor {
    pub(super) async fn route(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Connected => {
                // 只有进行中的连接尝试能进入 Connected，迟到的事件不能恢复已断开的会话
                let status = self.state.borrow().status;
                if status != ConnectionStatus::Connecting || !self.attempt_running() {
                    debug!(status = %status, "stale connected event ignored");
                } else if !self.client.is_connected() || !self.client.is_logged_in() {
                    debug!("transport connected, waiting for pairing");
                } else {
                    info!("connected to messaging network");
                    self.transition(ConnectionStatus::Connected).await;
                }
            }
            ProtocolEvent::Disconnected => {
                let status = self.state.borrow().status;
                if status == ConnectionStatus::Connected {
                    warn!("connection lost");
                    self.transition(ConnectionStatus::Disconnected).await;
                } else {
                    debug!(status = %status, "transport disconnected");
                }
            }
            ProtocolEvent::LoggedOut { on_connect, reason } => {
                warn!(on_connect, reason = %reason, "logged out by messaging network");
                self.stop_attempt().await;
                self.state
                    .send_modify(|state| state.last_error = Some(format!("logged out: {reason}")));
                self.transition(ConnectionStatus::Disconnected).await;
            }
            ProtocolEvent::StreamReplaced => {
                warn!("stream replaced by another connection");
                self.state
                    .send_modify(|state| state.last_error = Some("stream replaced".to_string()));
                self.transition(ConnectionStatus::Disconnected).await;
            }
            ProtocolEvent::PairingCode { code } => {
                let active = self.state.borrow().pairing.is_active();
                if active {
                    self.apply_pairing_code(code).await;
                } else {
                    debug!("pairing code ignored, no pairing in progress");
                }
            }
            ProtocolEvent::PairSuccess {
                device_id,
                platform,
            } => {
                info!(device_id = %device_id, platform = ?platform, "device paired");
                self.state
                    .send_modify(|state| state.device_id = Some(device_id.clone()));
                self.persist("pair_success", move |session| {
                    session.assign_device(device_id)
                })
                .await;
            }
            ProtocolEvent::PairError { device_id, reason } => {
                warn!(device_id = ?device_id, reason = %reason, "pairing error reported");
                let active = self.state.borrow().pairing.is_active();
                if active {
                    self.stop_attempt().await;
                    self.end_pairing(PairingPhase::Failed, Some(reason)).await;
                }
            }
            ProtocolEvent::Message(message) => {
                self.persist_last_seen().await;
                let own_account = self.client.device_id().and_then(|id| Jid::parse(&id).ok());
                let normalized = NormalizedMessage::from_incoming(&message, own_account.as_ref());
                debug!(
                    message_id = %normalized.id,
                    sender = %normalized.sender,
                    message_type = %normalized.message_type,
                    "message received"
                );
                self.notifier.notify(HandlerEvent::Message(normalized));
            }
            ProtocolEvent::Receipt(receipt) => {
                debug!(
                    kind = ?receipt.kind,
                    chat = %receipt.chat,
                    count = receipt.message_ids.len(),
                    "receipt received"
                );
            }
            ProtocolEvent::Presence {
                from,
                unavailable,
                last_seen,
            } => {
                debug!(from = %from, unavailable, last_seen = ?last_seen, "presence update");
            }
            ProtocolEvent::ChatPresence {
                chat,
                sender,
                state,
            } => {
                debug!(chat = %chat, sender = %sender, state = ?state, "chat presence update");
            }
            ProtocolEvent::ContactUpdate { jid } => {
                debug!(jid = %jid, "contact updated");
            }
            ProtocolEvent::GroupInfo { jid } => {
                debug!(jid = %jid, "group info changed");
            }
            ProtocolEvent::PictureUpdate { jid, removed } => {
                debug!(jid = %jid, removed, "picture changed");
            }
            ProtocolEvent::HistorySync { conversations } => {
                info!(conversations, "history sync received");
            }
            ProtocolEvent::KeepAliveTimeout { error_count } => {
                warn!(error_count, "keepalive timeout");
            }
            ProtocolEvent::KeepAliveRestored => {
                info!("keepalive restored");
            }
            ProtocolEvent::Unhandled { kind } => {
                debug!(event_kind = %kind, "unhandled protocol event");
            }
        }
    }

    /// 按间隔节流写入最后在线时间
    async fn persist_last_seen(&mut self) {
        let due = self
            .last_seen_persisted
            .map(|at| at.elapsed() >= self.config.last_seen_interval())
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_seen_persisted = Some(Instant::now());
        let now = Utc::now();
        self.persist("last_seen", move |session| session.last_seen_at = Some(now))
            .await;
    }
}
