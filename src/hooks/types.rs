use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::NormalizedMessage;
use crate::error::Result;

/// 事件处理器 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for HandlerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 外部事件处理器
///
/// 由 webhook、CRM 同步等外部消费者实现，所有方法默认什么都不做。
/// 调用发生在会话的通知任务上，单次调用受 `handler_timeout` 限制，
/// 返回的错误只会被记录。
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle_message(&self, _session_id: &str, _message: &NormalizedMessage) -> Result<()> {
        Ok(())
    }

    async fn handle_connection(&self, _session_id: &str, _connected: bool) -> Result<()> {
        Ok(())
    }

    async fn handle_pairing_code(&self, _session_id: &str, _code: &str) -> Result<()> {
        Ok(())
    }

    async fn handle_pair_success(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

/// 交给处理器的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HandlerEvent {
    Message(NormalizedMessage),
    Connection { connected: bool },
    PairingCode { code: String },
    PairSuccess,
}

impl HandlerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerEvent::Message(_) => "message",
            HandlerEvent::Connection { .. } => "connection",
            HandlerEvent::PairingCode { .. } => "pairing_code",
            HandlerEvent::PairSuccess => "pair_success",
        }
    }

    /// 调用处理器对应的方法
    pub(crate) async fn deliver(&self, handler: &dyn EventHandler, session_id: &str) -> Result<()> {
        match self {
            HandlerEvent::Message(message) => handler.handle_message(session_id, message).await,
            HandlerEvent::Connection { connected } => {
                handler.handle_connection(session_id, *connected).await
            }
            HandlerEvent::PairingCode { code } => {
                handler.handle_pairing_code(session_id, code).await
            }
            HandlerEvent::PairSuccess => handler.handle_pair_success(session_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_id_round_trip() {
        let id = HandlerId::new();
        let parsed: HandlerId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<HandlerId>().is_err());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(HandlerEvent::Connection { connected: true }).unwrap();
        assert_eq!(json["event"], "connection");
        assert_eq!(json["connected"], true);
    }
}
