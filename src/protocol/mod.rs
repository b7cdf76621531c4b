//! 协议客户端契约
//!
//! 消息网络的线协议（加密握手、多设备同步、二进制帧）由外部库实现，
//! 网关核心只通过 [`ProtocolClient`] 使用它。每个会话持有独立的客户端实例。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{ChatPresence, Jid, Presence, ProtocolEvent, ProxyConfig};

/// 事件回调，在客户端自己的投递线程上同步调用
pub type EventCallback = Box<dyn Fn(ProtocolEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("request timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// 配对码流中的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingItem {
    /// 新配对码及其在客户端侧的有效期
    Code { code: String, timeout: Duration },
    Success,
    Timeout,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }
}

/// 媒体上传结果，发送媒体消息时引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHandle {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        upload: UploadHandle,
        mime_type: String,
        caption: Option<String>,
        file_name: Option<String>,
    },
    Reaction {
        target_id: String,
        target_sender: Option<Jid>,
        emoji: String,
    },
    Edit {
        target_id: String,
        body: String,
    },
    Revoke {
        target_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self) -> Result<(), ClientError>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn is_logged_in(&self) -> bool;
    /// 已配对设备的身份，未配对时为 `None`
    fn device_id(&self) -> Option<String>;
    /// 必须在 `connect` 之前调用
    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingItem>, ClientError>;
    async fn logout(&self) -> Result<(), ClientError>;
    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadHandle, ClientError>;
    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, ClientError>;
    async fn send_presence(&self, presence: Presence) -> Result<(), ClientError>;
    async fn send_chat_presence(&self, to: &Jid, state: ChatPresence) -> Result<(), ClientError>;
    fn add_event_handler(&self, callback: EventCallback) -> u32;
    fn remove_event_handler(&self, handler_id: u32) -> bool;
    fn set_proxy(&self, proxy: Option<&ProxyConfig>) -> Result<(), ClientError>;
}

/// 为会话分配客户端：有设备身份时从外部设备存储重建，否则创建待配对的新设备
#[async_trait]
pub trait ProtocolClientFactory: Send + Sync {
    async fn create(
        &self,
        session_id: &str,
        device_id: Option<&str>,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError>;
}
