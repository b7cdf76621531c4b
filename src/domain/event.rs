//! 协议事件模型
//!
//! 协议客户端投递的所有事件都归一到封闭枚举 [`ProtocolEvent`]，
//! 路由器对其做穷尽匹配，新增事件类型时由编译器保证被处理。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::jid::Jid;

/// 账号在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Unavailable,
}

/// 会话内输入状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresence {
    Composing,
    Recording,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    Read,
    Played,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub message_ids: Vec<String>,
    pub chat: Jid,
    pub sender: Jid,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

/// 入站消息内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        caption: Option<String>,
    },
    Video {
        caption: Option<String>,
    },
    Audio,
    Document {
        file_name: Option<String>,
        caption: Option<String>,
    },
    Sticker,
    Location {
        latitude: f64,
        longitude: f64,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    Other {
        kind: String,
    },
}

impl MessageContent {
    pub fn message_type(&self) -> &str {
        match self {
            MessageContent::Text { .. } => "text",
            MessageContent::Image { .. } => "image",
            MessageContent::Video { .. } => "video",
            MessageContent::Audio => "audio",
            MessageContent::Document { .. } => "document",
            MessageContent::Sticker => "sticker",
            MessageContent::Location { .. } => "location",
            MessageContent::Reaction { .. } => "reaction",
            MessageContent::Other { kind } => kind.as_str(),
        }
    }

    /// 文本正文；媒体消息取说明文字
    pub fn body(&self) -> String {
        match self {
            MessageContent::Text { body } => body.clone(),
            MessageContent::Image { caption }
            | MessageContent::Video { caption }
            | MessageContent::Document { caption, .. } => caption.clone().unwrap_or_default(),
            MessageContent::Location {
                latitude,
                longitude,
            } => format!("{latitude},{longitude}"),
            MessageContent::Reaction { emoji, .. } => emoji.clone(),
            MessageContent::Audio | MessageContent::Sticker | MessageContent::Other { .. } => {
                String::new()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub from_me: bool,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

/// 交给外部处理器的归一化消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub message_type: String,
    pub push_name: Option<String>,
    pub from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedMessage {
    /// 归一化入站消息
    ///
    /// 群聊与自己发出的消息以会话地址为收件方；私聊入站消息以本设备账号为收件方，
    /// 未知设备身份时退回会话地址。
    pub fn from_incoming(message: &IncomingMessage, own_account: Option<&Jid>) -> Self {
        let is_group = message.chat.is_group();
        let recipient = if is_group || message.from_me {
            message.chat.to_string()
        } else {
            own_account
                .map(Jid::to_string)
                .unwrap_or_else(|| message.chat.to_string())
        };

        Self {
            id: message.id.clone(),
            sender: message.sender.to_string(),
            recipient,
            body: message.content.body(),
            message_type: message.content.message_type().to_string(),
            push_name: message.push_name.clone(),
            from_me: message.from_me,
            is_group,
            timestamp: message.timestamp,
        }
    }
}

/// 协议客户端事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Connected,
    Disconnected,
    LoggedOut {
        on_connect: bool,
        reason: String,
    },
    StreamReplaced,
    PairingCode {
        code: String,
    },
    PairSuccess {
        device_id: String,
        platform: Option<String>,
    },
    PairError {
        device_id: Option<String>,
        reason: String,
    },
    Message(Box<IncomingMessage>),
    Receipt(ReceiptEvent),
    Presence {
        from: Jid,
        unavailable: bool,
        last_seen: Option<DateTime<Utc>>,
    },
    ChatPresence {
        chat: Jid,
        sender: Jid,
        state: ChatPresence,
    },
    ContactUpdate {
        jid: Jid,
    },
    GroupInfo {
        jid: Jid,
    },
    PictureUpdate {
        jid: Jid,
        removed: bool,
    },
    HistorySync {
        conversations: usize,
    },
    KeepAliveTimeout {
        error_count: u32,
    },
    KeepAliveRestored,
    Unhandled {
        kind: String,
    },
}

impl ProtocolEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Connected => "connected",
            ProtocolEvent::Disconnected => "disconnected",
            ProtocolEvent::LoggedOut { .. } => "logged_out",
            ProtocolEvent::StreamReplaced => "stream_replaced",
            ProtocolEvent::PairingCode { .. } => "pairing_code",
            ProtocolEvent::PairSuccess { .. } => "pair_success",
            ProtocolEvent::PairError { .. } => "pair_error",
            ProtocolEvent::Message(_) => "message",
            ProtocolEvent::Receipt(_) => "receipt",
            ProtocolEvent::Presence { .. } => "presence",
            ProtocolEvent::ChatPresence { .. } => "chat_presence",
            ProtocolEvent::ContactUpdate { .. } => "contact",
            ProtocolEvent::GroupInfo { .. } => "group_info",
            ProtocolEvent::PictureUpdate { .. } => "picture",
            ProtocolEvent::HistorySync { .. } => "history_sync",
            ProtocolEvent::KeepAliveTimeout { .. } => "keepalive_timeout",
            ProtocolEvent::KeepAliveRestored => "keepalive_restored",
            ProtocolEvent::Unhandled { .. } => "unhandled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(chat: &str, from_me: bool, content: MessageContent) -> IncomingMessage {
        IncomingMessage {
            id: "3EB0C767D26A".into(),
            chat: Jid::parse(chat).unwrap(),
            sender: Jid::parse("628111111111").unwrap(),
            from_me,
            push_name: Some("Alice".into()),
            timestamp: Utc::now(),
            content,
        }
    }

    #[test]
    fn test_direct_message_recipient_is_own_account() {
        let own = Jid::parse("628222222222").unwrap();
        let message = incoming(
            "628111111111@s.whatsapp.net",
            false,
            MessageContent::Text {
                body: "hello".into(),
            },
        );

        let normalized = NormalizedMessage::from_incoming(&message, Some(&own));
        assert_eq!(normalized.sender, "628111111111@s.whatsapp.net");
        assert_eq!(normalized.recipient, "628222222222@s.whatsapp.net");
        assert_eq!(normalized.body, "hello");
        assert_eq!(normalized.message_type, "text");
        assert!(!normalized.is_group);
    }

    #[test]
    fn test_group_message_recipient_is_group() {
        let message = incoming(
            "120363025246125486@g.us",
            false,
            MessageContent::Image {
                caption: Some("look".into()),
            },
        );

        let normalized = NormalizedMessage::from_incoming(&message, None);
        assert_eq!(normalized.recipient, "120363025246125486@g.us");
        assert_eq!(normalized.body, "look");
        assert_eq!(normalized.message_type, "image");
        assert!(normalized.is_group);
    }
}
