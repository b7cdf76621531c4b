pub mod event;
pub mod jid;
pub mod repositories;
pub mod session;

pub use event::{
    ChatPresence, IncomingMessage, MessageContent, NormalizedMessage, Presence, ProtocolEvent,
    ReceiptEvent, ReceiptKind,
};
pub use jid::Jid;
pub use repositories::SessionStore;
pub use session::{ConnectionStatus, ProxyConfig, ProxyScheme, Session};
