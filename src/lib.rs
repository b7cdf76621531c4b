//! Flare Link 会话网关核心库
//!
//! 为多个租户账号托管多设备消息客户端：
//! - [`manager::SessionManager`]：会话注册表与生命周期入口
//! - [`connection::ConnectionHandle`]：每会话一个 actor，负责状态机与扫码配对
//! - [`hooks`]：外部事件处理器注册与分发（含 WebHook 适配器）
//! - [`infrastructure`]：会话持久化（内存 / PostgreSQL）

pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod hooks;
pub mod infrastructure;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod service;
pub mod tracing;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use config::{
    ConfigManager, GatewayConfig, LoggingConfig, ManagerConfig, StoreConfig, StoreKind,
    WebhookConfig, load_config,
};
pub use connection::{
    CodeRenderer, ConnectionHandle, DataUrlRenderer, HandleState, MessagePayload, PairingCode,
    PairingPhase, StatsSnapshot,
};
pub use domain::{ConnectionStatus, Jid, NormalizedMessage, ProxyConfig, Session, SessionStore};
pub use error::{ErrorCode, GatewayError, Result};
pub use hooks::{EventHandler, HandlerEvent, HandlerId, HandlerRegistry};
pub use manager::{HealthSummary, SessionInfo, SessionManager, SessionManagerBuilder};
pub use metrics::GatewayMetrics;
pub use protocol::{ClientError, ProtocolClient, ProtocolClientFactory};
pub use service::{ApplicationBootstrap, ApplicationContext};
