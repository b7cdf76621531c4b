//! 应用装配
//!
//! 根据 [`GatewayConfig`](crate::config::GatewayConfig) 选择会话存储、注册内置处理器并构建
//! [`SessionManager`](crate::manager::SessionManager)。

pub mod bootstrap;

pub use bootstrap::{ApplicationBootstrap, ApplicationContext};
