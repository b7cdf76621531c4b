//! 事件处理器扩展模块
//!
//! - 定义外部消费者实现的 [`EventHandler`] 契约
//! - 提供按会话与全局两级的处理器注册中心
//! - 每个会话一个通知任务，按序调用处理器
//! - 内置 WebHook 适配器（可选 HMAC 签名）

pub mod adapters;
mod registry;
mod runtime;
mod types;

pub use registry::HandlerRegistry;
pub use runtime::HandlerDispatcher;
pub use types::{EventHandler, HandlerEvent, HandlerId};
