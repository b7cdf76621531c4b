//! Flare Link 错误模块
//!
//! - 统一的错误分类 [`ErrorCode`]
//! - 网关对外暴露的 [`GatewayError`]，携带会话 ID 与操作名便于定位

use serde::Serialize;
use thiserror::Error;

use crate::protocol::ClientError;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParameter,
    NotFound,
    AlreadyExists,
    AlreadyLoggedIn,
    NoCodeAvailable,
    NotLoggedIn,
    ConnectionFailed,
    StoreError,
    DeliveryFailed,
    ServiceUnavailable,
    ConfigurationError,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("event handler {handler_id} not found for session {session_id}")]
    HandlerNotFound {
        session_id: String,
        handler_id: String,
    },

    #[error("session {0} already exists")]
    AlreadyExists(String),

    #[error("session {0} is already logged in")]
    AlreadyLoggedIn(String),

    #[error("no pairing code available for session {0}")]
    NoCodeAvailable(String),

    #[error("session {0} is not logged in")]
    NotLoggedIn(String),

    #[error("{operation} failed for session {session_id}: {source}")]
    Connection {
        session_id: String,
        operation: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("session store error: {0}")]
    Store(String),

    #[error("delivery to {target} failed: {reason}")]
    Delivery { target: String, reason: String },

    #[error("connection handle for session {0} is unavailable")]
    ActorUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn connection(session_id: &str, operation: &'static str, source: ClientError) -> Self {
        GatewayError::Connection {
            session_id: session_id.to_string(),
            operation,
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Validation { .. } => ErrorCode::InvalidParameter,
            GatewayError::NotFound(_) | GatewayError::HandlerNotFound { .. } => {
                ErrorCode::NotFound
            }
            GatewayError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            GatewayError::AlreadyLoggedIn(_) => ErrorCode::AlreadyLoggedIn,
            GatewayError::NoCodeAvailable(_) => ErrorCode::NoCodeAvailable,
            GatewayError::NotLoggedIn(_) => ErrorCode::NotLoggedIn,
            GatewayError::Connection { .. } => ErrorCode::ConnectionFailed,
            GatewayError::Store(_) => ErrorCode::StoreError,
            GatewayError::Delivery { .. } => ErrorCode::DeliveryFailed,
            GatewayError::ActorUnavailable(_) => ErrorCode::ServiceUnavailable,
            GatewayError::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_carries_session_and_operation() {
        let err = GatewayError::connection(
            "s1",
            "connect",
            ClientError::Transport("socket closed".into()),
        );
        let message = err.to_string();
        assert!(message.contains("s1"));
        assert!(message.contains("connect"));
        assert!(message.contains("socket closed"));
        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    }

    #[test]
    fn handler_not_found_is_a_not_found() {
        let err = GatewayError::HandlerNotFound {
            session_id: "s1".into(),
            handler_id: "h1".into(),
        };
        assert!(err.is_not_found());
        assert!(!GatewayError::validation("proxy", "bad").is_not_found());
    }
}
