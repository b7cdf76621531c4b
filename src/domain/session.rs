use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks5" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

/// 代理配置
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 会话持久化记录
///
/// 配对码与其过期时间只能通过 [`Session::set_qr_code`] / [`Session::clear_qr_code`]
/// 成对修改；设备身份一旦写入，只有显式登出（[`Session::forget_device`]）才会清除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub name: String,
    pub device_id: Option<String>,
    pub connected: bool,
    pub last_error: Option<String>,
    qr_code: Option<String>,
    qr_expires_at: Option<DateTime<Utc>>,
    pub proxy: Option<ProxyConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            name: name.into(),
            device_id: None,
            connected: false,
            last_error: None,
            qr_code: None,
            qr_expires_at: None,
            proxy: None,
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        }
    }

    /// 从持久化数据重建（仓储专用）
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        session_id: String,
        name: String,
        device_id: Option<String>,
        connected: bool,
        last_error: Option<String>,
        qr: Option<(String, DateTime<Utc>)>,
        proxy: Option<ProxyConfig>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Self {
        let (qr_code, qr_expires_at) = match qr {
            Some((code, expires_at)) => (Some(code), Some(expires_at)),
            None => (None, None),
        };
        Self {
            session_id,
            name,
            device_id,
            connected,
            last_error,
            qr_code,
            qr_expires_at,
            proxy,
            created_at,
            updated_at,
            last_seen_at,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn is_paired(&self) -> bool {
        self.device_id.is_some()
    }

    pub fn qr_code(&self) -> Option<(&str, DateTime<Utc>)> {
        match (&self.qr_code, self.qr_expires_at) {
            (Some(code), Some(expires_at)) => Some((code.as_str(), expires_at)),
            _ => None,
        }
    }

    pub fn set_qr_code(&mut self, code: impl Into<String>, expires_at: DateTime<Utc>) {
        self.qr_code = Some(code.into());
        self.qr_expires_at = Some(expires_at);
    }

    pub fn clear_qr_code(&mut self) {
        self.qr_code = None;
        self.qr_expires_at = None;
    }

    /// 记录配对成功后的设备身份
    pub fn assign_device(&mut self, device_id: impl Into<String>) {
        self.device_id = Some(device_id.into());
    }

    pub fn forget_device(&mut self) {
        self.device_id = None;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_qr_code_set_and_cleared_together() {
        let mut session = Session::new("s1", "Sales");
        assert!(session.qr_code().is_none());

        let expires_at = Utc::now() + Duration::seconds(120);
        session.set_qr_code("2@abc", expires_at);
        assert_eq!(session.qr_code(), Some(("2@abc", expires_at)));

        session.clear_qr_code();
        assert!(session.qr_code().is_none());
    }

    #[test]
    fn test_proxy_debug_masks_password() {
        let proxy = ProxyConfig {
            scheme: ProxyScheme::Socks5,
            host: "10.0.0.1".into(),
            port: 1080,
            username: Some("u".into()),
            password: Some("secret".into()),
        };
        let rendered = format!("{proxy:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_proxy_scheme_parse() {
        assert_eq!(ProxyScheme::parse("SOCKS5"), Some(ProxyScheme::Socks5));
        assert_eq!(ProxyScheme::parse(" https "), Some(ProxyScheme::Https));
        assert_eq!(ProxyScheme::parse("ftp"), None);
    }
}
