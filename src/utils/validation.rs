//! 入参校验
//!
//! 所有校验在触达协议客户端之前完成，失败统一返回 `GatewayError::Validation`

use url::Url;

use crate::domain::{Jid, ProxyConfig, ProxyScheme};
use crate::error::{GatewayError, Result};

/// 会话 ID 最大长度
pub const MAX_SESSION_ID_LEN: usize = 64;

/// 校验会话 ID：1~64 个字符，仅允许字母、数字、`-`、`_`、`.`
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(GatewayError::validation("session_id", "cannot be empty"));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(GatewayError::validation(
            "session_id",
            format!("longer than {MAX_SESSION_ID_LEN} characters"),
        ));
    }
    if let Some(c) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(GatewayError::validation(
            "session_id",
            format!("unexpected character {c:?}"),
        ));
    }
    Ok(())
}

/// 解析收件地址
pub fn parse_recipient(raw: &str) -> Result<Jid> {
    Jid::parse(raw).map_err(|reason| GatewayError::validation("recipient", reason))
}

/// 校验被引用的消息 ID
pub fn validate_message_id(message_id: &str) -> Result<()> {
    if message_id.trim().is_empty() {
        return Err(GatewayError::validation("message_id", "cannot be empty"));
    }
    Ok(())
}

/// 从原始字段构建代理配置
pub fn build_proxy(
    scheme: &str,
    host: &str,
    port: u16,
    username: Option<String>,
    password: Option<String>,
) -> Result<ProxyConfig> {
    let scheme = ProxyScheme::parse(scheme).ok_or_else(|| {
        GatewayError::validation(
            "proxy.scheme",
            format!("unsupported scheme {scheme:?}, expected http, https or socks5"),
        )
    })?;
    let proxy = ProxyConfig {
        scheme,
        host: host.trim().to_string(),
        port,
        username,
        password,
    };
    validate_proxy(&proxy)?;
    Ok(proxy)
}

/// 校验代理目标并返回可供客户端使用的 URL
pub fn validate_proxy(proxy: &ProxyConfig) -> Result<Url> {
    if proxy.host.is_empty() {
        return Err(GatewayError::validation("proxy.host", "cannot be empty"));
    }
    if proxy.host.contains("://") || proxy.host.chars().any(char::is_whitespace) {
        return Err(GatewayError::validation(
            "proxy.host",
            format!("{:?} is not a bare host name", proxy.host),
        ));
    }
    if proxy.port == 0 {
        return Err(GatewayError::validation("proxy.port", "must be non-zero"));
    }
    if proxy.password.is_some() && proxy.username.is_none() {
        return Err(GatewayError::validation(
            "proxy.username",
            "required when a password is set",
        ));
    }

    let mut url = Url::parse(&format!(
        "{}://{}:{}",
        proxy.scheme.as_str(),
        proxy.host,
        proxy.port
    ))
    .map_err(|err| GatewayError::validation("proxy.host", err.to_string()))?;

    if let Some(username) = &proxy.username {
        url.set_username(username)
            .map_err(|_| GatewayError::validation("proxy.username", "cannot be applied"))?;
        url.set_password(proxy.password.as_deref())
            .map_err(|_| GatewayError::validation("proxy.password", "cannot be applied"))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("tenant-1_main.v2").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("slash/inside").is_err());
        assert!(validate_session_id(&"a".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_recipient_errors_are_validation_errors() {
        let err = parse_recipient("not-a-number").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
        assert!(parse_recipient("+1 (415) 555-0100").is_ok());
    }

    #[test]
    fn test_build_proxy_rejects_unknown_scheme() {
        let err = build_proxy("ftp", "proxy.local", 21, None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
        assert!(err.to_string().contains("proxy.scheme"));
    }

    #[test]
    fn test_proxy_url_with_credentials() {
        let proxy = build_proxy(
            "socks5",
            "proxy.local",
            1080,
            Some("user".into()),
            Some("p@ss".into()),
        )
        .unwrap();
        let url = validate_proxy(&proxy).unwrap();
        assert_eq!(url.scheme(), "socks5");
        assert_eq!(url.host_str(), Some("proxy.local"));
        assert_eq!(url.port(), Some(1080));
        assert_eq!(url.username(), "user");
    }

    #[test]
    fn test_proxy_target_validation() {
        assert!(build_proxy("http", "", 8080, None, None).is_err());
        assert!(build_proxy("http", "http://proxy", 8080, None, None).is_err());
        assert!(build_proxy("http", "proxy", 0, None, None).is_err());
        assert!(build_proxy("http", "proxy", 8080, None, Some("pw".into())).is_err());
    }
}
