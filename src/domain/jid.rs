//! Jid 值对象
//!
//! 消息网络中的地址（用户、群组、广播），格式为 `user@server`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 个人账号服务器
pub const USER_SERVER: &str = "s.whatsapp.net";
/// 群组服务器
pub const GROUP_SERVER: &str = "g.us";
/// 隐藏身份账号服务器
pub const LID_SERVER: &str = "lid";
/// 广播列表服务器
pub const BROADCAST_SERVER: &str = "broadcast";
/// 频道服务器
pub const NEWSLETTER_SERVER: &str = "newsletter";

const KNOWN_SERVERS: [&str; 5] = [
    USER_SERVER,
    GROUP_SERVER,
    LID_SERVER,
    BROADCAST_SERVER,
    NEWSLETTER_SERVER,
];

/// 电话号码长度范围（E.164）
const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    user: String,
    server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// 解析地址
    ///
    /// 支持完整地址（`123@s.whatsapp.net`、`abc-123@g.us`）以及裸电话号码
    /// （允许 `+`、空格、`-`、括号，归一化为个人账号地址）。
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("address cannot be empty".to_string());
        }

        if let Some((user, server)) = raw.split_once('@') {
            // 设备后缀（`user:12@server`）不属于收件地址
            let user = user.split(':').next().unwrap_or_default();
            if user.is_empty() {
                return Err(format!("missing user part in {raw}"));
            }
            if !KNOWN_SERVERS.contains(&server) {
                return Err(format!("unknown server {server}"));
            }
            if server == USER_SERVER && !is_phone_digits(user) {
                return Err(format!("invalid phone number {user}"));
            }
            return Ok(Self::new(user, server));
        }

        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
            .collect();
        if !is_phone_digits(&digits) {
            return Err(format!("invalid phone number {raw}"));
        }
        Ok(Self::new(digits, USER_SERVER))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }
}

fn is_phone_digits(value: &str) -> bool {
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_digit())
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Jid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let jid = Jid::parse("628123456789@s.whatsapp.net").unwrap();
        assert_eq!(jid.user(), "628123456789");
        assert_eq!(jid.server(), USER_SERVER);
        assert!(!jid.is_group());
    }

    #[test]
    fn test_parse_group_and_device_suffix() {
        let group = Jid::parse("120363025246125486@g.us").unwrap();
        assert!(group.is_group());

        let device = Jid::parse("628123456789:12@s.whatsapp.net").unwrap();
        assert_eq!(device.to_string(), "628123456789@s.whatsapp.net");
    }

    #[test]
    fn test_parse_phone_number_normalization() {
        let jid = Jid::parse("+62 (812) 3456-789").unwrap();
        assert_eq!(jid.to_string(), "628123456789@s.whatsapp.net");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(Jid::parse("").is_err());
        assert!(Jid::parse("hello").is_err());
        assert!(Jid::parse("123").is_err());
        assert!(Jid::parse("@s.whatsapp.net").is_err());
        assert!(Jid::parse("628123456789@example.com").is_err());
        assert!(Jid::parse("abc@s.whatsapp.net").is_err());
    }
}
