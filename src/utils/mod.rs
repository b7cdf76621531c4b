//! 工具函数模块
//!
//! 提供入参校验、时间戳转换等通用工具函数

pub mod validation;

pub use validation::{
    build_proxy, parse_recipient, validate_message_id, validate_proxy, validate_session_id,
};

use chrono::{DateTime, TimeZone, Utc};

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime，0 表示未设置
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_and_zero() {
        assert_eq!(millis_to_datetime(0), None);
        let now = current_millis();
        let dt = millis_to_datetime(now).unwrap();
        assert_eq!(dt.timestamp_millis(), now);
    }
}
