//! 配置管理器 - 负责环境变量对配置文件的覆盖
//!
//! 支持的环境变量：
//! - `FLARE_LINK_LOG_LEVEL`
//! - `FLARE_LINK_POSTGRES_URL`（同时切换为 PostgreSQL 存储）
//! - `FLARE_LINK_WEBHOOK_URL` / `FLARE_LINK_WEBHOOK_SECRET`
//! - `FLARE_LINK_PAIRING_CODE_TTL_SECS`
//! - `FLARE_LINK_CONNECT_SETTLE_MS`

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};

use super::{GatewayConfig, StoreKind, WebhookConfig};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 使用进程环境变量覆盖配置
    pub fn apply_env_overrides(config: &mut GatewayConfig) -> Result<()> {
        Self::apply_overrides(config, |key| env::var(key).ok())
    }

    /// 使用任意键值来源覆盖配置
    ///
    /// # 参数
    /// * `config` - 基础配置，将被修改
    /// * `lookup` - 变量查询函数
    pub fn apply_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("FLARE_LINK_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(url) = lookup("FLARE_LINK_POSTGRES_URL").filter(|v| !v.is_empty()) {
            config.store.kind = StoreKind::Postgres;
            config.store.postgres_url = Some(url);
        }

        if let Some(url) = lookup("FLARE_LINK_WEBHOOK_URL").filter(|v| !v.is_empty()) {
            match config.webhook.as_mut() {
                Some(webhook) => webhook.url = url,
                None => {
                    config.webhook = Some(WebhookConfig {
                        url,
                        secret: None,
                        timeout_ms: 5_000,
                        headers: HashMap::new(),
                    })
                }
            }
        }

        if let Some(secret) = lookup("FLARE_LINK_WEBHOOK_SECRET") {
            if let Some(webhook) = config.webhook.as_mut() {
                webhook.secret = Some(secret);
            }
        }

        if let Some(raw) = lookup("FLARE_LINK_PAIRING_CODE_TTL_SECS") {
            config.manager.pairing_code_ttl_secs = raw
                .parse()
                .with_context(|| format!("invalid FLARE_LINK_PAIRING_CODE_TTL_SECS: {raw}"))?;
        }

        if let Some(raw) = lookup("FLARE_LINK_CONNECT_SETTLE_MS") {
            config.manager.connect_settle_ms = raw
                .parse()
                .with_context(|| format!("invalid FLARE_LINK_CONNECT_SETTLE_MS: {raw}"))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_postgres_url_switches_store_kind() {
        let mut config = GatewayConfig::default();
        ConfigManager::apply_overrides(
            &mut config,
            lookup_from(&[("FLARE_LINK_POSTGRES_URL", "postgres://localhost/flare")]),
        )
        .unwrap();
        assert_eq!(config.store.kind, StoreKind::Postgres);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_webhook_created_from_env() {
        let mut config = GatewayConfig::default();
        ConfigManager::apply_overrides(
            &mut config,
            lookup_from(&[
                ("FLARE_LINK_WEBHOOK_URL", "https://hooks.example.com/in"),
                ("FLARE_LINK_WEBHOOK_SECRET", "k"),
            ]),
        )
        .unwrap();
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url, "https://hooks.example.com/in");
        assert_eq!(webhook.secret.as_deref(), Some("k"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let mut config = GatewayConfig::default();
        let result = ConfigManager::apply_overrides(
            &mut config,
            lookup_from(&[("FLARE_LINK_PAIRING_CODE_TTL_SECS", "soon")]),
        );
        assert!(result.is_err());
    }
}
