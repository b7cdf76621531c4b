//! # 日志初始化模块
//!
//! 网关各组件只使用 `tracing` 宏，并通过构造时注入的 [`tracing::Span`]
//! 携带组件与会话上下文；订阅器仅在进程入口初始化一次。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），如果为 None 则使用默认配置（info 级别）
///
/// 重复初始化（例如测试中多次调用）会被忽略。
///
/// # 示例
/// ```rust,ignore
/// use flare_link::config::LoggingConfig;
///
/// init_tracing_from_config(None);
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_file: true,
///     with_line_number: true,
///     ..Default::default()
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) {
    // 优先使用环境变量 RUST_LOG，如果没有则使用配置文件的日志级别
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level_str = logging_config.map(|c| c.level.as_str()).unwrap_or("info");
            EnvFilter::new(level_str)
        }
    };

    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already initialized");
    }
}

/// 网关组件的根 Span
pub fn component_span(component: &'static str) -> tracing::Span {
    tracing::info_span!("flare_link", component)
}

/// 单个会话的 Span，作为会话内所有日志的父级
pub fn session_span(parent: &tracing::Span, session_id: &str) -> tracing::Span {
    tracing::info_span!(parent: parent, "session", session_id = %session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing_from_config(None);
        init_tracing_from_config(Some(&LoggingConfig {
            level: "debug".into(),
            ..Default::default()
        }));
        let root = component_span("manager");
        let _session = session_span(&root, "s1");
    }
}
