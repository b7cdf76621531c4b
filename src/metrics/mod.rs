//! # Prometheus 指标收集模块
//!
//! 指标注册到调用方注入的 [`Registry`]，不使用进程级全局注册表。

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// 会话网关指标
#[derive(Clone)]
pub struct GatewayMetrics {
    /// 注册表中的会话句柄数
    pub sessions_total: IntGauge,
    /// 处于已连接状态的会话数
    pub sessions_connected: IntGauge,
    /// 连接请求总数
    pub connect_requests_total: IntCounter,
    /// 下发的配对码总数
    pub pairing_codes_total: IntCounter,
    /// 发送成功的消息总数
    pub messages_sent_total: IntCounter,
    /// 收到的消息总数
    pub messages_received_total: IntCounter,
    /// 发送失败次数（按操作）
    pub send_failures_total: IntCounterVec,
    /// 处理器调用失败或超时次数（按处理器）
    pub handler_failures_total: IntCounterVec,
    /// 后台连接尝试失败次数（按阶段）
    pub attempt_failures_total: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sessions_total = IntGauge::new(
            "flare_link_sessions_total",
            "Number of session handles in the registry",
        )?;
        let sessions_connected = IntGauge::new(
            "flare_link_sessions_connected",
            "Number of sessions currently connected",
        )?;
        let connect_requests_total = IntCounter::new(
            "flare_link_connect_requests_total",
            "Total number of connect requests",
        )?;
        let pairing_codes_total = IntCounter::new(
            "flare_link_pairing_codes_total",
            "Total number of pairing codes issued",
        )?;
        let messages_sent_total = IntCounter::new(
            "flare_link_messages_sent_total",
            "Total number of messages sent",
        )?;
        let messages_received_total = IntCounter::new(
            "flare_link_messages_received_total",
            "Total number of messages received",
        )?;
        let send_failures_total = IntCounterVec::new(
            Opts::new(
                "flare_link_send_failures_total",
                "Total number of failed outbound operations",
            ),
            &["operation"],
        )?;
        let handler_failures_total = IntCounterVec::new(
            Opts::new(
                "flare_link_handler_failures_total",
                "Total number of event handler failures or timeouts",
            ),
            &["handler"],
        )?;
        let attempt_failures_total = IntCounterVec::new(
            Opts::new(
                "flare_link_attempt_failures_total",
                "Total number of failed background connection attempts",
            ),
            &["stage"],
        )?;

        registry.register(Box::new(sessions_total.clone()))?;
        registry.register(Box::new(sessions_connected.clone()))?;
        registry.register(Box::new(connect_requests_total.clone()))?;
        registry.register(Box::new(pairing_codes_total.clone()))?;
        registry.register(Box::new(messages_sent_total.clone()))?;
        registry.register(Box::new(messages_received_total.clone()))?;
        registry.register(Box::new(send_failures_total.clone()))?;
        registry.register(Box::new(handler_failures_total.clone()))?;
        registry.register(Box::new(attempt_failures_total.clone()))?;

        Ok(Self {
            sessions_total,
            sessions_connected,
            connect_requests_total,
            pairing_codes_total,
            messages_sent_total,
            messages_received_total,
            send_failures_total,
            handler_failures_total,
            attempt_failures_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered_once_per_registry() {
        let registry = Registry::new();
        let metrics = GatewayMetrics::new(&registry).unwrap();
        metrics.messages_sent_total.inc();
        metrics.send_failures_total.with_label_values(&["send_message"]).inc();

        let families = registry.gather();
        assert!(
            families
                .iter()
                .any(|f| f.name() == "flare_link_messages_sent_total")
        );

        // 同一注册表重复注册应报错
        assert!(GatewayMetrics::new(&registry).is_err());
    }
}
