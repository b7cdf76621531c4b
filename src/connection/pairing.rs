//! 配对控制器
//!
//! 每次 `connect` 生成一个连接尝试任务：已配对设备直接连接并等待稳定，
//! 未配对设备先取得配对码流再连接，随后在配对循环中消费码流。
//! 循环的中间结果（新配对码）以带代号的消息回送给会话 actor，
//! 终态作为任务返回值由 actor 通过 `JoinHandle` 接收。

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::protocol::{PairingItem, ProtocolClient};

/// 配对子状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PairingPhase {
    #[default]
    NotStarted,
    WaitingForCode,
    WaitingForScan,
    Success,
    Expired,
    ChannelClosed,
    Failed,
    Cancelled,
}

impl PairingPhase {
    /// 配对循环是否仍在运行
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PairingPhase::WaitingForCode | PairingPhase::WaitingForScan
        )
    }
}

/// 配对循环回送给 actor 的中间结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PairingUpdate {
    pub generation: u64,
    pub code: String,
}

/// 连接尝试的终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    /// 已配对设备：连接后按传输状态上报
    Settled { connected: bool },
    PairSuccess,
    Expired,
    ChannelClosed,
    PairFailed(String),
    Cancelled,
}

/// 配对码渲染
pub trait CodeRenderer: Send + Sync {
    fn render(&self, code: &str) -> String;
}

/// 将配对码编码为 base64 data URL，由前端自行绘制二维码
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUrlRenderer;

impl CodeRenderer for DataUrlRenderer {
    fn render(&self, code: &str) -> String {
        format!("data:text/plain;base64,{}", STANDARD.encode(code.as_bytes()))
    }
}

pub(crate) struct AttemptContext {
    pub session_id: String,
    pub client: Arc<dyn ProtocolClient>,
    pub generation: u64,
    pub cancel: CancellationToken,
    pub updates: mpsc::UnboundedSender<PairingUpdate>,
    pub settle: Duration,
    pub paired: bool,
}

/// 连接尝试任务入口
pub(crate) async fn run_attempt(ctx: AttemptContext) -> Result<AttemptOutcome> {
    if ctx.paired {
        return run_paired_connect(ctx).await;
    }

    let stream = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(AttemptOutcome::Cancelled),
        stream = ctx.client.pairing_stream() => stream
            .map_err(|err| GatewayError::connection(&ctx.session_id, "pairing_stream", err))?,
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(AttemptOutcome::Cancelled),
        result = ctx.client.connect() => result
            .map_err(|err| GatewayError::connection(&ctx.session_id, "connect", err))?,
    }

    Ok(run_pairing_loop(stream, &ctx.cancel, &ctx.updates, ctx.generation).await)
}

async fn run_paired_connect(ctx: AttemptContext) -> Result<AttemptOutcome> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(AttemptOutcome::Cancelled),
        result = ctx.client.connect() => result
            .map_err(|err| GatewayError::connection(&ctx.session_id, "connect", err))?,
    }

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(AttemptOutcome::Cancelled),
        _ = tokio::time::sleep(ctx.settle) => {}
    }

    Ok(AttemptOutcome::Settled {
        connected: ctx.client.is_connected(),
    })
}

/// 消费配对码流，直到终态、码流关闭或取消
pub(crate) async fn run_pairing_loop(
    mut stream: mpsc::Receiver<PairingItem>,
    cancel: &CancellationToken,
    updates: &mpsc::UnboundedSender<PairingUpdate>,
    generation: u64,
) -> AttemptOutcome {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AttemptOutcome::Cancelled,
            item = stream.recv() => item,
        };

        match item {
            // 有效期以网关配置为准，客户端给出的超时不使用
            Some(PairingItem::Code { code, .. }) => {
                if updates.send(PairingUpdate { generation, code }).is_err() {
                    // actor 已退出
                    return AttemptOutcome::Cancelled;
                }
            }
            Some(PairingItem::Success) => return AttemptOutcome::PairSuccess,
            Some(PairingItem::Timeout) => return AttemptOutcome::Expired,
            Some(PairingItem::Error(reason)) => return AttemptOutcome::PairFailed(reason),
            None => return AttemptOutcome::ChannelClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loop_forwards_codes_until_success() {
        let (tx, rx) = mpsc::channel(4);
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tx.send(PairingItem::Code {
            code: "2@first".into(),
            timeout: Duration::from_secs(60),
        })
        .await
        .unwrap();
        tx.send(PairingItem::Success).await.unwrap();

        let outcome = run_pairing_loop(rx, &cancel, &updates_tx, 7).await;
        assert_eq!(outcome, AttemptOutcome::PairSuccess);

        let update = updates_rx.recv().await.unwrap();
        assert_eq!(
            update,
            PairingUpdate {
                generation: 7,
                code: "2@first".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_loop_reports_closed_stream_and_timeout() {
        let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (tx, rx) = mpsc::channel::<PairingItem>(1);
        drop(tx);
        assert_eq!(
            run_pairing_loop(rx, &cancel, &updates_tx, 1).await,
            AttemptOutcome::ChannelClosed
        );

        let (tx, rx) = mpsc::channel(1);
        tx.send(PairingItem::Timeout).await.unwrap();
        assert_eq!(
            run_pairing_loop(rx, &cancel, &updates_tx, 1).await,
            AttemptOutcome::Expired
        );
    }

    #[tokio::test]
    async fn test_cancel_exits_and_releases_stream() {
        let (tx, rx) = mpsc::channel::<PairingItem>(1);
        let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { run_pairing_loop(rx, &cancel, &updates_tx, 1).await })
        };
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Cancelled);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_data_url_renderer() {
        let image = DataUrlRenderer.render("2@abc");
        assert_eq!(image, "data:text/plain;base64,MkBhYmM=");
    }
}
