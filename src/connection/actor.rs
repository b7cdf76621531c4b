use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::domain::{ConnectionStatus, ProtocolEvent, Session, SessionStore};
use crate::error::{GatewayError, Result};
use crate::hooks::{HandlerDispatcher, HandlerEvent};
use crate::metrics::GatewayMetrics;
use crate::protocol::ProtocolClient;

use super::pairing::{
    AttemptContext, AttemptOutcome, CodeRenderer, PairingPhase, PairingUpdate, run_attempt,
};
use super::{Command, HandleState, PairingCode};

/// 正在运行的连接尝试
struct Attempt {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<Result<AttemptOutcome>>,
}

/// 会话 actor，独占一个会话的全部可变状态
pub(super) struct SessionActor {
    pub(super) session_id: String,
    pub(super) client: Arc<dyn ProtocolClient>,
    store: Arc<dyn SessionStore>,
    pub(super) notifier: HandlerDispatcher,
    renderer: Arc<dyn CodeRenderer>,
    pub(super) config: ManagerConfig,
    metrics: GatewayMetrics,
    pub(super) state: watch::Sender<HandleState>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<ProtocolEvent>,
    updates_tx: mpsc::UnboundedSender<PairingUpdate>,
    updates_rx: mpsc::UnboundedReceiver<PairingUpdate>,
    attempt: Option<Attempt>,
    generation: u64,
    callback_id: u32,
    pub(super) last_seen_persisted: Option<Instant>,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        session_id: String,
        client: Arc<dyn ProtocolClient>,
        store: Arc<dyn SessionStore>,
        notifier: HandlerDispatcher,
        renderer: Arc<dyn CodeRenderer>,
        config: ManagerConfig,
        metrics: GatewayMetrics,
        state: watch::Sender<HandleState>,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedReceiver<ProtocolEvent>,
        callback_id: u32,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            client,
            store,
            notifier,
            renderer,
            config,
            metrics,
            state,
            commands,
            events,
            updates_tx,
            updates_rx,
            attempt: None,
            generation: 0,
            callback_id,
            last_seen_persisted: None,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("session actor started");
        loop {
            tokio::select! {
                biased;
                Some(update) = self.updates_rx.recv() => self.on_pairing_update(update).await,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.route(event).await,
                (generation, result) = wait_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_attempt_finished(generation, result).await;
                }
            }
        }
        debug!("session actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Logout { reply } => {
                let _ = reply.send(self.logout().await);
            }
            Command::SetProxy { proxy, reply } => {
                let _ = reply.send(self.set_proxy(proxy).await);
            }
            Command::Shutdown { reply } => {
                // run() 在进入这里之前已处理
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        self.metrics.connect_requests_total.inc();
        self.stop_attempt().await;
        if self.client.is_connected() {
            self.client.disconnect().await;
        }

        let paired = self.client.device_id().is_some();
        let cancel = CancellationToken::new();
        let generation = self.generation;

        self.state.send_modify(|state| {
            state.pairing = if paired {
                PairingPhase::NotStarted
            } else {
                PairingPhase::WaitingForCode
            };
            state.last_error = None;
        });
        self.transition(ConnectionStatus::Connecting).await;

        let ctx = AttemptContext {
            session_id: self.session_id.clone(),
            client: Arc::clone(&self.client),
            generation,
            cancel: cancel.clone(),
            updates: self.updates_tx.clone(),
            settle: self.config.connect_settle(),
            paired,
        };
        let join = tokio::spawn(run_attempt(ctx).in_current_span());
        self.attempt = Some(Attempt {
            generation,
            cancel,
            join,
        });

        info!(generation, paired, "connection attempt started");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_attempt().await;
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.transition(ConnectionStatus::Disconnected).await;
        info!("session disconnected");
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.stop_attempt().await;
        let result = self.client.logout().await;
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.transition(ConnectionStatus::Disconnected).await;

        match result {
            Ok(()) => {
                self.state.send_modify(|state| state.device_id = None);
                self.persist("logout", |session| session.forget_device()).await;
                info!("session logged out");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "logout failed");
                Err(GatewayError::connection(&self.session_id, "logout", err))
            }
        }
    }

    async fn set_proxy(&mut self, proxy: Option<crate::domain::ProxyConfig>) -> Result<()> {
        self.client
            .set_proxy(proxy.as_ref())
            .map_err(|err| GatewayError::connection(&self.session_id, "set_proxy", err))?;

        let stored = proxy.clone();
        self.persist("set_proxy", move |session| session.proxy = stored).await;
        self.state.send_modify(|state| state.proxy = proxy);
        info!("proxy updated, effective on next connect");
        Ok(())
    }

    /// 进程退出或会话移除时调用：停止尝试并断开传输，不改写持久化的连接标记
    async fn shutdown(&mut self) {
        self.stop_attempt().await;
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.client.remove_event_handler(self.callback_id);
        let was_connected = self.state.borrow().status == ConnectionStatus::Connected;
        self.adjust_connected_gauge(was_connected, false);
        self.state.send_modify(|state| {
            state.status = ConnectionStatus::Disconnected;
            state.updated_at = Some(Utc::now());
        });
    }

    /// 停止当前连接尝试：推进代号、取消令牌，并在限定时间内等待任务确认退出
    pub(super) async fn stop_attempt(&mut self) {
        self.generation += 1;

        if let Some(mut attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            match tokio::time::timeout(self.config.stop_ack_timeout(), &mut attempt.join).await {
                Ok(Ok(_)) => debug!(generation = attempt.generation, "connection attempt stopped"),
                Ok(Err(err)) => warn!(
                    generation = attempt.generation,
                    error = %err,
                    "connection attempt ended abnormally while stopping"
                ),
                Err(_) => {
                    warn!(
                        generation = attempt.generation,
                        "connection attempt did not acknowledge stop, aborting"
                    );
                    attempt.join.abort();
                }
            }
        }

        let had_code = self.state.borrow().qr.is_some();
        self.state.send_modify(|state| {
            if state.pairing.is_active() {
                state.pairing = PairingPhase::Cancelled;
            }
            state.qr = None;
        });
        if had_code {
            self.persist("clear_qr", |session| session.clear_qr_code()).await;
        }
    }

    /// 是否有正在运行的连接尝试
    pub(super) fn attempt_running(&self) -> bool {
        self.attempt.is_some()
    }

    async fn on_pairing_update(&mut self, update: PairingUpdate) {
        if update.generation != self.generation || self.attempt.is_none() {
            debug!(
                generation = update.generation,
                current = self.generation,
                "stale pairing update dropped"
            );
            return;
        }
        self.apply_pairing_code(update.code).await;
    }

    /// 记录新的配对码：渲染、发布、落盘并通知处理器
    ///
    /// 流与事件可能上报同一个码，重复的码不再发布。
    pub(super) async fn apply_pairing_code(&mut self, code: String) {
        let duplicate = self
            .state
            .borrow()
            .qr
            .as_ref()
            .is_some_and(|qr| qr.code == code);
        if duplicate {
            debug!("duplicate pairing code ignored");
            return;
        }

        let expires_at = Utc::now() + self.config.pairing_code_ttl();
        let qr = PairingCode {
            image: self.renderer.render(&code),
            expires_at,
            code: code.clone(),
        };
        self.state.send_modify(|state| {
            state.qr = Some(qr);
            state.pairing = PairingPhase::WaitingForScan;
            state.updated_at = Some(Utc::now());
        });

        let stored_code = code.clone();
        self.persist("pairing_code", move |session| {
            session.set_qr_code(stored_code, expires_at)
        })
        .await;

        self.metrics.pairing_codes_total.inc();
        self.notifier.notify(HandlerEvent::PairingCode { code });
        info!("pairing code issued");
    }

    async fn on_attempt_finished(
        &mut self,
        generation: u64,
        result: std::result::Result<Result<AttemptOutcome>, JoinError>,
    ) {
        match result {
            Ok(Ok(outcome)) => self.finish_attempt(outcome).await,
            Ok(Err(err)) => {
                let stage = match &err {
                    GatewayError::Connection { operation, .. } => *operation,
                    _ => "attempt",
                };
                error!(generation, stage, error = %err, "connection attempt failed");
                self.fail_attempt(stage, err.to_string()).await;
            }
            Err(join_err) => {
                error!(generation, error = %join_err, "connection attempt panicked");
                self.fail_attempt("panic", format!("connection attempt aborted: {join_err}"))
                    .await;
            }
        }
    }

    async fn finish_attempt(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Settled { connected: true } => {
                self.transition(ConnectionStatus::Connected).await;
            }
            AttemptOutcome::Settled { connected: false } => {
                warn!("transport not connected after settle interval");
                self.transition(ConnectionStatus::Disconnected).await;
            }
            AttemptOutcome::PairSuccess => self.pair_succeeded().await,
            AttemptOutcome::Expired => {
                info!("pairing code expired");
                self.end_pairing(PairingPhase::Expired, None).await;
            }
            AttemptOutcome::ChannelClosed => {
                warn!("pairing channel closed");
                self.end_pairing(PairingPhase::ChannelClosed, None).await;
            }
            AttemptOutcome::PairFailed(reason) => {
                warn!(reason = %reason, "pairing failed");
                self.end_pairing(PairingPhase::Failed, Some(reason)).await;
            }
            AttemptOutcome::Cancelled => {
                self.state.send_modify(|state| state.pairing = PairingPhase::Cancelled);
            }
        }
    }

    async fn pair_succeeded(&mut self) {
        let device_id = self.client.device_id();
        self.state.send_modify(|state| {
            state.pairing = PairingPhase::Success;
            state.qr = None;
            if device_id.is_some() {
                state.device_id = device_id.clone();
            }
        });

        let stored_device = device_id.clone();
        self.persist("pair_success", move |session| {
            session.clear_qr_code();
            if let Some(device_id) = stored_device {
                session.assign_device(device_id);
            }
        })
        .await;

        self.transition(ConnectionStatus::Connected).await;
        self.notifier.notify(HandlerEvent::PairSuccess);
        info!(device_id = ?device_id, "pairing succeeded");
    }

    /// 配对以非成功终态结束：清除配对码、断开传输并回到 Disconnected
    pub(super) async fn end_pairing(&mut self, phase: PairingPhase, reason: Option<String>) {
        self.state.send_modify(|state| {
            state.pairing = phase;
            state.qr = None;
            if reason.is_some() {
                state.last_error = reason.clone();
            }
        });
        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.persist("end_pairing", move |session| {
            session.clear_qr_code();
            if reason.is_some() {
                session.last_error = reason;
            }
        })
        .await;
        self.transition(ConnectionStatus::Disconnected).await;
    }

    async fn fail_attempt(&mut self, stage: &'static str, reason: String) {
        self.metrics
            .attempt_failures_total
            .with_label_values(&[stage])
            .inc();
        let current = self.state.borrow().pairing;
        let phase = if current.is_active() {
            PairingPhase::Failed
        } else {
            current
        };
        self.end_pairing(phase, Some(reason)).await;
    }

    /// 切换连接状态；进入 Connected / Disconnected 时落盘连接标记，
    /// 连接标记变化时通知处理器
    pub(super) async fn transition(&mut self, status: ConnectionStatus) {
        let previous = self.state.borrow().status;
        self.state.send_modify(|state| {
            state.status = status;
            state.updated_at = Some(Utc::now());
        });
        if previous != status {
            debug!(from = %previous, to = %status, "status changed");
        }

        let connected = status == ConnectionStatus::Connected;
        let was_connected = previous == ConnectionStatus::Connected;
        self.adjust_connected_gauge(was_connected, connected);

        let last_error = self.state.borrow().last_error.clone();
        self.persist("status", move |session| {
            session.connected = connected;
            session.last_error = last_error;
            if connected {
                session.last_seen_at = Some(Utc::now());
            }
        })
        .await;

        if connected != was_connected {
            self.notifier.notify(HandlerEvent::Connection { connected });
        }
    }

    fn adjust_connected_gauge(&self, was_connected: bool, connected: bool) {
        match (was_connected, connected) {
            (false, true) => self.metrics.sessions_connected.inc(),
            (true, false) => self.metrics.sessions_connected.dec(),
            _ => {}
        }
    }

    /// 读取-修改-写回持久化记录；存储中没有该会话时跳过。
    /// 失败与超时只记录日志，不影响内存状态。
    pub(super) async fn persist<F>(&self, operation: &'static str, apply: F)
    where
        F: FnOnce(&mut Session) + Send,
    {
        let store = Arc::clone(&self.store);
        let session_id = self.session_id.clone();
        let write = async move {
            let Some(mut session) = store.get_by_id(&session_id).await? else {
                return Ok::<bool, GatewayError>(false);
            };
            apply(&mut session);
            session.touch();
            store.update(&session).await?;
            Ok(true)
        };

        match tokio::time::timeout(self.config.store_timeout(), write).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => debug!(operation, "session not in store, persist skipped"),
            Ok(Err(err)) => warn!(operation, error = %err, "failed to persist session state"),
            Err(_) => warn!(operation, "persisting session state timed out"),
        }
    }
}

async fn wait_attempt(
    attempt: &mut Option<Attempt>,
) -> (u64, std::result::Result<Result<AttemptOutcome>, JoinError>) {
    match attempt {
        Some(attempt) => {
            let result = (&mut attempt.join).await;
            (attempt.generation, result)
        }
        None => std::future::pending().await,
    }
}
