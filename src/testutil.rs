//! 测试用的脚本化协议客户端

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::domain::{ChatPresence, Jid, Presence, ProtocolEvent, ProxyConfig};
use crate::protocol::{
    ClientError, EventCallback, MediaKind, OutgoingMessage, PairingItem, ProtocolClient,
    ProtocolClientFactory, SendReceipt, UploadHandle,
};

#[derive(Default)]
pub struct MockProtocolClient {
    connected: AtomicBool,
    logged_in: AtomicBool,
    device_id: Mutex<Option<String>>,
    proxy: Mutex<Option<ProxyConfig>>,
    callbacks: Mutex<HashMap<u32, EventCallback>>,
    next_callback: AtomicU32,
    pairing_senders: Mutex<Vec<mpsc::Sender<PairingItem>>>,
    connect_error: Mutex<Option<String>>,
    logout_error: Mutex<Option<String>>,
    /// 所有访问网络的调用次数
    pub network_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
    pub uploads: AtomicUsize,
}

impl MockProtocolClient {
    pub fn new(device_id: Option<&str>) -> Self {
        let client = Self::default();
        *client.device_id.lock().unwrap() = device_id.map(str::to_string);
        client
    }

    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_logout(&self, reason: &str) {
        *self.logout_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.proxy.lock().unwrap().clone()
    }

    /// 同步调用所有事件回调，模拟客户端投递线程
    pub fn emit(&self, event: ProtocolEvent) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.values() {
            callback(event.clone());
        }
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn pairing_streams_opened(&self) -> usize {
        self.pairing_senders.lock().unwrap().len()
    }

    /// 仍有接收方的配对码流数量
    pub fn open_pairing_streams(&self) -> usize {
        self.pairing_senders
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// 向最近打开的配对码流推送条目
    pub async fn push_pairing(&self, item: PairingItem) {
        let sender = self.pairing_senders.lock().unwrap().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(item).await;
        }
    }

    pub async fn push_code(&self, code: &str) {
        self.push_pairing(PairingItem::Code {
            code: code.to_string(),
            timeout: Duration::from_secs(60),
        })
        .await;
    }

    /// 模拟扫码成功：写入设备身份、推送 Success 并投递 PairSuccess 事件
    pub async fn complete_pairing(&self, device_id: &str) {
        *self.device_id.lock().unwrap() = Some(device_id.to_string());
        self.logged_in.store(true, Ordering::SeqCst);
        self.push_pairing(PairingItem::Success).await;
        self.emit(ProtocolEvent::PairSuccess {
            device_id: device_id.to_string(),
            platform: Some("android".into()),
        });
    }

    /// 模拟传输意外断开
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ProtocolEvent::Disconnected);
    }
}

#[async_trait]
impl ProtocolClient for MockProtocolClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.connect_error.lock().unwrap().clone() {
            return Err(ClientError::Transport(reason));
        }
        self.connected.store(true, Ordering::SeqCst);
        if self.device_id.lock().unwrap().is_some() {
            self.logged_in.store(true, Ordering::SeqCst);
            self.emit(ProtocolEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn device_id(&self) -> Option<String> {
        self.device_id.lock().unwrap().clone()
    }

    async fn pairing_stream(&self) -> Result<mpsc::Receiver<PairingItem>, ClientError> {
        let (tx, rx) = mpsc::channel(8);
        self.pairing_senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.logout_error.lock().unwrap().clone() {
            return Err(ClientError::Rejected(reason));
        }
        self.logged_in.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.device_id.lock().unwrap() = None;
        Ok(())
    }

    async fn upload(&self, data: Vec<u8>, _kind: MediaKind) -> Result<UploadHandle, ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(UploadHandle {
            url: "https://mmg.example.net/d/f/abc.enc".into(),
            direct_path: "/v/t62/abc.enc".into(),
            media_key: vec![1; 32],
            file_sha256: vec![2; 32],
            file_enc_sha256: vec![3; 32],
            file_length: data.len() as u64,
        })
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: OutgoingMessage,
    ) -> Result<SendReceipt, ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.clone(), message));
        Ok(SendReceipt {
            id: format!("3EB0{:08X}", sent.len()),
            timestamp: Utc::now(),
        })
    }

    async fn send_presence(&self, _presence: Presence) -> Result<(), ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_chat_presence(&self, _to: &Jid, _state: ChatPresence) -> Result<(), ClientError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_event_handler(&self, callback: EventCallback) -> u32 {
        let id = self.next_callback.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().insert(id, callback);
        id
    }

    fn remove_event_handler(&self, handler_id: u32) -> bool {
        self.callbacks.lock().unwrap().remove(&handler_id).is_some()
    }

    fn set_proxy(&self, proxy: Option<&ProxyConfig>) -> Result<(), ClientError> {
        *self.proxy.lock().unwrap() = proxy.cloned();
        Ok(())
    }
}

/// 记录每个会话创建过的客户端
#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<Vec<(String, Option<String>, Arc<MockProtocolClient>)>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 该会话最近创建的客户端
    pub fn client(&self, session_id: &str) -> Arc<MockProtocolClient> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == session_id)
            .map(|(_, _, client)| Arc::clone(client))
            .unwrap_or_else(|| panic!("no client created for {session_id}"))
    }

    /// 创建客户端时传入的设备身份
    pub fn device_requested(&self, session_id: &str) -> Option<String> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == session_id)
            .and_then(|(_, device, _)| device.clone())
    }

    pub fn created(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

#[async_trait]
impl ProtocolClientFactory for MockFactory {
    async fn create(
        &self,
        session_id: &str,
        device_id: Option<&str>,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let client = Arc::new(MockProtocolClient::new(device_id));
        self.clients.lock().unwrap().push((
            session_id.to_string(),
            device_id.map(str::to_string),
            Arc::clone(&client),
        ));
        Ok(client)
    }
}

/// 轮询直到条件成立，超时则失败
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
