use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;

use crate::config::WebhookConfig;
use crate::domain::NormalizedMessage;
use crate::error::{GatewayError, Result};

use super::super::types::{EventHandler, HandlerEvent};

type HmacSha256 = Hmac<Sha256>;

/// 签名请求头
pub const SIGNATURE_HEADER: &str = "x-flare-signature";

/// 对请求体计算 HMAC-SHA256，返回十六进制字符串
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| GatewayError::Configuration(format!("invalid webhook secret: {err}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Serialize)]
struct WebhookRequest<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    event: &'a HandlerEvent,
    sent_at: i64,
}

/// 以 JSON POST 投递事件的处理器
#[derive(Clone)]
pub struct WebhookEventHandler {
    client: Client,
    endpoint: String,
    secret: Option<String>,
    headers: HashMap<String, String>,
}

impl WebhookEventHandler {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout())
            .build()
            .map_err(|err| {
                GatewayError::Configuration(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: config.url.clone(),
            secret: config.secret.clone(),
            headers: config.headers.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, session_id: &str, event: HandlerEvent) -> Result<()> {
        let request = WebhookRequest {
            session_id,
            event: &event,
            sent_at: Utc::now().timestamp_millis(),
        };
        let body = serde_json::to_vec(&request).map_err(|err| GatewayError::Delivery {
            target: self.endpoint.clone(),
            reason: format!("failed to encode payload: {err}"),
        })?;

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if let Some(secret) = &self.secret {
            builder = builder.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        match builder.body(body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(GatewayError::Delivery {
                target: self.endpoint.clone(),
                reason: format!("unexpected status {}", resp.status()),
            }),
            Err(err) => Err(GatewayError::Delivery {
                target: self.endpoint.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl EventHandler for WebhookEventHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle_message(&self, session_id: &str, message: &NormalizedMessage) -> Result<()> {
        self.post(session_id, HandlerEvent::Message(message.clone()))
            .await
    }

    async fn handle_connection(&self, session_id: &str, connected: bool) -> Result<()> {
        self.post(session_id, HandlerEvent::Connection { connected })
            .await
    }

    async fn handle_pairing_code(&self, session_id: &str, code: &str) -> Result<()> {
        self.post(
            session_id,
            HandlerEvent::PairingCode {
                code: code.to_string(),
            },
        )
        .await
    }

    async fn handle_pair_success(&self, session_id: &str) -> Result<()> {
        self.post(session_id, HandlerEvent::PairSuccess).await
    }
}
