//! # PostgreSQL 会话存储
//!
//! 表结构（由部署侧迁移创建）：
//!
//! ```sql
//! CREATE TABLE gateway_sessions (
//!     session_id    TEXT PRIMARY KEY,
//!     name          TEXT NOT NULL,
//!     device_id     TEXT,
//!     connected     BOOLEAN NOT NULL DEFAULT FALSE,
//!     last_error    TEXT,
//!     qr_code       TEXT,
//!     qr_expires_at TIMESTAMPTZ,
//!     proxy         JSONB,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL,
//!     last_seen_at  TIMESTAMPTZ
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::info;

use crate::domain::{ProxyConfig, Session, SessionStore};
use crate::error::{GatewayError, Result};

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    name: String,
    device_id: Option<String>,
    connected: bool,
    last_error: Option<String>,
    qr_code: Option<String>,
    qr_expires_at: Option<DateTime<Utc>>,
    proxy: Option<Json<ProxyConfig>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        // 码与过期时间任一缺失都视为没有待扫描的码
        let qr = row.qr_code.zip(row.qr_expires_at);
        Session::reconstitute(
            row.session_id,
            row.name,
            row.device_id,
            row.connected,
            row.last_error,
            qr,
            row.proxy.map(|Json(proxy)| proxy),
            row.created_at,
            row.updated_at,
            row.last_seen_at,
        )
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, name, device_id, connected, last_error, qr_code,
           qr_expires_at, proxy, created_at, updated_at, last_seen_at
    FROM gateway_sessions
"#;

/// PostgreSQL 会话存储实现
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// 建立连接池
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await?;
        info!(
            max_connections = max_connections.unwrap_or(10),
            "✅ PostgreSQL session store connected"
        );
        Ok(Self::new(Arc::new(pool)))
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_COLUMNS} WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let (qr_code, qr_expires_at) = match session.qr_code() {
            Some((code, expires_at)) => (Some(code), Some(expires_at)),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE gateway_sessions
            SET name = $2,
                device_id = $3,
                connected = $4,
                last_error = $5,
                qr_code = $6,
                qr_expires_at = $7,
                proxy = $8,
                updated_at = $9,
                last_seen_at = $10
            WHERE session_id = $1
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.name)
        .bind(&session.device_id)
        .bind(session.connected)
        .bind(&session.last_error)
        .bind(qr_code)
        .bind(qr_expires_at)
        .bind(session.proxy.as_ref().map(Json))
        .bind(session.updated_at)
        .bind(session.last_seen_at)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(session.session_id.clone()));
        }
        Ok(())
    }

    async fn create(&self, session: Session) -> Result<()> {
        let (qr_code, qr_expires_at) = match session.qr_code() {
            Some((code, expires_at)) => (Some(code.to_string()), Some(expires_at)),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO gateway_sessions (
                session_id, name, device_id, connected, last_error, qr_code,
                qr_expires_at, proxy, created_at, updated_at, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.name)
        .bind(&session.device_id)
        .bind(session.connected)
        .bind(&session.last_error)
        .bind(qr_code)
        .bind(qr_expires_at)
        .bind(session.proxy.as_ref().map(Json))
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.last_seen_at)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::AlreadyExists(session.session_id));
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM gateway_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!("{SELECT_COLUMNS} ORDER BY created_at"))
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }
}
