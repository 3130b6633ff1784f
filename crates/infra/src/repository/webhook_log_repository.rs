//! # WebhookLogRepository
//!
//! 受信 Webhook の生ログの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **受信直後に記録**: 解釈や突合より先に、生のペイロードを `processed = false` で保存する
//! - **処理済みは 1 回だけ**: 処理が終わった（または理由付きで諦めた）時点で `processed = true` にする。
//!   内部エラーで中断した場合は `error` だけを記録し、未処理のまま残す

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hikyaku_domain::webhook::InboundWebhookLogId;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// 受信 Webhook ログ
#[derive(Debug, Clone, PartialEq)]
pub struct InboundWebhookLog {
    pub id:           InboundWebhookLogId,
    pub payload:      JsonValue,
    pub processed:    bool,
    /// 処理済みにした理由の注記（未突合・未対応イベントなど）
    pub note:         Option<String>,
    /// 内部エラーの内容
    pub error:        Option<String>,
    pub received_at:  DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl InboundWebhookLog {
    /// 受信直後（未処理）のログを作成する
    pub fn received(payload: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            id: InboundWebhookLogId::new(),
            payload,
            processed: false,
            note: None,
            error: None,
            received_at: now,
            processed_at: None,
        }
    }
}

/// 受信 Webhook ログリポジトリトレイト
#[async_trait]
pub trait WebhookLogRepository: Send + Sync {
    /// ログを保存する
    async fn insert(&self, log: &InboundWebhookLog) -> Result<(), InfraError>;

    /// 処理済みにする
    async fn mark_processed(
        &self,
        id: &InboundWebhookLogId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// 内部エラーを記録する（未処理のまま）
    async fn mark_failed(
        &self,
        id: &InboundWebhookLogId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    /// ID でログを取得する
    async fn find_by_id(
        &self,
        id: &InboundWebhookLogId,
    ) -> Result<Option<InboundWebhookLog>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct InboundWebhookLogRow {
    id:           Uuid,
    payload:      Json<JsonValue>,
    processed:    bool,
    note:         Option<String>,
    error:        Option<String>,
    received_at:  DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<InboundWebhookLogRow> for InboundWebhookLog {
    fn from(row: InboundWebhookLogRow) -> Self {
        Self {
            id:           InboundWebhookLogId::from_uuid(row.id),
            payload:      row.payload.0,
            processed:    row.processed,
            note:         row.note,
            error:        row.error,
            received_at:  row.received_at,
            processed_at: row.processed_at,
        }
    }
}

/// PostgreSQL 実装の WebhookLogRepository
#[derive(Debug, Clone)]
pub struct PostgresWebhookLogRepository {
    pool: PgPool,
}

impl PostgresWebhookLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLogRepository for PostgresWebhookLogRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(log_id = %log.id))]
    async fn insert(&self, log: &InboundWebhookLog) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO inbound_webhook_logs (
                id, payload, processed, note, error, received_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(Json(&log.payload))
        .bind(log.processed)
        .bind(log.note.as_deref())
        .bind(log.error.as_deref())
        .bind(log.received_at)
        .bind(log.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(log_id = %id))]
    async fn mark_processed(
        &self,
        id: &InboundWebhookLogId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            UPDATE inbound_webhook_logs
            SET processed = TRUE, note = COALESCE($2, note), processed_at = $3
            WHERE id = $1 AND NOT processed
            "#,
        )
        .bind(id.as_uuid())
        .bind(note)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(log_id = %id))]
    async fn mark_failed(
        &self,
        id: &InboundWebhookLogId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            UPDATE inbound_webhook_logs
            SET error = $2, processed_at = $3
            WHERE id = $1 AND NOT processed
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(log_id = %id))]
    async fn find_by_id(
        &self,
        id: &InboundWebhookLogId,
    ) -> Result<Option<InboundWebhookLog>, InfraError> {
        let row: Option<InboundWebhookLogRow> = sqlx::query_as(
            r#"
            SELECT id, payload, processed, note, error, received_at, processed_at
            FROM inbound_webhook_logs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(InboundWebhookLog::from))
    }
}
