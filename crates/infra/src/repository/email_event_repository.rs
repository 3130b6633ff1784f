//! # EmailEventRepository
//!
//! 送信イベントログの永続化を担当するリポジトリ。
//! 追記専用で、更新・削除のメソッドは持たない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::CampaignId,
    email::EmailRecordId,
    event::{EmailEvent, EmailEventId, EmailEventType},
};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// 送信イベントリポジトリトレイト
#[async_trait]
pub trait EmailEventRepository: Send + Sync {
    /// イベントを追記する
    async fn insert(&self, event: &EmailEvent) -> Result<(), InfraError>;

    /// 送信レコードのイベントを発生順に取得する
    async fn list_by_email_record(
        &self,
        email_record_id: &EmailRecordId,
    ) -> Result<Vec<EmailEvent>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct EmailEventRow {
    id:              Uuid,
    email_record_id: Uuid,
    campaign_id:     Uuid,
    event_type:      String,
    occurred_at:     DateTime<Utc>,
    metadata:        Json<JsonValue>,
}

impl TryFrom<EmailEventRow> for EmailEvent {
    type Error = InfraError;

    fn try_from(row: EmailEventRow) -> Result<Self, Self::Error> {
        let event_type = row.event_type.parse::<EmailEventType>().map_err(|e| {
            InfraError::corrupted(format!("不正なイベント種別 {}: {e}", row.event_type))
        })?;

        Ok(EmailEvent {
            id: EmailEventId::from_uuid(row.id),
            email_record_id: EmailRecordId::from_uuid(row.email_record_id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            event_type,
            occurred_at: row.occurred_at,
            metadata: row.metadata.0,
        })
    }
}

/// PostgreSQL 実装の EmailEventRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailEventRepository {
    pool: PgPool,
}

impl PostgresEmailEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailEventRepository for PostgresEmailEventRepository {
    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(email_record_id = %event.email_record_id, event_type = %event.event_type)
    )]
    async fn insert(&self, event: &EmailEvent) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO email_events (
                id, email_record_id, campaign_id, event_type, occurred_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.email_record_id.as_uuid())
        .bind(event.campaign_id.as_uuid())
        .bind(event.event_type.to_string())
        .bind(event.occurred_at)
        .bind(Json(&event.metadata))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(email_record_id = %email_record_id))]
    async fn list_by_email_record(
        &self,
        email_record_id: &EmailRecordId,
    ) -> Result<Vec<EmailEvent>, InfraError> {
        let rows: Vec<EmailEventRow> = sqlx::query_as(
            r#"
            SELECT id, email_record_id, campaign_id, event_type, occurred_at, metadata
            FROM email_events
            WHERE email_record_id = $1
            ORDER BY occurred_at ASC, created_at ASC, id ASC
            "#,
        )
        .bind(email_record_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EmailEvent::try_from).collect()
    }
}
