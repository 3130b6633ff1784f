//! # EmailRecordRepository
//!
//! 送信レコードの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **一括作成は 1 トランザクション**: 送信レコードの作成（materialization）だけは
//!   キャンペーン単位でまとめて挿入する。`(campaign_id, email)` の一意制約に
//!   `ON CONFLICT DO NOTHING` を組み合わせ、同時 start でも宛先ごとに 1 件しか作らない
//! - **送信結果は pending ガード付き**: 送信処理の書き込みは `status = 'pending'` の行にだけ効く
//! - **受信イベントは 1 文で適用**: 読んでから書くのではなく、行ロック付き CTE と UPDATE を
//!   1 文にまとめる。重複 Webhook が同時に届いても到達日時は最初の 1 回しか記録されない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::CampaignId,
    delivery::ProviderMessageId,
    email::{
        EmailRecord,
        EmailRecordId,
        EmailRecordRecord,
        EmailStatus,
        EmailTransition,
        TransitionOutcome,
    },
    recipient::{MergeFields, RecipientId},
    value_objects::EmailAddress,
};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// 送信レコードリポジトリトレイト
#[async_trait]
pub trait EmailRecordRepository: Send + Sync {
    /// 送信レコードをまとめて作成する
    ///
    /// 同じキャンペーン・同じアドレスのレコードが既にあれば、その宛先は作らない。
    ///
    /// # 戻り値
    ///
    /// 実際に作成した件数
    async fn insert_many_if_absent(&self, records: &[EmailRecord]) -> Result<u64, InfraError>;

    /// キャンペーンの送信レコード件数を数える（`status` 指定時はそのステータスのみ）
    async fn count(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
    ) -> Result<u64, InfraError>;

    /// ID で送信レコードを取得する
    async fn find_by_id(&self, id: &EmailRecordId) -> Result<Option<EmailRecord>, InfraError>;

    /// プロバイダメッセージ ID で送信レコードを取得する
    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &ProviderMessageId,
    ) -> Result<Option<EmailRecord>, InfraError>;

    /// 未送信の送信レコードを作成順に取得する
    async fn find_pending(
        &self,
        campaign_id: &CampaignId,
        limit: u32,
    ) -> Result<Vec<EmailRecord>, InfraError>;

    /// 送信処理の結果（sent / failed / unsubscribed）を書き込む
    ///
    /// DB 上でまだ `pending` の行にだけ書き込む。書き込めたら `true`。
    async fn record_send_outcome(&self, record: &EmailRecord) -> Result<bool, InfraError>;

    /// 受信イベントによる遷移を適用する
    ///
    /// 判定規則は [`EmailRecord::apply_transition`] と同じ。
    /// レコードが存在しない場合は `Ignored` を返す。
    async fn apply_transition(
        &self,
        id: &EmailRecordId,
        transition: &EmailTransition,
    ) -> Result<TransitionOutcome, InfraError>;

    /// キャンペーンのステータス別件数を取得する
    async fn count_by_status(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<(EmailStatus, u64)>, InfraError>;

    /// キャンペーンの送信レコード一覧を作成順に取得する
    async fn list(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EmailRecord>, InfraError>;
}

/// email_records テーブルの行
#[derive(Debug, sqlx::FromRow)]
struct EmailRecordRow {
    id: Uuid,
    campaign_id: Uuid,
    recipient_id: Uuid,
    email: String,
    display_name: Option<String>,
    merge_fields: Json<MergeFields>,
    status: String,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    provider_message_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_status(raw: &str) -> Result<EmailStatus, InfraError> {
    raw.parse::<EmailStatus>()
        .map_err(|e| InfraError::corrupted(format!("不正な送信ステータス {raw}: {e}")))
}

impl TryFrom<EmailRecordRow> for EmailRecord {
    type Error = InfraError;

    fn try_from(row: EmailRecordRow) -> Result<Self, Self::Error> {
        let record = EmailRecord::from_db(EmailRecordRecord {
            id: EmailRecordId::from_uuid(row.id),
            campaign_id: CampaignId::from_uuid(row.campaign_id),
            recipient_id: RecipientId::from_uuid(row.recipient_id),
            email: EmailAddress::new(row.email)?,
            display_name: row.display_name,
            merge_fields: row.merge_fields.0,
            status: parse_status(&row.status)?,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            opened_at: row.opened_at,
            clicked_at: row.clicked_at,
            bounced_at: row.bounced_at,
            unsubscribed_at: row.unsubscribed_at,
            error_message: row.error_message,
            provider_message_id: row.provider_message_id.map(ProviderMessageId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })?;

        Ok(record)
    }
}

/// apply_transition の RETURNING 行
#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    previous_status: String,
    current_status:  String,
    stamped:         bool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, campaign_id, recipient_id, email, display_name, merge_fields,
        status, sent_at, delivered_at, opened_at, clicked_at, bounced_at, unsubscribed_at,
        error_message, provider_message_id, created_at, updated_at
    FROM email_records
"#;

/// エンゲージメント順位の配列。`array_position` の戻り値が順位 + 1 になる
const ENGAGEMENT_ORDER: &str = "ARRAY['pending', 'sent', 'delivered', 'opened', 'clicked']::text[]";

/// 受信イベント適用の SQL
///
/// - `prev`: 適用前のステータスと対象の到達日時を行ロック付きで読む
/// - 吸収状態の行は WHERE で除外され、RETURNING が空になる
/// - 各到達日時は `COALESCE(既存, $3)` で最初の 1 回だけ記録する
fn apply_transition_sql() -> String {
    format!(
        r#"
        WITH prev AS (
            SELECT
                id,
                status,
                CASE $2
                    WHEN 'delivered' THEN delivered_at
                    WHEN 'opened' THEN opened_at
                    WHEN 'clicked' THEN clicked_at
                    WHEN 'bounced' THEN bounced_at
                    WHEN 'unsubscribed' THEN unsubscribed_at
                END AS target_at
            FROM email_records
            WHERE id = $1
            FOR UPDATE
        )
        UPDATE email_records r SET
            status = CASE
                WHEN $2 IN ('bounced', 'unsubscribed') THEN $2
                WHEN array_position({order}, $2) > array_position({order}, r.status::text) THEN $2
                ELSE r.status
            END,
            delivered_at = CASE WHEN $2 = 'delivered' THEN COALESCE(r.delivered_at, $3) ELSE r.delivered_at END,
            opened_at = CASE WHEN $2 = 'opened' THEN COALESCE(r.opened_at, $3) ELSE r.opened_at END,
            clicked_at = CASE WHEN $2 = 'clicked' THEN COALESCE(r.clicked_at, $3) ELSE r.clicked_at END,
            bounced_at = CASE WHEN $2 = 'bounced' THEN COALESCE(r.bounced_at, $3) ELSE r.bounced_at END,
            unsubscribed_at = CASE
                WHEN $2 = 'unsubscribed' THEN COALESCE(r.unsubscribed_at, $3)
                ELSE r.unsubscribed_at
            END,
            error_message = CASE
                WHEN $2 IN ('bounced', 'unsubscribed') THEN COALESCE($4, r.error_message)
                ELSE r.error_message
            END,
            updated_at = CASE
                WHEN $2 IN ('bounced', 'unsubscribed')
                    OR array_position({order}, $2) > array_position({order}, r.status::text)
                    OR prev.target_at IS NULL
                THEN $3
                ELSE r.updated_at
            END
        FROM prev
        WHERE r.id = prev.id
          AND prev.status NOT IN ('failed', 'bounced', 'unsubscribed')
        RETURNING
            prev.status AS previous_status,
            r.status AS current_status,
            (prev.target_at IS NULL) AS stamped
        "#,
        order = ENGAGEMENT_ORDER,
    )
}

/// PostgreSQL 実装の EmailRecordRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailRecordRepository {
    pool: PgPool,
}

impl PostgresEmailRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailRecordRepository for PostgresEmailRecordRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(count = records.len()))]
    async fn insert_many_if_absent(&self, records: &[EmailRecord]) -> Result<u64, InfraError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO email_records (
                    id, campaign_id, recipient_id, email, display_name, merge_fields,
                    status, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT ON CONSTRAINT email_records_campaign_email_key DO NOTHING
                "#,
            )
            .bind(record.id().as_uuid())
            .bind(record.campaign_id().as_uuid())
            .bind(record.recipient_id().as_uuid())
            .bind(record.email().as_str())
            .bind(record.display_name())
            .bind(Json(record.merge_fields()))
            .bind(record.status().to_string())
            .bind(record.created_at())
            .bind(record.updated_at())
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn count(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
    ) -> Result<u64, InfraError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM email_records
            WHERE campaign_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(campaign_id.as_uuid())
        .bind(status.map(|s| s.to_string()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.try_into().unwrap_or_default())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(email_record_id = %id))]
    async fn find_by_id(&self, id: &EmailRecordId) -> Result<Option<EmailRecord>, InfraError> {
        let row: Option<EmailRecordRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(EmailRecord::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(provider_message_id = %provider_message_id))]
    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &ProviderMessageId,
    ) -> Result<Option<EmailRecord>, InfraError> {
        let row: Option<EmailRecordRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE provider_message_id = $1 ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(provider_message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EmailRecord::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn find_pending(
        &self,
        campaign_id: &CampaignId,
        limit: u32,
    ) -> Result<Vec<EmailRecord>, InfraError> {
        let rows: Vec<EmailRecordRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE campaign_id = $1 AND status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(campaign_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EmailRecord::try_from).collect()
    }

    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(email_record_id = %record.id(), status = %record.status())
    )]
    async fn record_send_outcome(&self, record: &EmailRecord) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE email_records SET
                status = $2,
                sent_at = $3,
                unsubscribed_at = $4,
                error_message = $5,
                provider_message_id = $6,
                updated_at = $7
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.status().to_string())
        .bind(record.sent_at())
        .bind(record.unsubscribed_at())
        .bind(record.error_message())
        .bind(record.provider_message_id().map(ProviderMessageId::as_str))
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(email_record_id = %id, target = %transition.target)
    )]
    async fn apply_transition(
        &self,
        id: &EmailRecordId,
        transition: &EmailTransition,
    ) -> Result<TransitionOutcome, InfraError> {
        let row: Option<TransitionRow> = sqlx::query_as(&apply_transition_sql())
            .bind(id.as_uuid())
            .bind(transition.target.to_string())
            .bind(transition.occurred_at)
            .bind(transition.reason.as_deref())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(TransitionOutcome::Ignored);
        };

        let outcome = if row.previous_status != row.current_status {
            TransitionOutcome::Applied
        } else if row.stamped {
            TransitionOutcome::TimestampOnly
        } else {
            TransitionOutcome::Ignored
        };
        Ok(outcome)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn count_by_status(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<(EmailStatus, u64)>, InfraError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM email_records
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| Ok((parse_status(&status)?, count.try_into().unwrap_or_default())))
            .collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn list(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EmailRecord>, InfraError> {
        let rows: Vec<EmailRecordRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE campaign_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at ASC, id ASC LIMIT $3 OFFSET $4"
        ))
        .bind(campaign_id.as_uuid())
        .bind(status.map(|s| s.to_string()))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EmailRecord::try_from).collect()
    }
}
