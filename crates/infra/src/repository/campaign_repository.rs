//! # CampaignRepository
//!
//! キャンペーンの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **ステータスガード付き更新**: 状態の書き込みは「DB 上のステータスが期待値のときだけ」行う。
//!   スケジューラの重複 tick や手動開始との競合では、負けた側が何も書かずに `false` を受け取る
//! - **集計は別経路**: `stats` は状態と無関係な派生値なので、ステータスではなく
//!   `stats_updated_at` でガードする。より新しい時点の集計が保存済みなら上書きしない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::{Campaign, CampaignId, CampaignRecord, CampaignStatus, SenderIdentity},
    recipient::{RecipientSourceId, TemplateId},
    stats::CampaignStats,
    value_objects::{CampaignName, EmailAddress},
};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// キャンペーンリポジトリトレイト
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// キャンペーンを新規登録する
    async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError>;

    /// ID でキャンペーンを取得する
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError>;

    /// キャンペーン一覧を作成日時の新しい順に取得する
    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Campaign>, InfraError>;

    /// キャンペーンを削除する（送信レコード・イベントも連鎖削除）
    ///
    /// 送信中のキャンペーンは削除しない。削除できたら `true`。
    async fn delete(&self, id: &CampaignId) -> Result<bool, InfraError>;

    /// 予約日時が到来した予約済みキャンペーンを取得する
    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Campaign>, InfraError>;

    /// 状態を書き込む（ステータスガード付き）
    ///
    /// DB 上のステータスが `expected` のときだけ、`campaign` の状態と日時を書き込む。
    ///
    /// # 戻り値
    ///
    /// - `Ok(true)`: 書き込めた
    /// - `Ok(false)`: ステータスが既に変わっていた（競合に負けた）
    async fn update_state(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool, InfraError>;

    /// 集計スナップショットを書き込む（時刻ガード付き）
    ///
    /// `at` は数え始める前の時刻。保存済みの `stats_updated_at` が `at` より後なら書き込まない。
    ///
    /// # 戻り値
    ///
    /// - `Ok(true)`: 書き込めた
    /// - `Ok(false)`: より新しい集計が既に保存されていた
    async fn update_stats(
        &self,
        id: &CampaignId,
        stats: &CampaignStats,
        at: DateTime<Utc>,
    ) -> Result<bool, InfraError>;
}

/// campaigns テーブルの行
#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    template_id: Option<Uuid>,
    recipient_source_id: Option<Uuid>,
    from_name: String,
    from_email: String,
    reply_to: Option<String>,
    subject_override: Option<String>,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    stats: Json<CampaignStats>,
    stats_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = InfraError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<CampaignStatus>()
            .map_err(|e| InfraError::corrupted(format!("不正なキャンペーンステータス {}: {e}", row.status)))?;

        let campaign = Campaign::from_db(CampaignRecord {
            id: CampaignId::from_uuid(row.id),
            name: CampaignName::new(row.name)?,
            template_id: row.template_id.map(TemplateId::from_uuid),
            recipient_source_id: row.recipient_source_id.map(RecipientSourceId::from_uuid),
            sender: SenderIdentity {
                from_name:  row.from_name,
                from_email: EmailAddress::new(row.from_email)?,
                reply_to:   row.reply_to.map(EmailAddress::new).transpose()?,
            },
            subject_override: row.subject_override,
            status,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            stats: row.stats.0,
            stats_updated_at: row.stats_updated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })?;

        Ok(campaign)
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, name, template_id, recipient_source_id,
        from_name, from_email, reply_to, subject_override,
        status, scheduled_at, started_at, completed_at,
        stats, stats_updated_at, created_at, updated_at
    FROM campaigns
"#;

/// PostgreSQL 実装の CampaignRepository
#[derive(Debug, Clone)]
pub struct PostgresCampaignRepository {
    pool: PgPool,
}

impl PostgresCampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign.id()))]
    async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
        let sender = campaign.sender();
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, template_id, recipient_source_id,
                from_name, from_email, reply_to, subject_override,
                status, scheduled_at, started_at, completed_at,
                stats, stats_updated_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(campaign.id().as_uuid())
        .bind(campaign.name().as_str())
        .bind(campaign.template_id().map(|t| *t.as_uuid()))
        .bind(campaign.recipient_source_id().map(|r| *r.as_uuid()))
        .bind(&sender.from_name)
        .bind(sender.from_email.as_str())
        .bind(sender.reply_to.as_ref().map(EmailAddress::as_str))
        .bind(campaign.subject_override())
        .bind(campaign.status().to_string())
        .bind(campaign.scheduled_at())
        .bind(campaign.started_at())
        .bind(campaign.completed_at())
        .bind(Json(campaign.stats()))
        .bind(campaign.stats_updated_at())
        .bind(campaign.created_at())
        .bind(campaign.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %id))]
    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
        let row: Option<CampaignRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Campaign::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Campaign>, InfraError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(status.map(|s| s.to_string()))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %id))]
    async fn delete(&self, id: &CampaignId) -> Result<bool, InfraError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND status <> 'sending'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Campaign>, InfraError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE status = 'scheduled' AND scheduled_at <= $1 \
             ORDER BY scheduled_at ASC LIMIT $2"
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(campaign_id = %campaign.id(), expected = %expected, next = %campaign.status())
    )]
    async fn update_state(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $3,
                scheduled_at = $4,
                started_at = $5,
                completed_at = $6,
                updated_at = $7
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(campaign.id().as_uuid())
        .bind(expected.to_string())
        .bind(campaign.status().to_string())
        .bind(campaign.scheduled_at())
        .bind(campaign.started_at())
        .bind(campaign.completed_at())
        .bind(campaign.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %id))]
    async fn update_stats(
        &self,
        id: &CampaignId,
        stats: &CampaignStats,
        at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET stats = $2, stats_updated_at = $3
            WHERE id = $1
              AND (stats_updated_at IS NULL OR stats_updated_at <= $3)
            "#,
        )
        .bind(id.as_uuid())
        .bind(Json(stats))
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresCampaignRepository>();
    }
}
