//! # UnsubscribeRepository
//!
//! 配信停止エントリの永続化を担当するリポジトリ。
//! エントリは削除しない。同じアドレス・同じ範囲の登録は 1 件にまとまる。

use async_trait::async_trait;
use hikyaku_domain::{
    campaign::CampaignId,
    unsubscribe::UnsubscribeEntry,
    value_objects::EmailAddress,
};
use sqlx::PgPool;

use crate::error::InfraError;

/// 配信停止リポジトリトレイト
#[async_trait]
pub trait UnsubscribeRepository: Send + Sync {
    /// 配信停止エントリを登録する
    ///
    /// 同じアドレス・同じ範囲（全体 or キャンペーン）のエントリが既にあれば何もしない。
    /// 新規に登録したら `true`。
    async fn insert_if_absent(&self, entry: &UnsubscribeEntry) -> Result<bool, InfraError>;

    /// 指定したキャンペーンへの送信が停止されているか
    ///
    /// 全体停止のエントリと、そのキャンペーン限定のエントリの両方を見る。
    async fn is_suppressed(
        &self,
        email: &EmailAddress,
        campaign_id: &CampaignId,
    ) -> Result<bool, InfraError>;
}

/// PostgreSQL 実装の UnsubscribeRepository
#[derive(Debug, Clone)]
pub struct PostgresUnsubscribeRepository {
    pool: PgPool,
}

impl PostgresUnsubscribeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnsubscribeRepository for PostgresUnsubscribeRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(source = %entry.source))]
    async fn insert_if_absent(&self, entry: &UnsubscribeEntry) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            INSERT INTO unsubscribes (id, email, campaign_id, source, email_record_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT unsubscribes_email_campaign_key DO NOTHING
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.email.as_str())
        .bind(entry.campaign_id.as_ref().map(|c| *c.as_uuid()))
        .bind(entry.source.to_string())
        .bind(entry.email_record_id.as_ref().map(|r| *r.as_uuid()))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    async fn is_suppressed(
        &self,
        email: &EmailAddress,
        campaign_id: &CampaignId,
    ) -> Result<bool, InfraError> {
        let suppressed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM unsubscribes
                WHERE email = $1 AND (campaign_id IS NULL OR campaign_id = $2)
            )
            "#,
        )
        .bind(email.as_str())
        .bind(campaign_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(suppressed)
    }
}
