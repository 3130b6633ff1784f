//! 集計の再計算
//!
//! 送信レコードの現在のステータスを数え直し、キャンペーンの集計スナップショットとして保存する。
//! 差分の積み上げは行わないため、何度呼んでも同じ結果に収束する。
//!
//! 時刻は数え始める前に取る。並行した再計算のうち、後から始めた方の集計が
//! 先に保存されていれば、古い集計は書き込まれない（保存側の時刻ガード）。

use std::sync::Arc;

use hikyaku_domain::{campaign::CampaignId, clock::Clock, stats::CampaignStats};
use hikyaku_infra::repository::{CampaignRepository, EmailRecordRepository};

use crate::error::ServiceError;

/// キャンペーン集計の再計算
#[derive(Clone)]
pub struct StatsRecalculator {
    campaigns:     Arc<dyn CampaignRepository>,
    email_records: Arc<dyn EmailRecordRepository>,
    clock:         Arc<dyn Clock>,
}

impl StatsRecalculator {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        email_records: Arc<dyn EmailRecordRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            email_records,
            clock,
        }
    }

    /// 数え直して保存し、保存した集計を返す
    #[tracing::instrument(skip_all, level = "debug", fields(campaign_id = %campaign_id))]
    pub async fn recalculate(&self, campaign_id: &CampaignId) -> Result<CampaignStats, ServiceError> {
        let counted_at = self.clock.now();
        let counts = self.email_records.count_by_status(campaign_id).await?;
        let stats = CampaignStats::from_counts(counts);

        if !self
            .campaigns
            .update_stats(campaign_id, &stats, counted_at)
            .await?
        {
            tracing::debug!("より新しい集計が保存済みのため書き込みを省略");
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use hikyaku_domain::{
        campaign::{Campaign, NewCampaign, SenderIdentity},
        clock::FixedClock,
        email::{EmailRecord, EmailRecordId, EmailStatus, NewEmailRecord},
        recipient::{MergeFields, RecipientId},
        value_objects::{CampaignName, EmailAddress},
    };
    use hikyaku_infra::mock::{MockCampaignRepository, MockEmailRecordRepository};
    use pretty_assertions::assert_eq;

    use super::*;

    fn draft_campaign(now: DateTime<Utc>) -> Campaign {
        Campaign::new(NewCampaign {
            id: CampaignId::new(),
            name: CampaignName::new("秋のセール").unwrap(),
            template_id: None,
            recipient_source_id: None,
            sender: SenderIdentity {
                from_name:  "Hikyaku".to_string(),
                from_email: EmailAddress::new("news@example.com").unwrap(),
                reply_to:   None,
            },
            subject_override: None,
            now,
        })
    }

    fn pending_record(campaign_id: &CampaignId, address: &str, now: DateTime<Utc>) -> EmailRecord {
        EmailRecord::new(NewEmailRecord {
            id: EmailRecordId::new(),
            campaign_id: campaign_id.clone(),
            recipient_id: RecipientId::new(),
            email: EmailAddress::new(address).unwrap(),
            display_name: None,
            merge_fields: MergeFields {
                email: address.to_string(),
                ..MergeFields::default()
            },
            now,
        })
    }

    #[tokio::test]
    async fn test_ステータス別件数から集計を保存する() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();

        let campaign = draft_campaign(now);
        campaigns.add_campaign(campaign.clone());

        for (i, address) in ["a@example.com", "b@example.com"].iter().enumerate() {
            let record = pending_record(campaign.id(), address, now);
            let record = if i == 0 {
                record.mark_failed("mailbox full", now).unwrap()
            } else {
                record
            };
            email_records.add_record(record);
        }

        let sut = StatsRecalculator::new(
            Arc::new(campaigns.clone()),
            Arc::new(email_records),
            Arc::new(FixedClock::new(now)),
        );

        let stats = sut.recalculate(campaign.id()).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        let stored = campaigns.snapshot(campaign.id()).unwrap();
        assert_eq!(stored.stats(), &stats);
        assert_eq!(stored.stats_updated_at(), Some(now));
    }

    #[tokio::test]
    async fn test_後から始まった再計算の集計が保存済みなら古い集計で上書きしない() {
        // Arrange: 1 分後に始まった再計算が「失敗 1 件」を保存済み
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let later = now + TimeDelta::minutes(1);
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let campaign = draft_campaign(now);
        let newer = CampaignStats::from_counts([(EmailStatus::Failed, 1)]);
        campaigns.add_campaign(campaign.clone().with_stats(newer.clone(), later));
        email_records.add_record(pending_record(campaign.id(), "a@example.com", now));

        let sut = StatsRecalculator::new(
            Arc::new(campaigns.clone()),
            Arc::new(email_records),
            Arc::new(FixedClock::new(now)),
        );

        // Act: それより前に始まった再計算が遅れて書き込もうとする
        let counted = sut.recalculate(campaign.id()).await.unwrap();

        // Assert
        assert_eq!(counted.pending, 1);
        let stored = campaigns.snapshot(campaign.id()).unwrap();
        assert_eq!(stored.stats(), &newer);
        assert_eq!(stored.stats_updated_at(), Some(later));
    }

    #[tokio::test]
    async fn test_同じ時刻の再計算は上書きできる() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let campaign = draft_campaign(now);
        campaigns.add_campaign(campaign.clone().with_stats(CampaignStats::default(), now));
        email_records.add_record(pending_record(campaign.id(), "a@example.com", now));

        let sut = StatsRecalculator::new(
            Arc::new(campaigns.clone()),
            Arc::new(email_records),
            Arc::new(FixedClock::new(now)),
        );

        sut.recalculate(campaign.id()).await.unwrap();

        assert_eq!(campaigns.snapshot(campaign.id()).unwrap().stats().pending, 1);
    }
}
