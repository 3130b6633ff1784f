//! # 予約キャンペーンのスケジューラ
//!
//! 一定間隔で予約日時が到来したキャンペーンを探し、`sending` に昇格させて送信タスクを起動する。
//! 起動直後にも 1 回実行するため、停止中に期限を迎えたキャンペーンも次の間隔を待たない。
//!
//! 昇格は `scheduled` を条件にした書き込みで行うため、ティックの重なりや手動開始と競合しても
//! 二重に開始されることはない（負けた側は何もしない）。

use std::{sync::Arc, time::Duration};

use hikyaku_domain::{campaign::CampaignId, clock::Clock};
use hikyaku_infra::repository::CampaignRepository;
use hikyaku_shared::event_log::error as log_error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::CampaignUseCaseImpl;
use crate::error::ServiceError;

/// 1 回のティックで昇格を試みる最大件数
const DUE_BATCH_LIMIT: u32 = 100;

/// 予約キャンペーンのスケジューラ
pub struct CampaignScheduler {
    usecase:   Arc<CampaignUseCaseImpl>,
    campaigns: Arc<dyn CampaignRepository>,
    clock:     Arc<dyn Clock>,
    interval:  Duration,
}

impl CampaignScheduler {
    pub fn new(
        usecase: Arc<CampaignUseCaseImpl>,
        campaigns: Arc<dyn CampaignRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            usecase,
            campaigns,
            clock,
            interval,
        }
    }

    /// 期限の来た予約キャンペーンを昇格させ、昇格できた件数を返す
    ///
    /// 1 件の失敗は記録して次のキャンペーンに進む。
    #[tracing::instrument(skip_all)]
    pub async fn tick(&self) -> Result<usize, ServiceError> {
        let due = self
            .campaigns
            .find_due_scheduled(self.clock.now(), DUE_BATCH_LIMIT)
            .await?;

        let mut promoted = 0;
        for campaign in due {
            let campaign_id = campaign.id().clone();
            match self.usecase.promote(campaign).await {
                Ok(true) => promoted += 1,
                Ok(false) => {
                    tracing::debug!(campaign_id = %campaign_id, "他の呼び出しが先に昇格させた");
                }
                Err(e) => {
                    tracing::warn!(
                        error.category = log_error::category::INFRASTRUCTURE,
                        error.kind = log_error::kind::SCHEDULER,
                        campaign_id = %campaign_id,
                        "予約キャンペーンの昇格に失敗: {}",
                        e
                    );
                }
            }
        }

        Ok(promoted)
    }

    /// 停止要求を受けるまでティックを繰り返す
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "スケジューラを開始"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(promoted) => tracing::info!(promoted, "予約キャンペーンを昇格"),
                        Err(e) => tracing::error!(
                            error.category = log_error::category::INFRASTRUCTURE,
                            error.kind = log_error::kind::SCHEDULER,
                            "スケジューラのティックに失敗: {}",
                            e
                        ),
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("スケジューラを停止");
                    break;
                }
            }
        }
    }

    /// 予約日時を待たずに開始する
    pub async fn start_now(&self, campaign_id: &CampaignId) -> Result<(), ServiceError> {
        self.usecase.start(campaign_id).await.map(|_| ())
    }

    /// 実行中の送信タスクに停止を要求する
    pub fn stop(&self, campaign_id: &CampaignId) -> bool {
        self.usecase.dispatcher().stop(campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use hikyaku_domain::{
        campaign::{Campaign, CampaignStatus, NewCampaign, SenderIdentity},
        clock::FixedClock,
        recipient::{RecipientSourceId, TemplateId},
        template::TemplateContent,
        value_objects::{CampaignName, EmailAddress},
    };
    use hikyaku_infra::mock::{
        MockCampaignRepository,
        MockDeliveryProvider,
        MockEmailEventRepository,
        MockEmailRecordRepository,
        MockRecipientSource,
        MockTemplateResolver,
        MockUnsubscribeRepository,
        MockWebhookLogRepository,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::SenderConfig,
        usecase::{ActiveCampaignRegistry, CampaignSender, Repositories, SendDispatcher},
    };

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn scheduled_campaign(
        templates: &MockTemplateResolver,
        scheduled_at: DateTime<Utc>,
    ) -> Campaign {
        let template_id = TemplateId::new();
        templates.add_template(
            template_id.clone(),
            TemplateContent {
                subject: Some("お知らせ".to_string()),
                ..TemplateContent::default()
            },
        );
        let created_at = scheduled_at - TimeDelta::days(1);
        Campaign::new(NewCampaign {
            id: CampaignId::new(),
            name: CampaignName::new("定期便").unwrap(),
            template_id: Some(template_id),
            recipient_source_id: Some(RecipientSourceId::new()),
            sender: SenderIdentity {
                from_name:  "Hikyaku".to_string(),
                from_email: EmailAddress::new("news@example.com").unwrap(),
                reply_to:   None,
            },
            subject_override: None,
            now: created_at,
        })
        .scheduled(scheduled_at, created_at)
        .unwrap()
    }

    fn scheduler(
        campaigns: &MockCampaignRepository,
        email_records: &MockEmailRecordRepository,
        templates: &MockTemplateResolver,
        registry: &ActiveCampaignRegistry,
    ) -> CampaignScheduler {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now()));
        let repos = Repositories {
            campaigns:     Arc::new(campaigns.clone()),
            email_records: Arc::new(email_records.clone()),
            email_events:  Arc::new(MockEmailEventRepository::new()),
            unsubscribes:  Arc::new(MockUnsubscribeRepository::new()),
            webhook_logs:  Arc::new(MockWebhookLogRepository::new()),
        };
        let sender = CampaignSender::new(
            repos.clone(),
            Arc::new(templates.clone()),
            Arc::new(MockDeliveryProvider::new()),
            clock.clone(),
            SenderConfig {
                send_delay: Duration::ZERO,
                ..SenderConfig::default()
            },
        );
        let dispatcher = SendDispatcher::new(Arc::new(sender), registry.clone());
        let usecase = CampaignUseCaseImpl::new(
            repos,
            Arc::new(MockRecipientSource::new()),
            Arc::new(templates.clone()),
            dispatcher,
            clock.clone(),
        );
        CampaignScheduler::new(
            Arc::new(usecase),
            Arc::new(campaigns.clone()),
            clock,
            Duration::from_secs(60),
        )
    }

    /// 予約時に生成済みの送信レコードを 1 件用意する
    fn add_pending_record(email_records: &MockEmailRecordRepository, campaign: &Campaign) {
        use hikyaku_domain::{
            email::{EmailRecord, EmailRecordId, NewEmailRecord},
            recipient::{MergeFields, RecipientId},
        };

        email_records.add_record(EmailRecord::new(NewEmailRecord {
            id: EmailRecordId::new(),
            campaign_id: campaign.id().clone(),
            recipient_id: RecipientId::new(),
            email: EmailAddress::new("a@example.com").unwrap(),
            display_name: None,
            merge_fields: MergeFields {
                email: "a@example.com".to_string(),
                ..MergeFields::default()
            },
            now: now(),
        }));
    }

    #[tokio::test]
    async fn test_期限が来た予約だけを昇格させる() {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let templates = MockTemplateResolver::new();
        let registry = ActiveCampaignRegistry::new();
        let due = scheduled_campaign(&templates, now() - TimeDelta::minutes(5));
        let future = scheduled_campaign(&templates, now() + TimeDelta::minutes(5));
        add_pending_record(&email_records, &due);
        add_pending_record(&email_records, &future);
        campaigns.add_campaign(due.clone());
        campaigns.add_campaign(future.clone());
        let sut = scheduler(&campaigns, &email_records, &templates, &registry);

        let promoted = sut.tick().await.unwrap();

        assert_eq!(promoted, 1);
        let stored_due = campaigns.snapshot(due.id()).unwrap();
        assert_eq!(stored_due.status(), CampaignStatus::Sending);
        assert_eq!(stored_due.started_at(), Some(now()));
        assert_eq!(
            campaigns.snapshot(future.id()).unwrap().status(),
            CampaignStatus::Scheduled
        );
        assert!(registry.is_active(due.id()));
    }

    #[tokio::test]
    async fn test_既に昇格済みのキャンペーンは数えない() {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let templates = MockTemplateResolver::new();
        let registry = ActiveCampaignRegistry::new();
        let due = scheduled_campaign(&templates, now() - TimeDelta::minutes(5));
        add_pending_record(&email_records, &due);
        campaigns.add_campaign(due.clone());
        let sut = scheduler(&campaigns, &email_records, &templates, &registry);

        let first = sut.tick().await.unwrap();
        let second = sut.tick().await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn test_停止要求でrunが終了する() {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let templates = MockTemplateResolver::new();
        let registry = ActiveCampaignRegistry::new();
        let due = scheduled_campaign(&templates, now() - TimeDelta::minutes(5));
        add_pending_record(&email_records, &due);
        campaigns.add_campaign(due.clone());
        let sut = scheduler(&campaigns, &email_records, &templates, &registry);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // キャンセル済みでも select! の分岐順は不定なので、完了することだけを確認する
        tokio::time::timeout(Duration::from_secs(5), sut.run(shutdown))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopは実行中の送信タスクに停止を要求する() {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let templates = MockTemplateResolver::new();
        let registry = ActiveCampaignRegistry::new();
        let sut = scheduler(&campaigns, &email_records, &templates, &registry);
        let campaign_id = CampaignId::new();
        let guard = registry.try_register(&campaign_id).unwrap();

        assert!(sut.stop(&campaign_id));
        assert!(guard.token().is_cancelled());
        assert!(!sut.stop(&CampaignId::new()));
    }
}
