//! 配信停止リンクのユースケース
//!
//! メール内のリンク（送信レコード ID をキーにする）から、宛先アドレスを全キャンペーン共通の
//! 配信停止リストに載せる。2 回目以降のクリックはエラーにせず「停止済み」を返す。

use std::sync::Arc;

use hikyaku_domain::{
    clock::Clock,
    email::{EmailRecordId, EmailStatus, EmailTransition, TransitionOutcome, TransitionTarget},
    event::{EmailEvent, EmailEventType},
    unsubscribe::{UnsubscribeEntry, UnsubscribeSource},
};
use hikyaku_shared::{event_log::event, log_business_event};
use serde_json::json;

use super::{Repositories, StatsRecalculator, helpers::FindResultExt};
use crate::error::ServiceError;

/// 配信停止リンクから停止したときの理由
pub const LINK_UNSUBSCRIBE_REASON: &str = "unsubscribed via link";

/// 配信停止の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeResult {
    /// 今回の操作で配信停止リストに載せた
    Unsubscribed,
    /// 既に配信停止リストに載っていた
    AlreadyUnsubscribed,
}

/// 配信停止ユースケース
pub struct UnsubscribeUseCaseImpl {
    repos: Repositories,
    stats: StatsRecalculator,
    clock: Arc<dyn Clock>,
}

impl UnsubscribeUseCaseImpl {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        let stats = StatsRecalculator::new(
            repos.campaigns.clone(),
            repos.email_records.clone(),
            clock.clone(),
        );
        Self {
            repos,
            stats,
            clock,
        }
    }

    /// 送信レコードの宛先を配信停止にする
    ///
    /// まだ送っていないレコードは送信対象から外し、送信済みのレコードは `unsubscribed` に遷移させる。
    #[tracing::instrument(skip_all, fields(email_record_id = %email_record_id))]
    pub async fn unsubscribe(
        &self,
        email_record_id: &EmailRecordId,
    ) -> Result<UnsubscribeResult, ServiceError> {
        let record = self
            .repos
            .email_records
            .find_by_id(email_record_id)
            .await
            .or_not_found("送信レコード")?;
        let now = self.clock.now();

        let inserted = self
            .repos
            .unsubscribes
            .insert_if_absent(&UnsubscribeEntry::global(
                record.email().clone(),
                UnsubscribeSource::Link,
                Some(record.id().clone()),
                now,
            ))
            .await?;

        let changed = if record.status() == EmailStatus::Pending {
            let updated = record.clone().mark_unsubscribed(LINK_UNSUBSCRIBE_REASON, now)?;
            self.repos.email_records.record_send_outcome(&updated).await?
        } else {
            let transition = EmailTransition {
                target:      TransitionTarget::Unsubscribed,
                occurred_at: now,
                reason:      Some(LINK_UNSUBSCRIBE_REASON.to_string()),
            };
            self.repos
                .email_records
                .apply_transition(record.id(), &transition)
                .await?
                != TransitionOutcome::Ignored
        };

        if changed {
            self.repos
                .email_events
                .insert(&EmailEvent::new(
                    record.id().clone(),
                    record.campaign_id().clone(),
                    EmailEventType::Unsubscribed,
                    now,
                    json!({ "source": UnsubscribeSource::Link.to_string() }),
                ))
                .await?;
            self.stats.recalculate(record.campaign_id()).await?;
        }

        let (result, log_result) = if inserted {
            (UnsubscribeResult::Unsubscribed, event::result::SUCCESS)
        } else {
            (UnsubscribeResult::AlreadyUnsubscribed, event::result::SKIPPED)
        };

        log_business_event!(
            event.category = event::category::UNSUBSCRIBE,
            event.action = event::action::UNSUBSCRIBE_RECORDED,
            event.entity_type = event::entity_type::EMAIL_RECORD,
            event.entity_id = %record.id(),
            event.campaign_id = %record.campaign_id(),
            event.result = log_result,
            "配信停止リンク"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use hikyaku_domain::{
        campaign::CampaignId,
        clock::FixedClock,
        delivery::ProviderMessageId,
        email::{EmailRecord, NewEmailRecord},
        recipient::{MergeFields, RecipientId},
        value_objects::EmailAddress,
    };
    use hikyaku_infra::mock::{
        MockCampaignRepository,
        MockEmailEventRepository,
        MockEmailRecordRepository,
        MockUnsubscribeRepository,
        MockWebhookLogRepository,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn record() -> EmailRecord {
        EmailRecord::new(NewEmailRecord {
            id: EmailRecordId::new(),
            campaign_id: CampaignId::new(),
            recipient_id: RecipientId::new(),
            email: EmailAddress::new("jiro@example.com").unwrap(),
            display_name: None,
            merge_fields: MergeFields {
                email: "jiro@example.com".to_string(),
                ..MergeFields::default()
            },
            now: now(),
        })
    }

    struct Fixture {
        email_records: MockEmailRecordRepository,
        email_events:  MockEmailEventRepository,
        unsubscribes:  MockUnsubscribeRepository,
        sut:           UnsubscribeUseCaseImpl,
    }

    fn fixture() -> Fixture {
        let email_records = MockEmailRecordRepository::new();
        let email_events = MockEmailEventRepository::new();
        let unsubscribes = MockUnsubscribeRepository::new();
        let sut = UnsubscribeUseCaseImpl::new(
            Repositories {
                campaigns:     Arc::new(MockCampaignRepository::new()),
                email_records: Arc::new(email_records.clone()),
                email_events:  Arc::new(email_events.clone()),
                unsubscribes:  Arc::new(unsubscribes.clone()),
                webhook_logs:  Arc::new(MockWebhookLogRepository::new()),
            },
            Arc::new(FixedClock::new(now())),
        );
        Fixture {
            email_records,
            email_events,
            unsubscribes,
            sut,
        }
    }

    #[tokio::test]
    async fn test_送信済みレコードの配信停止() {
        let f = fixture();
        let sent = record()
            .mark_sent(ProviderMessageId::new("msg-9"), now())
            .unwrap();
        f.email_records.add_record(sent.clone());

        let result = f.sut.unsubscribe(sent.id()).await.unwrap();

        assert_eq!(result, UnsubscribeResult::Unsubscribed);
        let stored = f.email_records.snapshot(sent.id()).unwrap();
        assert_eq!(stored.status(), EmailStatus::Unsubscribed);
        assert_eq!(stored.unsubscribed_at(), Some(now()));
        assert_eq!(stored.sent_at(), Some(now()));
        let entries = f.unsubscribes.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, UnsubscribeSource::Link);
        assert_eq!(f.email_events.events().len(), 1);
    }

    #[tokio::test]
    async fn test_未送信レコードは送信対象から外れる() {
        let f = fixture();
        let pending = record();
        f.email_records.add_record(pending.clone());

        f.sut.unsubscribe(pending.id()).await.unwrap();

        let stored = f.email_records.snapshot(pending.id()).unwrap();
        assert_eq!(stored.status(), EmailStatus::Unsubscribed);
        assert_eq!(stored.sent_at(), None);
    }

    #[tokio::test]
    async fn test_2回目のクリックは停止済みを返し何も増えない() {
        let f = fixture();
        let pending = record();
        f.email_records.add_record(pending.clone());
        f.sut.unsubscribe(pending.id()).await.unwrap();

        let result = f.sut.unsubscribe(pending.id()).await.unwrap();

        assert_eq!(result, UnsubscribeResult::AlreadyUnsubscribed);
        assert_eq!(f.unsubscribes.entries().len(), 1);
        assert_eq!(f.email_events.events().len(), 1);
    }

    #[tokio::test]
    async fn test_存在しないレコードはnot_found() {
        let f = fixture();

        let result = f.sut.unsubscribe(&EmailRecordId::new()).await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
