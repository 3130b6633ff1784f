//! # プロバイダ Webhook の処理
//!
//! 配信プロバイダから届いたイベントを送信レコードの遷移に変換する。
//!
//! ## 処理の流れ
//!
//! 1. 生のペイロードを受信ログに `processed = false` で保存する（解釈より先）
//! 2. プロバイダメッセージ ID で送信レコードを引く。見つからなければ注記付きで処理済みにして終わる
//! 3. 種別ごとの遷移をステータスガード付きの 1 文で適用する
//! 4. 送信イベントを 1 件追記し、キャンペーン集計を数え直す
//! 5. 受信ログを処理済みにする
//!
//! 遷移は順位が上がる方向にしか進まず、到達日時は最初の 1 回だけ記録されるため、
//! 同じイベントが重複して届いても、順序が入れ替わって届いても最終状態は変わらない。
//! 呼び出し元には常に成功を返し、内部エラーは受信ログとログ出力にだけ残す。

use std::sync::Arc;

use hikyaku_domain::{
    clock::Clock,
    email::TransitionOutcome,
    event::EmailEvent,
    unsubscribe::{UnsubscribeEntry, UnsubscribeSource},
    webhook::{ProviderEvent, ProviderEventKind},
};
use hikyaku_infra::repository::InboundWebhookLog;
use hikyaku_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use serde_json::Value as JsonValue;

use super::{Repositories, StatsRecalculator};
use crate::error::ServiceError;

/// 1 件のイベントの処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 送信レコードに突合できた（遷移の適用結果）
    Processed(TransitionOutcome),
    /// 対応する送信レコードが無かった
    Unmatched,
    /// 未対応のイベント種別だった
    Unsupported,
    /// イベントとして解釈できなかった
    Malformed,
    /// 内部エラーで処理できなかった（受信ログは未処理のまま残る）
    Failed,
}

/// 受信ログに残す注記付きの結果
struct Handled {
    outcome: IngestOutcome,
    note:    Option<String>,
}

impl Handled {
    fn noted(outcome: IngestOutcome, note: impl Into<String>) -> Self {
        Self {
            outcome,
            note: Some(note.into()),
        }
    }
}

/// プロバイダ Webhook の処理
pub struct WebhookProcessor {
    repos: Repositories,
    stats: StatsRecalculator,
    clock: Arc<dyn Clock>,
}

impl WebhookProcessor {
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

    /// 受信したペイロードを処理し、処理したイベント数を返す
    ///
    /// 配列なら要素ごとに、それ以外は 1 件のイベントとして処理する。
    pub async fn ingest_batch(&self, payload: JsonValue) -> usize {
        match payload {
            JsonValue::Array(events) => {
                let received = events.len();
                for raw in events {
                    self.ingest(raw).await;
                }
                received
            }
            single => {
                self.ingest(single).await;
                1
            }
        }
    }

    /// 1 件のイベントを処理する
    ///
    /// エラーは返さない。失敗は受信ログとログ出力に記録する。
    #[tracing::instrument(skip_all)]
    pub async fn ingest(&self, raw: JsonValue) -> IngestOutcome {
        let log = InboundWebhookLog::received(raw, self.clock.now());
        if let Err(e) = self.repos.webhook_logs.insert(&log).await {
            tracing::error!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::DATABASE,
                "受信 Webhook の記録に失敗: {}",
                e
            );
            return IngestOutcome::Failed;
        }

        let result = match self.handle(&log.payload).await {
            Ok(handled) => self
                .repos
                .webhook_logs
                .mark_processed(&log.id, handled.note.as_deref(), self.clock.now())
                .await
                .map(|()| handled.outcome)
                .map_err(ServiceError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                if let Err(mark_err) = self
                    .repos
                    .webhook_logs
                    .mark_failed(&log.id, &message, self.clock.now())
                    .await
                {
                    tracing::error!(
                        error.category = log_error::category::INFRASTRUCTURE,
                        error.kind = log_error::kind::DATABASE,
                        webhook_log_id = %log.id,
                        "受信 Webhook の失敗記録に失敗: {}",
                        mark_err
                    );
                }
                log_business_event!(
                    event.category = event::category::WEBHOOK,
                    event.action = event::action::WEBHOOK_FAILED,
                    event.entity_type = event::entity_type::INBOUND_WEBHOOK_LOG,
                    event.entity_id = %log.id,
                    event.result = event::result::FAILURE,
                    error = %message,
                    "受信 Webhook の処理に失敗"
                );
                IngestOutcome::Failed
            }
        }
    }

    async fn handle(&self, payload: &JsonValue) -> Result<Handled, ServiceError> {
        let provider_event = match ProviderEvent::from_json(payload) {
            Ok(provider_event) => provider_event,
            Err(e) => {
                tracing::warn!(
                    error.category = log_error::category::EXTERNAL_SERVICE,
                    error.kind = log_error::kind::WEBHOOK_PAYLOAD,
                    "受信 Webhook を解釈できない: {}",
                    e
                );
                return Ok(Handled::noted(
                    IngestOutcome::Malformed,
                    format!("malformed payload: {e}"),
                ));
            }
        };

        let Some(kind) = provider_event.kind() else {
            log_business_event!(
                event.category = event::category::WEBHOOK,
                event.action = event::action::WEBHOOK_REJECTED,
                event.result = event::result::SKIPPED,
                provider_event = %provider_event.event_type,
                "未対応の受信イベント種別"
            );
            return Ok(Handled::noted(
                IngestOutcome::Unsupported,
                format!("unsupported event type: {}", provider_event.event_type),
            ));
        };

        let record = match provider_event.message_id() {
            Some(message_id) => {
                self.repos
                    .email_records
                    .find_by_provider_message_id(&message_id)
                    .await?
            }
            None => None,
        };
        let Some(record) = record else {
            log_business_event!(
                event.category = event::category::WEBHOOK,
                event.action = event::action::WEBHOOK_UNMATCHED,
                event.result = event::result::SKIPPED,
                provider_event = %provider_event.event_type,
                provider_message_id = provider_event.provider_message_id.as_deref().unwrap_or_default(),
                "送信レコードに突合できない受信イベント"
            );
            return Ok(Handled::noted(
                IngestOutcome::Unmatched,
                "no email record matches the provider message id",
            ));
        };

        let transition = provider_event.transition(kind, self.clock.now());
        let outcome = self
            .repos
            .email_records
            .apply_transition(record.id(), &transition)
            .await?;

        if kind == ProviderEventKind::Unsubscribed {
            self.repos
                .unsubscribes
                .insert_if_absent(&UnsubscribeEntry::global(
                    record.email().clone(),
                    UnsubscribeSource::Webhook,
                    Some(record.id().clone()),
                    self.clock.now(),
                ))
                .await?;
        }

        self.repos
            .email_events
            .insert(&EmailEvent::new(
                record.id().clone(),
                record.campaign_id().clone(),
                kind.event_type(),
                transition.occurred_at,
                provider_event.event_metadata(kind),
            ))
            .await?;
        self.stats.recalculate(record.campaign_id()).await?;

        log_business_event!(
            event.category = event::category::WEBHOOK,
            event.action = event::action::WEBHOOK_PROCESSED,
            event.entity_type = event::entity_type::EMAIL_RECORD,
            event.entity_id = %record.id(),
            event.campaign_id = %record.campaign_id(),
            event.result = event::result::SUCCESS,
            event_type = %kind.event_type(),
            transition = %outcome,
            "受信イベントを反映"
        );

        Ok(Handled {
            outcome: IngestOutcome::Processed(outcome),
            note:    None,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use hikyaku_domain::{
        campaign::{Campaign, CampaignId, NewCampaign, SenderIdentity},
        clock::FixedClock,
        delivery::ProviderMessageId,
        email::{EmailRecord, EmailRecordId, EmailStatus, NewEmailRecord},
        event::EmailEventType,
        recipient::{MergeFields, RecipientId, RecipientSourceId, TemplateId},
        value_objects::{CampaignName, EmailAddress},
    };
    use hikyaku_infra::mock::{
        MockCampaignRepository,
        MockEmailEventRepository,
        MockEmailRecordRepository,
        MockUnsubscribeRepository,
        MockWebhookLogRepository,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        campaigns:     MockCampaignRepository,
        email_records: MockEmailRecordRepository,
        email_events:  MockEmailEventRepository,
        unsubscribes:  MockUnsubscribeRepository,
        webhook_logs:  MockWebhookLogRepository,
        record:        EmailRecord,
        sut:           WebhookProcessor,
    }

    /// 送信済み（メッセージ ID `msg-1`）のレコードを 1 件持つキャンペーンを用意する
    fn fixture() -> Fixture {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let email_events = MockEmailEventRepository::new();
        let unsubscribes = MockUnsubscribeRepository::new();
        let webhook_logs = MockWebhookLogRepository::new();

        let campaign = Campaign::new(NewCampaign {
            id: CampaignId::new(),
            name: CampaignName::new("週刊ニュース").unwrap(),
            template_id: Some(TemplateId::new()),
            recipient_source_id: Some(RecipientSourceId::new()),
            sender: SenderIdentity {
                from_name:  "Hikyaku".to_string(),
                from_email: EmailAddress::new("news@example.com").unwrap(),
                reply_to:   None,
            },
            subject_override: Some("件名".to_string()),
            now: now(),
        })
        .started(now())
        .unwrap();
        campaigns.add_campaign(campaign.clone());

        let record = EmailRecord::new(NewEmailRecord {
            id: EmailRecordId::new(),
            campaign_id: campaign.id().clone(),
            recipient_id: RecipientId::new(),
            email: EmailAddress::new("hanako@example.com").unwrap(),
            display_name: Some("Hanako".to_string()),
            merge_fields: MergeFields {
                email: "hanako@example.com".to_string(),
                ..MergeFields::default()
            },
            now: now(),
        })
        .mark_sent(ProviderMessageId::new("msg-1"), now())
        .unwrap();
        email_records.add_record(record.clone());

        let sut = WebhookProcessor::new(
            Repositories {
                campaigns:     Arc::new(campaigns.clone()),
                email_records: Arc::new(email_records.clone()),
                email_events:  Arc::new(email_events.clone()),
                unsubscribes:  Arc::new(unsubscribes.clone()),
                webhook_logs:  Arc::new(webhook_logs.clone()),
            },
            Arc::new(FixedClock::new(now() + TimeDelta::minutes(10))),
        );

        Fixture {
            campaigns,
            email_records,
            email_events,
            unsubscribes,
            webhook_logs,
            record,
            sut,
        }
    }

    impl Fixture {
        fn stored(&self) -> EmailRecord {
            self.email_records.snapshot(self.record.id()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_配信イベントでdeliveredになり集計が更新される() {
        let f = fixture();
        let occurred_at = now() + TimeDelta::minutes(1);

        let outcome = f
            .sut
            .ingest(json!({
                "event_type": "delivered",
                "provider_message_id": "msg-1",
                "occurred_at": occurred_at,
            }))
            .await;

        assert_eq!(outcome, IngestOutcome::Processed(TransitionOutcome::Applied));
        let stored = f.stored();
        assert_eq!(stored.status(), EmailStatus::Delivered);
        assert_eq!(stored.delivered_at(), Some(occurred_at));
        let stats = f
            .campaigns
            .snapshot(f.record.campaign_id())
            .unwrap()
            .stats()
            .clone();
        assert_eq!(stats.delivered, 1);
        let logs = f.webhook_logs.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].processed);
        assert_eq!(logs[0].note, None);
    }

    #[tokio::test]
    async fn test_開封より先にクリックが届いてもclickedになる() {
        let f = fixture();

        f.sut
            .ingest(json!({"event": "click", "provider_message_id": "msg-1", "url": "https://example.com"}))
            .await;

        let stored = f.stored();
        assert_eq!(stored.status(), EmailStatus::Clicked);
        assert!(stored.clicked_at().is_some());
        assert_eq!(stored.opened_at(), None);
        let events = f.email_events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EmailEventType::Clicked);
        assert_eq!(events[0].metadata["url"], "https://example.com");
    }

    #[tokio::test]
    async fn test_クリック後に届いた開封はステータスを戻さない() {
        let f = fixture();
        f.sut
            .ingest(json!({"event": "click", "provider_message_id": "msg-1"}))
            .await;

        let outcome = f
            .sut
            .ingest(json!({"event": "open", "provider_message_id": "msg-1"}))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Processed(TransitionOutcome::TimestampOnly)
        );
        let stored = f.stored();
        assert_eq!(stored.status(), EmailStatus::Clicked);
        assert!(stored.opened_at().is_some());
    }

    #[tokio::test]
    async fn test_同じイベントの再送は状態を変えずイベントは2件残る() {
        let f = fixture();
        let payload = json!({
            "event_type": "open",
            "provider_message_id": "msg-1",
            "occurred_at": now() + TimeDelta::minutes(2),
        });

        f.sut.ingest(payload.clone()).await;
        let after_first = f.stored();
        let outcome = f.sut.ingest(payload).await;

        assert_eq!(outcome, IngestOutcome::Processed(TransitionOutcome::Ignored));
        assert_eq!(f.stored(), after_first);
        assert_eq!(f.email_events.events().len(), 2);
        assert_eq!(f.webhook_logs.logs().len(), 2);
    }

    #[rstest]
    #[case::ハードバウンス(json!({"event": "hard_bounce", "reason": "mailbox does not exist"}), "mailbox does not exist")]
    #[case::理由なし(json!({"event": "blocked"}), "blocked bounce")]
    #[case::迷惑メール報告(json!({"event": "spamreport"}), "spam complaint")]
    #[case::種類がtypeキーに入ったバウンス(
        json!({"event": "bounce", "type": "blocked", "email": "hanako@example.com", "reason": "550 blocked"}),
        "550 blocked"
    )]
    #[case::別名のemailキーが併存するバウンス(
        json!({"event_type": "bounce", "recipient_email": "hanako@example.com", "email": "postmaster@example.com", "reason": "550 5.1.1"}),
        "550 5.1.1"
    )]
    #[tokio::test]
    async fn test_バウンスと迷惑メール報告はbouncedになる(
        #[case] payload: JsonValue,
        #[case] expected_reason: &str,
    ) {
        let f = fixture();
        let mut payload = payload;
        payload["provider_message_id"] = json!("msg-1");

        f.sut.ingest(payload).await;

        let stored = f.stored();
        assert_eq!(stored.status(), EmailStatus::Bounced);
        assert!(stored.bounced_at().is_some());
        assert_eq!(stored.error_message(), Some(expected_reason));
    }

    #[tokio::test]
    async fn test_配信停止イベントは配信停止リストにも登録する() {
        let f = fixture();

        f.sut
            .ingest(json!({"event": "unsubscribe", "provider_message_id": "msg-1"}))
            .await;

        assert_eq!(f.stored().status(), EmailStatus::Unsubscribed);
        let entries = f.unsubscribes.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].email.as_str(), "hanako@example.com");
        assert_eq!(entries[0].source, UnsubscribeSource::Webhook);
        assert_eq!(entries[0].campaign_id, None);
    }

    #[tokio::test]
    async fn test_バウンス後の開封はレコードを変えないがイベントは残る() {
        let f = fixture();
        f.sut
            .ingest(json!({"event": "bounce", "provider_message_id": "msg-1"}))
            .await;

        let outcome = f
            .sut
            .ingest(json!({"event": "open", "provider_message_id": "msg-1"}))
            .await;

        assert_eq!(outcome, IngestOutcome::Processed(TransitionOutcome::Ignored));
        assert_eq!(f.stored().status(), EmailStatus::Bounced);
        assert_eq!(f.stored().opened_at(), None);
        assert_eq!(f.email_events.events().len(), 2);
    }

    #[rstest]
    #[case::未知のメッセージid(json!({"event": "delivered", "provider_message_id": "unknown"}), IngestOutcome::Unmatched)]
    #[case::メッセージidなし(json!({"event": "delivered"}), IngestOutcome::Unmatched)]
    #[case::未対応の種別(json!({"event": "deferred", "provider_message_id": "msg-1"}), IngestOutcome::Unsupported)]
    #[case::種別なし(json!({"provider_message_id": "msg-1"}), IngestOutcome::Malformed)]
    #[case::オブジェクトでない(json!("ping"), IngestOutcome::Malformed)]
    #[tokio::test]
    async fn test_突合できないイベントは注記付きで処理済みになる(
        #[case] payload: JsonValue,
        #[case] expected: IngestOutcome,
    ) {
        let f = fixture();

        let outcome = f.sut.ingest(payload).await;

        assert_eq!(outcome, expected);
        assert_eq!(f.stored(), f.record);
        assert!(f.email_events.events().is_empty());
        let logs = f.webhook_logs.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].processed);
        assert!(logs[0].note.is_some());
    }

    #[tokio::test]
    async fn test_内部エラーでは受信ログが未処理のまま残る() {
        let f = fixture();
        f.email_events.set_fail_inserts(true);

        let outcome = f
            .sut
            .ingest(json!({"event": "delivered", "provider_message_id": "msg-1"}))
            .await;

        assert_eq!(outcome, IngestOutcome::Failed);
        let logs = f.webhook_logs.logs();
        assert!(!logs[0].processed);
        assert!(logs[0].error.is_some());
    }

    #[tokio::test]
    async fn test_配列は要素ごとに処理する() {
        let f = fixture();

        let received = f
            .sut
            .ingest_batch(json!([
                {"event": "delivered", "provider_message_id": "msg-1"},
                {"event": "open", "provider_message_id": "msg-1"},
                {"event": "open", "provider_message_id": "other"},
            ]))
            .await;

        assert_eq!(received, 3);
        assert_eq!(f.stored().status(), EmailStatus::Opened);
        assert_eq!(f.webhook_logs.logs().len(), 3);
        assert_eq!(f.email_events.events().len(), 2);
    }
}
