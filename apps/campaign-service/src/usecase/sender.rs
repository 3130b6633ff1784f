//! # 送信処理
//!
//! 1 キャンペーン分の未送信レコードを、配信プロバイダに 1 通ずつ渡す。
//!
//! ## 送信ループ
//!
//! 各レコードの前に次の順で確認する:
//!
//! 1. キャンペーンのステータスを読み直す。`sending` でなければ抜ける（残りは `pending` のまま）
//! 2. 停止要求（`CancellationToken`）を確認する。要求されていれば抜ける
//! 3. 配信停止リストを確認する。載っていればプロバイダを呼ばずに `unsubscribed` にする
//!
//! 1 通の送信失敗はレコードに記録するだけで、ループは次の宛先へ進む。
//! 集計は一定件数ごとに保存するため、途中で落ちても送信済みの分は正しく残る。
//! 再実行は `pending` のレコードだけを拾うので、中断した位置から再開できる。

use std::{fmt, sync::Arc, time::Duration};

use hikyaku_domain::{
    campaign::{Campaign, CampaignId, CampaignStatus},
    clock::Clock,
    delivery::{CorrelationTags, OutboundEmail},
    email::{EmailRecord, EmailStatus},
    event::{EmailEvent, EmailEventType},
    template::{TemplateContent, VariableMap},
};
use hikyaku_infra::{external::TemplateResolver, provider::DeliveryProvider};
use hikyaku_shared::{event_log::event, log_business_event};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Repositories, StatsRecalculator, helpers::FindResultExt};
use crate::{config::SenderConfig, error::ServiceError};

/// 配信停止リストで送信を止めたときの理由
pub const SUPPRESSED_REASON: &str = "recipient is on the unsubscribe list";

/// 送信処理の終わり方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 未送信が無くなり、キャンペーンを送信完了にした
    Completed,
    /// キャンペーンのステータスが `sending` でなくなったため止めた
    Halted(CampaignStatus),
    /// 停止要求を受けて止めた
    Cancelled,
    /// 未送信は無いが、キャンペーンを送信完了にできる状態ではなかった
    Drained,
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Halted(status) => write!(f, "halted({status})"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Drained => write!(f, "drained"),
        }
    }
}

/// 1 回の送信処理の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRunReport {
    pub sent:       u64,
    pub failed:     u64,
    pub suppressed: u64,
    pub outcome:    SendOutcome,
}

#[derive(Debug, Default)]
struct RunCounters {
    sent:       u64,
    failed:     u64,
    suppressed: u64,
    processed:  u64,
}

impl RunCounters {
    fn into_report(self, outcome: SendOutcome) -> SendRunReport {
        SendRunReport {
            sent: self.sent,
            failed: self.failed,
            suppressed: self.suppressed,
            outcome,
        }
    }
}

/// 前回のプロバイダ呼び出しから、次の呼び出しまでに待つ時間
fn remaining_delay(elapsed: Duration, delay: Duration) -> Option<Duration> {
    delay.checked_sub(elapsed).filter(|d| !d.is_zero())
}

/// キャンペーンの送信処理
pub struct CampaignSender {
    repos:             Repositories,
    template_resolver: Arc<dyn TemplateResolver>,
    provider:          Arc<dyn DeliveryProvider>,
    stats:             StatsRecalculator,
    clock:             Arc<dyn Clock>,
    config:            SenderConfig,
}

impl CampaignSender {
    pub fn new(
        repos: Repositories,
        template_resolver: Arc<dyn TemplateResolver>,
        provider: Arc<dyn DeliveryProvider>,
        clock: Arc<dyn Clock>,
        config: SenderConfig,
    ) -> Self {
        let stats = StatsRecalculator::new(
            repos.campaigns.clone(),
            repos.email_records.clone(),
            clock.clone(),
        );
        Self {
            repos,
            template_resolver,
            provider,
            stats,
            clock,
            config,
        }
    }

    /// キャンペーンの未送信レコードを送り切る
    ///
    /// # エラー
    ///
    /// - テンプレートが解決できない・件名が無い場合は、1 通も送らずに `Precondition`
    /// - 永続化に失敗した場合は `Database`（送信済みの分は記録済み、残りは `pending` のまま）
    #[tracing::instrument(skip_all, fields(campaign_id = %campaign_id))]
    pub async fn run(
        &self,
        campaign_id: &CampaignId,
        cancel: &CancellationToken,
    ) -> Result<SendRunReport, ServiceError> {
        let campaign = self
            .repos
            .campaigns
            .find_by_id(campaign_id)
            .await
            .or_not_found("キャンペーン")?;

        if campaign.status() != CampaignStatus::Sending {
            return Ok(RunCounters::default().into_report(SendOutcome::Halted(campaign.status())));
        }

        let (template, subject) = self.prepare_content(&campaign).await?;

        log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::SEND_RUN_STARTED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %campaign_id,
            event.result = event::result::SUCCESS,
            "送信処理を開始"
        );

        let mut counters = RunCounters::default();
        let stopped = self
            .send_pending(&campaign, &template, &subject, cancel, &mut counters)
            .await?;

        let outcome = self.finish(campaign_id, stopped).await?;
        Ok(counters.into_report(outcome))
    }

    /// テンプレートと件名を解決する（送信前に 1 回だけ）
    async fn prepare_content(
        &self,
        campaign: &Campaign,
    ) -> Result<(TemplateContent, String), ServiceError> {
        let (template_id, _) = campaign
            .ensure_ready()
            .map_err(|e| ServiceError::Precondition(e.to_string()))?;

        let template = self
            .template_resolver
            .resolve_template(template_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Precondition(format!("テンプレートが見つかりません: {}", template_id))
            })?;

        let subject = campaign.resolved_subject(&template).ok_or_else(|| {
            ServiceError::Precondition("テンプレートにもキャンペーンにも件名がありません".to_string())
        })?;

        Ok((template, subject))
    }

    /// 未送信レコードを順に処理する
    ///
    /// 途中で止めた場合はその理由を返す。未送信を処理し切った場合は `None`。
    async fn send_pending(
        &self,
        campaign: &Campaign,
        template: &TemplateContent,
        subject: &str,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<Option<SendOutcome>, ServiceError> {
        let campaign_id = campaign.id();
        let mut last_call: Option<Instant> = None;

        loop {
            let batch = self
                .repos
                .email_records
                .find_pending(campaign_id, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                return Ok(None);
            }

            for record in batch {
                if let Some(wait) =
                    last_call.and_then(|at| remaining_delay(at.elapsed(), self.config.send_delay))
                {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = cancel.cancelled() => return Ok(Some(SendOutcome::Cancelled)),
                    }
                }

                let status = self
                    .repos
                    .campaigns
                    .find_by_id(campaign_id)
                    .await
                    .or_not_found("キャンペーン")?
                    .status();
                if status != CampaignStatus::Sending {
                    return Ok(Some(SendOutcome::Halted(status)));
                }
                if cancel.is_cancelled() {
                    return Ok(Some(SendOutcome::Cancelled));
                }

                if self
                    .repos
                    .unsubscribes
                    .is_suppressed(record.email(), campaign_id)
                    .await?
                {
                    self.suppress(record, counters).await?;
                } else {
                    last_call = Some(Instant::now());
                    self.deliver(campaign, template, subject, record, counters)
                        .await?;
                }

                counters.processed += 1;
                if counters.processed % u64::from(self.config.stats_flush_every) == 0 {
                    self.stats.recalculate(campaign_id).await?;
                }
            }
        }
    }

    /// 配信停止済みの宛先をスキップする
    async fn suppress(
        &self,
        record: EmailRecord,
        counters: &mut RunCounters,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let updated = record.mark_unsubscribed(SUPPRESSED_REASON, now)?;

        if !self.repos.email_records.record_send_outcome(&updated).await? {
            return Ok(());
        }

        self.repos
            .email_events
            .insert(&EmailEvent::new(
                updated.id().clone(),
                updated.campaign_id().clone(),
                EmailEventType::Suppressed,
                now,
                json!({ "reason": SUPPRESSED_REASON }),
            ))
            .await?;
        counters.suppressed += 1;

        log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::EMAIL_SUPPRESSED,
            event.entity_type = event::entity_type::EMAIL_RECORD,
            event.entity_id = %updated.id(),
            event.campaign_id = %updated.campaign_id(),
            event.result = event::result::SKIPPED,
            "配信停止リストに載っている宛先をスキップ"
        );
        Ok(())
    }

    /// 1 通送信し、結果をレコードとイベントに記録する
    async fn deliver(
        &self,
        campaign: &Campaign,
        template: &TemplateContent,
        subject: &str,
        record: EmailRecord,
        counters: &mut RunCounters,
    ) -> Result<(), ServiceError> {
        let variables = VariableMap::from_merge_fields(record.merge_fields());
        let outbound = OutboundEmail::new(
            campaign.sender().clone(),
            record.email().clone(),
            record.display_name().map(String::from),
            template.render(subject, &variables),
            CorrelationTags {
                campaign_id:     campaign.id().clone(),
                email_record_id: record.id().clone(),
            },
        );

        let result = self.provider.send(&outbound).await;
        let now = self.clock.now();

        let (updated, event_type, metadata) = match result {
            Ok(message_id) => {
                let metadata = json!({ "provider_message_id": message_id.as_str() });
                (
                    record.mark_sent(message_id, now)?,
                    EmailEventType::Sent,
                    metadata,
                )
            }
            Err(e) => {
                let message = e.to_string();
                let metadata = json!({ "error": message });
                (
                    record.mark_failed(message, now)?,
                    EmailEventType::Failed,
                    metadata,
                )
            }
        };

        if !self.repos.email_records.record_send_outcome(&updated).await? {
            tracing::warn!(
                email_record_id = %updated.id(),
                "送信結果を書き込む前に送信レコードが更新されていた"
            );
            return Ok(());
        }

        self.repos
            .email_events
            .insert(&EmailEvent::new(
                updated.id().clone(),
                updated.campaign_id().clone(),
                event_type,
                now,
                metadata,
            ))
            .await?;

        if updated.status() == EmailStatus::Sent {
            counters.sent += 1;
            log_business_event!(
                event.category = event::category::DELIVERY,
                event.action = event::action::EMAIL_SENT,
                event.entity_type = event::entity_type::EMAIL_RECORD,
                event.entity_id = %updated.id(),
                event.campaign_id = %updated.campaign_id(),
                event.result = event::result::SUCCESS,
                "メール送信成功"
            );
        } else {
            counters.failed += 1;
            log_business_event!(
                event.category = event::category::DELIVERY,
                event.action = event::action::EMAIL_FAILED,
                event.entity_type = event::entity_type::EMAIL_RECORD,
                event.entity_id = %updated.id(),
                event.campaign_id = %updated.campaign_id(),
                event.result = event::result::FAILURE,
                error = updated.error_message().unwrap_or_default(),
                "メール送信失敗"
            );
        }
        Ok(())
    }

    /// 集計を確定させ、未送信が残っていなければキャンペーンを送信完了にする
    async fn finish(
        &self,
        campaign_id: &CampaignId,
        stopped: Option<SendOutcome>,
    ) -> Result<SendOutcome, ServiceError> {
        let stats = self.stats.recalculate(campaign_id).await?;

        let remaining = self
            .repos
            .email_records
            .count(campaign_id, Some(EmailStatus::Pending))
            .await?;
        if remaining > 0 {
            return Ok(stopped.unwrap_or(SendOutcome::Drained));
        }

        let campaign = self
            .repos
            .campaigns
            .find_by_id(campaign_id)
            .await
            .or_not_found("キャンペーン")?;
        let expected = campaign.status();
        if !matches!(expected, CampaignStatus::Sending | CampaignStatus::Paused) {
            return Ok(stopped.unwrap_or(SendOutcome::Drained));
        }

        let now = self.clock.now();
        let completed = campaign.completed(now)?.with_stats(stats, now);
        if !self
            .repos
            .campaigns
            .update_state(&completed, expected)
            .await?
        {
            return Ok(stopped.unwrap_or(SendOutcome::Drained));
        }

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_COMPLETED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %campaign_id,
            event.result = event::result::SUCCESS,
            stats.total = completed.stats().total,
            stats.sent = completed.stats().sent,
            "キャンペーン送信完了"
        );
        Ok(SendOutcome::Completed)
    }
}
