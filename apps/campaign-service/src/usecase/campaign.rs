//! # キャンペーン管理ユースケース
//!
//! キャンペーンの作成・取得・削除と、状態遷移（予約・開始・一時停止・中止）を扱う。
//!
//! ## 状態遷移の書き込み
//!
//! 遷移はドメインモデルで検証したうえで、遷移元ステータスを条件にした 1 行更新で保存する。
//! 条件に合わなかった（別の操作に先を越された）場合は `Conflict` を返し、状態は変えない。
//!
//! ## 送信レコードの生成
//!
//! 予約・開始の時点で、宛先ソースの有効な宛先ごとに `pending` の送信レコードを作る。
//! 既に送信レコードがあるキャンペーンでは何もしない。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::{Campaign, CampaignId, CampaignStatus, NewCampaign, SenderIdentity},
    clock::Clock,
    email::{EmailRecord, EmailRecordId, EmailStatus, NewEmailRecord},
    recipient::{RecipientSourceId, TemplateId},
    stats::CampaignStats,
    value_objects::{CampaignName, EmailAddress},
};
use hikyaku_infra::external::{RecipientSource, TemplateResolver};
use hikyaku_shared::{event_log::event, log_business_event};

use super::{Repositories, SendDispatcher, StatsRecalculator, helpers::FindResultExt};
use crate::error::ServiceError;

/// キャンペーン作成の入力
pub struct CreateCampaignInput {
    pub name: String,
    pub template_id: Option<TemplateId>,
    pub recipient_source_id: Option<RecipientSourceId>,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub subject_override: Option<String>,
}

/// 送信レコード一覧の 1 ページ
#[derive(Debug)]
pub struct EmailRecordPage {
    pub records: Vec<EmailRecord>,
    /// 絞り込み条件に合う総件数
    pub total:   u64,
}

/// 再開対象を 1 回に取得する件数
const RESUME_PAGE_SIZE: u32 = 100;

/// 送信中への昇格の結果
enum Activation {
    /// この呼び出しで `sending` にした
    Promoted(Campaign),
    /// 別の呼び出しが先に `sending` にしていた
    AlreadySending(Campaign),
}

/// キャンペーン管理ユースケース
pub struct CampaignUseCaseImpl {
    repos:             Repositories,
    recipient_source:  Arc<dyn RecipientSource>,
    template_resolver: Arc<dyn TemplateResolver>,
    dispatcher:        SendDispatcher,
    stats:             StatsRecalculator,
    clock:             Arc<dyn Clock>,
}

impl CampaignUseCaseImpl {
    pub fn new(
        repos: Repositories,
        recipient_source: Arc<dyn RecipientSource>,
        template_resolver: Arc<dyn TemplateResolver>,
        dispatcher: SendDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stats = StatsRecalculator::new(
            repos.campaigns.clone(),
            repos.email_records.clone(),
            clock.clone(),
        );
        Self {
            repos,
            recipient_source,
            template_resolver,
            dispatcher,
            stats,
            clock,
        }
    }

    pub fn dispatcher(&self) -> &SendDispatcher {
        &self.dispatcher
    }

    /// 下書きのキャンペーンを作成する
    ///
    /// テンプレートが指定されている場合は、解決できることを確認する。
    pub async fn create_campaign(&self, input: CreateCampaignInput) -> Result<Campaign, ServiceError> {
        let name = CampaignName::new(input.name)?;
        let from_email = EmailAddress::new(input.from_email)?;
        let reply_to = input.reply_to.map(EmailAddress::new).transpose()?;

        if let Some(template_id) = &input.template_id
            && self
                .template_resolver
                .resolve_template(template_id)
                .await?
                .is_none()
        {
            return Err(ServiceError::BadRequest(format!(
                "テンプレートが見つかりません: {}",
                template_id
            )));
        }

        let campaign = Campaign::new(NewCampaign {
            id: CampaignId::new(),
            name,
            template_id: input.template_id,
            recipient_source_id: input.recipient_source_id,
            sender: SenderIdentity {
                from_name: input.from_name,
                from_email,
                reply_to,
            },
            subject_override: input.subject_override,
            now: self.clock.now(),
        });

        self.repos.campaigns.insert(&campaign).await?;

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_CREATED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %campaign.id(),
            event.result = event::result::SUCCESS,
            "キャンペーン作成"
        );

        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: &CampaignId) -> Result<Campaign, ServiceError> {
        self.repos
            .campaigns
            .find_by_id(id)
            .await
            .or_not_found("キャンペーン")
    }

    /// キャンペーン一覧を作成日時の新しい順に取得する
    pub async fn list_campaigns(
        &self,
        status: Option<CampaignStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Campaign>, ServiceError> {
        Ok(self.repos.campaigns.list(status, limit, offset).await?)
    }

    /// キャンペーンを削除する
    ///
    /// 送信中のキャンペーンは削除できない。送信レコードとイベントも一緒に消える。
    pub async fn delete_campaign(&self, id: &CampaignId) -> Result<(), ServiceError> {
        let campaign = self.get_campaign(id).await?;
        campaign.ensure_deletable()?;

        if !self.repos.campaigns.delete(id).await? {
            return Err(ServiceError::Conflict(
                "キャンペーンの状態が他の操作で変更されました".to_string(),
            ));
        }

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_DELETED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            "キャンペーン削除"
        );
        Ok(())
    }

    /// 送信を予約する
    ///
    /// 1. 下書きであること・予約日時が未来であることを検証
    /// 2. テンプレートと件名が解決できることを確認
    /// 3. 送信レコードを生成（未生成の場合のみ）
    /// 4. `draft` を条件に `scheduled` へ更新
    pub async fn schedule(
        &self,
        id: &CampaignId,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Campaign, ServiceError> {
        let campaign = self.get_campaign(id).await?;
        let scheduled = campaign.scheduled(scheduled_at, self.clock.now())?;

        self.ensure_content(&scheduled).await?;
        self.materialize(&scheduled).await?;

        if !self
            .repos
            .campaigns
            .update_state(&scheduled, CampaignStatus::Draft)
            .await?
        {
            return Err(ServiceError::Conflict(
                "キャンペーンの状態が他の操作で変更されました".to_string(),
            ));
        }

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_SCHEDULED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            scheduled_at = %scheduled_at,
            "キャンペーン送信予約"
        );

        self.get_campaign(id).await
    }

    /// 送信を開始する
    ///
    /// 下書き・予約済み・一時停止から `sending` に昇格し、送信タスクを起動する。
    /// 既に送信中の場合は状態を変えず、送信タスクが無ければ起動し直す。
    pub async fn start(&self, id: &CampaignId) -> Result<Campaign, ServiceError> {
        let campaign = self.get_campaign(id).await?;

        if campaign.status() == CampaignStatus::Sending {
            self.dispatcher.dispatch(id);
            return Ok(campaign);
        }

        match self.activate(campaign).await? {
            Activation::Promoted(campaign) | Activation::AlreadySending(campaign) => Ok(campaign),
        }
    }

    /// 予約日時が到来したキャンペーンを昇格する
    ///
    /// この呼び出しで昇格させた場合は `true`。他の呼び出しに先を越された場合は `false`。
    pub async fn promote(&self, campaign: Campaign) -> Result<bool, ServiceError> {
        match self.activate(campaign).await? {
            Activation::Promoted(_) => Ok(true),
            Activation::AlreadySending(_) => Ok(false),
        }
    }

    /// 一時停止する
    ///
    /// 送信タスクには停止を要求する。未送信のレコードは `pending` のまま残る。
    pub async fn pause(&self, id: &CampaignId) -> Result<Campaign, ServiceError> {
        let campaign = self.get_campaign(id).await?;
        let paused = campaign.paused(self.clock.now())?;

        if !self
            .repos
            .campaigns
            .update_state(&paused, CampaignStatus::Sending)
            .await?
        {
            return Err(ServiceError::Conflict(
                "キャンペーンの状態が他の操作で変更されました".to_string(),
            ));
        }
        self.dispatcher.stop(id);

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_PAUSED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            "キャンペーン一時停止"
        );

        self.get_campaign(id).await
    }

    /// 中止する
    ///
    /// 未送信のレコードは失敗扱いにせず、そのまま残す。
    pub async fn cancel(&self, id: &CampaignId) -> Result<Campaign, ServiceError> {
        let campaign = self.get_campaign(id).await?;
        let expected = campaign.status();
        let cancelled = campaign.cancelled(self.clock.now())?;

        if !self
            .repos
            .campaigns
            .update_state(&cancelled, expected)
            .await?
        {
            return Err(ServiceError::Conflict(
                "キャンペーンの状態が他の操作で変更されました".to_string(),
            ));
        }
        self.dispatcher.stop(id);

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_CANCELLED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            previous_status = %expected,
            "キャンペーン中止"
        );

        self.get_campaign(id).await
    }

    /// 集計を数え直して返す
    pub async fn stats(&self, id: &CampaignId) -> Result<CampaignStats, ServiceError> {
        self.get_campaign(id).await?;
        self.stats.recalculate(id).await
    }

    /// 送信レコードの一覧
    pub async fn list_email_records(
        &self,
        id: &CampaignId,
        status: Option<EmailStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<EmailRecordPage, ServiceError> {
        self.get_campaign(id).await?;

        let records = self
            .repos
            .email_records
            .list(id, status, limit, offset)
            .await?;
        let total = self.repos.email_records.count(id, status).await?;

        Ok(EmailRecordPage { records, total })
    }

    /// 送信中のまま止まったキャンペーンの送信タスクを起動し直す
    ///
    /// プロセスの再起動で失われた送信タスクを、起動時に 1 回だけ呼んで復旧する。
    /// 起動したタスクの数を返す。
    pub async fn resume_interrupted(&self) -> Result<usize, ServiceError> {
        let mut resumed = 0;
        let mut offset = 0;
        loop {
            let sending = self
                .repos
                .campaigns
                .list(Some(CampaignStatus::Sending), RESUME_PAGE_SIZE, offset)
                .await?;
            let fetched = sending.len();

            for campaign in &sending {
                if self.dispatcher.dispatch(campaign.id()).is_some() {
                    resumed += 1;
                }
            }

            if fetched < RESUME_PAGE_SIZE as usize {
                break;
            }
            offset += RESUME_PAGE_SIZE;
        }

        if resumed > 0 {
            tracing::info!(resumed, "中断していた送信タスクを再開");
        }
        Ok(resumed)
    }

    /// `sending` への昇格
    ///
    /// 遷移元ステータスを条件に書き込み、勝った呼び出しだけが送信タスクを起動する。
    async fn activate(&self, campaign: Campaign) -> Result<Activation, ServiceError> {
        let expected = campaign.status();
        let started = campaign.started(self.clock.now())?;
        let id = started.id().clone();

        self.ensure_content(&started).await?;
        self.materialize(&started).await?;

        if !self
            .repos
            .campaigns
            .update_state(&started, expected)
            .await?
        {
            let current = self.get_campaign(&id).await?;
            if current.status() == CampaignStatus::Sending {
                return Ok(Activation::AlreadySending(current));
            }
            return Err(ServiceError::Conflict(
                "キャンペーンの状態が他の操作で変更されました".to_string(),
            ));
        }

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::CAMPAIGN_STARTED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            previous_status = %expected,
            "キャンペーン送信開始"
        );
        self.dispatcher.dispatch(&id);

        Ok(Activation::Promoted(self.get_campaign(&id).await?))
    }

    /// テンプレートと件名が解決できることを確認する
    async fn ensure_content(&self, campaign: &Campaign) -> Result<(), ServiceError> {
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

        if campaign.resolved_subject(&template).is_none() {
            return Err(ServiceError::Precondition(
                "テンプレートにもキャンペーンにも件名がありません".to_string(),
            ));
        }
        Ok(())
    }

    /// 送信レコードを生成する（既にあれば何もしない）
    ///
    /// 同時に呼ばれても `(campaign_id, email)` の一意制約で重複は作られない。
    async fn materialize(&self, campaign: &Campaign) -> Result<(), ServiceError> {
        let id = campaign.id();
        if self.repos.email_records.count(id, None).await? > 0 {
            return Ok(());
        }

        let (_, source_id) = campaign
            .ensure_ready()
            .map_err(|e| ServiceError::Precondition(e.to_string()))?;
        let recipients = self
            .recipient_source
            .list_valid_recipients(source_id)
            .await?;
        if recipients.is_empty() {
            return Err(ServiceError::Precondition(
                "送信可能な宛先がありません".to_string(),
            ));
        }

        let now = self.clock.now();
        let records: Vec<EmailRecord> = recipients
            .iter()
            .map(|recipient| {
                EmailRecord::new(NewEmailRecord {
                    id: EmailRecordId::new(),
                    campaign_id: id.clone(),
                    recipient_id: recipient.id.clone(),
                    email: recipient.email.clone(),
                    display_name: recipient.display_name(),
                    merge_fields: recipient.merge_fields(),
                    now,
                })
            })
            .collect();

        let inserted = self
            .repos
            .email_records
            .insert_many_if_absent(&records)
            .await?;
        self.stats.recalculate(id).await?;

        log_business_event!(
            event.category = event::category::CAMPAIGN,
            event.action = event::action::RECIPIENTS_MATERIALIZED,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            recipients = recipients.len(),
            inserted = inserted,
            "送信レコード生成"
        );
        Ok(())
    }
}
