//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリモック（リポジトリ・外部コラボレータ・配信プロバイダ）。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! hikyaku-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! 状態は `Arc<Mutex<_>>` で共有するため、`clone()` したモックは同じ中身を見る。
//! テストからは同期ヘルパー（`add_*` / `snapshot` など）で中身を直接操作・検査できる。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::{Campaign, CampaignId, CampaignStatus},
    delivery::{DeliveryError, OutboundEmail, ProviderMessageId},
    email::{
        EmailRecord,
        EmailRecordId,
        EmailStatus,
        EmailTransition,
        TransitionOutcome,
    },
    event::EmailEvent,
    recipient::{Recipient, RecipientSourceId, TemplateId},
    stats::CampaignStats,
    template::TemplateContent,
    unsubscribe::UnsubscribeEntry,
    value_objects::EmailAddress,
    webhook::InboundWebhookLogId,
};

use crate::{
    error::InfraError,
    external::{RecipientSource, TemplateResolver},
    provider::DeliveryProvider,
    repository::{
        CampaignRepository,
        EmailEventRepository,
        EmailRecordRepository,
        InboundWebhookLog,
        UnsubscribeRepository,
        WebhookLogRepository,
    },
};

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: u32, offset: u32) -> Vec<T> {
    items.skip(offset as usize).take(limit as usize).collect()
}

// ===== MockCampaignRepository =====

#[derive(Clone, Default)]
pub struct MockCampaignRepository {
    campaigns: Arc<Mutex<Vec<Campaign>>>,
}

impl MockCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_campaign(&self, campaign: Campaign) {
        self.campaigns.lock().unwrap().push(campaign);
    }

    /// ステータスガードを通さずに置き換える（送信中の一時停止などを外から起こす用）
    pub fn replace(&self, campaign: Campaign) {
        let mut campaigns = self.campaigns.lock().unwrap();
        if let Some(stored) = campaigns.iter_mut().find(|c| c.id() == campaign.id()) {
            *stored = campaign;
        }
    }

    pub fn snapshot(&self, id: &CampaignId) -> Option<Campaign> {
        self.campaigns
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }
}

#[async_trait]
impl CampaignRepository for MockCampaignRepository {
    async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
        self.campaigns.lock().unwrap().push(campaign.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &CampaignId) -> Result<Option<Campaign>, InfraError> {
        Ok(self.snapshot(id))
    }

    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Campaign>, InfraError> {
        let campaigns = self.campaigns.lock().unwrap();
        let mut matched: Vec<Campaign> = campaigns
            .iter()
            .filter(|c| status.is_none_or(|s| c.status() == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(page(matched.into_iter(), limit, offset))
    }

    async fn delete(&self, id: &CampaignId) -> Result<bool, InfraError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let before = campaigns.len();
        campaigns.retain(|c| c.id() != id || c.status() == CampaignStatus::Sending);
        Ok(campaigns.len() < before)
    }

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Campaign>, InfraError> {
        let campaigns = self.campaigns.lock().unwrap();
        let mut due: Vec<Campaign> = campaigns
            .iter()
            .filter(|c| {
                c.status() == CampaignStatus::Scheduled && c.scheduled_at().is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(Campaign::scheduled_at);
        Ok(page(due.into_iter(), limit, 0))
    }

    async fn update_state(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool, InfraError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let Some(stored) = campaigns.iter_mut().find(|c| c.id() == campaign.id()) else {
            return Ok(false);
        };
        if stored.status() != expected {
            return Ok(false);
        }
        // 集計は別経路で更新されるため、保存済みの値を残す
        *stored = match stored.stats_updated_at() {
            Some(at) => campaign.clone().with_stats(stored.stats().clone(), at),
            None => campaign.clone(),
        };
        Ok(true)
    }

    async fn update_stats(
        &self,
        id: &CampaignId,
        stats: &CampaignStats,
        at: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let Some(stored) = campaigns.iter_mut().find(|c| c.id() == id) else {
            return Ok(false);
        };
        if stored.stats_updated_at().is_some_and(|saved| saved > at) {
            return Ok(false);
        }
        *stored = stored.clone().with_stats(stats.clone(), at);
        Ok(true)
    }
}

// ===== MockEmailRecordRepository =====

#[derive(Clone, Default)]
pub struct MockEmailRecordRepository {
    records: Arc<Mutex<Vec<EmailRecord>>>,
}

impl MockEmailRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&self, record: EmailRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn snapshot(&self, id: &EmailRecordId) -> Option<EmailRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    /// キャンペーンの送信レコードを作成順に返す
    pub fn by_campaign(&self, campaign_id: &CampaignId) -> Vec<EmailRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.campaign_id() == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EmailRecordRepository for MockEmailRecordRepository {
    async fn insert_many_if_absent(&self, records: &[EmailRecord]) -> Result<u64, InfraError> {
        let mut stored = self.records.lock().unwrap();
        let mut inserted = 0;
        for record in records {
            let exists = stored
                .iter()
                .any(|r| r.campaign_id() == record.campaign_id() && r.email() == record.email());
            if !exists {
                stored.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
    ) -> Result<u64, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.campaign_id() == campaign_id && status.is_none_or(|s| r.status() == s))
            .count() as u64)
    }

    async fn find_by_id(&self, id: &EmailRecordId) -> Result<Option<EmailRecord>, InfraError> {
        Ok(self.snapshot(id))
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &ProviderMessageId,
    ) -> Result<Option<EmailRecord>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.provider_message_id() == Some(provider_message_id))
            .cloned())
    }

    async fn find_pending(
        &self,
        campaign_id: &CampaignId,
        limit: u32,
    ) -> Result<Vec<EmailRecord>, InfraError> {
        let records = self.records.lock().unwrap();
        Ok(page(
            records
                .iter()
                .filter(|r| r.campaign_id() == campaign_id && r.status() == EmailStatus::Pending)
                .cloned(),
            limit,
            0,
        ))
    }

    async fn record_send_outcome(&self, record: &EmailRecord) -> Result<bool, InfraError> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(stored) if stored.status() == EmailStatus::Pending => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_transition(
        &self,
        id: &EmailRecordId,
        transition: &EmailTransition,
    ) -> Result<TransitionOutcome, InfraError> {
        let mut records = self.records.lock().unwrap();
        let Some(stored) = records.iter_mut().find(|r| r.id() == id) else {
            return Ok(TransitionOutcome::Ignored);
        };
        let (next, outcome) = stored.clone().apply_transition(transition);
        *stored = next;
        Ok(outcome)
    }

    async fn count_by_status(
        &self,
        campaign_id: &CampaignId,
    ) -> Result<Vec<(EmailStatus, u64)>, InfraError> {
        let mut counts: HashMap<EmailStatus, u64> = HashMap::new();
        for record in self.records.lock().unwrap().iter() {
            if record.campaign_id() == campaign_id {
                *counts.entry(record.status()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn list(
        &self,
        campaign_id: &CampaignId,
        status: Option<EmailStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EmailRecord>, InfraError> {
        let records = self.records.lock().unwrap();
        Ok(page(
            records
                .iter()
                .filter(|r| r.campaign_id() == campaign_id && status.is_none_or(|s| r.status() == s))
                .cloned(),
            limit,
            offset,
        ))
    }
}

// ===== MockEmailEventRepository =====

#[derive(Clone, Default)]
pub struct MockEmailEventRepository {
    events:       Arc<Mutex<Vec<EmailEvent>>>,
    fail_inserts: Arc<AtomicBool>,
}

impl MockEmailEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以後の insert を失敗させる
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EmailEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailEventRepository for MockEmailEventRepository {
    async fn insert(&self, event: &EmailEvent) -> Result<(), InfraError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(InfraError::unexpected("email_events への書き込みに失敗"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_by_email_record(
        &self,
        email_record_id: &EmailRecordId,
    ) -> Result<Vec<EmailEvent>, InfraError> {
        let mut events: Vec<EmailEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.email_record_id == email_record_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }
}

// ===== MockUnsubscribeRepository =====

#[derive(Clone, Default)]
pub struct MockUnsubscribeRepository {
    entries: Arc<Mutex<Vec<UnsubscribeEntry>>>,
}

impl MockUnsubscribeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&self, entry: UnsubscribeEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<UnsubscribeEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl UnsubscribeRepository for MockUnsubscribeRepository {
    async fn insert_if_absent(&self, entry: &UnsubscribeEntry) -> Result<bool, InfraError> {
        let mut entries = self.entries.lock().unwrap();
        let exists = entries
            .iter()
            .any(|e| e.email == entry.email && e.campaign_id == entry.campaign_id);
        if exists {
            return Ok(false);
        }
        entries.push(entry.clone());
        Ok(true)
    }

    async fn is_suppressed(
        &self,
        email: &EmailAddress,
        campaign_id: &CampaignId,
    ) -> Result<bool, InfraError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| &e.email == email && e.applies_to(campaign_id)))
    }
}

// ===== MockWebhookLogRepository =====

#[derive(Clone, Default)]
pub struct MockWebhookLogRepository {
    logs: Arc<Mutex<Vec<InboundWebhookLog>>>,
}

impl MockWebhookLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<InboundWebhookLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookLogRepository for MockWebhookLogRepository {
    async fn insert(&self, log: &InboundWebhookLog) -> Result<(), InfraError> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn mark_processed(
        &self,
        id: &InboundWebhookLogId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut logs = self.logs.lock().unwrap();
        if let Some(log) = logs.iter_mut().find(|l| &l.id == id && !l.processed) {
            log.processed = true;
            if let Some(note) = note {
                log.note = Some(note.to_string());
            }
            log.processed_at = Some(at);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &InboundWebhookLogId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut logs = self.logs.lock().unwrap();
        if let Some(log) = logs.iter_mut().find(|l| &l.id == id && !l.processed) {
            log.error = Some(error.to_string());
            log.processed_at = Some(at);
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &InboundWebhookLogId,
    ) -> Result<Option<InboundWebhookLog>, InfraError> {
        Ok(self.logs.lock().unwrap().iter().find(|l| &l.id == id).cloned())
    }
}

// ===== MockRecipientSource =====

#[derive(Clone, Default)]
pub struct MockRecipientSource {
    recipients: Arc<Mutex<HashMap<RecipientSourceId, Vec<Recipient>>>>,
}

impl MockRecipientSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipients(&self, source_id: RecipientSourceId, recipients: Vec<Recipient>) {
        self.recipients
            .lock()
            .unwrap()
            .entry(source_id)
            .or_default()
            .extend(recipients);
    }
}

#[async_trait]
impl RecipientSource for MockRecipientSource {
    async fn list_valid_recipients(
        &self,
        source_id: &RecipientSourceId,
    ) -> Result<Vec<Recipient>, InfraError> {
        Ok(self
            .recipients
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ===== MockTemplateResolver =====

#[derive(Clone, Default)]
pub struct MockTemplateResolver {
    templates: Arc<Mutex<HashMap<TemplateId, TemplateContent>>>,
}

impl MockTemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, id: TemplateId, content: TemplateContent) {
        self.templates.lock().unwrap().insert(id, content);
    }
}

#[async_trait]
impl TemplateResolver for MockTemplateResolver {
    async fn resolve_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<TemplateContent>, InfraError> {
        Ok(self.templates.lock().unwrap().get(template_id).cloned())
    }
}

// ===== MockDeliveryProvider =====

/// 送信ごとに呼ばれるフック（引数は成功した送信の通算件数）
pub type SendHook = Arc<dyn Fn(usize) + Send + Sync>;

/// 送信内容を記録する配信プロバイダ
///
/// `fail_for` に登録したアドレスへの送信は失敗する。
/// メッセージ ID は `mock-<送信レコード ID>` になる。
#[derive(Clone, Default)]
pub struct MockDeliveryProvider {
    sent:    Arc<Mutex<Vec<OutboundEmail>>>,
    failing: Arc<Mutex<Vec<EmailAddress>>>,
    on_send: Arc<Mutex<Option<SendHook>>>,
}

impl MockDeliveryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定したアドレスへの送信を失敗させる
    pub fn fail_for(&self, email: EmailAddress) {
        self.failing.lock().unwrap().push(email);
    }

    /// 送信成功のたびに呼ばれるフックを設定する
    pub fn on_send(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    /// 送信を試みた宛先アドレス（成功分のみ）
    pub fn sent_to(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|e| e.to.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl DeliveryProvider for MockDeliveryProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderMessageId, DeliveryError> {
        if self.failing.lock().unwrap().contains(&email.to) {
            return Err(DeliveryError::SendFailed(format!(
                "mailbox unavailable: {}",
                email.to
            )));
        }

        let count = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            sent.len()
        };
        let hook = self.on_send.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(count);
        }

        Ok(ProviderMessageId::new(format!(
            "mock-{}",
            email.correlation.email_record_id
        )))
    }
}
