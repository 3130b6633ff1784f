//! # 送信レコード
//!
//! キャンペーン内の 1 宛先ぶんの送信状態を表す。
//!
//! ## ステータスの前進規則
//!
//! ```text
//! pending ─▶ sent ─▶ delivered ─▶ opened ─▶ clicked      （エンゲージメント順位 0〜4）
//!    │
//!    ├─▶ failed          ┐
//!    ├─▶ unsubscribed    ├ 吸収状態（以後どのイベントでも変化しない）
//!    └─ ... ─▶ bounced   ┘
//! ```
//!
//! - ステータスは順位が上がる方向にしか動かない（開封イベントが遅れて届いても、クリック済みを開封に戻さない）
//! - 各ステータスの到達日時は最初の 1 回だけ記録する
//! - ステータスが動かなくても、未記録の到達日時は記録する（例: クリック後に届いた開封で `opened_at` を埋める）
//!
//! [`EmailRecord::apply_transition`] はリポジトリの条件付き UPDATE と同じ規則を実装する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    campaign::CampaignId,
    delivery::ProviderMessageId,
    recipient::{MergeFields, RecipientId},
    value_objects::EmailAddress,
};

define_uuid_id! {
    /// 送信レコード ID
    ///
    /// 配信停止リンクのキーとしても使う。
    pub struct EmailRecordId;
}

/// 送信ステータス
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Failed,
    Bounced,
    Unsubscribed,
}

impl EmailStatus {
    /// エンゲージメント順位（吸収状態は `None`）
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Opened => Some(3),
            Self::Clicked => Some(4),
            Self::Failed | Self::Bounced | Self::Unsubscribed => None,
        }
    }

    /// 吸収状態か
    pub fn is_absorbing(self) -> bool {
        self.rank().is_none()
    }
}

/// 受信イベントによる遷移先
///
/// 送信処理だけが行う遷移（sent / failed）はここに含めない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionTarget {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
}

impl TransitionTarget {
    pub fn status(self) -> EmailStatus {
        match self {
            Self::Delivered => EmailStatus::Delivered,
            Self::Opened => EmailStatus::Opened,
            Self::Clicked => EmailStatus::Clicked,
            Self::Bounced => EmailStatus::Bounced,
            Self::Unsubscribed => EmailStatus::Unsubscribed,
        }
    }
}

/// 受信イベント 1 件ぶんの遷移要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTransition {
    pub target:      TransitionTarget,
    pub occurred_at: DateTime<Utc>,
    /// バウンス・配信停止の理由（`error_message` に記録する）
    pub reason:      Option<String>,
}

/// 遷移の適用結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionOutcome {
    /// ステータスが変わった
    Applied,
    /// ステータスは変わらず、未記録の到達日時だけ記録した
    TimestampOnly,
    /// 何も変わらなかった（重複・吸収状態・順位の逆行）
    Ignored,
}

/// 送信レコードエンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    id: EmailRecordId,
    campaign_id: CampaignId,
    recipient_id: RecipientId,
    email: EmailAddress,
    display_name: Option<String>,
    merge_fields: MergeFields,
    status: EmailStatus,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    provider_message_id: Option<ProviderMessageId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 送信レコードの新規作成パラメータ
pub struct NewEmailRecord {
    pub id: EmailRecordId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub email: EmailAddress,
    pub display_name: Option<String>,
    pub merge_fields: MergeFields,
    pub now: DateTime<Utc>,
}

/// 送信レコードの DB 復元パラメータ
pub struct EmailRecordRecord {
    pub id: EmailRecordId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub email: EmailAddress,
    pub display_name: Option<String>,
    pub merge_fields: MergeFields,
    pub status: EmailStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<ProviderMessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailRecord {
    /// 未送信（pending）の送信レコードを作成する
    pub fn new(params: NewEmailRecord) -> Self {
        Self {
            id: params.id,
            campaign_id: params.campaign_id,
            recipient_id: params.recipient_id,
            email: params.email,
            display_name: params.display_name,
            merge_fields: params.merge_fields,
            status: EmailStatus::Pending,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            unsubscribed_at: None,
            error_message: None,
            provider_message_id: None,
            created_at: params.now,
            updated_at: params.now,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 送信済み以降なのにプロバイダメッセージ ID が無い
    pub fn from_db(record: EmailRecordRecord) -> Result<Self, DomainError> {
        let requires_message_id = matches!(
            record.status,
            EmailStatus::Sent | EmailStatus::Delivered | EmailStatus::Opened | EmailStatus::Clicked
        );
        if requires_message_id && record.provider_message_id.is_none() {
            return Err(DomainError::Validation(format!(
                "{} の送信レコードにはプロバイダメッセージ ID が必要です",
                record.status
            )));
        }

        Ok(Self {
            id: record.id,
            campaign_id: record.campaign_id,
            recipient_id: record.recipient_id,
            email: record.email,
            display_name: record.display_name,
            merge_fields: record.merge_fields,
            status: record.status,
            sent_at: record.sent_at,
            delivered_at: record.delivered_at,
            opened_at: record.opened_at,
            clicked_at: record.clicked_at,
            bounced_at: record.bounced_at,
            unsubscribed_at: record.unsubscribed_at,
            error_message: record.error_message,
            provider_message_id: record.provider_message_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &EmailRecordId {
        &self.id
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }

    pub fn recipient_id(&self) -> &RecipientId {
        &self.recipient_id
    }

    pub fn email(&self) -> &EmailAddress {
        &self.email
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn merge_fields(&self) -> &MergeFields {
        &self.merge_fields
    }

    pub fn status(&self) -> EmailStatus {
        self.status
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn clicked_at(&self) -> Option<DateTime<Utc>> {
        self.clicked_at
    }

    pub fn bounced_at(&self) -> Option<DateTime<Utc>> {
        self.bounced_at
    }

    pub fn unsubscribed_at(&self) -> Option<DateTime<Utc>> {
        self.unsubscribed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn provider_message_id(&self) -> Option<&ProviderMessageId> {
        self.provider_message_id.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // ビジネスロジックメソッド

    fn ensure_pending(&self, action: &'static str) -> Result<(), DomainError> {
        if self.status == EmailStatus::Pending {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                entity: "EmailRecord",
                from: self.status.to_string(),
                action,
            })
        }
    }

    /// 送信成功を記録した新しいレコードを返す（pending からのみ）
    pub fn mark_sent(
        self,
        provider_message_id: ProviderMessageId,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        self.ensure_pending("送信済みに")?;
        Ok(Self {
            status: EmailStatus::Sent,
            sent_at: Some(now),
            provider_message_id: Some(provider_message_id),
            updated_at: now,
            ..self
        })
    }

    /// 送信失敗を記録した新しいレコードを返す（pending からのみ）
    pub fn mark_failed(self, error: impl Into<String>, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.ensure_pending("送信失敗に")?;
        Ok(Self {
            status: EmailStatus::Failed,
            error_message: Some(error.into()),
            updated_at: now,
            ..self
        })
    }

    /// 配信停止済みの宛先として送信をスキップした新しいレコードを返す（pending からのみ）
    pub fn mark_unsubscribed(
        self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        self.ensure_pending("配信停止に")?;
        Ok(Self {
            status: EmailStatus::Unsubscribed,
            unsubscribed_at: Some(now),
            error_message: Some(reason.into()),
            updated_at: now,
            ..self
        })
    }

    /// 受信イベントによる遷移を適用する
    ///
    /// 吸収状態のレコードには何もしない。重複イベントを何度適用しても結果は同じ。
    pub fn apply_transition(self, transition: &EmailTransition) -> (Self, TransitionOutcome) {
        if self.status.is_absorbing() {
            return (self, TransitionOutcome::Ignored);
        }

        let at = transition.occurred_at;
        let mut next = self;

        match transition.target {
            TransitionTarget::Bounced => {
                next.status = EmailStatus::Bounced;
                next.bounced_at.get_or_insert(at);
                if let Some(reason) = &transition.reason {
                    next.error_message = Some(reason.clone());
                }
                next.updated_at = at;
                (next, TransitionOutcome::Applied)
            }
            TransitionTarget::Unsubscribed => {
                next.status = EmailStatus::Unsubscribed;
                next.unsubscribed_at.get_or_insert(at);
                if let Some(reason) = &transition.reason {
                    next.error_message = Some(reason.clone());
                }
                next.updated_at = at;
                (next, TransitionOutcome::Applied)
            }
            TransitionTarget::Delivered | TransitionTarget::Opened | TransitionTarget::Clicked => {
                let target = transition.target.status();
                let moves_forward = target.rank() > next.status.rank();

                let slot = match transition.target {
                    TransitionTarget::Delivered => &mut next.delivered_at,
                    TransitionTarget::Opened => &mut next.opened_at,
                    _ => &mut next.clicked_at,
                };
                let stamps = slot.is_none();
                slot.get_or_insert(at);

                if moves_forward {
                    next.status = target;
                }
                let outcome = match (moves_forward, stamps) {
                    (true, _) => TransitionOutcome::Applied,
                    (false, true) => TransitionOutcome::TimestampOnly,
                    (false, false) => TransitionOutcome::Ignored,
                };
                if outcome != TransitionOutcome::Ignored {
                    next.updated_at = at;
                }
                (next, outcome)
            }
        }
    }
}
