//! # キャンペーン
//!
//! 1 つのテンプレートと 1 つの宛先ソースに対する一括送信ジョブを表す。
//!
//! 状態遷移は ADT（代数的データ型）で表現し、状態ごとに存在すべき日時を型で強制する。
//!
//! ## 状態遷移
//!
//! ```text
//! draft ──schedule──▶ scheduled ──start──▶ sending ──complete──▶ sent
//!   │                    │                  │  ▲
//!   │                    │                pause │ start
//!   │                    │                  ▼  │
//!   │                    │                 paused ──complete──▶ sent
//!   └────────────────────┴──────cancel──────┴──────▶ cancelled
//! ```
//!
//! `sent` と `cancelled` は終端状態。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    recipient::{RecipientSourceId, TemplateId},
    stats::CampaignStats,
    template::TemplateContent,
    value_objects::{CampaignName, EmailAddress},
};

define_uuid_id! {
    /// キャンペーン ID
    pub struct CampaignId;
}

/// キャンペーンステータス
///
/// campaigns テーブルの `status` カラムに格納される値。
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    /// 下書き
    Draft,
    /// 送信予約済み
    Scheduled,
    /// 送信中
    Sending,
    /// 一時停止
    Paused,
    /// 送信完了
    Sent,
    /// 中止
    Cancelled,
}

impl CampaignStatus {
    /// 終端状態か
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }
}

/// 送信者情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub from_name:  String,
    pub from_email: EmailAddress,
    pub reply_to:   Option<EmailAddress>,
}

/// キャンペーンの状態（ADT ベースステートマシン）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignState {
    /// 下書き
    Draft,
    /// 送信予約済み
    Scheduled(ScheduledState),
    /// 送信中
    Sending(RunningState),
    /// 一時停止
    Paused(RunningState),
    /// 送信完了
    Sent(CompletedState),
    /// 中止
    Cancelled(CancelledState),
}

/// Scheduled 状態の固有フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledState {
    pub scheduled_at: DateTime<Utc>,
}

/// Sending / Paused 共通のフィールド
///
/// 一時停止から再開しても `started_at` は最初の開始日時のまま。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningState {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at:   DateTime<Utc>,
}

/// Sent 状態の固有フィールド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedState {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at:   DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Cancelled 状態の固有フィールド
///
/// 送信開始前に中止された場合は `started_at` が無い。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledState {
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at:   Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// キャンペーンエンティティ
///
/// 共通フィールドを外側に、状態固有フィールドを `state` に分離する。
/// `stats` は送信レコードから再計算されるスナップショットで、正本ではない。
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    id: CampaignId,
    name: CampaignName,
    template_id: Option<TemplateId>,
    recipient_source_id: Option<RecipientSourceId>,
    sender: SenderIdentity,
    subject_override: Option<String>,
    stats: CampaignStats,
    stats_updated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state: CampaignState,
}

/// キャンペーンの新規作成パラメータ
pub struct NewCampaign {
    pub id: CampaignId,
    pub name: CampaignName,
    pub template_id: Option<TemplateId>,
    pub recipient_source_id: Option<RecipientSourceId>,
    pub sender: SenderIdentity,
    pub subject_override: Option<String>,
    pub now: DateTime<Utc>,
}

/// キャンペーンの DB 復元パラメータ
///
/// DB スキーマのフラット構造を表現する。`from_db()` で不変条件を検証して ADT に変換する。
pub struct CampaignRecord {
    pub id: CampaignId,
    pub name: CampaignName,
    pub template_id: Option<TemplateId>,
    pub recipient_source_id: Option<RecipientSourceId>,
    pub sender: SenderIdentity,
    pub subject_override: Option<String>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: CampaignStats,
    pub stats_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn require<T>(value: Option<T>, status: CampaignStatus, field: &str) -> Result<T, DomainError> {
    value.ok_or_else(|| {
        DomainError::Validation(format!(
            "{status} キャンペーンには {field} が必要です"
        ))
    })
}

impl Campaign {
    /// 新しいキャンペーンを下書きとして作成する
    pub fn new(params: NewCampaign) -> Self {
        Self {
            id: params.id,
            name: params.name,
            template_id: params.template_id,
            recipient_source_id: params.recipient_source_id,
            sender: params.sender,
            subject_override: params
                .subject_override
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            stats: CampaignStats::default(),
            stats_updated_at: None,
            created_at: params.now,
            updated_at: params.now,
            state: CampaignState::Draft,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 状態に必要な日時が欠けている
    pub fn from_db(record: CampaignRecord) -> Result<Self, DomainError> {
        let status = record.status;
        let state = match status {
            CampaignStatus::Draft => CampaignState::Draft,
            CampaignStatus::Scheduled => CampaignState::Scheduled(ScheduledState {
                scheduled_at: require(record.scheduled_at, status, "scheduled_at")?,
            }),
            CampaignStatus::Sending => CampaignState::Sending(RunningState {
                scheduled_at: record.scheduled_at,
                started_at:   require(record.started_at, status, "started_at")?,
            }),
            CampaignStatus::Paused => CampaignState::Paused(RunningState {
                scheduled_at: record.scheduled_at,
                started_at:   require(record.started_at, status, "started_at")?,
            }),
            CampaignStatus::Sent => CampaignState::Sent(CompletedState {
                scheduled_at: record.scheduled_at,
                started_at:   require(record.started_at, status, "started_at")?,
                completed_at: require(record.completed_at, status, "completed_at")?,
            }),
            CampaignStatus::Cancelled => CampaignState::Cancelled(CancelledState {
                scheduled_at: record.scheduled_at,
                started_at:   record.started_at,
                completed_at: require(record.completed_at, status, "completed_at")?,
            }),
        };

        Ok(Self {
            id: record.id,
            name: record.name,
            template_id: record.template_id,
            recipient_source_id: record.recipient_source_id,
            sender: record.sender,
            subject_override: record.subject_override,
            stats: record.stats,
            stats_updated_at: record.stats_updated_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            state,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &CampaignId {
        &self.id
    }

    pub fn name(&self) -> &CampaignName {
        &self.name
    }

    pub fn template_id(&self) -> Option<&TemplateId> {
        self.template_id.as_ref()
    }

    pub fn recipient_source_id(&self) -> Option<&RecipientSourceId> {
        self.recipient_source_id.as_ref()
    }

    pub fn sender(&self) -> &SenderIdentity {
        &self.sender
    }

    pub fn subject_override(&self) -> Option<&str> {
        self.subject_override.as_deref()
    }

    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    pub fn stats_updated_at(&self) -> Option<DateTime<Utc>> {
        self.stats_updated_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    pub fn status(&self) -> CampaignStatus {
        match &self.state {
            CampaignState::Draft => CampaignStatus::Draft,
            CampaignState::Scheduled(_) => CampaignStatus::Scheduled,
            CampaignState::Sending(_) => CampaignStatus::Sending,
            CampaignState::Paused(_) => CampaignStatus::Paused,
            CampaignState::Sent(_) => CampaignStatus::Sent,
            CampaignState::Cancelled(_) => CampaignStatus::Cancelled,
        }
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            CampaignState::Draft => None,
            CampaignState::Scheduled(s) => Some(s.scheduled_at),
            CampaignState::Sending(s) | CampaignState::Paused(s) => s.scheduled_at,
            CampaignState::Sent(s) => s.scheduled_at,
            CampaignState::Cancelled(s) => s.scheduled_at,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            CampaignState::Draft | CampaignState::Scheduled(_) => None,
            CampaignState::Sending(s) | CampaignState::Paused(s) => Some(s.started_at),
            CampaignState::Sent(s) => Some(s.started_at),
            CampaignState::Cancelled(s) => s.started_at,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            CampaignState::Sent(s) => Some(s.completed_at),
            CampaignState::Cancelled(s) => Some(s.completed_at),
            _ => None,
        }
    }

    // ビジネスロジックメソッド

    /// 送信に使う件名を解決する
    ///
    /// キャンペーンの上書き件名 → テンプレート件名の順で、空でないものを採用する。
    pub fn resolved_subject(&self, template: &TemplateContent) -> Option<String> {
        self.subject_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| template.subject())
            .map(String::from)
    }

    /// テンプレートと宛先ソースが設定済みかチェックする
    pub fn ensure_ready(&self) -> Result<(&TemplateId, &RecipientSourceId), DomainError> {
        let template_id = self.template_id.as_ref().ok_or_else(|| {
            DomainError::Validation("キャンペーンにテンプレートが設定されていません".to_string())
        })?;
        let source_id = self.recipient_source_id.as_ref().ok_or_else(|| {
            DomainError::Validation("キャンペーンに宛先ソースが設定されていません".to_string())
        })?;
        Ok((template_id, source_id))
    }

    /// 削除可能かチェックする
    ///
    /// 送信中のキャンペーンは送信レコードを消すと送信処理が壊れるため削除できない。
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        match self.state {
            CampaignState::Sending(_) => Err(self.invalid_transition("削除")),
            _ => Ok(()),
        }
    }

    fn invalid_transition(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            entity: "Campaign",
            from: self.status().to_string(),
            action,
        }
    }

    /// 送信予約した新しいキャンペーンを返す
    ///
    /// 下書きからのみ可能。予約日時は現在より後でなければならない。
    pub fn scheduled(self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            CampaignState::Draft => {
                self.ensure_ready()?;
                if at <= now {
                    return Err(DomainError::Validation(
                        "予約日時は現在より後である必要があります".to_string(),
                    ));
                }
                Ok(Self {
                    state: CampaignState::Scheduled(ScheduledState { scheduled_at: at }),
                    updated_at: now,
                    ..self
                })
            }
            _ => Err(self.invalid_transition("送信予約")),
        }
    }

    /// 送信を開始した新しいキャンペーンを返す
    ///
    /// 下書き・予約済み・一時停止から可能。一時停止からの再開では最初の開始日時を保持する。
    pub fn started(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            CampaignState::Draft => {
                self.ensure_ready()?;
                Ok(Self {
                    state: CampaignState::Sending(RunningState {
                        scheduled_at: None,
                        started_at:   now,
                    }),
                    updated_at: now,
                    ..self
                })
            }
            CampaignState::Scheduled(scheduled) => Ok(Self {
                state: CampaignState::Sending(RunningState {
                    scheduled_at: Some(scheduled.scheduled_at),
                    started_at:   now,
                }),
                updated_at: now,
                ..self
            }),
            CampaignState::Paused(running) => Ok(Self {
                state: CampaignState::Sending(running),
                updated_at: now,
                ..self
            }),
            _ => Err(self.invalid_transition("送信開始")),
        }
    }

    /// 一時停止した新しいキャンペーンを返す
    pub fn paused(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            CampaignState::Sending(running) => Ok(Self {
                state: CampaignState::Paused(running),
                updated_at: now,
                ..self
            }),
            _ => Err(self.invalid_transition("一時停止")),
        }
    }

    /// 中止した新しいキャンペーンを返す
    ///
    /// 未送信の送信レコードは失敗扱いにせず、そのまま残る。
    pub fn cancelled(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let (scheduled_at, started_at) = match &self.state {
            CampaignState::Draft => (None, None),
            CampaignState::Scheduled(s) => (Some(s.scheduled_at), None),
            CampaignState::Sending(s) | CampaignState::Paused(s) => {
                (s.scheduled_at, Some(s.started_at))
            }
            CampaignState::Sent(_) | CampaignState::Cancelled(_) => {
                return Err(self.invalid_transition("中止"));
            }
        };

        Ok(Self {
            state: CampaignState::Cancelled(CancelledState {
                scheduled_at,
                started_at,
                completed_at: now,
            }),
            updated_at: now,
            ..self
        })
    }

    /// 送信完了した新しいキャンペーンを返す
    ///
    /// 送信中、または未送信レコードが残っていない一時停止状態から可能。
    pub fn completed(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            CampaignState::Sending(running) | CampaignState::Paused(running) => Ok(Self {
                state: CampaignState::Sent(CompletedState {
                    scheduled_at: running.scheduled_at,
                    started_at:   running.started_at,
                    completed_at: now,
                }),
                updated_at: now,
                ..self
            }),
            _ => Err(self.invalid_transition("送信完了")),
        }
    }

    /// 集計スナップショットを差し替えた新しいキャンペーンを返す
    pub fn with_stats(self, stats: CampaignStats, now: DateTime<Utc>) -> Self {
        Self {
            stats,
            stats_updated_at: Some(now),
            ..self
        }
    }
}
