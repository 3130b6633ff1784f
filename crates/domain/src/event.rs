//! # 送信イベント
//!
//! 送信レコードのライフサイクル上の出来事を 1 件ずつ記録する追記専用ログ。
//! 更新・削除はしない。重複 Webhook も受信した回数だけ記録される。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use strum::IntoStaticStr;

use crate::{campaign::CampaignId, email::EmailRecordId};

define_uuid_id! {
    /// 送信イベント ID
    pub struct EmailEventId;
}

/// 送信イベント種別
///
/// email_events テーブルの `event_type` カラムに格納される値。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailEventType {
    /// プロバイダが受け付けた
    Sent,
    /// プロバイダ呼び出しに失敗した
    Failed,
    /// 受信側に配信された
    Delivered,
    /// 開封された
    Opened,
    /// リンクがクリックされた
    Clicked,
    /// バウンスした
    Bounced,
    /// 迷惑メール報告された（レコードは bounced になる）
    Complained,
    /// 配信停止された（Webhook またはリンク）
    Unsubscribed,
    /// 配信停止済みの宛先として送信をスキップした
    Suppressed,
}

/// 送信イベント
#[derive(Debug, Clone, PartialEq)]
pub struct EmailEvent {
    pub id:              EmailEventId,
    pub email_record_id: EmailRecordId,
    pub campaign_id:     CampaignId,
    pub event_type:      EmailEventType,
    pub occurred_at:     DateTime<Utc>,
    /// IP・リンク・バウンス理由などの任意情報
    pub metadata:        JsonValue,
}

impl EmailEvent {
    pub fn new(
        email_record_id: EmailRecordId,
        campaign_id: CampaignId,
        event_type: EmailEventType,
        occurred_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            id: EmailEventId::new(),
            email_record_id,
            campaign_id,
            event_type,
            occurred_at,
            metadata,
        }
    }
}
