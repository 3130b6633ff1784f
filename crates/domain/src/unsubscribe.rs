//! # 配信停止
//!
//! メールアドレス単位の配信停止エントリ。送信前に毎回照合される。
//! 一度登録したエントリは削除しない（再購読機能は持たない）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{campaign::CampaignId, email::EmailRecordId, value_objects::EmailAddress};

define_uuid_id! {
    /// 配信停止エントリ ID
    pub struct UnsubscribeEntryId;
}

/// 配信停止の経路
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
pub enum UnsubscribeSource {
    /// プロバイダからの配信停止イベント
    Webhook,
    /// メール内の配信停止リンク
    Link,
}

/// 配信停止エントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeEntry {
    pub id:              UnsubscribeEntryId,
    pub email:           EmailAddress,
    /// `None` なら全キャンペーンで停止
    pub campaign_id:     Option<CampaignId>,
    pub source:          UnsubscribeSource,
    /// 停止のきっかけになった送信レコード
    pub email_record_id: Option<EmailRecordId>,
    pub created_at:      DateTime<Utc>,
}

impl UnsubscribeEntry {
    /// 全キャンペーン共通の配信停止エントリを作成する
    pub fn global(
        email: EmailAddress,
        source: UnsubscribeSource,
        email_record_id: Option<EmailRecordId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UnsubscribeEntryId::new(),
            email,
            campaign_id: None,
            source,
            email_record_id,
            created_at: now,
        }
    }

    /// 指定したキャンペーンの送信を止めるか
    pub fn applies_to(&self, campaign_id: &CampaignId) -> bool {
        self.campaign_id.as_ref().is_none_or(|scoped| scoped == campaign_id)
    }
}
