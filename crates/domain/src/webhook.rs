//! # 受信 Webhook
//!
//! 配信プロバイダから非同期に届くイベントの解釈を定義する。
//!
//! ## イベント種別の対応
//!
//! | プロバイダの表記（大文字小文字は無視） | 種別 | レコードの遷移先 |
//! |---|---|---|
//! | `delivered`, `delivery` | Delivered | delivered |
//! | `open`, `opened` | Opened | opened |
//! | `click`, `clicked` | Clicked | clicked |
//! | `bounce`, `bounced`, `hard_bounce`, `soft_bounce`, `blocked`, `dropped` | Bounced | bounced |
//! | `unsubscribe`, `unsubscribed`, `group_unsubscribe` | Unsubscribed | unsubscribed |
//! | `complaint`, `spamreport`, `spam_report` | Complained | bounced（理由 `spam complaint`） |
//!
//! それ以外の表記は未対応として扱い、受信ログに注記して処理済みにする。

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use strum::IntoStaticStr;

use crate::{
    delivery::ProviderMessageId,
    email::{EmailTransition, TransitionTarget},
    event::EmailEventType,
};

define_uuid_id! {
    /// 受信 Webhook ログ ID
    pub struct InboundWebhookLogId;
}

/// 迷惑メール報告をバウンスとして記録するときの理由
pub const COMPLAINT_REASON: &str = "spam complaint";

/// プロバイダ経由の配信停止を記録するときの理由
pub const PROVIDER_UNSUBSCRIBE_REASON: &str = "unsubscribed via provider";

/// バウンスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BounceKind {
    Hard,
    Soft,
    Blocked,
    Dropped,
    Unspecified,
}

/// プロバイダイベント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    Delivered,
    Opened,
    Clicked,
    Bounced(BounceKind),
    Unsubscribed,
    Complained,
}

impl ProviderEventKind {
    /// プロバイダの表記を解釈する（未対応なら `None`）
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.trim().to_lowercase().as_str() {
            "delivered" | "delivery" => Self::Delivered,
            "open" | "opened" => Self::Opened,
            "click" | "clicked" => Self::Clicked,
            "bounce" | "bounced" => Self::Bounced(BounceKind::Unspecified),
            "hard_bounce" => Self::Bounced(BounceKind::Hard),
            "soft_bounce" => Self::Bounced(BounceKind::Soft),
            "blocked" => Self::Bounced(BounceKind::Blocked),
            "dropped" => Self::Bounced(BounceKind::Dropped),
            "unsubscribe" | "unsubscribed" | "group_unsubscribe" => Self::Unsubscribed,
            "complaint" | "spamreport" | "spam_report" => Self::Complained,
            _ => return None,
        };
        Some(kind)
    }

    /// 送信イベントログに記録する種別
    pub fn event_type(self) -> EmailEventType {
        match self {
            Self::Delivered => EmailEventType::Delivered,
            Self::Opened => EmailEventType::Opened,
            Self::Clicked => EmailEventType::Clicked,
            Self::Bounced(_) => EmailEventType::Bounced,
            Self::Unsubscribed => EmailEventType::Unsubscribed,
            Self::Complained => EmailEventType::Complained,
        }
    }

    /// 送信レコードの遷移先
    pub fn target(self) -> TransitionTarget {
        match self {
            Self::Delivered => TransitionTarget::Delivered,
            Self::Opened => TransitionTarget::Opened,
            Self::Clicked => TransitionTarget::Clicked,
            Self::Bounced(_) | Self::Complained => TransitionTarget::Bounced,
            Self::Unsubscribed => TransitionTarget::Unsubscribed,
        }
    }
}

/// イベント種別を探すキー（先に見つかったものを採用する）
const EVENT_TYPE_KEYS: [&str; 3] = ["event_type", "event", "type"];
/// 宛先メールアドレスを探すキー
const RECIPIENT_KEYS: [&str; 3] = ["recipient_email", "email", "recipient"];
/// プロバイダメッセージ ID を探すキー
const MESSAGE_ID_KEYS: [&str; 3] = ["provider_message_id", "message_id", "sg_message_id"];
/// 発生日時を探すキー（RFC 3339 文字列または UNIX 秒）
const OCCURRED_AT_KEYS: [&str; 2] = ["occurred_at", "timestamp"];

/// プロバイダイベント
///
/// `{event_type, recipient_email, provider_message_id, occurred_at, ...}` の形を受け付ける。
/// 各項目は別名キーも優先順に探し、採用しなかったキーは全て `metadata` に残す。
/// SendGrid の `{"event": "bounce", "type": "blocked"}` では `type` がメタデータになる。
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub event_type: String,
    pub recipient_email: Option<String>,
    pub provider_message_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, JsonValue>,
}

impl ProviderEvent {
    /// 生の JSON から解釈する
    ///
    /// オブジェクトでない、または文字列のイベント種別が無い場合はエラー。
    pub fn from_json(raw: &JsonValue) -> Result<Self, serde_json::Error> {
        let mut metadata = Map::<String, JsonValue>::deserialize(raw)?;

        let event_type = take_str(&mut metadata, &EVENT_TYPE_KEYS)
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field("event_type"))?;
        let recipient_email = take_str(&mut metadata, &RECIPIENT_KEYS);
        let provider_message_id = take_str(&mut metadata, &MESSAGE_ID_KEYS);
        let occurred_at = take_occurred_at(&mut metadata)?;

        Ok(Self {
            event_type,
            recipient_email,
            provider_message_id,
            occurred_at,
            metadata,
        })
    }

    pub fn kind(&self) -> Option<ProviderEventKind> {
        ProviderEventKind::parse(&self.event_type)
    }

    /// 空でないプロバイダメッセージ ID
    pub fn message_id(&self) -> Option<ProviderMessageId> {
        self.provider_message_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(ProviderMessageId::new)
    }

    /// メタデータの文字列値を引く
    ///
    /// トップレベルの追加キーを優先し、無ければ `metadata` オブジェクトの中を見る。
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .or_else(|| self.metadata.get("metadata").and_then(|m| m.get(key)))
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// 送信レコードに記録する理由
    pub fn reason(&self, kind: ProviderEventKind) -> Option<String> {
        match kind {
            ProviderEventKind::Bounced(bounce) => Some(
                ["reason", "bounce_type", "diagnostic"]
                    .into_iter()
                    .find_map(|key| self.meta_str(key))
                    .map_or_else(|| format!("{bounce} bounce"), String::from),
            ),
            ProviderEventKind::Complained => Some(COMPLAINT_REASON.to_string()),
            ProviderEventKind::Unsubscribed => Some(PROVIDER_UNSUBSCRIBE_REASON.to_string()),
            ProviderEventKind::Delivered
            | ProviderEventKind::Opened
            | ProviderEventKind::Clicked => None,
        }
    }

    /// 送信レコードへの遷移要求を作る
    ///
    /// 発生日時が無いイベントは受信日時で代用する。
    pub fn transition(&self, kind: ProviderEventKind, received_at: DateTime<Utc>) -> EmailTransition {
        EmailTransition {
            target:      kind.target(),
            occurred_at: self.occurred_at.unwrap_or(received_at),
            reason:      self.reason(kind),
        }
    }

    /// 送信イベントログに残すメタデータ
    pub fn event_metadata(&self, kind: ProviderEventKind) -> JsonValue {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            "provider_event".to_string(),
            JsonValue::String(self.event_type.clone()),
        );
        if let Some(email) = &self.recipient_email {
            metadata.insert("recipient_email".to_string(), JsonValue::String(email.clone()));
        }
        if let Some(reason) = self.reason(kind) {
            metadata.insert("reason".to_string(), JsonValue::String(reason));
        }
        JsonValue::Object(metadata)
    }
}

/// 候補キーのうち最初に文字列値を持つものを取り出す
fn take_str(fields: &mut Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    let key = keys
        .iter()
        .find(|key| fields.get(**key).is_some_and(JsonValue::is_string))?;
    match fields.remove(*key) {
        Some(JsonValue::String(value)) => Some(value),
        _ => None,
    }
}

fn take_occurred_at(
    fields: &mut Map<String, JsonValue>,
) -> Result<Option<DateTime<Utc>>, serde_json::Error> {
    let Some(key) = OCCURRED_AT_KEYS
        .iter()
        .find(|key| fields.get(**key).is_some_and(|v| v.is_string() || v.is_i64()))
    else {
        return Ok(None);
    };

    let occurred_at = match fields.get(*key) {
        Some(JsonValue::Number(n)) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Some(value) => Some(DateTime::<Utc>::deserialize(value)?),
        None => None,
    };
    if occurred_at.is_some() {
        fields.remove(*key);
    }
    Ok(occurred_at)
}
