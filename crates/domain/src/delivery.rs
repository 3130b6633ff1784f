//! # 配信
//!
//! 外部の配信プロバイダに渡す送信メッセージと、その結果を定義する。
//!
//! 送信メッセージには相関タグ（キャンペーン ID / 送信レコード ID）を付け、
//! プロバイダ側のヘッダ・タグとして送る。受信 Webhook の突合は、
//! 送信時に保存したプロバイダメッセージ ID で行う。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    campaign::{CampaignId, SenderIdentity},
    email::EmailRecordId,
    template::RenderedContent,
    value_objects::EmailAddress,
};

/// プロバイダメッセージ ID
///
/// 配信プロバイダが 1 通ごとに割り当てる識別子。受信イベントの突合キーになる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct ProviderMessageId(String);

impl ProviderMessageId {
    /// 前後の空白と山括弧（`<...>`）を取り除いて作成する
    ///
    /// SMTP の Message-ID ヘッダ形式と、括弧なしで返す API の両方を同じキーで扱うため。
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim().trim_start_matches('<').trim_end_matches('>');
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 相関タグ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationTags {
    pub campaign_id:     CampaignId,
    pub email_record_id: EmailRecordId,
}

/// 送信メッセージ
///
/// 展開済みの内容を持つ。DeliveryProvider に渡される。
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from:        SenderIdentity,
    pub to:          EmailAddress,
    pub to_name:     Option<String>,
    pub subject:     String,
    pub html_body:   Option<String>,
    pub text_body:   Option<String>,
    pub correlation: CorrelationTags,
}

impl OutboundEmail {
    pub fn new(
        from: SenderIdentity,
        to: EmailAddress,
        to_name: Option<String>,
        content: RenderedContent,
        correlation: CorrelationTags,
    ) -> Self {
        Self {
            from,
            to,
            to_name,
            subject: content.subject,
            html_body: content.html,
            text_body: content.text,
            correlation,
        }
    }
}

/// 配信エラー
///
/// 1 回のプロバイダ呼び出しの失敗。送信レコードに記録され、送信処理は次の宛先へ進む。
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// プロバイダ呼び出しに失敗（ネットワーク障害・API エラーを含む）
    #[error("メール送信に失敗: {0}")]
    SendFailed(String),

    /// メッセージを組み立てられない（アドレス形式不正など）
    #[error("送信メッセージが不正: {0}")]
    InvalidMessage(String),
}
