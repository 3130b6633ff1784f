//! SES 配信実装
//!
//! AWS SES v2 API を使用してメールを送信する。
//! 本番環境で使用する。相関タグは SES のメッセージタグとして付け、
//! 配信イベント（SNS 経由）にそのまま載って返ってくる。

use async_trait::async_trait;
use aws_sdk_sesv2::{
    Client,
    types::{Body, Content, Destination, EmailContent, Message, MessageTag},
};
use hikyaku_domain::delivery::{DeliveryError, OutboundEmail, ProviderMessageId};
use lettre::{Address, message::Mailbox};

use super::{DeliveryProvider, correlation};

/// SES 配信
///
/// `aws_sdk_sesv2::Client` をラップする。
/// 送信元アドレスはキャンペーンごとに異なるため、SES 側で検証済みのドメインであること。
pub struct SesDeliveryProvider {
    client: Client,
}

impl SesDeliveryProvider {
    /// 新しい SES 配信インスタンスを作成
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn content(data: &str, part: &str) -> Result<Content, DeliveryError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| DeliveryError::InvalidMessage(format!("{part}構築失敗: {e}")))
}

fn tag(name: &str, value: String) -> Result<MessageTag, DeliveryError> {
    MessageTag::builder()
        .name(name)
        .value(value)
        .build()
        .map_err(|e| DeliveryError::InvalidMessage(format!("メッセージタグ構築失敗: {e}")))
}

/// 表示名付きのアドレスをヘッダ表記にする
///
/// 非 ASCII の表示名は RFC 2047 の encoded-word に、記号を含む表示名は quoted-string になる。
fn mailbox(name: Option<&str>, address: &str, label: &str) -> Result<String, DeliveryError> {
    let address = address
        .parse::<Address>()
        .map_err(|e| DeliveryError::InvalidMessage(format!("{label}不正: {e}")))?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
    Ok(Mailbox::new(name, address).to_string())
}

#[async_trait]
impl DeliveryProvider for SesDeliveryProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderMessageId, DeliveryError> {
        let to = mailbox(email.to_name.as_deref(), email.to.as_str(), "宛先アドレス")?;
        let destination = Destination::builder().to_addresses(to).build();

        let body = Body::builder()
            .set_html(
                email
                    .html_body
                    .as_deref()
                    .map(|html| content(html, "HTML 本文"))
                    .transpose()?,
            )
            .set_text(
                email
                    .text_body
                    .as_deref()
                    .map(|text| content(text, "テキスト本文"))
                    .transpose()?,
            )
            .build();

        let message = Message::builder()
            .subject(content(&email.subject, "件名")?)
            .body(body)
            .build();

        let from = mailbox(
            Some(&email.from.from_name),
            email.from.from_email.as_str(),
            "送信元アドレス",
        )?;

        let mut request = self
            .client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .email_tags(tag(
                correlation::CAMPAIGN_TAG,
                email.correlation.campaign_id.to_string(),
            )?)
            .email_tags(tag(
                correlation::EMAIL_RECORD_TAG,
                email.correlation.email_record_id.to_string(),
            )?);
        if let Some(reply_to) = &email.from.reply_to {
            request = request.reply_to_addresses(reply_to.as_str());
        }

        let output = request
            .send()
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("SES 送信失敗: {e}")))?;

        output
            .message_id()
            .map(ProviderMessageId::new)
            .ok_or_else(|| DeliveryError::SendFailed("SES がメッセージ ID を返さなかった".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SesDeliveryProvider>();
    }

    #[test]
    fn test_メッセージタグに相関idを載せられる() {
        let sut = tag(correlation::CAMPAIGN_TAG, "0190-abc".to_string()).unwrap();

        assert_eq!(sut.name(), "campaign_id");
        assert_eq!(sut.value(), "0190-abc");
    }

    #[test]
    fn test_日本語の表示名はencoded_wordになる() {
        let sut = mailbox(Some("秘書課"), "news@example.com", "送信元アドレス").unwrap();

        assert!(sut.to_lowercase().starts_with("=?utf-8?b?"), "{sut}");
        assert!(sut.ends_with(" <news@example.com>"), "{sut}");
        assert!(!sut.contains("秘書課"));
    }

    #[test]
    fn test_引用符を含む表示名はエスケープされる() {
        let sut = mailbox(Some("Hikyaku \"News\""), "news@example.com", "送信元アドレス").unwrap();

        assert_eq!(sut, r#""Hikyaku \"News\"" <news@example.com>"#);
    }

    #[test]
    fn test_表示名が無ければアドレスだけになる() {
        assert_eq!(
            mailbox(None, "hanako@example.com", "宛先アドレス").unwrap(),
            "hanako@example.com"
        );
        assert_eq!(
            mailbox(Some("  "), "hanako@example.com", "宛先アドレス").unwrap(),
            "hanako@example.com"
        );
    }

    #[test]
    fn test_不正なアドレスは送信前に弾く() {
        assert!(matches!(
            mailbox(Some("Hikyaku"), "not-an-address", "送信元アドレス"),
            Err(DeliveryError::InvalidMessage(_))
        ));
    }
}
