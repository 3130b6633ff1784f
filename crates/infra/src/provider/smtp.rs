//! SMTP 配信実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境ではローカル SMTP サーバー（Mailpit など）に接続する。
//!
//! SMTP はメッセージ ID を返さないため、送信側で `Message-ID` を生成してそれを返す。

use std::error::Error as StdError;

use async_trait::async_trait;
use hikyaku_domain::delivery::{DeliveryError, OutboundEmail, ProviderMessageId};
use lettre::{
    Address,
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{
        Mailbox,
        Message,
        MultiPart,
        SinglePart,
        header::{ContentType, Header, HeaderName, HeaderValue},
    },
};
use uuid::Uuid;

use super::{DeliveryProvider, correlation};

/// `X-Campaign-Id` ヘッダ
#[derive(Debug, Clone)]
struct CampaignIdHeader(String);

impl Header for CampaignIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(correlation::CAMPAIGN_HEADER)
    }

    fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `X-Email-Record-Id` ヘッダ
#[derive(Debug, Clone)]
struct EmailRecordIdHeader(String);

impl Header for EmailRecordIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(correlation::EMAIL_RECORD_HEADER)
    }

    fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// SMTP 配信
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
pub struct SmtpDeliveryProvider {
    transport:         AsyncSmtpTransport<Tokio1Executor>,
    message_id_domain: String,
}

impl SmtpDeliveryProvider {
    /// 新しい SMTP 配信インスタンスを作成
    ///
    /// # 引数
    ///
    /// - `host`: SMTP サーバーのホスト名（例: "localhost"）
    /// - `port`: SMTP サーバーのポート番号（例: 1025 for Mailpit）
    /// - `message_id_domain`: 生成する Message-ID の `@` 以降
    pub fn new(host: &str, port: u16, message_id_domain: impl Into<String>) -> Self {
        // builder_dangerous: TLS なしで接続（ローカル SMTP 向け）
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .build();

        Self {
            transport,
            message_id_domain: message_id_domain.into(),
        }
    }

    fn build_message(
        &self,
        email: &OutboundEmail,
        message_id: &str,
    ) -> Result<Message, DeliveryError> {
        let address = |raw: &str, label: &str| {
            raw.parse::<Address>()
                .map_err(|e| DeliveryError::InvalidMessage(format!("{label}不正: {e}")))
        };

        let from = Mailbox::new(
            Some(email.from.from_name.clone()),
            address(email.from.from_email.as_str(), "送信元アドレス")?,
        );
        let to = Mailbox::new(email.to_name.clone(), address(email.to.as_str(), "宛先アドレス")?);

        let mut builder = Message::builder()
            .message_id(Some(format!("<{message_id}>")))
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(CampaignIdHeader(email.correlation.campaign_id.to_string()))
            .header(EmailRecordIdHeader(
                email.correlation.email_record_id.to_string(),
            ));
        if let Some(reply_to) = &email.from.reply_to {
            builder = builder.reply_to(Mailbox::new(None, address(reply_to.as_str(), "返信先アドレス")?));
        }

        let message = match (&email.html_body, &email.text_body) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(html), None) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
            (None, text) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone().unwrap_or_default()),
        };

        message.map_err(|e| DeliveryError::InvalidMessage(format!("メッセージ構築失敗: {e}")))
    }
}

#[async_trait]
impl DeliveryProvider for SmtpDeliveryProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderMessageId, DeliveryError> {
        let message_id = format!("{}@{}", Uuid::now_v7(), self.message_id_domain);
        let message = self.build_message(email, &message_id)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::SendFailed(format!("SMTP 送信失敗: {e}")))?;

        Ok(ProviderMessageId::new(message_id))
    }
}
