//! Noop 配信実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! ローカル開発や配信無効化時に使用する。

use async_trait::async_trait;
use hikyaku_domain::delivery::{DeliveryError, OutboundEmail, ProviderMessageId};
use uuid::Uuid;

use super::DeliveryProvider;

/// Noop 配信（ログ出力のみ）
///
/// 受信 Webhook の突合を手元で試せるよう、`noop-` 接頭辞付きのメッセージ ID を返す。
#[derive(Debug, Clone)]
pub struct NoopDeliveryProvider;

#[async_trait]
impl DeliveryProvider for NoopDeliveryProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderMessageId, DeliveryError> {
        let message_id = ProviderMessageId::new(format!("noop-{}", Uuid::now_v7()));
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            campaign_id = %email.correlation.campaign_id,
            email_record_id = %email.correlation.email_record_id,
            provider_message_id = %message_id,
            "Noop: メール送信をスキップ"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use hikyaku_domain::{
        campaign::{CampaignId, SenderIdentity},
        delivery::CorrelationTags,
        email::EmailRecordId,
        value_objects::EmailAddress,
    };

    use super::*;

    #[tokio::test]
    async fn test_sendはnoop接頭辞のメッセージidを返す() {
        let sender = NoopDeliveryProvider;
        let email = OutboundEmail {
            from:        SenderIdentity {
                from_name:  "Hikyaku".to_string(),
                from_email: EmailAddress::new("news@example.com").unwrap(),
                reply_to:   None,
            },
            to:          EmailAddress::new("test@example.com").unwrap(),
            to_name:     None,
            subject:     "テスト件名".to_string(),
            html_body:   Some("<p>テスト</p>".to_string()),
            text_body:   Some("テスト".to_string()),
            correlation: CorrelationTags {
                campaign_id:     CampaignId::new(),
                email_record_id: EmailRecordId::new(),
            },
        };

        let result = sender.send(&email).await.unwrap();
        assert!(result.as_str().starts_with("noop-"));
    }
}
