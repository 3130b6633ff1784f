//! # プロバイダ Webhook ハンドラ
//!
//! 配信プロバイダからのイベント通知を受け付ける。
//!
//! ## エンドポイント
//!
//! ```text
//! POST /webhooks/provider
//! ```
//!
//! ボディはイベント 1 件のオブジェクト、またはその配列。
//! JSON として解釈できないボディも受信ログには残す。
//!
//! ## レスポンス例
//!
//! ```json
//! { "received": 3 }
//! ```
//!
//! 処理に失敗したイベントがあっても 200 を返す（プロバイダの再送を誘発しない）。

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::usecase::WebhookProcessor;

/// Webhook API の共有状態
pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// 受信結果
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: usize,
}

/// POST /webhooks/provider
#[tracing::instrument(skip_all, fields(body_len = body.len()))]
pub async fn receive_provider_webhook(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> impl IntoResponse {
    let payload = serde_json::from_slice::<JsonValue>(&body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&body).into_owned()));

    let received = state.processor.ingest_batch(payload).await;

    (StatusCode::OK, Json(WebhookAck { received }))
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Method, Request},
        routing::post,
    };
    use chrono::{DateTime, Utc};
    use hikyaku_domain::{
        campaign::CampaignId,
        clock::FixedClock,
        delivery::ProviderMessageId,
        email::{EmailRecord, EmailRecordId, EmailStatus, NewEmailRecord},
        recipient::{MergeFields, RecipientId},
        value_objects::EmailAddress,
    };
    use hikyaku_infra::mock::{
        MockCampaignRepository,
        MockEmailEventRepository,
        MockEmailRecordRepository,
        MockUnsubscribeRepository,
        MockWebhookLogRepository,
    };
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;
    use crate::usecase::Repositories;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct TestApp {
        router:        Router,
        email_records: MockEmailRecordRepository,
        webhook_logs:  MockWebhookLogRepository,
    }

    fn create_test_app() -> TestApp {
        let email_records = MockEmailRecordRepository::new();
        let webhook_logs = MockWebhookLogRepository::new();
        let repos = Repositories {
            campaigns:     Arc::new(MockCampaignRepository::new()),
            email_records: Arc::new(email_records.clone()),
            email_events:  Arc::new(MockEmailEventRepository::new()),
            unsubscribes:  Arc::new(MockUnsubscribeRepository::new()),
            webhook_logs:  Arc::new(webhook_logs.clone()),
        };
        let processor = WebhookProcessor::new(repos, Arc::new(FixedClock::new(fixed_now())));
        let state = Arc::new(WebhookState {
            processor: Arc::new(processor),
        });

        TestApp {
            router: Router::new()
                .route("/webhooks/provider", post(receive_provider_webhook))
                .with_state(state),
            email_records,
            webhook_logs,
        }
    }

    fn sent_record(message_id: &str) -> EmailRecord {
        EmailRecord::new(NewEmailRecord {
            id: EmailRecordId::new(),
            campaign_id: CampaignId::new(),
            recipient_id: RecipientId::new(),
            email: EmailAddress::new("taro@example.com").unwrap(),
            display_name: None,
            merge_fields: MergeFields {
                email: "taro@example.com".to_string(),
                ..MergeFields::default()
            },
            now: fixed_now(),
        })
        .mark_sent(ProviderMessageId::new(message_id), fixed_now())
        .unwrap()
    }

    fn raw_request(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/webhooks/provider")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn response_body<T: serde::de::DeserializeOwned>(
        response: axum::http::Response<Body>,
    ) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_イベント配列を受け取り件数を返す() {
        // Given
        let app = create_test_app();
        let record = sent_record("msg-1");
        app.email_records.add_record(record.clone());
        let payload = serde_json::json!([
            {
                "event": "delivered",
                "email": "taro@example.com",
                "message_id": "msg-1",
                "occurred_at": "2023-11-14T22:20:00Z"
            },
            {
                "event": "open",
                "email": "taro@example.com",
                "message_id": "msg-1",
                "occurred_at": "2023-11-14T22:30:00Z"
            }
        ]);

        // When
        let response = app
            .router
            .clone()
            .oneshot(raw_request(payload.to_string()))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body: WebhookAck = response_body(response).await;
        assert_eq!(body, WebhookAck { received: 2 });
        let stored = app.email_records.snapshot(record.id()).unwrap();
        assert_eq!(stored.status(), EmailStatus::Opened);
        assert_eq!(app.webhook_logs.logs().len(), 2);
    }

    #[tokio::test]
    async fn test_post_jsonでないボディも200で受信ログに残る() {
        // Given
        let app = create_test_app();

        // When
        let response = app
            .router
            .clone()
            .oneshot(raw_request("not json"))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        let body: WebhookAck = response_body(response).await;
        assert_eq!(body.received, 1);
        let logs = app.webhook_logs.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].payload, JsonValue::String("not json".to_string()));
        assert!(logs[0].processed);
    }
}
