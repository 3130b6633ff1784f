//! 送信パイプラインのテストハーネス
//!
//! モックリポジトリ・モックプロバイダで Campaign Service 全体を組み立てる。
//! ルーター経由の操作と、モックの中身の直接確認の両方に使う。

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use chrono::{DateTime, Utc};
use hikyaku_campaign_service::{
    app_builder::build_router,
    config::SenderConfig,
    handler::{CampaignState, UnsubscribeState, WebhookState},
    usecase::{
        ActiveCampaignRegistry,
        CampaignSender,
        CampaignUseCaseImpl,
        Repositories,
        SendDispatcher,
        UnsubscribeUseCaseImpl,
        WebhookProcessor,
    },
};
use hikyaku_domain::{
    clock::{Clock, FixedClock},
    recipient::{Recipient, RecipientId, RecipientSourceId, TemplateId},
    template::TemplateContent,
    value_objects::EmailAddress,
};
use hikyaku_infra::mock::{
    MockCampaignRepository,
    MockDeliveryProvider,
    MockEmailEventRepository,
    MockEmailRecordRepository,
    MockRecipientSource,
    MockTemplateResolver,
    MockUnsubscribeRepository,
    MockWebhookLogRepository,
};
use tower::ServiceExt;

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// モックで組み立てた Campaign Service
pub struct Pipeline {
    pub campaigns:     MockCampaignRepository,
    pub email_records: MockEmailRecordRepository,
    pub email_events:  MockEmailEventRepository,
    pub unsubscribes:  MockUnsubscribeRepository,
    pub webhook_logs:  MockWebhookLogRepository,
    pub recipients:    MockRecipientSource,
    pub templates:     MockTemplateResolver,
    pub provider:      MockDeliveryProvider,
    pub registry:      ActiveCampaignRegistry,
    pub usecase:       Arc<CampaignUseCaseImpl>,
    pub router:        Router,
}

impl Pipeline {
    pub fn new() -> Self {
        let campaigns = MockCampaignRepository::new();
        let email_records = MockEmailRecordRepository::new();
        let email_events = MockEmailEventRepository::new();
        let unsubscribes = MockUnsubscribeRepository::new();
        let webhook_logs = MockWebhookLogRepository::new();
        let recipients = MockRecipientSource::new();
        let templates = MockTemplateResolver::new();
        let provider = MockDeliveryProvider::new();
        let registry = ActiveCampaignRegistry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(fixed_now()));

        let repos = Repositories {
            campaigns:     Arc::new(campaigns.clone()),
            email_records: Arc::new(email_records.clone()),
            email_events:  Arc::new(email_events.clone()),
            unsubscribes:  Arc::new(unsubscribes.clone()),
            webhook_logs:  Arc::new(webhook_logs.clone()),
        };
        let sender = CampaignSender::new(
            repos.clone(),
            Arc::new(templates.clone()),
            Arc::new(provider.clone()),
            clock.clone(),
            SenderConfig {
                send_delay:        Duration::ZERO,
                batch_size:        2,
                stats_flush_every: 1,
            },
        );
        let dispatcher = SendDispatcher::new(Arc::new(sender), registry.clone());
        let usecase = Arc::new(CampaignUseCaseImpl::new(
            repos.clone(),
            Arc::new(recipients.clone()),
            Arc::new(templates.clone()),
            dispatcher,
            clock.clone(),
        ));

        let router = build_router(
            Arc::new(CampaignState {
                usecase: usecase.clone(),
            }),
            Arc::new(WebhookState {
                processor: Arc::new(WebhookProcessor::new(repos.clone(), clock.clone())),
            }),
            Arc::new(UnsubscribeState {
                usecase: Arc::new(UnsubscribeUseCaseImpl::new(repos, clock)),
            }),
        );

        Self {
            campaigns,
            email_records,
            email_events,
            unsubscribes,
            webhook_logs,
            recipients,
            templates,
            provider,
            registry,
            usecase,
            router,
        }
    }

    /// テンプレートと宛先を登録し、キャンペーン作成リクエストのボディを返す
    pub fn campaign_body(&self, addresses: &[&str]) -> serde_json::Value {
        let template_id = TemplateId::new();
        self.templates.add_template(
            template_id.clone(),
            TemplateContent {
                subject:   Some("{{firstName}} さんへ".to_string()),
                html:      Some("<p>{{firstName}} さん、こんにちは</p>".to_string()),
                text:      Some("{{firstName}} さん、こんにちは".to_string()),
                variables: vec!["firstName".to_string()],
            },
        );
        let source_id = RecipientSourceId::new();
        self.recipients.add_recipients(
            source_id.clone(),
            addresses
                .iter()
                .map(|address| Recipient {
                    id:            RecipientId::new(),
                    email:         EmailAddress::new(*address).unwrap(),
                    first_name:    Some("太郎".to_string()),
                    last_name:     None,
                    custom_fields: Default::default(),
                })
                .collect(),
        );

        serde_json::json!({
            "name": "冬のお知らせ",
            "template_id": template_id.as_uuid(),
            "recipient_source_id": source_id.as_uuid(),
            "from_name": "Hikyaku",
            "from_email": "news@example.com"
        })
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// 起動した送信タスクが全て終わるまで待つ
    pub async fn wait_for_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("送信タスクが終わらない");
    }
}

pub async fn response_body<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
