//! # Campaign Service アプリケーション構築
//!
//! State を受け取り、ルーターを組み立てる。
//! `main.rs` はインフラ初期化とサーバー起動に集中する。

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handler::{
    CampaignState,
    UnsubscribeState,
    WebhookState,
    cancel_campaign,
    create_campaign,
    delete_campaign,
    get_campaign,
    get_campaign_stats,
    health_check,
    list_campaigns,
    list_email_records,
    pause_campaign,
    receive_provider_webhook,
    schedule_campaign,
    start_campaign,
    unsubscribe,
};

/// ルーターを構築する
///
/// `/health/ready` はデータベース接続を持つ `main` 側で追加する。
pub fn build_router(
    campaign_state: Arc<CampaignState>,
    webhook_state: Arc<WebhookState>,
    unsubscribe_state: Arc<UnsubscribeState>,
) -> Router {
    let campaigns = Router::new()
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/campaigns/{id}",
            get(get_campaign).delete(delete_campaign),
        )
        .route("/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/campaigns/{id}/start", post(start_campaign))
        .route("/campaigns/{id}/pause", post(pause_campaign))
        .route("/campaigns/{id}/cancel", post(cancel_campaign))
        .route("/campaigns/{id}/stats", get(get_campaign_stats))
        .route("/campaigns/{id}/emails", get(list_email_records))
        .with_state(campaign_state);

    let webhooks = Router::new()
        .route("/webhooks/provider", post(receive_provider_webhook))
        .with_state(webhook_state);

    let unsubscribes = Router::new()
        .route(
            "/unsubscribe/{email_record_id}",
            get(unsubscribe).post(unsubscribe),
        )
        .with_state(unsubscribe_state);

    Router::new()
        .route("/health", get(health_check))
        .merge(campaigns)
        .merge(webhooks)
        .merge(unsubscribes)
        .layer(TraceLayer::new_for_http())
}
