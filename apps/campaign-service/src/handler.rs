//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ビジネスロジックはユースケース層に委譲

pub mod campaign;
pub mod health;
pub mod unsubscribe;
pub mod webhook;

pub use campaign::{
    CampaignState,
    cancel_campaign,
    create_campaign,
    delete_campaign,
    get_campaign,
    get_campaign_stats,
    list_campaigns,
    list_email_records,
    pause_campaign,
    schedule_campaign,
    start_campaign,
};
pub use health::{ReadinessState, health_check, readiness_check};
pub use unsubscribe::{UnsubscribeState, unsubscribe};
pub use webhook::{WebhookState, receive_provider_webhook};
