//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! `jq` で調査しやすいよう、ログフィールドの命名規約とヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## エラーコンテキスト
//!
//! `tracing::error!` / `tracing::warn!` に `error.category` + `error.kind` フィールドを追加する。
//! 定数は [`error`] モジュールで提供。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用する。JSON 出力ではフラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、`tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: [`event::category`] の定数
/// - `event.action`: [`event::action`] の定数
/// - `event.entity_type`: [`event::entity_type`] の定数
/// - `event.entity_id`: エンティティ ID
/// - `event.result`: [`event::result`] の定数
///
/// ## 推奨フィールド
///
/// - `event.campaign_id`: キャンペーン以外のエンティティでも、所属キャンペーンが分かれば付ける
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const CAMPAIGN: &str = "campaign";
        pub const DELIVERY: &str = "delivery";
        pub const WEBHOOK: &str = "webhook";
        pub const UNSUBSCRIBE: &str = "unsubscribe";
    }

    /// イベントアクション
    pub mod action {
        // キャンペーン
        pub const CAMPAIGN_CREATED: &str = "campaign.created";
        pub const CAMPAIGN_DELETED: &str = "campaign.deleted";
        pub const CAMPAIGN_SCHEDULED: &str = "campaign.scheduled";
        pub const CAMPAIGN_STARTED: &str = "campaign.started";
        pub const CAMPAIGN_PAUSED: &str = "campaign.paused";
        pub const CAMPAIGN_CANCELLED: &str = "campaign.cancelled";
        pub const CAMPAIGN_COMPLETED: &str = "campaign.completed";
        pub const RECIPIENTS_MATERIALIZED: &str = "campaign.recipients_materialized";

        // 配信
        pub const SEND_RUN_STARTED: &str = "send_run.started";
        pub const SEND_RUN_FINISHED: &str = "send_run.finished";
        pub const EMAIL_SENT: &str = "email.sent";
        pub const EMAIL_FAILED: &str = "email.failed";
        pub const EMAIL_SUPPRESSED: &str = "email.suppressed";

        // Webhook
        pub const WEBHOOK_PROCESSED: &str = "webhook.processed";
        pub const WEBHOOK_UNMATCHED: &str = "webhook.unmatched";
        pub const WEBHOOK_REJECTED: &str = "webhook.rejected";
        pub const WEBHOOK_FAILED: &str = "webhook.failed";

        // 配信停止
        pub const UNSUBSCRIBE_RECORDED: &str = "unsubscribe.recorded";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const CAMPAIGN: &str = "campaign";
        pub const EMAIL_RECORD: &str = "email_record";
        pub const INBOUND_WEBHOOK_LOG: &str = "inbound_webhook_log";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
        pub const SKIPPED: &str = "skipped";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（配信プロバイダ、宛先ソース、テンプレート）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const INTERNAL: &str = "internal";
        pub const PROVIDER: &str = "provider";
        pub const SCHEDULER: &str = "scheduler";
        pub const SEND_RUN: &str = "send_run";
        pub const WEBHOOK_PAYLOAD: &str = "webhook_payload";
    }
}
