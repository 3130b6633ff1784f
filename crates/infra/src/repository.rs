//! # リポジトリ実装
//!
//! 永続化のトレイトと、その PostgreSQL 実装を提供する。
//!
//! ## 設計方針
//!
//! - **トレイトで抽象化**: ユースケースはトレイト経由で使い、テストではモックに差し替える
//! - **データベース抽象化**: sqlx を使用し、PostgreSQL 固有の処理をカプセル化
//! - **単一行の条件付き更新**: 状態の書き込みはステータスガード付きの 1 文で行い、長いトランザクションを持たない

pub mod campaign_repository;
pub mod email_event_repository;
pub mod email_record_repository;
pub mod unsubscribe_repository;
pub mod webhook_log_repository;

pub use campaign_repository::{CampaignRepository, PostgresCampaignRepository};
pub use email_event_repository::{EmailEventRepository, PostgresEmailEventRepository};
pub use email_record_repository::{EmailRecordRepository, PostgresEmailRecordRepository};
pub use unsubscribe_repository::{PostgresUnsubscribeRepository, UnsubscribeRepository};
pub use webhook_log_repository::{
    InboundWebhookLog,
    PostgresWebhookLogRepository,
    WebhookLogRepository,
};
