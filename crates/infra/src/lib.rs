//! # Hikyaku インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 設計方針
//!
//! このクレートは永続化・配信・外部コラボレータのトレイトと、その具体的な実装を提供する。
//! 外部システムの詳細をカプセル化し、ユースケースをインフラの変更から保護する。
//!
//! ## 依存関係
//!
//! ```text
//! campaign-service → infra → domain
//!          ↘           ↘
//!            shared
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL 接続プールとマイグレーション
//! - [`error`] - インフラ層エラー定義
//! - [`repository`] - キャンペーン・送信レコード・イベント・配信停止・受信ログの永続化
//! - [`provider`] - 配信プロバイダ（SES / SMTP / Noop）
//! - [`external`] - 宛先ソースとテンプレートリゾルバ
//! - `mock` - テスト用インメモリ実装（`test-utils` feature）
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use hikyaku_infra::{db, repository::PostgresCampaignRepository};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = db::create_pool("postgres://localhost/hikyaku").await?;
//!     db::run_migrations(&pool).await?;
//!     let campaigns = PostgresCampaignRepository::new(pool);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod external;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod provider;
pub mod repository;

pub use error::InfraError;
