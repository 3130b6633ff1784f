//! # Hikyaku 共有ユーティリティ
//!
//! 配信パイプラインの各クレートから使われる横断的なユーティリティを提供する。
//!
//! ## 設計方針
//!
//! - ビジネスロジックを含まない
//! - axum などの Web フレームワークには依存しない（HTTP 変換は各アプリの責務）
//! - トレーシング初期化は `observability` フィーチャーでのみ有効にする

pub mod api_response;
pub mod error_response;
pub mod event_log;
pub mod health;
pub mod observability;

pub use api_response::{ApiResponse, PagedResponse};
pub use error_response::ErrorResponse;
pub use health::{CheckStatus, HealthResponse, ReadinessResponse, ReadinessStatus};
