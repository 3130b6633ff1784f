//! # Hikyaku ドメイン層
//!
//! メールキャンペーン配信パイプラインの中核となるドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! このクレートは I/O を一切持たない。状態遷移の可否判定、
//! 送信ステータスの前進規則、テンプレート展開などの純粋なロジックだけを置き、
//! 永続化や外部プロバイダ呼び出しはインフラ層に任せる。
//!
//! ## 依存関係の方向
//!
//! ```text
//! campaign-service → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`campaign`] - キャンペーン（送信ジョブ）とその状態遷移
//! - [`email`] - 宛先ごとの送信レコードとステータスの前進規則
//! - [`event`] - 送信レコードの不変イベントログ
//! - [`webhook`] - プロバイダからのコールバックの解釈
//! - [`unsubscribe`] - 配信停止エントリ
//! - [`stats`] - キャンペーン集計
//! - [`template`] - 差し込み変数の展開
//! - [`recipient`] - 外部から供給される宛先
//! - [`delivery`] - プロバイダに渡す送信メッセージ
//! - [`clock`] - 時刻の抽象化
//!
//! ## 使用例
//!
//! ```rust
//! use hikyaku_domain::{DomainError, campaign::CampaignId};
//!
//! let campaign_id = CampaignId::new();
//!
//! let error = DomainError::NotFound {
//!     entity_type: "Campaign",
//!     id:          campaign_id.to_string(),
//! };
//! assert!(error.to_string().contains("Campaign"));
//! ```

#[macro_use]
mod macros;

pub mod campaign;
pub mod clock;
pub mod delivery;
pub mod email;
pub mod error;
pub mod event;
pub mod recipient;
pub mod stats;
pub mod template;
pub mod unsubscribe;
pub mod value_objects;
pub mod webhook;

pub use error::DomainError;
