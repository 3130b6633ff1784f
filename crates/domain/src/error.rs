//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! ## エラーの種類と HTTP ステータスの対応
//!
//! | エラー種別 | HTTP ステータス | 用途 |
//! |-----------|----------------|------|
//! | `Validation` | 400 Bad Request | 入力値の検証失敗 |
//! | `InvalidTransition` | 409 Conflict | 現在の状態では許可されない状態遷移 |
//! | `NotFound` | 404 Not Found | エンティティが存在しない |
//! | `Conflict` | 409 Conflict | 条件付き更新の失敗 |
//!
//! ## 使用例
//!
//! ```rust
//! use hikyaku_domain::DomainError;
//!
//! fn validate_name(name: &str) -> Result<(), DomainError> {
//!     if name.is_empty() {
//!         return Err(DomainError::Validation("名前は必須です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
///
/// ビジネスロジックの実行中に発生する例外状態を表現する。
/// サービス層でこのエラーを受け取り、適切な HTTP レスポンスに変換する。
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がビジネスルールに違反している場合に使用する。
    ///
    /// # 例
    ///
    /// - 必須フィールドが未入力
    /// - 文字数制限の超過
    /// - 不正なフォーマット
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 不正な状態遷移
    ///
    /// 現在の状態から要求された操作へ遷移できない場合に使用する。
    /// 例: 送信完了済みのキャンペーンを一時停止しようとした。
    #[error("{entity} は {from} 状態から {action} できません")]
    InvalidTransition {
        /// エンティティの種類（"Campaign" など）
        entity: &'static str,
        /// 遷移元の状態
        from:   String,
        /// 要求された操作
        action: &'static str,
    },

    /// エンティティが見つからない
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"Campaign", "EmailRecord" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },

    /// 競合エラー
    ///
    /// 条件付き更新（ステータスガード）が他の更新に負けた場合に使用する。
    #[error("競合が発生しました: {0}")]
    Conflict(String),
}
