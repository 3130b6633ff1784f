//! # Campaign Service エラー定義
//!
//! Campaign Service 固有のエラーと、HTTP レスポンスへの変換を定義する。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hikyaku_domain::DomainError;
use hikyaku_infra::InfraError;
use hikyaku_shared::{ErrorResponse, event_log::error as log_error};
use thiserror::Error;

/// Campaign Service で発生するエラー
#[derive(Debug, Error)]
pub enum ServiceError {
    /// リソースが見つからない
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),

    /// 現在の状態では許可されない操作
    #[error("不正な状態遷移: {0}")]
    InvalidTransition(String),

    /// 競合（ステータスガード付き更新に負けた）
    #[error("競合が発生しました: {0}")]
    Conflict(String),

    /// 前提条件を満たしていない（テンプレート未設定・件名なし・宛先 0 件など）
    #[error("前提条件を満たしていません: {0}")]
    Precondition(String),

    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(#[from] InfraError),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::BadRequest(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            other @ DomainError::InvalidTransition { .. } => {
                Self::InvalidTransition(other.to_string())
            }
            other @ DomainError::NotFound { .. } => Self::NotFound(other.to_string()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
            Self::BadRequest(msg) => ErrorResponse::bad_request(msg.clone()),
            Self::InvalidTransition(msg) => ErrorResponse::invalid_transition(msg.clone()),
            Self::Conflict(msg) => ErrorResponse::conflict(msg.clone()),
            Self::Precondition(msg) => ErrorResponse::precondition_failed(msg.clone()),
            Self::Database(e) => {
                tracing::error!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::DATABASE,
                    "データベースエラー: {}",
                    e
                );
                ErrorResponse::internal_error()
            }
            Self::Internal(msg) => {
                tracing::error!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::INTERNAL,
                    "内部エラー: {}",
                    msg
                );
                ErrorResponse::internal_error()
            }
        };

        let status =
            StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND)]
    #[case(ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST)]
    #[case(ServiceError::InvalidTransition("x".into()), StatusCode::CONFLICT)]
    #[case(ServiceError::Conflict("x".into()), StatusCode::CONFLICT)]
    #[case(ServiceError::Precondition("x".into()), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(ServiceError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_エラー種別ごとのステータスコード(
        #[case] error: ServiceError,
        #[case] expected: StatusCode,
    ) {
        let response = error.into_response();
        assert_eq!(response.status(), expected);
    }

    #[test]
    fn test_不正な状態遷移はinvalid_transitionに変換される() {
        let err = DomainError::InvalidTransition {
            entity: "Campaign",
            from:   "sent".to_string(),
            action: "一時停止",
        };

        let sut = ServiceError::from(err);

        assert!(matches!(sut, ServiceError::InvalidTransition(_)));
    }

    #[test]
    fn test_バリデーションエラーはbad_requestに変換される() {
        let sut = ServiceError::from(DomainError::Validation("キャンペーン名は必須です".into()));

        assert!(matches!(sut, ServiceError::BadRequest(msg) if msg == "キャンペーン名は必須です"));
    }
}
