//! # 配信停止ハンドラ
//!
//! メール内の配信停止リンクの受け口。
//!
//! ## エンドポイント
//!
//! - `GET /unsubscribe/{email_record_id}` - リンクのクリック
//! - `POST /unsubscribe/{email_record_id}` - ワンクリック配信停止（List-Unsubscribe-Post）
//!
//! どちらも冪等で、2 回目以降は `already_unsubscribed` を返す。

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use hikyaku_domain::email::EmailRecordId;
use hikyaku_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    usecase::{UnsubscribeResult, UnsubscribeUseCaseImpl},
};

/// 配信停止 API の共有状態
pub struct UnsubscribeState {
    pub usecase: Arc<UnsubscribeUseCaseImpl>,
}

/// 配信停止結果 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsubscribeDto {
    /// `unsubscribed` または `already_unsubscribed`
    pub status: String,
}

impl From<UnsubscribeResult> for UnsubscribeDto {
    fn from(result: UnsubscribeResult) -> Self {
        let status = match result {
            UnsubscribeResult::Unsubscribed => "unsubscribed",
            UnsubscribeResult::AlreadyUnsubscribed => "already_unsubscribed",
        };
        Self {
            status: status.to_string(),
        }
    }
}

/// GET / POST /unsubscribe/{email_record_id}
///
/// ## レスポンス
///
/// - `200 OK`: 配信停止済み
/// - `404 Not Found`: 送信レコードが見つからない
#[tracing::instrument(skip_all, fields(%email_record_id))]
pub async fn unsubscribe(
    State(state): State<Arc<UnsubscribeState>>,
    Path(email_record_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let result = state
        .usecase
        .unsubscribe(&EmailRecordId::from_uuid(email_record_id))
        .await?;

    let response = ApiResponse::new(UnsubscribeDto::from(result));
    Ok((StatusCode::OK, Json(response)))
}
