//! # ヘルスチェックハンドラ
//!
//! Campaign Service の稼働状態を確認するためのエンドポイント。
//!
//! - `/health`: Liveness Check（常に `"healthy"` を返す）
//! - `/health/ready`: Readiness Check（データベースへの疎通を確認）
//!
//! ## レスポンス例
//!
//! ```json
//! {
//!   "status": "not_ready",
//!   "checks": { "database": "error" }
//! }
//! ```
//!
//! レスポンス型は [`hikyaku_shared::HealthResponse`] / [`hikyaku_shared::ReadinessResponse`] を参照。

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use hikyaku_infra::db;
use hikyaku_shared::{CheckStatus, HealthResponse, ReadinessResponse, ReadinessStatus};
use sqlx::PgPool;

/// Readiness Check 用の State
pub struct ReadinessState {
    pub pool: PgPool,
}

/// Campaign Service のヘルスチェックエンドポイント
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(env!("CARGO_PKG_VERSION")))
}

/// Campaign Service の Readiness Check エンドポイント
///
/// 全チェック OK → 200、1 つでも失敗 → 503。
#[tracing::instrument(skip_all)]
pub async fn readiness_check(State(state): State<Arc<ReadinessState>>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("database".to_string(), check_database(&state.pool).await);

    let response = ReadinessResponse::from_checks(checks);
    let http_status = match response.status {
        ReadinessStatus::Ready => StatusCode::OK,
        ReadinessStatus::NotReady => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

/// データベースへの接続を `SELECT 1` で確認する（タイムアウト: 5 秒）
async fn check_database(pool: &PgPool) -> CheckStatus {
    match tokio::time::timeout(Duration::from_secs(5), db::ping(pool)).await {
        Ok(Ok(())) => CheckStatus::Ok,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness check: database ping failed");
            CheckStatus::Error
        }
        Err(_) => {
            tracing::warn!("readiness check: database check timed out");
            CheckStatus::Error
        }
    }
}
