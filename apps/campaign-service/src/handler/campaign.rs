//! # キャンペーンハンドラ
//!
//! キャンペーンの管理 API を提供する。
//!
//! ## エンドポイント
//!
//! - `POST /campaigns` - 下書きの作成
//! - `GET /campaigns` - 一覧（`?status=&limit=&offset=`）
//! - `GET /campaigns/{id}` - 取得
//! - `DELETE /campaigns/{id}` - 削除（送信中は不可）
//! - `POST /campaigns/{id}/schedule` - 送信予約
//! - `POST /campaigns/{id}/start` - 即時送信開始
//! - `POST /campaigns/{id}/pause` - 一時停止
//! - `POST /campaigns/{id}/cancel` - 中止
//! - `GET /campaigns/{id}/stats` - 集計（数え直した値）
//! - `GET /campaigns/{id}/emails` - 送信レコード一覧（`?status=&limit=&offset=`）

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::{Campaign, CampaignId, CampaignStatus},
    email::{EmailRecord, EmailStatus},
    recipient::{RecipientSourceId, TemplateId},
    stats::CampaignStats,
};
use hikyaku_shared::{ApiResponse, PagedResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    usecase::{CampaignUseCaseImpl, CreateCampaignInput},
};

/// 一覧取得の既定件数
const DEFAULT_PAGE_LIMIT: u32 = 50;
/// 一覧取得の最大件数
const MAX_PAGE_LIMIT: u32 = 200;

/// キャンペーン API の共有状態
pub struct CampaignState {
    pub usecase: Arc<CampaignUseCaseImpl>,
}

// --- リクエスト/レスポンス型 ---

/// キャンペーン作成リクエスト
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub template_id: Option<Uuid>,
    pub recipient_source_id: Option<Uuid>,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub subject_override: Option<String>,
}

/// 送信予約リクエスト
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// 一覧取得のクエリパラメータ
///
/// `status` は snake_case のステータス名。
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit:  Option<u32>,
    pub offset: Option<u32>,
}

impl ListQuery {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// ステータス名を解釈する（不正な名前は 400）
    fn status<S: std::str::FromStr>(&self) -> Result<Option<S>, ServiceError> {
        self.status
            .as_deref()
            .map(|s| {
                s.parse::<S>().map_err(|_| {
                    ServiceError::BadRequest(format!("不正なステータスです: {}", s))
                })
            })
            .transpose()
    }
}

/// キャンペーン DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CampaignDto {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub template_id: Option<Uuid>,
    pub recipient_source_id: Option<Uuid>,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub subject_override: Option<String>,
    pub stats: CampaignStats,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Campaign> for CampaignDto {
    fn from(c: &Campaign) -> Self {
        Self {
            id: *c.id().as_uuid(),
            name: c.name().as_str().to_string(),
            status: c.status().to_string(),
            template_id: c.template_id().map(|t| *t.as_uuid()),
            recipient_source_id: c.recipient_source_id().map(|r| *r.as_uuid()),
            from_name: c.sender().from_name.clone(),
            from_email: c.sender().from_email.as_str().to_string(),
            reply_to: c.sender().reply_to.as_ref().map(|r| r.as_str().to_string()),
            subject_override: c.subject_override().map(str::to_string),
            stats: c.stats().clone(),
            scheduled_at: c.scheduled_at().map(|t| t.to_rfc3339()),
            started_at: c.started_at().map(|t| t.to_rfc3339()),
            completed_at: c.completed_at().map(|t| t.to_rfc3339()),
            created_at: c.created_at().to_rfc3339(),
            updated_at: c.updated_at().to_rfc3339(),
        }
    }
}

/// 集計 DTO（件数と率）
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CampaignStatsDto {
    #[serde(flatten)]
    pub counts:      CampaignStats,
    pub open_rate:   f64,
    pub click_rate:  f64,
    pub bounce_rate: f64,
}

/// 送信レコード DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EmailRecordDto {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub opened_at: Option<String>,
    pub clicked_at: Option<String>,
    pub bounced_at: Option<String>,
    pub unsubscribed_at: Option<String>,
    pub created_at: String,
}

impl From<&EmailRecord> for EmailRecordDto {
    fn from(r: &EmailRecord) -> Self {
        Self {
            id: *r.id().as_uuid(),
            recipient_id: *r.recipient_id().as_uuid(),
            email: r.email().as_str().to_string(),
            display_name: r.display_name().map(str::to_string),
            status: r.status().to_string(),
            provider_message_id: r.provider_message_id().map(|m| m.as_str().to_string()),
            error_message: r.error_message().map(str::to_string),
            sent_at: r.sent_at().map(|t| t.to_rfc3339()),
            delivered_at: r.delivered_at().map(|t| t.to_rfc3339()),
            opened_at: r.opened_at().map(|t| t.to_rfc3339()),
            clicked_at: r.clicked_at().map(|t| t.to_rfc3339()),
            bounced_at: r.bounced_at().map(|t| t.to_rfc3339()),
            unsubscribed_at: r.unsubscribed_at().map(|t| t.to_rfc3339()),
            created_at: r.created_at().to_rfc3339(),
        }
    }
}

fn campaign_response(campaign: &Campaign) -> impl IntoResponse + use<> {
    (
        StatusCode::OK,
        Json(ApiResponse::new(CampaignDto::from(campaign))),
    )
}

// --- ハンドラ ---

/// POST /campaigns
///
/// 下書きのキャンペーンを作成する。
///
/// ## レスポンス
///
/// - `201 Created`: 作成されたキャンペーン
/// - `400 Bad Request`: バリデーションエラー、テンプレートが見つからない
#[tracing::instrument(skip_all)]
pub async fn create_campaign(
    State(state): State<Arc<CampaignState>>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = CreateCampaignInput {
        name: req.name,
        template_id: req.template_id.map(TemplateId::from_uuid),
        recipient_source_id: req.recipient_source_id.map(RecipientSourceId::from_uuid),
        from_name: req.from_name,
        from_email: req.from_email,
        reply_to: req.reply_to,
        subject_override: req.subject_override,
    };

    let campaign = state.usecase.create_campaign(input).await?;

    let response = ApiResponse::new(CampaignDto::from(&campaign));
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /campaigns
///
/// キャンペーン一覧を作成日時の新しい順に取得する。
#[tracing::instrument(skip_all)]
pub async fn list_campaigns(
    State(state): State<Arc<CampaignState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = query.status::<CampaignStatus>()?;

    let campaigns = state
        .usecase
        .list_campaigns(status, query.limit(), query.offset())
        .await?;

    let items: Vec<CampaignDto> = campaigns.iter().map(CampaignDto::from).collect();
    Ok((StatusCode::OK, Json(ApiResponse::new(items))))
}

/// GET /campaigns/{id}
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let campaign = state
        .usecase
        .get_campaign(&CampaignId::from_uuid(id))
        .await?;

    Ok(campaign_response(&campaign))
}

/// DELETE /campaigns/{id}
///
/// ## レスポンス
///
/// - `204 No Content`: 削除成功
/// - `404 Not Found`: キャンペーンが見つからない
/// - `409 Conflict`: 送信中
#[tracing::instrument(skip_all, fields(%id))]
pub async fn delete_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .usecase
        .delete_campaign(&CampaignId::from_uuid(id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /campaigns/{id}/schedule
///
/// ## レスポンス
///
/// - `200 OK`: 予約後のキャンペーン
/// - `400 Bad Request`: 予約日時が過去、テンプレート・宛先ソースが未設定
/// - `409 Conflict`: 下書き以外
/// - `422 Unprocessable Entity`: 件名が解決できない、送信可能な宛先が 0 件
#[tracing::instrument(skip_all, fields(%id))]
pub async fn schedule_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let campaign = state
        .usecase
        .schedule(&CampaignId::from_uuid(id), req.scheduled_at)
        .await?;

    Ok(campaign_response(&campaign))
}

/// POST /campaigns/{id}/start
///
/// 送信中の場合は状態を変えずに 200 を返す。
#[tracing::instrument(skip_all, fields(%id))]
pub async fn start_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let campaign = state.usecase.start(&CampaignId::from_uuid(id)).await?;

    Ok(campaign_response(&campaign))
}

/// POST /campaigns/{id}/pause
#[tracing::instrument(skip_all, fields(%id))]
pub async fn pause_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let campaign = state.usecase.pause(&CampaignId::from_uuid(id)).await?;

    Ok(campaign_response(&campaign))
}

/// POST /campaigns/{id}/cancel
#[tracing::instrument(skip_all, fields(%id))]
pub async fn cancel_campaign(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let campaign = state.usecase.cancel(&CampaignId::from_uuid(id)).await?;

    Ok(campaign_response(&campaign))
}

/// GET /campaigns/{id}/stats
#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_campaign_stats(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let stats = state.usecase.stats(&CampaignId::from_uuid(id)).await?;

    let dto = CampaignStatsDto {
        open_rate: stats.open_rate(),
        click_rate: stats.click_rate(),
        bounce_rate: stats.bounce_rate(),
        counts: stats,
    };
    Ok((StatusCode::OK, Json(ApiResponse::new(dto))))
}

/// GET /campaigns/{id}/emails
#[tracing::instrument(skip_all, fields(%id))]
pub async fn list_email_records(
    State(state): State<Arc<CampaignState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = query.status::<EmailStatus>()?;
    let (limit, offset) = (query.limit(), query.offset());

    let page = state
        .usecase
        .list_email_records(&CampaignId::from_uuid(id), status, limit, offset)
        .await?;

    let items: Vec<EmailRecordDto> = page.records.iter().map(EmailRecordDto::from).collect();
    let response = PagedResponse::new(items, page.total, limit, offset);
    Ok((StatusCode::OK, Json(response)))
}
