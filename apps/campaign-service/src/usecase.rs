//! # ユースケース層
//!
//! Campaign Service のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・外部コラボレータ・配信プロバイダを `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約
//! - **状態の正は DB**: キャンペーンの状態はステータスガード付きの書き込みで決まり、
//!   プロセス内のレジストリは二重起動を避けるための補助にとどまる
//!
//! ## モジュール構成
//!
//! - `campaign`: キャンペーンの作成・予約・開始・一時停止・中止
//! - `sender`: 1 キャンペーン分の送信処理
//! - `dispatch`: 送信タスクの起動と実行中キャンペーンの管理
//! - `scheduler`: 予約日時が到来したキャンペーンの昇格
//! - `webhook`: プロバイダからのコールバック処理
//! - `stats`: 集計の再計算
//! - `unsubscribe`: 配信停止リンク

pub(crate) mod helpers;

pub mod campaign;
pub mod dispatch;
pub mod scheduler;
pub mod sender;
pub mod stats;
pub mod unsubscribe;
pub mod webhook;

use std::sync::Arc;

pub use campaign::{CampaignUseCaseImpl, CreateCampaignInput, EmailRecordPage};
pub use dispatch::{ActiveCampaignRegistry, ActiveRunGuard, SendDispatcher};
use hikyaku_infra::repository::{
    CampaignRepository,
    EmailEventRepository,
    EmailRecordRepository,
    UnsubscribeRepository,
    WebhookLogRepository,
};
pub use scheduler::CampaignScheduler;
pub use sender::{CampaignSender, SendOutcome, SendRunReport};
pub use stats::StatsRecalculator;
pub use unsubscribe::{UnsubscribeResult, UnsubscribeUseCaseImpl};
pub use webhook::{IngestOutcome, WebhookProcessor};

/// ユースケースが共有する永続化の依存
#[derive(Clone)]
pub struct Repositories {
    pub campaigns:     Arc<dyn CampaignRepository>,
    pub email_records: Arc<dyn EmailRecordRepository>,
    pub email_events:  Arc<dyn EmailEventRepository>,
    pub unsubscribes:  Arc<dyn UnsubscribeRepository>,
    pub webhook_logs:  Arc<dyn WebhookLogRepository>,
}
