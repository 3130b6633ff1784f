//! # 送信タスクの起動と実行中キャンペーンの管理
//!
//! ## 設計方針
//!
//! - **注入されるレジストリ**: 実行中キャンペーンの表はグローバル変数ではなく
//!   [`ActiveCampaignRegistry`] として明示的に持ち回る
//! - **キャンセルはトークンで伝える**: 停止要求は `CancellationToken` を通じて送信ループに届き、
//!   送信ループは次の宛先に進む前にそれを確認する
//! - **同じキャンペーンの送信は直列**: 停止要求中の古いタスクが残っていても、
//!   新しいタスクは古いタスクが抜けるまで送信を始めない
//!
//! レジストリはプロセス内でだけ有効。複数プロセス間の二重起動は
//! キャンペーンのステータスガード付き更新（`sending` への昇格）が防ぐ。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use hikyaku_domain::campaign::CampaignId;
use hikyaku_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::sender::CampaignSender;

#[derive(Debug)]
struct ActiveEntry {
    generation: u64,
    token:      CancellationToken,
    lane:       Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_generation: u64,
    entries:         HashMap<CampaignId, ActiveEntry>,
}

/// 実行中キャンペーンのレジストリ
///
/// `clone()` したレジストリは同じ表を共有する。
#[derive(Debug, Clone, Default)]
pub struct ActiveCampaignRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ActiveCampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 送信タスクの実行枠を確保する
    ///
    /// 停止要求を受けていないタスクが既にあれば `None`。
    /// 停止要求中のタスクが残っている場合は新しい枠を確保し、同じレーンを引き継ぐ。
    pub fn try_register(&self, campaign_id: &CampaignId) -> Option<ActiveRunGuard> {
        let mut state = self.lock();

        let lane = match state.entries.get(campaign_id) {
            Some(entry) if !entry.token.is_cancelled() => return None,
            Some(entry) => entry.lane.clone(),
            None => Arc::new(tokio::sync::Mutex::new(())),
        };

        state.next_generation += 1;
        let generation = state.next_generation;
        let token = CancellationToken::new();
        state.entries.insert(
            campaign_id.clone(),
            ActiveEntry {
                generation,
                token: token.clone(),
                lane: lane.clone(),
            },
        );

        Some(ActiveRunGuard {
            registry: self.clone(),
            campaign_id: campaign_id.clone(),
            generation,
            token,
            lane,
        })
    }

    /// 実行中のタスクに停止を要求する
    ///
    /// 停止要求を出せたら `true`。実行中のタスクが無ければ `false`。
    pub fn cancel(&self, campaign_id: &CampaignId) -> bool {
        let state = self.lock();
        match state.entries.get(campaign_id) {
            Some(entry) if !entry.token.is_cancelled() => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 全ての実行中タスクに停止を要求し、要求を出した数を返す（プロセス終了時）
    pub fn cancel_all(&self) -> usize {
        let state = self.lock();
        let mut stopped = 0;
        for entry in state.entries.values() {
            if !entry.token.is_cancelled() {
                entry.token.cancel();
                stopped += 1;
            }
        }
        stopped
    }

    /// 停止要求を受けていないタスクがあるか
    pub fn is_active(&self, campaign_id: &CampaignId) -> bool {
        self.lock()
            .entries
            .get(campaign_id)
            .is_some_and(|entry| !entry.token.is_cancelled())
    }

    /// 登録中のキャンペーン数（停止要求中を含む）
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, campaign_id: &CampaignId, generation: u64) {
        let mut state = self.lock();
        if state
            .entries
            .get(campaign_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.entries.remove(campaign_id);
        }
    }
}

/// 送信タスクの実行枠
///
/// ドロップ時にレジストリから自分の登録を外す（後続の登録で置き換わっていれば何もしない）。
#[derive(Debug)]
pub struct ActiveRunGuard {
    registry:    ActiveCampaignRegistry,
    campaign_id: CampaignId,
    generation:  u64,
    token:       CancellationToken,
    lane:        Arc<tokio::sync::Mutex<()>>,
}

impl ActiveRunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.registry.release(&self.campaign_id, self.generation);
    }
}

/// 送信タスクのディスパッチャ
///
/// 送信処理をスケジューラや HTTP リクエストから切り離した独立タスクとして起動する。
#[derive(Clone)]
pub struct SendDispatcher {
    sender:   Arc<CampaignSender>,
    registry: ActiveCampaignRegistry,
}

impl SendDispatcher {
    pub fn new(sender: Arc<CampaignSender>, registry: ActiveCampaignRegistry) -> Self {
        Self { sender, registry }
    }

    pub fn registry(&self) -> &ActiveCampaignRegistry {
        &self.registry
    }

    /// 送信タスクを起動する
    ///
    /// 同じキャンペーンのタスクが既に動いていれば何もせず `None` を返す。
    pub fn dispatch(&self, campaign_id: &CampaignId) -> Option<JoinHandle<()>> {
        let Some(guard) = self.registry.try_register(campaign_id) else {
            tracing::debug!(campaign_id = %campaign_id, "送信タスクは実行中のため起動しない");
            return None;
        };

        let sender = self.sender.clone();
        Some(tokio::spawn(async move {
            let _lane = guard.lane.lock().await;
            let campaign_id = guard.campaign_id().clone();

            match sender.run(&campaign_id, guard.token()).await {
                Ok(report) => {
                    log_business_event!(
                        event.category = event::category::DELIVERY,
                        event.action = event::action::SEND_RUN_FINISHED,
                        event.entity_type = event::entity_type::CAMPAIGN,
                        event.entity_id = %campaign_id,
                        event.result = event::result::SUCCESS,
                        run.sent = report.sent,
                        run.failed = report.failed,
                        run.suppressed = report.suppressed,
                        run.outcome = %report.outcome,
                        "送信処理が終了"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error.category = log_error::category::INFRASTRUCTURE,
                        error.kind = log_error::kind::SEND_RUN,
                        campaign_id = %campaign_id,
                        "送信処理が異常終了: {}",
                        e
                    );
                }
            }
        }))
    }

    /// 実行中の送信タスクに停止を要求する
    pub fn stop(&self, campaign_id: &CampaignId) -> bool {
        self.registry.cancel(campaign_id)
    }
}
