//! # 配信プロバイダ
//!
//! 送信メッセージを外部の配信プロバイダに渡すクライアント。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `DeliveryProvider` trait で 1 通の送信を抽象化
//! - **3 つの実装**: SMTP（開発用ローカルサーバー）、SES（本番用）、Noop（送信せずログのみ）
//! - **環境変数切替**: `DELIVERY_BACKEND` でランタイム選択
//! - **相関タグ**: キャンペーン ID と送信レコード ID をヘッダ・タグとして必ず付ける
//!
//! 1 回の呼び出しの失敗は [`DeliveryError`] として返すだけで、再送はしない。

mod noop;
mod ses;
mod smtp;

use async_trait::async_trait;
use hikyaku_domain::delivery::{DeliveryError, OutboundEmail, ProviderMessageId};
pub use noop::NoopDeliveryProvider;
pub use ses::SesDeliveryProvider;
pub use smtp::SmtpDeliveryProvider;

/// 相関タグのヘッダ名 / タグ名
pub mod correlation {
    /// SMTP ヘッダ: キャンペーン ID
    pub const CAMPAIGN_HEADER: &str = "X-Campaign-Id";
    /// SMTP ヘッダ: 送信レコード ID
    pub const EMAIL_RECORD_HEADER: &str = "X-Email-Record-Id";
    /// SES メッセージタグ: キャンペーン ID
    pub const CAMPAIGN_TAG: &str = "campaign_id";
    /// SES メッセージタグ: 送信レコード ID
    pub const EMAIL_RECORD_TAG: &str = "email_record_id";
}

/// 配信プロバイダトレイト
///
/// 送信処理から 1 通ずつ呼ばれる。同じキャンペーンで同時に複数の呼び出しは行われない。
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// メールを 1 通送信し、プロバイダが割り当てたメッセージ ID を返す
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderMessageId, DeliveryError>;
}
