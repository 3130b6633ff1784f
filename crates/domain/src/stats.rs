//! # キャンペーン集計
//!
//! 送信レコードの現在ステータスごとの件数。
//! いつでも送信レコードから再計算できる派生値で、キャンペーンにはスナップショットとして保存する。

use serde::{Deserialize, Serialize};

use crate::email::EmailStatus;

/// キャンペーン集計スナップショット
///
/// 各件数は送信レコードの「現在の」ステータスで数える。
/// 例えば開封後にクリックされたレコードは `clicked` にのみ数えられる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignStats {
    pub total:        u64,
    pub pending:      u64,
    pub sent:         u64,
    pub delivered:    u64,
    pub opened:       u64,
    pub clicked:      u64,
    pub failed:       u64,
    pub bounced:      u64,
    pub unsubscribed: u64,
}

impl CampaignStats {
    /// ステータスごとの件数から集計を組み立てる
    ///
    /// 同じステータスが複数回現れた場合は加算する。
    pub fn from_counts(counts: impl IntoIterator<Item = (EmailStatus, u64)>) -> Self {
        let mut stats = Self::default();
        for (status, count) in counts {
            stats.add(status, count);
        }
        stats
    }

    fn add(&mut self, status: EmailStatus, count: u64) {
        self.total += count;
        let slot = match status {
            EmailStatus::Pending => &mut self.pending,
            EmailStatus::Sent => &mut self.sent,
            EmailStatus::Delivered => &mut self.delivered,
            EmailStatus::Opened => &mut self.opened,
            EmailStatus::Clicked => &mut self.clicked,
            EmailStatus::Failed => &mut self.failed,
            EmailStatus::Bounced => &mut self.bounced,
            EmailStatus::Unsubscribed => &mut self.unsubscribed,
        };
        *slot += count;
    }

    /// プロバイダが受け付けた件数（送信以降に進んだレコード + バウンス）
    pub fn dispatched(&self) -> u64 {
        self.sent + self.delivered + self.opened + self.clicked + self.bounced
    }

    /// 配信到達が確認できた件数（配信済み以降に進んだレコード）
    pub fn reached_delivery(&self) -> u64 {
        self.delivered + self.opened + self.clicked
    }

    /// 開封率（到達件数に対する開封以降の件数）
    pub fn open_rate(&self) -> f64 {
        ratio(self.opened + self.clicked, self.reached_delivery())
    }

    /// クリック率（到達件数に対するクリック件数）
    pub fn click_rate(&self) -> f64 {
        ratio(self.clicked, self.reached_delivery())
    }

    /// バウンス率（プロバイダ受付件数に対するバウンス件数）
    pub fn bounce_rate(&self) -> f64 {
        ratio(self.bounced, self.dispatched())
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_ステータス別件数から集計を作る() {
        let sut = CampaignStats::from_counts([
            (EmailStatus::Sent, 2),
            (EmailStatus::Unsubscribed, 1),
        ]);

        assert_eq!(
            sut,
            CampaignStats {
                total: 3,
                sent: 2,
                unsubscribed: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_率は到達件数を分母にする() {
        let sut = CampaignStats::from_counts([
            (EmailStatus::Delivered, 2),
            (EmailStatus::Opened, 1),
            (EmailStatus::Clicked, 1),
            (EmailStatus::Bounced, 1),
        ]);

        assert_eq!(sut.reached_delivery(), 4);
        assert_eq!(sut.open_rate(), 0.5);
        assert_eq!(sut.click_rate(), 0.25);
        assert_eq!(sut.bounce_rate(), 0.2);
    }

    #[test]
    fn test_分母が0なら率は0() {
        let sut = CampaignStats::default();
        assert_eq!(sut.open_rate(), 0.0);
        assert_eq!(sut.bounce_rate(), 0.0);
    }

    #[test]
    fn test_jsonはフィールド名そのままで保存される() {
        let sut = CampaignStats::from_counts([(EmailStatus::Pending, 5)]);
        let json = serde_json::to_value(&sut).unwrap();

        assert_eq!(json["total"], 5);
        assert_eq!(json["pending"], 5);
        assert_eq!(json["clicked"], 0);
    }
}
