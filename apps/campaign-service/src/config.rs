//! # Campaign Service 設定
//!
//! 環境変数から Campaign Service の設定を読み込む。
//!
//! 必須の値が欠けている・数値として解釈できない場合は [`ConfigError`] を返し、
//! 起動を中断するかどうかは `main` に任せる。

use std::{env, time::Duration};

use thiserror::Error;

/// 設定読み込みのエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// 必須の環境変数が未設定
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    /// 値を解釈できない
    #[error("{name} の値が不正です: {value}")]
    Invalid { name: &'static str, value: String },
}

/// 配信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryBackend {
    /// Amazon SES v2（本番）
    Ses,
    /// SMTP サーバー（開発用の Mailpit など）
    Smtp,
    /// 送信しない（ログ出力のみ）
    Noop,
}

impl DeliveryBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ses" => Ok(Self::Ses),
            "smtp" => Ok(Self::Smtp),
            "noop" => Ok(Self::Noop),
            _ => Err(ConfigError::Invalid {
                name:  "DELIVERY_BACKEND",
                value: value.to_string(),
            }),
        }
    }
}

/// Campaign Service の設定
#[derive(Debug, Clone)]
pub struct CampaignServiceConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// データベース接続 URL
    pub database_url: String,
    /// 起動時にマイグレーションを適用するか
    pub run_migrations: bool,
    /// スケジューラの実行間隔
    pub scheduler_interval: Duration,
    /// 送信処理の設定
    pub sender: SenderConfig,
    /// 配信プロバイダの設定
    pub delivery: DeliveryConfig,
}

/// 送信処理の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// 同じキャンペーンの連続するプロバイダ呼び出しの最小間隔
    pub send_delay:        Duration,
    /// 未送信レコードを 1 回に取得する件数
    pub batch_size:        u32,
    /// この件数を処理するごとに集計を保存する
    pub stats_flush_every: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            send_delay:        Duration::from_millis(200),
            batch_size:        100,
            stats_flush_every: 25,
        }
    }
}

/// 配信プロバイダの設定
///
/// `DELIVERY_BACKEND` 環境変数で送信バックエンドを切り替える。
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub backend:           DeliveryBackend,
    /// SMTP ホスト（backend=smtp の場合に使用）
    pub smtp_host:         String,
    /// SMTP ポート（backend=smtp の場合に使用）
    pub smtp_port:         u16,
    /// 生成する Message-ID の `@` 以降
    pub message_id_domain: String,
}

impl CampaignServiceConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の参照関数から設定を読み込む
    ///
    /// `from_env` の実体。テストでは環境変数を書き換えずに値を差し込む。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
        let defaulted = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: defaulted("CAMPAIGN_HOST", "0.0.0.0"),
            port: parse_value("CAMPAIGN_PORT", &required("CAMPAIGN_PORT")?)?,
            database_url: required("DATABASE_URL")?,
            run_migrations: parse_value("RUN_MIGRATIONS", &defaulted("RUN_MIGRATIONS", "true"))?,
            scheduler_interval: Duration::from_secs(parse_value(
                "SCHEDULER_INTERVAL_SECS",
                &defaulted("SCHEDULER_INTERVAL_SECS", "60"),
            )?),
            sender: SenderConfig {
                send_delay:        Duration::from_millis(parse_value(
                    "SEND_DELAY_MS",
                    &defaulted("SEND_DELAY_MS", "200"),
                )?),
                batch_size:        parse_positive(
                    "SEND_BATCH_SIZE",
                    &defaulted("SEND_BATCH_SIZE", "100"),
                )?,
                stats_flush_every: parse_positive(
                    "STATS_FLUSH_EVERY",
                    &defaulted("STATS_FLUSH_EVERY", "25"),
                )?,
            },
            delivery: DeliveryConfig {
                backend:           DeliveryBackend::parse(&defaulted("DELIVERY_BACKEND", "noop"))?,
                smtp_host:         defaulted("SMTP_HOST", "localhost"),
                smtp_port:         parse_value("SMTP_PORT", &defaulted("SMTP_PORT", "1025"))?,
                message_id_domain: defaulted("MESSAGE_ID_DOMAIN", "hikyaku.localhost"),
            },
        })
    }
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

/// 0 を許さない件数（0 件ずつ取得すると送信処理が進まない）
fn parse_positive(name: &'static str, value: &str) -> Result<u32, ConfigError> {
    match parse_value(name, value)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}
