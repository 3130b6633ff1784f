//! # Campaign Service サーバー
//!
//! 一斉配信キャンペーンの管理 API と、送信パイプラインを 1 プロセスで動かす。
//!
//! ## 役割
//!
//! - **管理 API**: キャンペーンの作成・予約・開始・一時停止・中止
//! - **スケジューラ**: 予約日時が到来したキャンペーンの昇格
//! - **送信タスク**: キャンペーンごとに 1 本、配信プロバイダへ逐次送信
//! - **Webhook 受信**: プロバイダからの配信イベントを送信レコードに反映
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `CAMPAIGN_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `CAMPAIGN_PORT` | **Yes** | ポート番号 |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `RUN_MIGRATIONS` | No | 起動時にマイグレーションを適用するか（デフォルト: `true`） |
//! | `SCHEDULER_INTERVAL_SECS` | No | スケジューラの実行間隔（デフォルト: `60`） |
//! | `SEND_DELAY_MS` | No | 連続する送信の最小間隔（デフォルト: `200`） |
//! | `SEND_BATCH_SIZE` | No | 未送信レコードの取得件数（デフォルト: `100`） |
//! | `STATS_FLUSH_EVERY` | No | 集計を保存する間隔（件数、デフォルト: `25`） |
//! | `DELIVERY_BACKEND` | No | `ses` / `smtp` / `noop`（デフォルト: `noop`） |
//! | `SMTP_HOST` / `SMTP_PORT` | No | SMTP 送信先（デフォルト: `localhost:1025`） |
//! | `MESSAGE_ID_DOMAIN` | No | SMTP で生成する Message-ID のドメイン |
//! | `LOG_FORMAT` | No | `json` / `pretty` |
//!
//! ## 起動方法
//!
//! ```bash
//! CAMPAIGN_PORT=3100 DATABASE_URL=postgres://... cargo run -p hikyaku-campaign-service
//! ```
//!
//! ## 終了処理
//!
//! SIGTERM / Ctrl+C を受けると新しいリクエストの受付を止め、スケジューラと送信タスクに
//! 停止を要求する。送信途中のレコードは `pending` のまま残り、次の起動時に再開される。

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use axum::{Router, routing::get};
use hikyaku_campaign_service::{
    app_builder::build_router,
    config::{CampaignServiceConfig, DeliveryBackend, DeliveryConfig},
    handler::{CampaignState, ReadinessState, UnsubscribeState, WebhookState, readiness_check},
    usecase::{
        ActiveCampaignRegistry,
        CampaignScheduler,
        CampaignSender,
        CampaignUseCaseImpl,
        Repositories,
        SendDispatcher,
        UnsubscribeUseCaseImpl,
        WebhookProcessor,
    },
};
use hikyaku_domain::clock::{Clock, SystemClock};
use hikyaku_infra::{
    db,
    external::{PostgresRecipientSource, PostgresTemplateResolver},
    provider::{
        DeliveryProvider,
        NoopDeliveryProvider,
        SesDeliveryProvider,
        SmtpDeliveryProvider,
    },
    repository::{
        PostgresCampaignRepository,
        PostgresEmailEventRepository,
        PostgresEmailRecordRepository,
        PostgresUnsubscribeRepository,
        PostgresWebhookLogRepository,
    },
};
use hikyaku_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Campaign Service サーバーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    let _tracing_guard = init_tracing(TracingConfig::from_env("campaign-service")).entered();

    // 設定読み込み
    let config = CampaignServiceConfig::from_env().context("設定の読み込みに失敗しました")?;

    tracing::info!(
        "Campaign Service サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    // データベース接続プールを作成
    let pool = db::create_pool(&config.database_url)
        .await
        .context("データベース接続に失敗しました")?;
    tracing::info!("データベースに接続しました");

    if config.run_migrations {
        db::run_migrations(&pool)
            .await
            .context("マイグレーションの実行に失敗しました")?;
        tracing::info!("マイグレーションを適用しました");
    }

    // Readiness Check 用 State（pool が move される前に clone）
    let readiness_state = Arc::new(ReadinessState { pool: pool.clone() });

    // 依存コンポーネントを初期化
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repos = Repositories {
        campaigns:     Arc::new(PostgresCampaignRepository::new(pool.clone())),
        email_records: Arc::new(PostgresEmailRecordRepository::new(pool.clone())),
        email_events:  Arc::new(PostgresEmailEventRepository::new(pool.clone())),
        unsubscribes:  Arc::new(PostgresUnsubscribeRepository::new(pool.clone())),
        webhook_logs:  Arc::new(PostgresWebhookLogRepository::new(pool.clone())),
    };
    let template_resolver = Arc::new(PostgresTemplateResolver::new(pool.clone()));
    let recipient_source = Arc::new(PostgresRecipientSource::new(pool));
    let provider = build_provider(&config.delivery).await;

    // 送信パイプライン
    let sender = CampaignSender::new(
        repos.clone(),
        template_resolver.clone(),
        provider,
        clock.clone(),
        config.sender,
    );
    let registry = ActiveCampaignRegistry::new();
    let dispatcher = SendDispatcher::new(Arc::new(sender), registry.clone());
    let campaign_usecase = Arc::new(CampaignUseCaseImpl::new(
        repos.clone(),
        recipient_source,
        template_resolver,
        dispatcher,
        clock.clone(),
    ));

    // 前回のプロセスで送信中だったキャンペーンを再開
    campaign_usecase
        .resume_interrupted()
        .await
        .context("送信タスクの再開に失敗しました")?;

    // スケジューラ起動
    let shutdown = CancellationToken::new();
    let scheduler = CampaignScheduler::new(
        campaign_usecase.clone(),
        repos.campaigns.clone(),
        clock.clone(),
        config.scheduler_interval,
    );
    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    // ルーター構築
    let campaign_state = Arc::new(CampaignState {
        usecase: campaign_usecase,
    });
    let webhook_state = Arc::new(WebhookState {
        processor: Arc::new(WebhookProcessor::new(repos.clone(), clock.clone())),
    });
    let unsubscribe_state = Arc::new(UnsubscribeState {
        usecase: Arc::new(UnsubscribeUseCaseImpl::new(repos, clock)),
    });
    let app = build_router(campaign_state, webhook_state, unsubscribe_state).merge(
        Router::new()
            .route("/health/ready", get(readiness_check))
            .with_state(readiness_state),
    );

    // サーバー起動
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("アドレスのパースに失敗しました")?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Campaign Service サーバーが起動しました: {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // スケジューラと実行中の送信タスクに停止を要求する
    shutdown.cancel();
    let stopped = registry.cancel_all();
    if let Err(e) = scheduler_handle.await {
        tracing::warn!("スケジューラの終了待ちに失敗: {}", e);
    }
    tracing::info!(stopped, "Campaign Service サーバーを停止しました");

    Ok(())
}

/// 配信バックエンドに応じたプロバイダを作る
async fn build_provider(config: &DeliveryConfig) -> Arc<dyn DeliveryProvider> {
    match config.backend {
        DeliveryBackend::Ses => {
            let aws_config = aws_config::load_from_env().await;
            tracing::info!("配信バックエンド: SES");
            Arc::new(SesDeliveryProvider::new(aws_sdk_sesv2::Client::new(
                &aws_config,
            )))
        }
        DeliveryBackend::Smtp => {
            tracing::info!(
                "配信バックエンド: SMTP ({}:{})",
                config.smtp_host,
                config.smtp_port
            );
            Arc::new(SmtpDeliveryProvider::new(
                &config.smtp_host,
                config.smtp_port,
                config.message_id_domain.clone(),
            ))
        }
        DeliveryBackend::Noop => {
            tracing::info!("配信バックエンド: Noop（送信しない）");
            Arc::new(NoopDeliveryProvider)
        }
    }
}

/// SIGTERM / Ctrl+C を待つ
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl+C ハンドラの登録に失敗: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM ハンドラの登録に失敗: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl+C を受信しました"),
        () = terminate => tracing::info!("SIGTERM を受信しました"),
    }
}
