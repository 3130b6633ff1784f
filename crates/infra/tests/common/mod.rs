//! テスト共通フィクスチャ
//!
//! DB を使用する統合テストで共通利用するシードデータ・エンティティ生成ヘルパー。
//! Rust の統合テスト規約に従い `tests/common/mod.rs` に配置。

// 各テストファイルが独立したクレートとしてコンパイルされるため、
// 使用しない関数に dead_code 警告が出る。モジュール全体で抑制する。
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use hikyaku_domain::{
    campaign::{Campaign, CampaignId, NewCampaign, SenderIdentity},
    delivery::ProviderMessageId,
    email::{EmailRecord, EmailRecordId, NewEmailRecord},
    recipient::{MergeFields, RecipientId, RecipientSourceId, TemplateId},
    value_objects::{CampaignName, EmailAddress},
};
use hikyaku_infra::repository::{
    CampaignRepository,
    EmailRecordRepository,
    PostgresCampaignRepository,
    PostgresEmailRecordRepository,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

/// テストの基準時刻
pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_790_000_000, 0).unwrap()
}

/// テンプレートを作成する
pub async fn insert_template(pool: &PgPool, subject: &str, html: &str) -> TemplateId {
    let id = Uuid::now_v7();
    sqlx::query(
        r#"
        INSERT INTO templates (id, name, subject, html_body, text_body, variables)
        VALUES ($1, 'テストテンプレート', $2, $3, NULL, ARRAY['firstName'])
        "#,
    )
    .bind(id)
    .bind(subject)
    .bind(html)
    .execute(pool)
    .await
    .expect("テンプレート作成に失敗");
    TemplateId::from_uuid(id)
}

/// 宛先ソースと宛先を作成する
///
/// `(email, first_name, is_valid)` の組で宛先を指定する。
pub async fn insert_recipient_source(
    pool: &PgPool,
    recipients: &[(&str, Option<&str>, bool)],
) -> RecipientSourceId {
    let source_id = Uuid::now_v7();
    sqlx::query("INSERT INTO recipient_sources (id, name) VALUES ($1, 'テストリスト')")
        .bind(source_id)
        .execute(pool)
        .await
        .expect("宛先ソース作成に失敗");

    for (email, first_name, is_valid) in recipients {
        sqlx::query(
            r#"
            INSERT INTO recipients (id, source_id, email, first_name, custom_fields, is_valid)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(source_id)
        .bind(*email)
        .bind(*first_name)
        .bind(json!({"plan": "gold"}))
        .bind(*is_valid)
        .execute(pool)
        .await
        .expect("宛先作成に失敗");
    }

    RecipientSourceId::from_uuid(source_id)
}

/// 下書きキャンペーンを作成して保存する
pub async fn insert_draft_campaign(pool: &PgPool) -> Campaign {
    let template_id = insert_template(pool, "Hi {{firstName}}", "<p>Hello</p>").await;
    let source_id = insert_recipient_source(pool, &[]).await;

    let campaign = Campaign::new(NewCampaign {
        id: CampaignId::new(),
        name: CampaignName::new("秋のお知らせ").unwrap(),
        template_id: Some(template_id),
        recipient_source_id: Some(source_id),
        sender: SenderIdentity {
            from_name:  "Hikyaku".to_string(),
            from_email: EmailAddress::new("news@example.com").unwrap(),
            reply_to:   None,
        },
        subject_override: None,
        now: now(),
    });
    PostgresCampaignRepository::new(pool.clone())
        .insert(&campaign)
        .await
        .expect("キャンペーン作成に失敗");
    campaign
}

/// pending の送信レコードを生成する（保存はしない）
pub fn pending_record(campaign_id: &CampaignId, email: &str) -> EmailRecord {
    EmailRecord::new(NewEmailRecord {
        id: EmailRecordId::new(),
        campaign_id: campaign_id.clone(),
        recipient_id: RecipientId::new(),
        email: EmailAddress::new(email).unwrap(),
        display_name: None,
        merge_fields: MergeFields {
            email: email.to_string(),
            ..Default::default()
        },
        now: now(),
    })
}

/// sent の送信レコードを保存して返す
pub async fn insert_sent_record(
    pool: &PgPool,
    campaign_id: &CampaignId,
    email: &str,
    message_id: &str,
) -> EmailRecord {
    let repo = PostgresEmailRecordRepository::new(pool.clone());
    let record = pending_record(campaign_id, email);
    repo.insert_many_if_absent(std::slice::from_ref(&record))
        .await
        .expect("送信レコード作成に失敗");

    let sent = record
        .mark_sent(ProviderMessageId::new(message_id), now())
        .unwrap();
    assert!(repo.record_send_outcome(&sent).await.unwrap());
    sent
}
