//! EmailRecordRepository 統合テスト
//!
//! 受信イベントの条件付き UPDATE が、ドメインの `apply_transition` と同じ結果になることを確認する。
//!
//! 実行方法:
//! ```bash
//! cargo test -p hikyaku-infra --test email_record_repository_test
//! ```

mod common;

use chrono::Duration;
use common::{insert_draft_campaign, insert_sent_record, now, pending_record};
use hikyaku_domain::{
    delivery::ProviderMessageId,
    email::{EmailStatus, EmailTransition, TransitionOutcome, TransitionTarget},
};
use hikyaku_infra::repository::{EmailRecordRepository, PostgresEmailRecordRepository};
use pretty_assertions::assert_eq;
use sqlx::PgPool;

fn transition(target: TransitionTarget, minutes: i64) -> EmailTransition {
    EmailTransition {
        target,
        occurred_at: now() + Duration::minutes(minutes),
        reason: None,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_同じ宛先の送信レコードは二重に作られない(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sut = PostgresEmailRecordRepository::new(pool);
    let first = vec![
        pending_record(campaign.id(), "a@example.com"),
        pending_record(campaign.id(), "b@example.com"),
    ];
    let second = vec![
        pending_record(campaign.id(), "a@example.com"),
        pending_record(campaign.id(), "b@example.com"),
        pending_record(campaign.id(), "c@example.com"),
    ];

    assert_eq!(sut.insert_many_if_absent(&first).await.unwrap(), 2);
    assert_eq!(sut.insert_many_if_absent(&second).await.unwrap(), 1);
    assert_eq!(sut.count(campaign.id(), None).await.unwrap(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_送信結果はpendingの行にだけ書き込まれる(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sut = PostgresEmailRecordRepository::new(pool);
    let record = pending_record(campaign.id(), "a@example.com");
    sut.insert_many_if_absent(std::slice::from_ref(&record)).await.unwrap();

    let sent = record
        .clone()
        .mark_sent(ProviderMessageId::new("msg-1"), now())
        .unwrap();
    let failed = record.mark_failed("mailbox full", now()).unwrap();

    assert!(sut.record_send_outcome(&sent).await.unwrap());
    assert!(!sut.record_send_outcome(&failed).await.unwrap());

    let stored = sut.find_by_id(sent.id()).await.unwrap().unwrap();
    assert_eq!(stored, sent);
    assert_eq!(sut.find_pending(campaign.id(), 10).await.unwrap(), vec![]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_プロバイダメッセージidで送信レコードを引ける(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sent = insert_sent_record(&pool, campaign.id(), "a@example.com", "<msg-1@mail>").await;
    let sut = PostgresEmailRecordRepository::new(pool);

    let found = sut
        .find_by_provider_message_id(&ProviderMessageId::new("msg-1@mail"))
        .await
        .unwrap();

    assert_eq!(found.map(|r| r.id().clone()), Some(sent.id().clone()));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_開封より先にクリックが届いてもclickedになり開封日時は空のまま(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sent = insert_sent_record(&pool, campaign.id(), "a@example.com", "msg-1").await;
    let sut = PostgresEmailRecordRepository::new(pool);

    let outcome = sut
        .apply_transition(sent.id(), &transition(TransitionTarget::Clicked, 5))
        .await
        .unwrap();

    assert_eq!(outcome, TransitionOutcome::Applied);
    let stored = sut.find_by_id(sent.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), EmailStatus::Clicked);
    assert_eq!(stored.clicked_at(), Some(now() + Duration::minutes(5)));
    assert_eq!(stored.opened_at(), None);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_クリック後に届いた開封はステータスを戻さず開封日時だけ記録する(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sent = insert_sent_record(&pool, campaign.id(), "a@example.com", "msg-1").await;
    let sut = PostgresEmailRecordRepository::new(pool);
    sut.apply_transition(sent.id(), &transition(TransitionTarget::Clicked, 5))
        .await
        .unwrap();

    let outcome = sut
        .apply_transition(sent.id(), &transition(TransitionTarget::Opened, 3))
        .await
        .unwrap();

    assert_eq!(outcome, TransitionOutcome::TimestampOnly);
    let stored = sut.find_by_id(sent.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), EmailStatus::Clicked);
    assert_eq!(stored.opened_at(), Some(now() + Duration::minutes(3)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_重複イベントは到達日時を上書きしない(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sent = insert_sent_record(&pool, campaign.id(), "a@example.com", "msg-1").await;
    let sut = PostgresEmailRecordRepository::new(pool);

    let first = sut
        .apply_transition(sent.id(), &transition(TransitionTarget::Opened, 1))
        .await
        .unwrap();
    let second = sut
        .apply_transition(sent.id(), &transition(TransitionTarget::Opened, 9))
        .await
        .unwrap();

    assert_eq!(first, TransitionOutcome::Applied);
    assert_eq!(second, TransitionOutcome::Ignored);
    let stored = sut.find_by_id(sent.id()).await.unwrap().unwrap();
    assert_eq!(stored.opened_at(), Some(now() + Duration::minutes(1)));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_バウンス済みのレコードにイベントを適用しても変化しない(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    let sent = insert_sent_record(&pool, campaign.id(), "a@example.com", "msg-1").await;
    let sut = PostgresEmailRecordRepository::new(pool);
    let bounce = EmailTransition {
        target:      TransitionTarget::Bounced,
        occurred_at: now(),
        reason:      Some("hard bounce".to_string()),
    };
    assert_eq!(
        sut.apply_transition(sent.id(), &bounce).await.unwrap(),
        TransitionOutcome::Applied
    );
    let bounced = sut.find_by_id(sent.id()).await.unwrap().unwrap();

    let outcome = sut
        .apply_transition(sent.id(), &transition(TransitionTarget::Clicked, 5))
        .await
        .unwrap();

    assert_eq!(outcome, TransitionOutcome::Ignored);
    let stored = sut.find_by_id(sent.id()).await.unwrap().unwrap();
    assert_eq!(stored, bounced);
    assert_eq!(stored.error_message(), Some("hard bounce"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_ステータス別件数を数えられる(pool: PgPool) {
    let campaign = insert_draft_campaign(&pool).await;
    insert_sent_record(&pool, campaign.id(), "a@example.com", "msg-1").await;
    insert_sent_record(&pool, campaign.id(), "b@example.com", "msg-2").await;
    let sut = PostgresEmailRecordRepository::new(pool);
    sut.insert_many_if_absent(&[pending_record(campaign.id(), "c@example.com")])
        .await
        .unwrap();

    let mut counts = sut.count_by_status(campaign.id()).await.unwrap();
    counts.sort_by_key(|(status, _)| status.rank());

    assert_eq!(
        counts,
        vec![(EmailStatus::Pending, 1), (EmailStatus::Sent, 2)]
    );
}
