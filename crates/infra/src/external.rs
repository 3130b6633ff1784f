//! # 外部コラボレータ
//!
//! 宛先ソースとテンプレートリゾルバ。どちらもこのサービスの外で管理されるデータを読むだけで、
//! 作成・編集は行わない。
//!
//! PostgreSQL 実装は同じデータベース上の `recipients` / `templates` テーブルを読む。

use std::collections::BTreeMap;

use async_trait::async_trait;
use hikyaku_domain::{
    recipient::{Recipient, RecipientId, RecipientSourceId, TemplateId},
    template::TemplateContent,
    value_objects::EmailAddress,
};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// 宛先ソーストレイト
#[async_trait]
pub trait RecipientSource: Send + Sync {
    /// 送信可能な宛先をすべて取得する
    async fn list_valid_recipients(
        &self,
        source_id: &RecipientSourceId,
    ) -> Result<Vec<Recipient>, InfraError>;
}

/// テンプレートリゾルバトレイト
#[async_trait]
pub trait TemplateResolver: Send + Sync {
    /// テンプレートの件名・本文を取得する（存在しなければ `None`）
    async fn resolve_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<TemplateContent>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    id:            Uuid,
    email:         String,
    first_name:    Option<String>,
    last_name:     Option<String>,
    custom_fields: Json<BTreeMap<String, serde_json::Value>>,
}

/// カスタム項目は文字列として差し込む。文字列以外の JSON 値はそのまま表記する
fn stringify_fields(fields: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    fields
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

/// PostgreSQL 実装の RecipientSource
#[derive(Debug, Clone)]
pub struct PostgresRecipientSource {
    pool: PgPool,
}

impl PostgresRecipientSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientSource for PostgresRecipientSource {
    #[tracing::instrument(skip_all, level = "debug", fields(source_id = %source_id))]
    async fn list_valid_recipients(
        &self,
        source_id: &RecipientSourceId,
    ) -> Result<Vec<Recipient>, InfraError> {
        let rows: Vec<RecipientRow> = sqlx::query_as(
            r#"
            SELECT id, email, first_name, last_name, custom_fields
            FROM recipients
            WHERE source_id = $1 AND is_valid
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(source_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut recipients = Vec::with_capacity(rows.len());
        for row in rows {
            // 検証済みのはずの宛先でも、形式が崩れていれば送信対象から外す
            let Ok(email) = EmailAddress::new(&row.email) else {
                tracing::warn!(recipient_id = %row.id, "不正なメールアドレスの宛先を除外");
                continue;
            };
            recipients.push(Recipient {
                id: RecipientId::from_uuid(row.id),
                email,
                first_name: row.first_name,
                last_name: row.last_name,
                custom_fields: stringify_fields(row.custom_fields.0),
            });
        }
        Ok(recipients)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    subject:   Option<String>,
    html_body: Option<String>,
    text_body: Option<String>,
    variables: Vec<String>,
}

/// PostgreSQL 実装の TemplateResolver
#[derive(Debug, Clone)]
pub struct PostgresTemplateResolver {
    pool: PgPool,
}

impl PostgresTemplateResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateResolver for PostgresTemplateResolver {
    #[tracing::instrument(skip_all, level = "debug", fields(template_id = %template_id))]
    async fn resolve_template(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<TemplateContent>, InfraError> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT subject, html_body, text_body, variables FROM templates WHERE id = $1",
        )
        .bind(template_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TemplateContent {
            subject:   row.subject,
            html:      row.html_body,
            text:      row.text_body,
            variables: row.variables,
        }))
    }
}
