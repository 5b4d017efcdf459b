use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::{InvestorContact, SourceType};
use crate::domain::repository::{InvestorContactRepository, UpsertResult};

const EMAIL_UNIQUE_CONSTRAINT: &str = "uq_investor_contacts_email";

/// InvestorContactPostgresRepository は PostgreSQL 実装の連絡先リポジトリ。
pub struct InvestorContactPostgresRepository {
    pool: PgPool,
}

impl InvestorContactPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn email_owner(&self, email: &str, folk_id: &str) -> anyhow::Result<Option<String>> {
        let owner = sqlx::query_scalar::<_, String>(
            "SELECT folk_id FROM folk_import.investor_contacts WHERE email = $1 AND folk_id <> $2",
        )
        .bind(email)
        .bind(folk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner)
    }
}

#[async_trait]
impl InvestorContactRepository for InvestorContactPostgresRepository {
    async fn upsert_by_folk_id(&self, contact: &InvestorContact) -> anyhow::Result<UpsertResult> {
        if let Some(email) = contact.email.as_deref() {
            if let Some(owner_folk_id) = self.email_owner(email, &contact.folk_id).await? {
                return Ok(UpsertResult::EmailConflict { owner_folk_id });
            }
        }

        // 内容が同一なら DO UPDATE の WHERE で弾かれ、行が返らない
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO folk_import.investor_contacts
                (id, folk_id, record_type, name, email, company, title, attributes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (folk_id) DO UPDATE SET
                record_type = EXCLUDED.record_type,
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                company = EXCLUDED.company,
                title = EXCLUDED.title,
                attributes = EXCLUDED.attributes,
                updated_at = NOW()
            WHERE (investor_contacts.record_type, investor_contacts.name, investor_contacts.email,
                   investor_contacts.company, investor_contacts.title, investor_contacts.attributes)
                IS DISTINCT FROM
                  (EXCLUDED.record_type, EXCLUDED.name, EXCLUDED.email,
                   EXCLUDED.company, EXCLUDED.title, EXCLUDED.attributes)
            RETURNING (xmax = 0)
            "#,
        )
        .bind(contact.id)
        .bind(&contact.folk_id)
        .bind(contact.record_type.as_str())
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.company)
        .bind(&contact.title)
        .bind(&contact.attributes)
        .bind(contact.created_at)
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(true)) => Ok(UpsertResult::Created),
            Ok(Some(false)) => Ok(UpsertResult::Updated),
            Ok(None) => Ok(UpsertResult::Unchanged),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some(EMAIL_UNIQUE_CONSTRAINT) =>
            {
                // 事前チェック後に別の取り込みが同じメールを書き込んだ
                let owner_folk_id = match contact.email.as_deref() {
                    Some(email) => self
                        .email_owner(email, &contact.folk_id)
                        .await?
                        .unwrap_or_default(),
                    None => String::new(),
                };
                Ok(UpsertResult::EmailConflict { owner_folk_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_folk_id(&self, folk_id: &str) -> anyhow::Result<Option<InvestorContact>> {
        let row = sqlx::query_as::<_, InvestorContactRow>(
            r#"
            SELECT id, folk_id, record_type, name, email, company, title, attributes, created_at, updated_at
            FROM folk_import.investor_contacts
            WHERE folk_id = $1
            "#,
        )
        .bind(folk_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

/// InvestorContactRow は DB 行からのマッピング用。
#[derive(sqlx::FromRow)]
struct InvestorContactRow {
    id: Uuid,
    folk_id: String,
    record_type: String,
    name: String,
    email: Option<String>,
    company: Option<String>,
    title: Option<String>,
    attributes: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvestorContactRow> for InvestorContact {
    type Error = anyhow::Error;

    fn try_from(row: InvestorContactRow) -> anyhow::Result<Self> {
        Ok(InvestorContact {
            id: row.id,
            folk_id: row.folk_id,
            record_type: SourceType::from_str_value(&row.record_type)?,
            name: row.name,
            email: row.email,
            company: row.company,
            title: row.title,
            attributes: row.attributes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
