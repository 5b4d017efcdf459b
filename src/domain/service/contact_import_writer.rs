use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entity::{InvestorContact, SourceRecord, WriteOutcome};
use crate::domain::repository::{InvestorContactRepository, UpsertResult};
use crate::domain::service::record_writer::{RecordWriter, WriteError};

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const DUPLICATE_CONFLICT: &str = "DUPLICATE_CONFLICT";

/// ContactImportWriter は import 操作の書き込み先。Folk レコードを連絡先テーブルへ upsert する。
pub struct ContactImportWriter {
    contacts: Arc<dyn InvestorContactRepository>,
}

impl ContactImportWriter {
    pub fn new(contacts: Arc<dyn InvestorContactRepository>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl RecordWriter for ContactImportWriter {
    async fn write(
        &self,
        record: &SourceRecord,
        _options: &serde_json::Value,
    ) -> Result<WriteOutcome, WriteError> {
        let contact = InvestorContact::from_source(record)
            .map_err(|e| WriteError::record(VALIDATION_ERROR, e.to_string()))?;

        let result = self
            .contacts
            .upsert_by_folk_id(&contact)
            .await
            .map_err(|e| WriteError::Fatal(format!("contact store unavailable: {e}")))?;

        match result {
            UpsertResult::Created => Ok(WriteOutcome::Created),
            UpsertResult::Updated => Ok(WriteOutcome::Updated),
            UpsertResult::Unchanged => Ok(WriteOutcome::Skipped),
            UpsertResult::EmailConflict { owner_folk_id } => Err(WriteError::record(
                DUPLICATE_CONFLICT,
                format!(
                    "email {} already belongs to {}",
                    contact.email.unwrap_or_default(),
                    owner_folk_id
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::SourceType;
    use crate::domain::repository::investor_contact_repository::MockInvestorContactRepository;

    fn record(payload: serde_json::Value) -> SourceRecord {
        SourceRecord::new("per_1", SourceType::People, payload)
    }

    #[tokio::test]
    async fn test_created_contact() {
        let mut mock = MockInvestorContactRepository::new();
        mock.expect_upsert_by_folk_id()
            .withf(|c| c.folk_id == "per_1" && c.name == "Ada Lovelace")
            .returning(|_| Ok(UpsertResult::Created));

        let writer = ContactImportWriter::new(Arc::new(mock));
        let outcome = writer
            .write(
                &record(serde_json::json!({"fullName": "Ada Lovelace"})),
                &serde_json::json!({}),
            )
            .await;
        assert_eq!(outcome, Ok(WriteOutcome::Created));
    }

    #[tokio::test]
    async fn test_unchanged_contact_is_skipped() {
        let mut mock = MockInvestorContactRepository::new();
        mock.expect_upsert_by_folk_id()
            .returning(|_| Ok(UpsertResult::Unchanged));

        let writer = ContactImportWriter::new(Arc::new(mock));
        let outcome = writer
            .write(
                &record(serde_json::json!({"fullName": "Ada Lovelace"})),
                &serde_json::json!({}),
            )
            .await;
        assert_eq!(outcome, Ok(WriteOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_validation_error_does_not_touch_store() {
        let mut mock = MockInvestorContactRepository::new();
        mock.expect_upsert_by_folk_id().never();

        let writer = ContactImportWriter::new(Arc::new(mock));
        let outcome = writer
            .write(&record(serde_json::json!({})), &serde_json::json!({}))
            .await;
        assert!(matches!(
            outcome,
            Err(WriteError::Record { ref code, .. }) if code == VALIDATION_ERROR
        ));
    }

    #[tokio::test]
    async fn test_email_conflict_is_duplicate() {
        let mut mock = MockInvestorContactRepository::new();
        mock.expect_upsert_by_folk_id().returning(|_| {
            Ok(UpsertResult::EmailConflict {
                owner_folk_id: "per_9".to_string(),
            })
        });

        let writer = ContactImportWriter::new(Arc::new(mock));
        let outcome = writer
            .write(
                &record(serde_json::json!({"fullName": "Ada", "email": "ada@example.com"})),
                &serde_json::json!({}),
            )
            .await;
        assert!(matches!(
            outcome,
            Err(WriteError::Record { ref code, .. }) if code == DUPLICATE_CONFLICT
        ));
    }

    #[tokio::test]
    async fn test_store_error_is_fatal() {
        let mut mock = MockInvestorContactRepository::new();
        mock.expect_upsert_by_folk_id()
            .returning(|_| Err(anyhow::anyhow!("pool timed out")));

        let writer = ContactImportWriter::new(Arc::new(mock));
        let outcome = writer
            .write(
                &record(serde_json::json!({"fullName": "Ada"})),
                &serde_json::json!({}),
            )
            .await;
        assert!(matches!(outcome, Err(WriteError::Fatal(_))));
    }
}
