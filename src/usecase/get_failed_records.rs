use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::FailedImportRecord;
use crate::domain::service::{ImportJobStore, JobStoreError};

/// GetFailedRecordsUseCase は実行の失敗レコード（解決済みを含む）を作成順に返す。
pub struct GetFailedRecordsUseCase {
    store: Arc<ImportJobStore>,
}

impl GetFailedRecordsUseCase {
    pub fn new(store: Arc<ImportJobStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, run_id: Uuid) -> Result<Vec<FailedImportRecord>, JobStoreError> {
        self.store.get_failed_records(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::import_run_repository::MockImportRunRepository;

    #[tokio::test]
    async fn test_failed_records_of_unknown_run() {
        let mut mock = MockImportRunRepository::new();
        mock.expect_find_by_id().returning(|_| Ok(None));
        mock.expect_find_failed_records().never();

        let uc = GetFailedRecordsUseCase::new(Arc::new(ImportJobStore::new(Arc::new(mock))));
        let result = uc.execute(Uuid::new_v4()).await;
        assert!(matches!(result, Err(JobStoreError::RunNotFound(_))));
    }
}
