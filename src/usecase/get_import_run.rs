use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::ImportRun;
use crate::domain::service::{ImportJobStore, JobStoreError};

/// GetImportRunUseCase は実行 1 件の取得を担う。
pub struct GetImportRunUseCase {
    store: Arc<ImportJobStore>,
}

impl GetImportRunUseCase {
    pub fn new(store: Arc<ImportJobStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, run_id: Uuid) -> Result<ImportRun, JobStoreError> {
        self.store.get_run(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::import_run_repository::MockImportRunRepository;

    #[tokio::test]
    async fn test_get_unknown_run() {
        let mut mock = MockImportRunRepository::new();
        mock.expect_find_by_id().returning(|_| Ok(None));

        let uc = GetImportRunUseCase::new(Arc::new(ImportJobStore::new(Arc::new(mock))));
        let result = uc.execute(Uuid::new_v4()).await;
        assert!(matches!(result, Err(JobStoreError::RunNotFound(_))));
    }
}
