use std::sync::Arc;

use crate::domain::entity::ImportRun;
use crate::domain::repository::ImportRunListParams;
use crate::domain::service::{ImportJobStore, JobStoreError};

/// ListImportRunsUseCase は実行一覧の取得を担う。新しい順に返す。
pub struct ListImportRunsUseCase {
    store: Arc<ImportJobStore>,
}

impl ListImportRunsUseCase {
    pub fn new(store: Arc<ImportJobStore>) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        params: ImportRunListParams,
    ) -> Result<Vec<ImportRun>, JobStoreError> {
        self.store.list_runs(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::ImportRunStatus;
    use crate::domain::repository::import_run_repository::MockImportRunRepository;

    #[tokio::test]
    async fn test_list_passes_filter() {
        let mut mock = MockImportRunRepository::new();
        mock.expect_list()
            .withf(|params| params.status == Some(ImportRunStatus::Failed) && params.limit == 10)
            .times(1)
            .returning(|_| Ok(vec![]));

        let uc = ListImportRunsUseCase::new(Arc::new(ImportJobStore::new(Arc::new(mock))));
        let runs = uc
            .execute(ImportRunListParams {
                status: Some(ImportRunStatus::Failed),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(runs.is_empty());
    }
}
