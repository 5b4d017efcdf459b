use std::sync::Arc;

use uuid::Uuid;

use crate::domain::service::{ImportJobStore, JobStoreError};

/// DeleteImportRunUseCase は終端状態の実行を失敗レコードごと削除する。
pub struct DeleteImportRunUseCase {
    store: Arc<ImportJobStore>,
}

impl DeleteImportRunUseCase {
    pub fn new(store: Arc<ImportJobStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, run_id: Uuid) -> Result<(), JobStoreError> {
        self.store.delete_run(run_id).await?;
        tracing::info!(run_id = %run_id, "import run deleted");
        Ok(())
    }
}
