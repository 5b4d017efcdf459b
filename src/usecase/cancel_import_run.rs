use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entity::import_run::STAGE_CANCELLED;
use crate::domain::entity::{ImportRun, ImportRunStatus, RunUpdate};
use crate::domain::service::{ImportJobStore, JobStoreError};
use crate::usecase::active_runs::ActiveRuns;

/// キャンセルされた実行の errorSummary。
pub const CANCELLED_SUMMARY: &str = "cancelled";

const MAX_ATTEMPTS: usize = 3;

/// CancelImportError はキャンセル操作のエラーを型安全に表現する。
#[derive(Debug, thiserror::Error)]
pub enum CancelImportError {
    #[error("import run not found: {0}")]
    NotFound(Uuid),
    #[error("import run is already in terminal state: {0}")]
    AlreadyTerminal(String),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

/// CancelImportRunUseCase は実行中または待機中の実行をキャンセルし、failed にする。
pub struct CancelImportRunUseCase {
    store: Arc<ImportJobStore>,
    active: Arc<ActiveRuns>,
}

impl CancelImportRunUseCase {
    pub fn new(store: Arc<ImportJobStore>, active: Arc<ActiveRuns>) -> Self {
        Self { store, active }
    }

    pub async fn execute(&self, run_id: Uuid) -> Result<ImportRun, CancelImportError> {
        let run = self.store.get_run(run_id).await.map_err(into_cancel_error)?;
        if run.is_terminal() {
            return Err(CancelImportError::AlreadyTerminal(run.status.to_string()));
        }

        // ランナーに書き込みを止めさせてから状態を確定する
        self.active.cancel(run_id);

        for _ in 0..MAX_ATTEMPTS {
            let run = self.store.get_run(run_id).await.map_err(into_cancel_error)?;
            let result = match run.status {
                ImportRunStatus::Pending => self
                    .store
                    .transition_run(
                        run_id,
                        ImportRunStatus::InProgress,
                        RunUpdate::stage(STAGE_CANCELLED),
                    )
                    .await
                    .map(|_| None),
                ImportRunStatus::InProgress => self
                    .store
                    .transition_run(
                        run_id,
                        ImportRunStatus::Failed,
                        RunUpdate::stage(STAGE_CANCELLED).with_error(CANCELLED_SUMMARY),
                    )
                    .await
                    .map(Some),
                _ if run.error_summary.as_deref() == Some(CANCELLED_SUMMARY) => return Ok(run),
                _ => return Err(CancelImportError::AlreadyTerminal(run.status.to_string())),
            };

            match result {
                Ok(Some(cancelled)) => {
                    tracing::info!(run_id = %run_id, "import run cancelled");
                    return Ok(cancelled);
                }
                Ok(None) | Err(JobStoreError::Conflict(_) | JobStoreError::InvalidTransition { .. }) => {
                    continue;
                }
                Err(e) => return Err(into_cancel_error(e)),
            }
        }

        Err(CancelImportError::Internal(anyhow::anyhow!(
            "import run {run_id} kept changing while cancelling"
        )))
    }
}

fn into_cancel_error(err: JobStoreError) -> CancelImportError {
    match err {
        JobStoreError::RunNotFound(id) => CancelImportError::NotFound(id),
        JobStoreError::Internal(e) => CancelImportError::Internal(e),
        other => CancelImportError::Internal(anyhow::anyhow!(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::InMemoryImportRunRepository;
    use crate::domain::entity::{BulkOperation, NewImportRun, SourceType};

    async fn setup() -> (CancelImportRunUseCase, Arc<ImportJobStore>, Arc<ActiveRuns>, ImportRun) {
        let store = Arc::new(ImportJobStore::new(Arc::new(
            InMemoryImportRunRepository::new(),
        )));
        let run = store
            .create_run(NewImportRun {
                source_type: SourceType::People,
                operation: BulkOperation::Import,
                group_id: "grp_1".to_string(),
                total_records: 0,
                parameters: serde_json::json!({}),
                initiated_by: "ops".to_string(),
            })
            .await
            .unwrap();
        let active = Arc::new(ActiveRuns::new());
        let uc = CancelImportRunUseCase::new(store.clone(), active.clone());
        (uc, store, active, run)
    }

    #[tokio::test]
    async fn test_cancel_pending_run() {
        let (uc, _store, active, run) = setup().await;
        let token = active.register(run.id);

        let cancelled = uc.execute(run.id).await.unwrap();
        assert_eq!(cancelled.status, ImportRunStatus::Failed);
        assert_eq!(cancelled.error_summary.as_deref(), Some(CANCELLED_SUMMARY));
        assert_eq!(cancelled.import_stage.as_deref(), Some(STAGE_CANCELLED));
        assert!(cancelled.completed_at.is_some());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_in_progress_run() {
        let (uc, store, _active, run) = setup().await;
        store
            .transition_run(run.id, ImportRunStatus::InProgress, RunUpdate::default())
            .await
            .unwrap();

        let cancelled = uc.execute(run.id).await.unwrap();
        assert_eq!(cancelled.status, ImportRunStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_terminal_run_is_rejected() {
        let (uc, store, _active, run) = setup().await;
        store
            .transition_run(run.id, ImportRunStatus::InProgress, RunUpdate::default())
            .await
            .unwrap();
        store
            .transition_run(run.id, ImportRunStatus::Completed, RunUpdate::default())
            .await
            .unwrap();

        let result = uc.execute(run.id).await;
        assert!(matches!(result, Err(CancelImportError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let (uc, _store, _active, _run) = setup().await;
        let result = uc.execute(Uuid::new_v4()).await;
        assert!(matches!(result, Err(CancelImportError::NotFound(_))));
    }
}
