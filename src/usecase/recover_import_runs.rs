use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::entity::import_run::STAGE_FAILED;
use crate::domain::entity::{ImportRunStatus, RunUpdate};
use crate::domain::service::{ImportJobStore, JobStoreError};

pub const INTERRUPTED_SUMMARY: &str = "interrupted by server restart";

/// RecoverImportRunsUseCase は起動時に前のプロセスが残した未完了の実行を failed にする。
/// 実行は自動で再開しない。
pub struct RecoverImportRunsUseCase {
    store: Arc<ImportJobStore>,
}

impl RecoverImportRunsUseCase {
    pub fn new(store: Arc<ImportJobStore>) -> Self {
        Self { store }
    }

    /// failed にした実行の件数を返す。
    pub async fn execute(&self) -> Result<usize, JobStoreError> {
        let unfinished = self.store.find_unfinished().await?;
        if unfinished.is_empty() {
            info!("no unfinished import runs to recover");
            return Ok(0);
        }

        info!(count = unfinished.len(), "marking unfinished import runs as failed");
        let mut recovered = 0;
        for run in unfinished {
            let run_id = run.id;
            if run.status == ImportRunStatus::Pending {
                if let Err(e) = self
                    .store
                    .transition_run(run_id, ImportRunStatus::InProgress, RunUpdate::default())
                    .await
                {
                    warn!(run_id = %run_id, error = %e, "failed to recover pending import run");
                    continue;
                }
            }
            match self
                .store
                .transition_run(
                    run_id,
                    ImportRunStatus::Failed,
                    RunUpdate::stage(STAGE_FAILED).with_error(INTERRUPTED_SUMMARY),
                )
                .await
            {
                Ok(_) => recovered += 1,
                Err(e) => warn!(run_id = %run_id, error = %e, "failed to recover import run"),
            }
        }
        Ok(recovered)
    }
}
