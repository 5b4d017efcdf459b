use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::domain::entity::{BulkOperation, ImportRun, NewImportRun, RecordRange, SourceType};
use crate::domain::service::{ImportJobStore, JobStoreError};
use crate::usecase::active_runs::ActiveRuns;
use crate::usecase::run_import::RunImportUseCase;

/// StartImportInput は一括操作の起動パラメータ。
#[derive(Debug, Clone)]
pub struct StartImportInput {
    pub operation: BulkOperation,
    pub group_id: String,
    pub source_type: SourceType,
    pub range: RecordRange,
    pub initiated_by: String,
    pub options: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StartImportError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JobStoreError> for StartImportError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}

/// StartImportUseCase は実行を pending で作成し、ランナーをバックグラウンドで起動する。
/// 同時に動くランナーの数はセマフォで制限し、待機中の実行は pending のまま残る。
pub struct StartImportUseCase {
    store: Arc<ImportJobStore>,
    runner: Arc<RunImportUseCase>,
    active: Arc<ActiveRuns>,
    permits: Arc<Semaphore>,
}

impl StartImportUseCase {
    pub fn new(
        store: Arc<ImportJobStore>,
        runner: Arc<RunImportUseCase>,
        active: Arc<ActiveRuns>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            store,
            runner,
            active,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    pub async fn execute(&self, input: StartImportInput) -> Result<ImportRun, StartImportError> {
        if input.group_id.trim().is_empty() {
            return Err(StartImportError::Validation("groupId is required".to_string()));
        }
        input
            .range
            .validate()
            .map_err(|e| StartImportError::Validation(e.to_string()))?;
        if !self.runner.writers().supports(input.operation) {
            return Err(StartImportError::Validation(format!(
                "operation {} has no configured endpoint",
                input.operation
            )));
        }
        let parameters = match input.options {
            serde_json::Value::Null => serde_json::json!({}),
            options @ serde_json::Value::Object(_) => options,
            _ => {
                return Err(StartImportError::Validation(
                    "options must be a JSON object".to_string(),
                ))
            }
        };

        let run = self
            .store
            .create_run(NewImportRun {
                source_type: input.source_type,
                operation: input.operation,
                group_id: input.group_id,
                total_records: input.range.expected_len().unwrap_or(0),
                parameters,
                initiated_by: input.initiated_by,
            })
            .await?;

        let run_id = run.id;
        let range = input.range;
        let token = self.active.register(run_id);
        let runner = self.runner.clone();
        let active = self.active.clone();
        let permits = self.permits.clone();

        info!(
            run_id = %run_id,
            operation = %run.operation,
            group_id = %run.group_id,
            "import run queued, launching background execution"
        );

        tokio::spawn(async move {
            let permit = tokio::select! {
                () = token.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            if permit.is_some() {
                if let Err(e) = runner.run(run_id, range, token).await {
                    error!(run_id = %run_id, error = %e, "import run execution failed");
                }
            }
            active.remove(run_id);
        });

        Ok(run)
    }
}
