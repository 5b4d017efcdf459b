use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::entity::{
    FailedImportRecord, ImportRun, ImportRunError, ImportRunStatus, NewImportRun, RunUpdate,
    WriteOutcome,
};
use crate::domain::repository::import_run_repository::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::domain::repository::{ImportRunListParams, ImportRunRepository, OutcomeRecord};

/// JobStoreError はジョブストア操作のエラー。
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("import run not found: {0}")]
    RunNotFound(Uuid),

    #[error("failed import record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("illegal transition from {from} to {to}")]
    InvalidTransition {
        from: ImportRunStatus,
        to: ImportRunStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ImportRunError> for JobStoreError {
    fn from(err: ImportRunError) -> Self {
        match err {
            ImportRunError::InvalidInput(msg) => Self::InvalidInput(msg),
            ImportRunError::IllegalTransition { from, to } => Self::InvalidTransition { from, to },
            other => Self::Conflict(other.to_string()),
        }
    }
}

/// ImportJobStore はインポート実行と失敗レコードの唯一の書き込み窓口。
/// 状態遷移規則はエンティティで検証し、永続化は条件付き更新で競合を検出する。
pub struct ImportJobStore {
    repo: Arc<dyn ImportRunRepository>,
}

impl ImportJobStore {
    pub fn new(repo: Arc<dyn ImportRunRepository>) -> Self {
        Self { repo }
    }

    pub async fn create_run(&self, input: NewImportRun) -> Result<ImportRun, JobStoreError> {
        let run = ImportRun::new(input)?;
        self.repo.create(&run).await?;
        tracing::debug!(
            run_id = %run.id,
            operation = %run.operation,
            total_records = run.total_records,
            "import run created"
        );
        Ok(run)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<ImportRun, JobStoreError> {
        self.repo
            .find_by_id(run_id)
            .await?
            .ok_or(JobStoreError::RunNotFound(run_id))
    }

    /// ステータスを遷移させる。読み取り後に別の書き込みでステータスが変わっていれば Conflict。
    pub async fn transition_run(
        &self,
        run_id: Uuid,
        to: ImportRunStatus,
        update: RunUpdate,
    ) -> Result<ImportRun, JobStoreError> {
        let mut run = self.get_run(run_id).await?;
        let from = run.status;
        run.transition(to, update)?;

        if !self.repo.update_lifecycle(&run, from).await? {
            return Err(self.lifecycle_conflict(run_id, from).await);
        }

        tracing::debug!(run_id = %run_id, from = %from, to = %to, "import run transitioned");
        self.get_run(run_id).await
    }

    /// 非終端の実行のステージや総件数を更新する。
    pub async fn update_run(
        &self,
        run_id: Uuid,
        update: RunUpdate,
    ) -> Result<ImportRun, JobStoreError> {
        let mut run = self.get_run(run_id).await?;
        let status = run.status;
        run.apply_update(update)?;

        if !self.repo.update_lifecycle(&run, status).await? {
            return Err(self.lifecycle_conflict(run_id, status).await);
        }
        self.get_run(run_id).await
    }

    async fn lifecycle_conflict(&self, run_id: Uuid, expected: ImportRunStatus) -> JobStoreError {
        match self.repo.find_by_id(run_id).await {
            Ok(None) => JobStoreError::RunNotFound(run_id),
            Ok(Some(current)) if current.status != expected => JobStoreError::Conflict(format!(
                "import run {} changed concurrently (expected {}, found {})",
                run_id, expected, current.status
            )),
            Ok(Some(current)) => JobStoreError::Conflict(format!(
                "import run {} has {}/{} records processed",
                run_id, current.counters.processed_records, current.total_records
            )),
            Err(e) => JobStoreError::Internal(e),
        }
    }

    /// 1 レコードの処理結果を記録する。
    pub async fn record_outcome(&self, record: OutcomeRecord) -> Result<ImportRun, JobStoreError> {
        if record.folk_id.trim().is_empty() {
            return Err(JobStoreError::InvalidInput("folk_id is required".to_string()));
        }

        if let Some(run) = self.repo.record_outcome(&record).await? {
            return Ok(run);
        }

        let run = self.get_run(record.run_id).await?;
        if run.status == ImportRunStatus::InProgress {
            Err(ImportRunError::TotalExceeded(run.total_records).into())
        } else {
            Err(ImportRunError::NotInProgress(run.status).into())
        }
    }

    pub async fn list_runs(
        &self,
        params: ImportRunListParams,
    ) -> Result<Vec<ImportRun>, JobStoreError> {
        let limit = if params.limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            params.limit.min(MAX_LIST_LIMIT)
        };
        let params = ImportRunListParams { limit, ..params };
        Ok(self.repo.list(&params).await?)
    }

    pub async fn get_failed_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<FailedImportRecord>, JobStoreError> {
        self.get_run(run_id).await?;
        Ok(self.repo.find_failed_records(run_id).await?)
    }

    pub async fn get_failed_record(&self, id: Uuid) -> Result<FailedImportRecord, JobStoreError> {
        self.repo
            .find_failed_record(id)
            .await?
            .ok_or(JobStoreError::RecordNotFound(id))
    }

    /// 失敗レコードを解決済みにする。既に解決済みなら何もせず false。
    pub async fn resolve_failed_record(
        &self,
        id: Uuid,
        resolved_as: WriteOutcome,
    ) -> Result<bool, JobStoreError> {
        if self.repo.find_failed_record(id).await?.is_none() {
            return Err(JobStoreError::RecordNotFound(id));
        }
        Ok(self
            .repo
            .resolve_failed_record(id, resolved_as, Utc::now())
            .await?)
    }

    /// リトライの失敗を記録する。解決済みのレコードは変更せず None。
    pub async fn record_retry_failure(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> Result<Option<FailedImportRecord>, JobStoreError> {
        if self.repo.find_failed_record(id).await?.is_none() {
            return Err(JobStoreError::RecordNotFound(id));
        }
        Ok(self
            .repo
            .record_retry_failure(id, error_code, error_message)
            .await?)
    }

    /// 終端状態の実行を失敗レコードごと削除する。
    pub async fn delete_run(&self, run_id: Uuid) -> Result<(), JobStoreError> {
        let run = self.get_run(run_id).await?;
        if !run.is_terminal() {
            return Err(JobStoreError::Conflict(format!(
                "import run {} is still {}",
                run_id, run.status
            )));
        }
        if !self.repo.delete_terminal(run_id).await? {
            return Err(JobStoreError::Conflict(format!(
                "import run {run_id} could not be deleted"
            )));
        }
        Ok(())
    }

    pub async fn find_unfinished(&self) -> Result<Vec<ImportRun>, JobStoreError> {
        Ok(self.repo.find_unfinished().await?)
    }
}
