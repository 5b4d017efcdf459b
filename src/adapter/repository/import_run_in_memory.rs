use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::{
    FailedImportRecord, ImportOutcome, ImportRun, ImportRunStatus, WriteOutcome,
};
use crate::domain::repository::{ImportRunListParams, ImportRunRepository, OutcomeRecord};

#[derive(Default)]
struct Tables {
    runs: Vec<ImportRun>,
    failed: Vec<FailedImportRecord>,
}

/// InMemoryImportRunRepository は dev モードとテスト用のインメモリ実装。
/// 実行と失敗レコードを 1 つのロックで保護し、条件付き更新を原子的に行う。
#[derive(Default)]
pub struct InMemoryImportRunRepository {
    tables: RwLock<Tables>,
}

impl InMemoryImportRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportRunRepository for InMemoryImportRunRepository {
    async fn create(&self, run: &ImportRun) -> anyhow::Result<()> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        if tables.runs.iter().any(|r| r.id == run.id) {
            anyhow::bail!("import run already exists: {}", run.id);
        }
        tables.runs.push(run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ImportRun>> {
        let tables = self.tables.read().await;
        Ok(tables.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, params: &ImportRunListParams) -> anyhow::Result<Vec<ImportRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<ImportRun> = tables
            .runs
            .iter()
            .filter(|r| params.status.map_or(true, |s| r.status == s))
            .filter(|r| params.source_type.map_or(true, |t| r.source_type == t))
            .filter(|r| params.operation.map_or(true, |o| r.operation == o))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(usize::try_from(params.limit).unwrap_or(0));
        Ok(runs)
    }

    async fn find_unfinished(&self) -> anyhow::Result<Vec<ImportRun>> {
        let tables = self.tables.read().await;
        let mut runs: Vec<ImportRun> = tables
            .runs
            .iter()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn update_lifecycle(
        &self,
        run: &ImportRun,
        expected: ImportRunStatus,
    ) -> anyhow::Result<bool> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(stored) = tables.runs.iter_mut().find(|r| r.id == run.id) else {
            return Ok(false);
        };
        let processed = stored.counters.processed_records;
        if stored.status != expected
            || processed > run.total_records
            || (run.status == ImportRunStatus::Completed && processed != run.total_records)
        {
            return Ok(false);
        }

        stored.status = run.status;
        stored.total_records = run.total_records;
        stored.import_stage.clone_from(&run.import_stage);
        stored.error_summary.clone_from(&run.error_summary);
        stored.started_at = run.started_at;
        stored.completed_at = run.completed_at;
        stored.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_outcome(&self, record: &OutcomeRecord) -> anyhow::Result<Option<ImportRun>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(run) = tables.runs.iter_mut().find(|r| r.id == record.run_id) else {
            return Ok(None);
        };
        if run.apply_outcome(&record.outcome).is_err() {
            return Ok(None);
        }
        let updated = run.clone();

        if let ImportOutcome::Failed {
            error_code,
            error_message,
        } = &record.outcome
        {
            let existing = tables.failed.iter_mut().find(|f| {
                f.run_id == record.run_id && f.folk_id == record.folk_id && !f.is_resolved()
            });
            match existing {
                Some(failed) => {
                    failed.record_failure(error_code, error_message, Some(record.payload.clone()));
                }
                None => tables.failed.push(FailedImportRecord::new(
                    record.run_id,
                    record.record_type,
                    record.folk_id.clone(),
                    record.payload.clone(),
                    error_code.clone(),
                    error_message.clone(),
                )),
            }
        }

        Ok(Some(updated))
    }

    async fn find_failed_records(&self, run_id: Uuid) -> anyhow::Result<Vec<FailedImportRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<FailedImportRecord> = tables
            .failed
            .iter()
            .filter(|f| f.run_id == run_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn find_failed_record(&self, id: Uuid) -> anyhow::Result<Option<FailedImportRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.failed.iter().find(|f| f.id == id).cloned())
    }

    async fn resolve_failed_record(
        &self,
        id: Uuid,
        resolved_as: WriteOutcome,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(record) = tables.failed.iter_mut().find(|f| f.id == id) else {
            return Ok(false);
        };
        if !record.resolve(at) {
            return Ok(false);
        }
        let run_id = record.run_id;
        if let Some(run) = tables.runs.iter_mut().find(|r| r.id == run_id) {
            run.apply_resolution(resolved_as);
        }
        Ok(true)
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> anyhow::Result<Option<FailedImportRecord>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(record) = tables.failed.iter_mut().find(|f| f.id == id) else {
            return Ok(None);
        };
        if !record.record_failure(error_code, error_message, None) {
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    async fn delete_terminal(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(pos) = tables
            .runs
            .iter()
            .position(|r| r.id == id && r.is_terminal())
        else {
            return Ok(false);
        };
        tables.runs.remove(pos);
        tables.failed.retain(|f| f.run_id != id);
        Ok(true)
    }
}
