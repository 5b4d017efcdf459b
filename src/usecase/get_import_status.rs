use std::sync::Arc;

use crate::domain::entity::{ImportRun, ImportRunStatus, RunCounters};
use crate::domain::repository::import_run_repository::MAX_LIST_LIMIT;
use crate::domain::repository::ImportRunListParams;
use crate::domain::service::{ImportJobStore, JobStoreError};

/// ImportStatusReport は管理画面がポーリングする進捗のスナップショット。
#[derive(Debug, Clone)]
pub struct ImportStatusReport {
    /// 最近の実行（新しい順）。
    pub runs: Vec<ImportRun>,
    /// in_progress の実行数。
    pub active_runs: usize,
    pub should_poll: bool,
    pub poll_interval_ms: u64,
    /// `runs` に含まれる実行のカウンタ合計。
    pub totals: RunCounters,
}

/// GetImportStatusUseCase は進捗レポートを組み立てる。
pub struct GetImportStatusUseCase {
    store: Arc<ImportJobStore>,
    poll_interval_ms: u64,
}

impl GetImportStatusUseCase {
    pub fn new(store: Arc<ImportJobStore>, poll_interval_ms: u64) -> Self {
        Self {
            store,
            poll_interval_ms,
        }
    }

    pub async fn execute(&self, limit: i64) -> Result<ImportStatusReport, JobStoreError> {
        let runs = self
            .store
            .list_runs(ImportRunListParams {
                limit,
                ..Default::default()
            })
            .await?;
        let active = self
            .store
            .list_runs(ImportRunListParams {
                status: Some(ImportRunStatus::InProgress),
                limit: MAX_LIST_LIMIT,
                ..Default::default()
            })
            .await?;

        let mut totals = RunCounters::default();
        for run in &runs {
            totals.add(&run.counters);
        }

        Ok(ImportStatusReport {
            active_runs: active.len(),
            should_poll: !active.is_empty(),
            poll_interval_ms: self.poll_interval_ms,
            totals,
            runs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::InMemoryImportRunRepository;
    use crate::domain::entity::{
        BulkOperation, ImportOutcome, NewImportRun, RunUpdate, SourceType, WriteOutcome,
    };
    use crate::domain::repository::OutcomeRecord;

    async fn create(store: &ImportJobStore, total: i64) -> ImportRun {
        store
            .create_run(NewImportRun {
                source_type: SourceType::People,
                operation: BulkOperation::Import,
                group_id: "grp_1".to_string(),
                total_records: total,
                parameters: serde_json::json!({}),
                initiated_by: "ops".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_without_active_runs() {
        let store = Arc::new(ImportJobStore::new(Arc::new(
            InMemoryImportRunRepository::new(),
        )));
        create(&store, 0).await;

        let uc = GetImportStatusUseCase::new(store, 2000);
        let report = uc.execute(50).await.unwrap();
        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.active_runs, 0);
        assert!(!report.should_poll);
        assert_eq!(report.poll_interval_ms, 2000);
    }

    #[tokio::test]
    async fn test_status_with_in_progress_run() {
        let store = Arc::new(ImportJobStore::new(Arc::new(
            InMemoryImportRunRepository::new(),
        )));
        let run = create(&store, 2).await;
        store
            .transition_run(run.id, ImportRunStatus::InProgress, RunUpdate::default())
            .await
            .unwrap();
        store
            .record_outcome(OutcomeRecord {
                run_id: run.id,
                folk_id: "per_1".to_string(),
                record_type: SourceType::People,
                outcome: ImportOutcome::Written(WriteOutcome::Created),
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();

        let uc = GetImportStatusUseCase::new(store, 2000);
        let report = uc.execute(50).await.unwrap();
        assert_eq!(report.active_runs, 1);
        assert!(report.should_poll);
        assert_eq!(report.totals.processed_records, 1);
        assert_eq!(report.totals.created_records, 1);
        assert_eq!(report.runs[0].progress_percent(), Some(50));
    }
}
