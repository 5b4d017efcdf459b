use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entity::{FailedImportRecord, ImportRun, SourceRecord};
use crate::domain::service::{
    ImportJobStore, JobStoreError, RecordSource, RecordWriter, WriteError, WriterRegistry,
};
use crate::infrastructure::metrics::ImportMetrics;

pub const SOURCE_RECORD_MISSING: &str = "SOURCE_RECORD_MISSING";
pub const DESTINATION_UNAVAILABLE: &str = "DESTINATION_UNAVAILABLE";

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("import run not found: {0}")]
    RunNotFound(Uuid),

    #[error("failed record {folk_id} not found in import run {run_id}")]
    RecordNotFound { run_id: Uuid, folk_id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JobStoreError> for RetryError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::RunNotFound(id) => Self::RunNotFound(id),
            JobStoreError::InvalidInput(msg) => Self::InvalidInput(msg),
            JobStoreError::Internal(e) => Self::Internal(e),
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}

/// RetryBatch は検証済みのリトライ対象。
#[derive(Debug, Clone)]
pub struct RetryBatch {
    pub run: ImportRun,
    pub records: Vec<FailedImportRecord>,
}

impl RetryBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    pub total_records: usize,
    pub succeeded: usize,
    pub still_failed: usize,
    pub already_resolved: usize,
}

/// RetryFailedRecordsUseCase は失敗レコードを再取得して書き込み直す。
/// 同じ実行へのリトライは実行ごとのロックで直列化する。
pub struct RetryFailedRecordsUseCase {
    store: Arc<ImportJobStore>,
    source: Arc<dyn RecordSource>,
    writers: WriterRegistry,
    metrics: Arc<ImportMetrics>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RetryFailedRecordsUseCase {
    pub fn new(
        store: Arc<ImportJobStore>,
        source: Arc<dyn RecordSource>,
        writers: WriterRegistry,
        metrics: Arc<ImportMetrics>,
    ) -> Self {
        Self {
            store,
            source,
            writers,
            metrics,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// リトライ対象を検証して選び出す。状態は変更しない。
    pub async fn prepare(
        &self,
        run_id: Uuid,
        folk_ids: Option<Vec<String>>,
    ) -> Result<RetryBatch, RetryError> {
        let run = self.store.get_run(run_id).await?;
        let failed = self.store.get_failed_records(run_id).await?;

        let records = match folk_ids {
            None => failed.into_iter().filter(|r| !r.is_resolved()).collect(),
            Some(ids) if ids.is_empty() => {
                return Err(RetryError::InvalidInput(
                    "folkIds must not be empty".to_string(),
                ))
            }
            Some(ids) => {
                let requested: HashSet<String> = ids.into_iter().collect();
                if let Some(missing) = requested
                    .iter()
                    .find(|id| !failed.iter().any(|r| &r.folk_id == *id))
                {
                    return Err(RetryError::RecordNotFound {
                        run_id,
                        folk_id: missing.clone(),
                    });
                }
                failed
                    .into_iter()
                    .filter(|r| !r.is_resolved() && requested.contains(&r.folk_id))
                    .collect()
            }
        };

        if !self.writers.supports(run.operation) {
            return Err(RetryError::InvalidInput(format!(
                "operation {} has no configured endpoint",
                run.operation
            )));
        }

        Ok(RetryBatch { run, records })
    }

    /// 検証済みのバッチを順番に処理する。
    pub async fn execute(&self, batch: RetryBatch) -> Result<RetrySummary, RetryError> {
        let run_id = batch.run.id;
        let lock = self.lock_for(run_id);
        let result = {
            let _guard = lock.lock().await;
            self.process(batch).await
        };
        drop(lock);
        self.release_lock(run_id);
        result
    }

    /// prepare と execute を続けて行う。
    pub async fn retry(
        &self,
        run_id: Uuid,
        folk_ids: Option<Vec<String>>,
    ) -> Result<RetrySummary, RetryError> {
        let batch = self.prepare(run_id, folk_ids).await?;
        self.execute(batch).await
    }

    async fn process(&self, batch: RetryBatch) -> Result<RetrySummary, RetryError> {
        let mut summary = RetrySummary {
            total_records: batch.len(),
            ..Default::default()
        };
        let Some(writer) = self.writers.get(batch.run.operation) else {
            summary.still_failed = batch.len();
            return Ok(summary);
        };

        let mut fatal = false;
        for candidate in batch.records {
            if fatal {
                summary.still_failed += 1;
                continue;
            }

            let record = self.store.get_failed_record(candidate.id).await?;
            if record.is_resolved() {
                summary.already_resolved += 1;
                continue;
            }

            match self
                .attempt(writer.as_ref(), &record, &batch.run.parameters)
                .await?
            {
                Attempt::Succeeded => summary.succeeded += 1,
                Attempt::AlreadyResolved => summary.already_resolved += 1,
                Attempt::Failed => summary.still_failed += 1,
                Attempt::Fatal => {
                    summary.still_failed += 1;
                    fatal = true;
                }
            }
        }

        info!(
            run_id = %batch.run.id,
            total_records = summary.total_records,
            succeeded = summary.succeeded,
            still_failed = summary.still_failed,
            already_resolved = summary.already_resolved,
            "retry finished"
        );
        Ok(summary)
    }

    async fn attempt(
        &self,
        writer: &dyn RecordWriter,
        record: &FailedImportRecord,
        options: &serde_json::Value,
    ) -> Result<Attempt, RetryError> {
        let source = match self
            .source
            .fetch_record(record.record_type, &record.folk_id)
            .await
        {
            Ok(Some(source)) => source,
            Ok(None) => {
                return self
                    .fail(record, SOURCE_RECORD_MISSING, "record no longer exists in Folk")
                    .await
            }
            Err(e) => {
                debug!(folk_id = %record.folk_id, error = %e, "source unavailable, using stored payload");
                SourceRecord::new(
                    record.folk_id.clone(),
                    record.record_type,
                    record.payload.clone(),
                )
            }
        };

        match writer.write(&source, options).await {
            Ok(outcome) => {
                let resolved = self.store.resolve_failed_record(record.id, outcome).await?;
                if resolved {
                    self.metrics.record_retry("succeeded");
                    debug!(folk_id = %record.folk_id, outcome = ?outcome, "failed record resolved");
                    Ok(Attempt::Succeeded)
                } else {
                    Ok(Attempt::AlreadyResolved)
                }
            }
            Err(WriteError::Record { code, message }) => self.fail(record, &code, &message).await,
            Err(WriteError::Fatal(msg)) => {
                warn!(folk_id = %record.folk_id, error = %msg, "destination unavailable during retry");
                self.fail(record, DESTINATION_UNAVAILABLE, &msg).await?;
                Ok(Attempt::Fatal)
            }
        }
    }

    async fn fail(
        &self,
        record: &FailedImportRecord,
        code: &str,
        message: &str,
    ) -> Result<Attempt, RetryError> {
        self.metrics.record_retry("failed");
        match self
            .store
            .record_retry_failure(record.id, code, message)
            .await?
        {
            Some(_) => Ok(Attempt::Failed),
            None => Ok(Attempt::AlreadyResolved),
        }
    }

    fn lock_for(&self, run_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id)
            .or_default()
            .clone()
    }

    fn release_lock(&self, run_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 他のリトライが待っていなければ削除する
        if locks
            .get(&run_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&run_id);
        }
    }
}

enum Attempt {
    Succeeded,
    AlreadyResolved,
    Failed,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::repository::InMemoryImportRunRepository;
    use crate::adapter::source::InMemoryRecordSource;
    use crate::domain::entity::{
        BulkOperation, ImportOutcome, ImportRunStatus, NewImportRun, RunUpdate, SourceType,
        WriteOutcome,
    };
    use crate::domain::repository::OutcomeRecord;
    use crate::domain::service::record_writer::MockRecordWriter;

    struct Fixture {
        store: Arc<ImportJobStore>,
        source: Arc<InMemoryRecordSource>,
        run: ImportRun,
    }

    /// per_1 は作成済み、per_2 と per_3 が失敗した完了済みの実行を作る。
    async fn fixture() -> Fixture {
        let store = Arc::new(ImportJobStore::new(Arc::new(
            InMemoryImportRunRepository::new(),
        )));
        let source = Arc::new(InMemoryRecordSource::new());
        let run = store
            .create_run(NewImportRun {
                source_type: SourceType::People,
                operation: BulkOperation::Import,
                group_id: "grp_1".to_string(),
                total_records: 3,
                parameters: serde_json::json!({}),
                initiated_by: "ops".to_string(),
            })
            .await
            .unwrap();
        store
            .transition_run(run.id, ImportRunStatus::InProgress, RunUpdate::default())
            .await
            .unwrap();
        let outcomes = [
            ("per_1", ImportOutcome::Written(WriteOutcome::Created)),
            (
                "per_2",
                ImportOutcome::Failed {
                    error_code: "VALIDATION_ERROR".to_string(),
                    error_message: "name is required".to_string(),
                },
            ),
            (
                "per_3",
                ImportOutcome::Failed {
                    error_code: "VALIDATION_ERROR".to_string(),
                    error_message: "name is required".to_string(),
                },
            ),
        ];
        for (folk_id, outcome) in outcomes {
            store
                .record_outcome(OutcomeRecord {
                    run_id: run.id,
                    folk_id: folk_id.to_string(),
                    record_type: SourceType::People,
                    outcome,
                    payload: serde_json::json!({"id": folk_id}),
                })
                .await
                .unwrap();
            source
                .insert(
                    "grp_1",
                    SourceRecord::new(
                        folk_id,
                        SourceType::People,
                        serde_json::json!({"id": folk_id, "fullName": "Fixed"}),
                    ),
                )
                .await;
        }
        let run = store
            .transition_run(run.id, ImportRunStatus::Completed, RunUpdate::default())
            .await
            .unwrap();
        Fixture { store, source, run }
    }

    fn make_uc(fx: &Fixture, writer: MockRecordWriter) -> RetryFailedRecordsUseCase {
        RetryFailedRecordsUseCase::new(
            fx.store.clone(),
            fx.source.clone(),
            WriterRegistry::new().with(
                BulkOperation::Import,
                Arc::new(writer) as Arc<dyn RecordWriter>,
            ),
            Arc::new(ImportMetrics::new("test").unwrap()),
        )
    }

    #[tokio::test]
    async fn test_retry_subset_resolves_record() {
        let fx = fixture().await;
        let mut writer = MockRecordWriter::new();
        writer
            .expect_write()
            .withf(|record, _| record.folk_id == "per_2")
            .times(1)
            .returning(|_, _| Ok(WriteOutcome::Created));
        let uc = make_uc(&fx, writer);

        let summary = uc
            .retry(fx.run.id, Some(vec!["per_2".to_string()]))
            .await
            .unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                total_records: 1,
                succeeded: 1,
                still_failed: 0,
                already_resolved: 0,
            }
        );

        let run = fx.store.get_run(fx.run.id).await.unwrap();
        assert_eq!(run.counters.created_records, 2);
        assert_eq!(run.counters.failed_records, 1);
        assert!(run.counters.is_balanced());

        let failed = fx.store.get_failed_records(fx.run.id).await.unwrap();
        let per_2 = failed.iter().find(|r| r.folk_id == "per_2").unwrap();
        assert!(per_2.is_resolved());
        assert_eq!(per_2.retry_count, 1);
    }

    #[tokio::test]
    async fn test_foreign_folk_id_is_not_found() {
        let fx = fixture().await;
        let mut writer = MockRecordWriter::new();
        writer.expect_write().never();
        let uc = make_uc(&fx, writer);
        let before = fx.store.get_run(fx.run.id).await.unwrap();

        let result = uc
            .retry(
                fx.run.id,
                Some(vec!["per_2".to_string(), "per_404".to_string()]),
            )
            .await;
        assert!(matches!(
            result,
            Err(RetryError::RecordNotFound { ref folk_id, .. }) if folk_id == "per_404"
        ));

        let failed = fx.store.get_failed_records(fx.run.id).await.unwrap();
        assert!(failed.iter().all(|r| r.retry_count == 0 && !r.is_resolved()));
        let after = fx.store.get_run(fx.run.id).await.unwrap();
        assert_eq!(after.counters, before.counters);
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn test_empty_folk_ids_is_invalid() {
        let fx = fixture().await;
        let uc = make_uc(&fx, MockRecordWriter::new());
        let result = uc.prepare(fx.run.id, Some(vec![])).await;
        assert!(matches!(result, Err(RetryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_repeated_failure_increments_retry_count() {
        let fx = fixture().await;
        let mut writer = MockRecordWriter::new();
        writer
            .expect_write()
            .returning(|_, _| Err(WriteError::record("VALIDATION_ERROR", "still broken")));
        let uc = make_uc(&fx, writer);

        let summary = uc.retry(fx.run.id, None).await.unwrap();
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.still_failed, 2);

        let failed = fx.store.get_failed_records(fx.run.id).await.unwrap();
        for record in failed {
            assert_eq!(record.retry_count, 1);
            assert_eq!(record.error_message, "still broken");
            assert!(!record.is_resolved());
        }
    }

    #[tokio::test]
    async fn test_missing_source_record() {
        let fx = fixture().await;
        fx.source.remove(SourceType::People, "per_3").await;
        let mut writer = MockRecordWriter::new();
        writer
            .expect_write()
            .times(1)
            .returning(|_, _| Ok(WriteOutcome::Updated));
        let uc = make_uc(&fx, writer);

        let summary = uc.retry(fx.run.id, None).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.still_failed, 1);

        let failed = fx.store.get_failed_records(fx.run.id).await.unwrap();
        let per_3 = failed.iter().find(|r| r.folk_id == "per_3").unwrap();
        assert_eq!(per_3.error_code, SOURCE_RECORD_MISSING);
    }

    #[tokio::test]
    async fn test_fatal_error_leaves_remaining_records() {
        let fx = fixture().await;
        let mut writer = MockRecordWriter::new();
        writer
            .expect_write()
            .times(1)
            .returning(|_, _| Err(WriteError::Fatal("connection refused".to_string())));
        let uc = make_uc(&fx, writer);

        let summary = uc.retry(fx.run.id, None).await.unwrap();
        assert_eq!(summary.still_failed, 2);
        assert_eq!(summary.succeeded, 0);

        let failed = fx.store.get_failed_records(fx.run.id).await.unwrap();
        let codes: Vec<_> = failed.iter().map(|r| r.error_code.as_str()).collect();
        assert!(codes.contains(&DESTINATION_UNAVAILABLE));
        assert!(codes.contains(&"VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_second_retry_reports_already_resolved() {
        let fx = fixture().await;
        let mut writer = MockRecordWriter::new();
        writer
            .expect_write()
            .times(2)
            .returning(|_, _| Ok(WriteOutcome::Created));
        let uc = make_uc(&fx, writer);

        let first = uc.prepare(fx.run.id, None).await.unwrap();
        let second = uc.prepare(fx.run.id, None).await.unwrap();
        assert_eq!(first.len(), 2);

        uc.execute(first).await.unwrap();
        let summary = uc.execute(second).await.unwrap();
        assert_eq!(summary.already_resolved, 2);
        assert_eq!(summary.succeeded, 0);

        let run = fx.store.get_run(fx.run.id).await.unwrap();
        assert_eq!(run.counters.failed_records, 0);
        assert_eq!(run.counters.created_records, 3);
    }
}
