use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entity::import_run::{
    STAGE_COMPLETED, STAGE_FAILED, STAGE_FETCHING, STAGE_PERSISTING,
};
use crate::domain::entity::{
    ImportOutcome, ImportRun, ImportRunStatus, RecordRange, RunUpdate, SourceRecord, WriteOutcome,
};
use crate::domain::repository::OutcomeRecord;
use crate::domain::service::{
    ImportJobStore, JobStoreError, RecordSource, RecordWriter, WriteError, WriterRegistry,
};
use crate::infrastructure::metrics::ImportMetrics;

/// RunExit は 1 回の実行がどう終わったか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Completed,
    Failed,
    Cancelled,
    /// 別の書き込み（キャンセル・起動時リカバリ）で実行が終端になったため静かに止まった。
    Superseded,
}

impl RunExit {
    fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
        }
    }
}

/// RunImportUseCase は 1 つの実行を pending から終端状態まで進めるランナー。
/// レコード単位の失敗は記録して続行し、書き込み先やソースの致命的エラーでは実行を failed にする。
pub struct RunImportUseCase {
    store: Arc<ImportJobStore>,
    source: Arc<dyn RecordSource>,
    writers: WriterRegistry,
    metrics: Arc<ImportMetrics>,
}

impl RunImportUseCase {
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
        }
    }

    pub fn writers(&self) -> &WriterRegistry {
        &self.writers
    }

    /// 実行を開始し、終端状態になるまで処理する。
    pub async fn run(
        &self,
        run_id: Uuid,
        range: RecordRange,
        cancel: CancellationToken,
    ) -> Result<RunExit, JobStoreError> {
        if cancel.is_cancelled() {
            info!(run_id = %run_id, "import run cancelled before start");
            return Ok(RunExit::Cancelled);
        }

        let run = match self
            .store
            .transition_run(
                run_id,
                ImportRunStatus::InProgress,
                RunUpdate::stage(STAGE_FETCHING),
            )
            .await
        {
            Ok(run) => run,
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                info!(run_id = %run_id, status = %from, "import run no longer pending, not starting");
                return Ok(RunExit::Superseded);
            }
            Err(JobStoreError::Conflict(msg)) => {
                info!(run_id = %run_id, reason = %msg, "import run changed before start");
                return Ok(RunExit::Superseded);
            }
            Err(e) => return Err(e),
        };

        let operation = run.operation.as_str();
        self.metrics.record_run_started(operation);
        info!(
            run_id = %run_id,
            operation = %operation,
            group_id = %run.group_id,
            "import run started"
        );

        let result = self.process(&run, range, &cancel).await;
        let exit = match &result {
            Ok(exit) => *exit,
            Err(_) => RunExit::Failed,
        };
        self.metrics.record_run_finished(operation, exit.label());

        if let Err(ref e) = result {
            warn!(run_id = %run_id, error = %e, "import run aborted by job store error");
            self.fail_run(run_id, &format!("job store error: {e}")).await;
        }
        info!(run_id = %run_id, exit = exit.label(), "import run finished");
        result
    }

    async fn process(
        &self,
        run: &ImportRun,
        range: RecordRange,
        cancel: &CancellationToken,
    ) -> Result<RunExit, JobStoreError> {
        let Some(writer) = self.writers.get(run.operation) else {
            let summary = format!("no writer configured for operation {}", run.operation);
            return Ok(self.fail_run(run.id, &summary).await);
        };

        let fetched = tokio::select! {
            () = cancel.cancelled() => return Ok(RunExit::Cancelled),
            fetched = self.source.list_group_records(&run.group_id, run.source_type) => fetched,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(e) => return Ok(self.fail_run(run.id, &e.to_string()).await),
        };

        let selected = range.apply(records);
        let total = i64::try_from(selected.len()).unwrap_or(i64::MAX);
        match self
            .store
            .update_run(run.id, RunUpdate::stage(STAGE_PERSISTING).with_total(total))
            .await
        {
            Ok(_) => {}
            Err(JobStoreError::InvalidTransition { .. } | JobStoreError::Conflict(_)) => {
                return Ok(self.stopped(cancel));
            }
            Err(e) => return Err(e),
        }
        debug!(run_id = %run.id, total_records = total, "source records selected");

        let mut seen = HashSet::new();
        for record in selected {
            if cancel.is_cancelled() {
                return Ok(RunExit::Cancelled);
            }

            let outcome = if seen.insert(record.folk_id.clone()) {
                let written = tokio::select! {
                    () = cancel.cancelled() => return Ok(RunExit::Cancelled),
                    written = self.write(writer.as_ref(), &record, &run.parameters) => written,
                };
                match written {
                    Ok(outcome) => outcome,
                    Err(summary) => return Ok(self.fail_run(run.id, &summary).await),
                }
            } else {
                debug!(run_id = %run.id, folk_id = %record.folk_id, "duplicate folk id in batch");
                ImportOutcome::Written(WriteOutcome::Skipped)
            };

            let label = outcome.label();
            let recorded = self
                .store
                .record_outcome(OutcomeRecord {
                    run_id: run.id,
                    folk_id: record.folk_id,
                    record_type: record.record_type,
                    outcome,
                    payload: record.payload,
                })
                .await;
            match recorded {
                Ok(_) => self.metrics.record_outcome(run.operation.as_str(), label),
                Err(JobStoreError::Conflict(msg)) => {
                    info!(run_id = %run.id, reason = %msg, "import run stopped by concurrent update");
                    return Ok(self.stopped(cancel));
                }
                Err(e) => return Err(e),
            }
        }

        match self
            .store
            .transition_run(
                run.id,
                ImportRunStatus::Completed,
                RunUpdate::stage(STAGE_COMPLETED),
            )
            .await
        {
            Ok(done) => {
                info!(
                    run_id = %run.id,
                    created = done.counters.created_records,
                    updated = done.counters.updated_records,
                    skipped = done.counters.skipped_records,
                    failed = done.counters.failed_records,
                    "import run completed"
                );
                Ok(RunExit::Completed)
            }
            Err(JobStoreError::InvalidTransition { .. } | JobStoreError::Conflict(_)) => {
                Ok(self.stopped(cancel))
            }
            Err(e) => Err(e),
        }
    }

    /// 1 レコードを書き込む。致命的エラーの場合は実行の errorSummary を返す。
    async fn write(
        &self,
        writer: &dyn RecordWriter,
        record: &SourceRecord,
        options: &serde_json::Value,
    ) -> Result<ImportOutcome, String> {
        match writer.write(record, options).await {
            Ok(outcome) => Ok(ImportOutcome::Written(outcome)),
            Err(WriteError::Record { code, message }) => {
                debug!(folk_id = %record.folk_id, error_code = %code, "record write failed");
                Ok(ImportOutcome::Failed {
                    error_code: code,
                    error_message: message,
                })
            }
            Err(WriteError::Fatal(msg)) => Err(msg),
        }
    }

    fn stopped(&self, cancel: &CancellationToken) -> RunExit {
        if cancel.is_cancelled() {
            RunExit::Cancelled
        } else {
            RunExit::Superseded
        }
    }

    /// 実行を failed にする。既に終端なら何もしない。
    async fn fail_run(&self, run_id: Uuid, summary: &str) -> RunExit {
        warn!(run_id = %run_id, error_summary = %summary, "import run failed");
        match self
            .store
            .transition_run(
                run_id,
                ImportRunStatus::Failed,
                RunUpdate::stage(STAGE_FAILED).with_error(summary),
            )
            .await
        {
            Ok(_) => RunExit::Failed,
            Err(JobStoreError::InvalidTransition { .. } | JobStoreError::Conflict(_)) => {
                RunExit::Superseded
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to mark import run failed");
                RunExit::Failed
            }
        }
    }
}
