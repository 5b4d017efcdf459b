use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::{
    BulkOperation, FailedImportRecord, ImportOutcome, ImportRun, ImportRunStatus, RunCounters,
    SourceType, WriteOutcome,
};
use crate::domain::repository::{ImportRunListParams, ImportRunRepository, OutcomeRecord};

const RUN_COLUMNS: &str = "id, source_type, operation, group_id, status, total_records, \
     processed_records, created_records, updated_records, skipped_records, failed_records, \
     import_stage, error_summary, parameters, initiated_by, started_at, completed_at, \
     created_at, updated_at";

const FAILED_COLUMNS: &str = "id, run_id, record_type, folk_id, payload, error_code, \
     error_message, retry_count, resolved_at, created_at, updated_at";

/// ImportRunPostgresRepository は PostgreSQL 実装のインポート実行リポジトリ。
pub struct ImportRunPostgresRepository {
    pool: PgPool,
}

impl ImportRunPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// (created, updated, skipped, failed) の加算量。
fn counter_deltas(outcome: &ImportOutcome) -> (i64, i64, i64, i64) {
    match outcome {
        ImportOutcome::Written(WriteOutcome::Created) => (1, 0, 0, 0),
        ImportOutcome::Written(WriteOutcome::Updated) => (0, 1, 0, 0),
        ImportOutcome::Written(WriteOutcome::Skipped) => (0, 0, 1, 0),
        ImportOutcome::Failed { .. } => (0, 0, 0, 1),
    }
}

#[async_trait]
impl ImportRunRepository for ImportRunPostgresRepository {
    async fn create(&self, run: &ImportRun) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folk_import.import_runs
                (id, source_type, operation, group_id, status, total_records,
                 import_stage, error_summary, parameters, initiated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(run.source_type.as_str())
        .bind(run.operation.as_str())
        .bind(&run.group_id)
        .bind(run.status.to_string())
        .bind(run.total_records)
        .bind(&run.import_stage)
        .bind(&run.error_summary)
        .bind(&run.parameters)
        .bind(&run.initiated_by)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ImportRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM folk_import.import_runs WHERE id = $1");
        let row = sqlx::query_as::<_, ImportRunRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, params: &ImportRunListParams) -> anyhow::Result<Vec<ImportRun>> {
        let mut conditions = Vec::new();
        let mut bind_idx = 1u32;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.source_type.is_some() {
            conditions.push(format!("source_type = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.operation.is_some() {
            conditions.push(format!("operation = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM folk_import.import_runs {where_clause} \
             ORDER BY created_at DESC LIMIT ${bind_idx}"
        );

        let mut query = sqlx::query_as::<_, ImportRunRow>(&sql);
        if let Some(status) = params.status {
            query = query.bind(status.to_string());
        }
        if let Some(source_type) = params.source_type {
            query = query.bind(source_type.as_str());
        }
        if let Some(operation) = params.operation {
            query = query.bind(operation.as_str());
        }
        query = query.bind(params.limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_unfinished(&self) -> anyhow::Result<Vec<ImportRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM folk_import.import_runs \
             WHERE status IN ('pending', 'in_progress') ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, ImportRunRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_lifecycle(
        &self,
        run: &ImportRun,
        expected: ImportRunStatus,
    ) -> anyhow::Result<bool> {
        // カウンタ列には触れない（同時に走る record_outcome の加算を失わないため）
        let result = sqlx::query(
            r#"
            UPDATE folk_import.import_runs
            SET status = $3, total_records = $4, import_stage = $5, error_summary = $6,
                started_at = $7, completed_at = $8, updated_at = NOW()
            WHERE id = $1
              AND status = $2
              AND processed_records <= $4
              AND ($3 <> 'completed' OR processed_records = $4)
            "#,
        )
        .bind(run.id)
        .bind(expected.to_string())
        .bind(run.status.to_string())
        .bind(run.total_records)
        .bind(&run.import_stage)
        .bind(&run.error_summary)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_outcome(&self, record: &OutcomeRecord) -> anyhow::Result<Option<ImportRun>> {
        let (created, updated, skipped, failed) = counter_deltas(&record.outcome);
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE folk_import.import_runs
            SET processed_records = processed_records + 1,
                created_records = created_records + $2,
                updated_records = updated_records + $3,
                skipped_records = skipped_records + $4,
                failed_records = failed_records + $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress' AND processed_records < total_records
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ImportRunRow>(&sql)
            .bind(record.run_id)
            .bind(created)
            .bind(updated)
            .bind(skipped)
            .bind(failed)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        if let ImportOutcome::Failed {
            error_code,
            error_message,
        } = &record.outcome
        {
            sqlx::query(
                r#"
                INSERT INTO folk_import.failed_import_records
                    (id, run_id, record_type, folk_id, payload, error_code, error_message)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (run_id, folk_id) WHERE resolved_at IS NULL
                DO UPDATE SET
                    retry_count = failed_import_records.retry_count + 1,
                    payload = EXCLUDED.payload,
                    error_code = EXCLUDED.error_code,
                    error_message = EXCLUDED.error_message,
                    updated_at = NOW()
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(record.run_id)
            .bind(record.record_type.as_str())
            .bind(&record.folk_id)
            .bind(&record.payload)
            .bind(error_code)
            .bind(error_message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn find_failed_records(&self, run_id: Uuid) -> anyhow::Result<Vec<FailedImportRecord>> {
        let sql = format!(
            "SELECT {FAILED_COLUMNS} FROM folk_import.failed_import_records \
             WHERE run_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, FailedImportRecordRow>(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_failed_record(&self, id: Uuid) -> anyhow::Result<Option<FailedImportRecord>> {
        let sql = format!("SELECT {FAILED_COLUMNS} FROM folk_import.failed_import_records WHERE id = $1");
        let row = sqlx::query_as::<_, FailedImportRecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn resolve_failed_record(
        &self,
        id: Uuid,
        resolved_as: WriteOutcome,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let (created, updated, skipped, _) =
            counter_deltas(&ImportOutcome::Written(resolved_as));
        let mut tx = self.pool.begin().await?;

        let run_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE folk_import.failed_import_records
            SET resolved_at = $2, retry_count = retry_count + 1, updated_at = $2
            WHERE id = $1 AND resolved_at IS NULL
            RETURNING run_id
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(run_id) = run_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE folk_import.import_runs
            SET failed_records = failed_records - 1,
                created_records = created_records + $2,
                updated_records = updated_records + $3,
                skipped_records = skipped_records + $4,
                updated_at = NOW()
            WHERE id = $1 AND failed_records > 0
            "#,
        )
        .bind(run_id)
        .bind(created)
        .bind(updated)
        .bind(skipped)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> anyhow::Result<Option<FailedImportRecord>> {
        let sql = format!(
            r#"
            UPDATE folk_import.failed_import_records
            SET retry_count = retry_count + 1, error_code = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1 AND resolved_at IS NULL
            RETURNING {FAILED_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FailedImportRecordRow>(&sql)
            .bind(id)
            .bind(error_code)
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn delete_terminal(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM folk_import.import_runs WHERE id = $1 AND status IN ('completed', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// ImportRunRow は DB 行からのマッピング用。
#[derive(sqlx::FromRow)]
struct ImportRunRow {
    id: Uuid,
    source_type: String,
    operation: String,
    group_id: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    created_records: i64,
    updated_records: i64,
    skipped_records: i64,
    failed_records: i64,
    import_stage: Option<String>,
    error_summary: Option<String>,
    parameters: serde_json::Value,
    initiated_by: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ImportRunRow> for ImportRun {
    type Error = anyhow::Error;

    fn try_from(row: ImportRunRow) -> anyhow::Result<Self> {
        Ok(ImportRun {
            id: row.id,
            source_type: SourceType::from_str_value(&row.source_type)?,
            operation: BulkOperation::from_str_value(&row.operation)?,
            group_id: row.group_id,
            status: ImportRunStatus::from_str_value(&row.status)?,
            total_records: row.total_records,
            counters: RunCounters {
                processed_records: row.processed_records,
                created_records: row.created_records,
                updated_records: row.updated_records,
                skipped_records: row.skipped_records,
                failed_records: row.failed_records,
            },
            import_stage: row.import_stage,
            error_summary: row.error_summary,
            parameters: row.parameters,
            initiated_by: row.initiated_by,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// FailedImportRecordRow は DB 行からのマッピング用。
#[derive(sqlx::FromRow)]
struct FailedImportRecordRow {
    id: Uuid,
    run_id: Uuid,
    record_type: String,
    folk_id: String,
    payload: serde_json::Value,
    error_code: String,
    error_message: String,
    retry_count: i32,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FailedImportRecordRow> for FailedImportRecord {
    type Error = anyhow::Error;

    fn try_from(row: FailedImportRecordRow) -> anyhow::Result<Self> {
        Ok(FailedImportRecord {
            id: row.id,
            run_id: row.run_id,
            record_type: SourceType::from_str_value(&row.record_type)?,
            folk_id: row.folk_id,
            payload: row.payload,
            error_code: row.error_code,
            error_message: row.error_message,
            retry_count: row.retry_count,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
