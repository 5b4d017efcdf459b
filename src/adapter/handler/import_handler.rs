use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ImportApiError;
use super::AppState;
use crate::domain::entity::{
    BulkOperation, FailedImportRecord, ImportRun, ImportRunStatus, RecordRange, SourceRecord,
    SourceType,
};
use crate::domain::repository::ImportRunListParams;
use crate::usecase::{ImportStatusReport, StartImportInput};

// --- Request / Response DTOs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportRunResponse {
    pub id: String,
    pub source_type: SourceType,
    pub operation: BulkOperation,
    pub group_id: String,
    pub status: ImportRunStatus,
    pub total_records: i64,
    pub processed_records: i64,
    pub created_records: i64,
    pub updated_records: i64,
    pub skipped_records: i64,
    pub failed_records: i64,
    /// totalRecords が 0 の間は null。
    pub progress_percent: Option<u8>,
    pub import_stage: Option<String>,
    pub error_summary: Option<String>,
    pub parameters: serde_json::Value,
    pub initiated_by: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ImportRun> for ImportRunResponse {
    fn from(run: ImportRun) -> Self {
        Self {
            id: run.id.to_string(),
            progress_percent: run.progress_percent(),
            source_type: run.source_type,
            operation: run.operation,
            group_id: run.group_id,
            status: run.status,
            total_records: run.total_records,
            processed_records: run.counters.processed_records,
            created_records: run.counters.created_records,
            updated_records: run.counters.updated_records,
            skipped_records: run.counters.skipped_records,
            failed_records: run.counters.failed_records,
            import_stage: run.import_stage,
            error_summary: run.error_summary,
            parameters: run.parameters,
            initiated_by: run.initiated_by,
            started_at: run.started_at.map(|t| t.to_rfc3339()),
            completed_at: run.completed_at.map(|t| t.to_rfc3339()),
            created_at: run.created_at.to_rfc3339(),
            updated_at: run.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedImportRecordResponse {
    pub id: String,
    pub run_id: String,
    pub record_type: SourceType,
    pub folk_id: String,
    pub payload: serde_json::Value,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: i32,
    pub resolved_at: Option<String>,
    pub created_at: String,
}

impl From<FailedImportRecord> for FailedImportRecordResponse {
    fn from(r: FailedImportRecord) -> Self {
        Self {
            id: r.id.to_string(),
            run_id: r.run_id.to_string(),
            record_type: r.record_type,
            folk_id: r.folk_id,
            payload: r.payload,
            error_code: r.error_code,
            error_message: r.error_message,
            retry_count: r.retry_count,
            resolved_at: r.resolved_at.map(|t| t.to_rfc3339()),
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListImportRunsQuery {
    pub status: Option<String>,
    pub source_type: Option<String>,
    pub operation: Option<String>,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryRequest {
    pub folk_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub message: String,
    pub total_records: usize,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeleteImportRunResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusTotalsResponse {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatusResponse {
    pub runs: Vec<ImportRunResponse>,
    pub active_runs: usize,
    pub should_poll: bool,
    pub poll_interval_ms: u64,
    pub totals: StatusTotalsResponse,
}

impl From<ImportStatusReport> for ImportStatusResponse {
    fn from(report: ImportStatusReport) -> Self {
        Self {
            runs: report.runs.into_iter().map(ImportRunResponse::from).collect(),
            active_runs: report.active_runs,
            should_poll: report.should_poll,
            poll_interval_ms: report.poll_interval_ms,
            totals: StatusTotalsResponse {
                processed: report.totals.processed_records,
                created: report.totals.created_records,
                updated: report.totals.updated_records,
                skipped: report.totals.skipped_records,
                failed: report.totals.failed_records,
            },
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationRequest {
    pub group_id: String,
    pub source_type: Option<String>,
    pub first: Option<i64>,
    pub last: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub initiated_by: Option<String>,
    /// 操作ごとのオプション。実行の parameters として保存される。
    #[serde(default)]
    pub options: serde_json::Value,
}

impl BulkOperationRequest {
    fn range(&self) -> RecordRange {
        RecordRange {
            first: self.first,
            last: self.last,
            start: self.start,
            end: self.end,
        }
    }

    fn source_type(&self) -> Result<SourceType, ImportApiError> {
        match self.source_type.as_deref() {
            None => Ok(SourceType::People),
            Some(s) => parse_source_type(s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRecordResponse {
    pub folk_id: String,
    pub record_type: SourceType,
    pub payload: serde_json::Value,
}

impl From<SourceRecord> for PreviewRecordResponse {
    fn from(r: SourceRecord) -> Self {
        Self {
            folk_id: r.folk_id,
            record_type: r.record_type,
            payload: r.payload,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub records: Vec<PreviewRecordResponse>,
    pub total_records: usize,
}

// --- Helper ---

fn parse_run_id(run_id: &str) -> Result<Uuid, ImportApiError> {
    Uuid::parse_str(run_id)
        .map_err(|_| ImportApiError::Validation(format!("invalid runId: {}", run_id)))
}

fn parse_source_type(s: &str) -> Result<SourceType, ImportApiError> {
    SourceType::from_str_value(s).map_err(|e| ImportApiError::Validation(e.to_string()))
}

/// 空のボディは全件リトライ。それ以外は RetryRequest として解釈できなければ 400。
fn parse_retry_request(body: &[u8]) -> Result<RetryRequest, ImportApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RetryRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ImportApiError::Validation(format!("invalid retry request: {e}")))
}

const DEFAULT_INITIATED_BY: &str = "system";

// --- Handlers ---

#[utoipa::path(get, path = "/healthz", responses((status = 200, description = "Health check OK")))]
pub async fn healthz() -> &'static str {
    "ok"
}

#[utoipa::path(get, path = "/readyz", responses((status = 200, description = "Ready")))]
pub async fn readyz() -> &'static str {
    "ok"
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, description = "Prometheus metrics")))]
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.gather_metrics()
}

#[utoipa::path(
    get,
    path = "/api/admin/folk/import-runs",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sourceType" = Option<String>, Query, description = "Filter by source type"),
        ("operation" = Option<String>, Query, description = "Filter by operation"),
        ("limit" = Option<i64>, Query, description = "Max runs (default 50, max 500)"),
    ),
    responses(
        (status = 200, description = "Import runs, newest first", body = [ImportRunResponse]),
        (status = 400, description = "Invalid filter"),
    )
)]
pub async fn list_import_runs(
    State(state): State<AppState>,
    Query(query): Query<ListImportRunsQuery>,
) -> Result<Json<Vec<ImportRunResponse>>, ImportApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            ImportRunStatus::from_str_value(s)
                .map_err(|e| ImportApiError::Validation(e.to_string()))?,
        ),
        None => None,
    };
    let source_type = query.source_type.as_deref().map(parse_source_type).transpose()?;
    let operation = match query.operation.as_deref() {
        Some(s) => Some(
            BulkOperation::from_str_value(s)
                .map_err(|e| ImportApiError::Validation(e.to_string()))?,
        ),
        None => None,
    };

    let runs = state
        .list_import_runs_uc
        .execute(ImportRunListParams {
            status,
            source_type,
            operation,
            limit: query.limit,
        })
        .await?;

    Ok(Json(runs.into_iter().map(ImportRunResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/folk/import-runs/{run_id}",
    params(("run_id" = String, Path, description = "Import run ID")),
    responses(
        (status = 200, description = "Import run", body = ImportRunResponse),
        (status = 404, description = "Import run not found"),
    )
)]
pub async fn get_import_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ImportRunResponse>, ImportApiError> {
    let id = parse_run_id(&run_id)?;
    let run = state.get_import_run_uc.execute(id).await?;
    Ok(Json(run.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/folk/import-runs/{run_id}",
    params(("run_id" = String, Path, description = "Import run ID")),
    responses(
        (status = 200, description = "Import run deleted", body = DeleteImportRunResponse),
        (status = 404, description = "Import run not found"),
        (status = 409, description = "Import run is not finished"),
    )
)]
pub async fn delete_import_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<DeleteImportRunResponse>, ImportApiError> {
    let id = parse_run_id(&run_id)?;
    state.delete_import_run_uc.execute(id).await?;
    Ok(Json(DeleteImportRunResponse {
        success: true,
        message: format!("import run {} deleted", run_id),
    }))
}

#[utoipa::path(
    get,
    path = "/api/admin/folk/import-runs/{run_id}/failed",
    params(("run_id" = String, Path, description = "Import run ID")),
    responses(
        (status = 200, description = "Failed records", body = [FailedImportRecordResponse]),
        (status = 404, description = "Import run not found"),
    )
)]
pub async fn get_failed_records(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<FailedImportRecordResponse>>, ImportApiError> {
    let id = parse_run_id(&run_id)?;
    let records = state.get_failed_records_uc.execute(id).await?;
    Ok(Json(
        records
            .into_iter()
            .map(FailedImportRecordResponse::from)
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/folk/import-runs/{run_id}/retry",
    params(("run_id" = String, Path, description = "Import run ID")),
    request_body = RetryRequest,
    responses(
        (status = 202, description = "Retry scheduled", body = RetryResponse),
        (status = 400, description = "Validation error"),
        (status = 404, description = "Import run or failed record not found"),
    )
)]
pub async fn retry_failed_records(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RetryResponse>), ImportApiError> {
    let id = parse_run_id(&run_id)?;
    let req = parse_retry_request(&body)?;

    let batch = state.retry_failed_records_uc.prepare(id, req.folk_ids).await?;
    let total_records = batch.len();

    let retry_uc = state.retry_failed_records_uc.clone();
    tokio::spawn(async move {
        if let Err(e) = retry_uc.execute(batch).await {
            tracing::error!(run_id = %id, error = %e, "retry of failed records failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RetryResponse {
            message: format!("retrying {} failed records", total_records),
            total_records,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/folk/import-runs/{run_id}/cancel",
    params(("run_id" = String, Path, description = "Import run ID")),
    responses(
        (status = 200, description = "Import run cancelled", body = ImportRunResponse),
        (status = 404, description = "Import run not found"),
        (status = 409, description = "Already terminal"),
    )
)]
pub async fn cancel_import_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ImportRunResponse>, ImportApiError> {
    let id = parse_run_id(&run_id)?;
    let run = state.cancel_import_run_uc.execute(id).await?;
    Ok(Json(run.into()))
}

#[utoipa::path(
    get,
    path = "/api/admin/folk/import-status",
    params(("limit" = Option<i64>, Query, description = "Number of recent runs")),
    responses((status = 200, description = "Import progress", body = ImportStatusResponse))
)]
pub async fn get_import_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ImportStatusResponse>, ImportApiError> {
    let report = state.get_import_status_uc.execute(query.limit).await?;
    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/folk/bulk/preview",
    request_body = BulkOperationRequest,
    responses(
        (status = 200, description = "Selected source records", body = PreviewResponse),
        (status = 400, description = "Validation error"),
        (status = 502, description = "Folk unavailable"),
    )
)]
pub async fn preview_records(
    State(state): State<AppState>,
    Json(req): Json<BulkOperationRequest>,
) -> Result<Json<PreviewResponse>, ImportApiError> {
    let source_type = req.source_type()?;
    let preview = state
        .preview_records_uc
        .execute(&req.group_id, source_type, req.range())
        .await?;

    Ok(Json(PreviewResponse {
        total_records: preview.total_records,
        records: preview
            .records
            .into_iter()
            .map(PreviewRecordResponse::from)
            .collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/folk/bulk/{operation}",
    params(("operation" = String, Path, description = "import, enrich, email, sync-to-folk or trigger-enrichment")),
    request_body = BulkOperationRequest,
    responses(
        (status = 202, description = "Import run queued", body = ImportRunResponse),
        (status = 400, description = "Validation error"),
    )
)]
pub async fn start_bulk_operation(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Json(req): Json<BulkOperationRequest>,
) -> Result<(StatusCode, Json<ImportRunResponse>), ImportApiError> {
    let operation = BulkOperation::from_str_value(&operation)
        .map_err(|e| ImportApiError::Validation(e.to_string()))?;
    let source_type = req.source_type()?;
    let range = req.range();

    let run = state
        .start_import_uc
        .execute(StartImportInput {
            operation,
            group_id: req.group_id,
            source_type,
            range,
            initiated_by: req
                .initiated_by
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_INITIATED_BY.to_string()),
            options: req.options,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(run.into())))
}
