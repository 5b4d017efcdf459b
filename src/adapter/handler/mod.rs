pub mod error;
pub mod import_handler;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::infrastructure::metrics::ImportMetrics;
use crate::usecase::{
    CancelImportRunUseCase, DeleteImportRunUseCase, GetFailedRecordsUseCase, GetImportRunUseCase,
    GetImportStatusUseCase, ListImportRunsUseCase, PreviewRecordsUseCase,
    RetryFailedRecordsUseCase, StartImportUseCase,
};

/// AppState はアプリケーション全体の共有状態を表す。
#[derive(Clone)]
pub struct AppState {
    pub start_import_uc: Arc<StartImportUseCase>,
    pub list_import_runs_uc: Arc<ListImportRunsUseCase>,
    pub get_import_run_uc: Arc<GetImportRunUseCase>,
    pub delete_import_run_uc: Arc<DeleteImportRunUseCase>,
    pub get_failed_records_uc: Arc<GetFailedRecordsUseCase>,
    pub retry_failed_records_uc: Arc<RetryFailedRecordsUseCase>,
    pub cancel_import_run_uc: Arc<CancelImportRunUseCase>,
    pub get_import_status_uc: Arc<GetImportStatusUseCase>,
    pub preview_records_uc: Arc<PreviewRecordsUseCase>,
    pub metrics: Arc<ImportMetrics>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        import_handler::healthz,
        import_handler::readyz,
        import_handler::metrics,
        import_handler::list_import_runs,
        import_handler::get_import_run,
        import_handler::delete_import_run,
        import_handler::get_failed_records,
        import_handler::retry_failed_records,
        import_handler::cancel_import_run,
        import_handler::get_import_status,
        import_handler::preview_records,
        import_handler::start_bulk_operation,
    ),
    components(schemas(
        import_handler::ImportRunResponse,
        import_handler::FailedImportRecordResponse,
        import_handler::RetryRequest,
        import_handler::RetryResponse,
        import_handler::DeleteImportRunResponse,
        import_handler::ImportStatusResponse,
        import_handler::StatusTotalsResponse,
        import_handler::BulkOperationRequest,
        import_handler::PreviewRecordResponse,
        import_handler::PreviewResponse,
    )),
)]
struct ApiDoc;

/// REST API ルーターを構築する。
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health / Readiness / Metrics
        .route("/healthz", get(import_handler::healthz))
        .route("/readyz", get(import_handler::readyz))
        .route("/metrics", get(import_handler::metrics))
        // Import runs
        .route(
            "/api/admin/folk/import-runs",
            get(import_handler::list_import_runs),
        )
        .route(
            "/api/admin/folk/import-runs/:run_id",
            get(import_handler::get_import_run).delete(import_handler::delete_import_run),
        )
        .route(
            "/api/admin/folk/import-runs/:run_id/failed",
            get(import_handler::get_failed_records),
        )
        .route(
            "/api/admin/folk/import-runs/:run_id/retry",
            post(import_handler::retry_failed_records),
        )
        .route(
            "/api/admin/folk/import-runs/:run_id/cancel",
            post(import_handler::cancel_import_run),
        )
        .route(
            "/api/admin/folk/import-status",
            get(import_handler::get_import_status),
        )
        // Bulk operations
        .route(
            "/api/admin/folk/bulk/preview",
            post(import_handler::preview_records),
        )
        .route(
            "/api/admin/folk/bulk/:operation",
            post(import_handler::start_bulk_operation),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// ErrorResponse は統一エラーレスポンス。
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                request_id: uuid::Uuid::new_v4().to_string(),
                details: vec![],
            },
        }
    }
}
