pub mod active_runs;
pub mod cancel_import_run;
pub mod delete_import_run;
pub mod get_failed_records;
pub mod get_import_run;
pub mod get_import_status;
pub mod list_import_runs;
pub mod preview_records;
pub mod recover_import_runs;
pub mod retry_failed_records;
pub mod run_import;
pub mod start_import;

pub use active_runs::ActiveRuns;
pub use cancel_import_run::{CancelImportError, CancelImportRunUseCase};
pub use delete_import_run::DeleteImportRunUseCase;
pub use get_failed_records::GetFailedRecordsUseCase;
pub use get_import_run::GetImportRunUseCase;
pub use get_import_status::{GetImportStatusUseCase, ImportStatusReport};
pub use list_import_runs::ListImportRunsUseCase;
pub use preview_records::{PreviewError, PreviewRecordsUseCase, RecordPreview};
pub use recover_import_runs::RecoverImportRunsUseCase;
pub use retry_failed_records::{RetryBatch, RetryError, RetryFailedRecordsUseCase, RetrySummary};
pub use run_import::{RunExit, RunImportUseCase};
pub use start_import::{StartImportError, StartImportInput, StartImportUseCase};
