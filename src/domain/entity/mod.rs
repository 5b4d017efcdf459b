pub mod failed_import_record;
pub mod import_run;
pub mod investor_contact;
pub mod source_record;

pub use failed_import_record::FailedImportRecord;
pub use import_run::{
    BulkOperation, ImportOutcome, ImportRun, ImportRunError, ImportRunStatus, NewImportRun,
    RunCounters, RunUpdate, SourceType, WriteOutcome,
};
pub use investor_contact::{ContactMappingError, InvestorContact};
pub use source_record::{RecordRange, SourceRecord};
