pub mod contact_import_writer;
pub mod import_job_store;
pub mod record_source;
pub mod record_writer;

pub use contact_import_writer::ContactImportWriter;
pub use import_job_store::{ImportJobStore, JobStoreError};
pub use record_source::{RecordSource, SourceError};
pub use record_writer::{RecordWriter, WriteError, WriterRegistry};
