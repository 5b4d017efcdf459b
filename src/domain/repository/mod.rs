pub mod import_run_repository;
pub mod investor_contact_repository;

pub use import_run_repository::{ImportRunListParams, ImportRunRepository, OutcomeRecord};
pub use investor_contact_repository::{InvestorContactRepository, UpsertResult};
