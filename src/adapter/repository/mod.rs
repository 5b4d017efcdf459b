pub mod import_run_in_memory;
pub mod import_run_postgres;
pub mod investor_contact_in_memory;
pub mod investor_contact_postgres;

pub use import_run_in_memory::InMemoryImportRunRepository;
pub use import_run_postgres::ImportRunPostgresRepository;
pub use investor_contact_in_memory::InMemoryInvestorContactRepository;
pub use investor_contact_postgres::InvestorContactPostgresRepository;
