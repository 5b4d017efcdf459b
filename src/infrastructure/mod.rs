pub mod config;
pub mod database;
pub mod folk_client;
pub mod metrics;
pub mod operation_client;
pub mod telemetry;
