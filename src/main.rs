use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use folk_import_server::adapter::handler::{self, AppState};
use folk_import_server::adapter::repository::{
    ImportRunPostgresRepository, InMemoryImportRunRepository, InMemoryInvestorContactRepository,
    InvestorContactPostgresRepository,
};
use folk_import_server::adapter::source::InMemoryRecordSource;
use folk_import_server::domain::entity::BulkOperation;
use folk_import_server::domain::repository::{ImportRunRepository, InvestorContactRepository};
use folk_import_server::domain::service::{
    ContactImportWriter, ImportJobStore, RecordSource, RecordWriter, WriterRegistry,
};
use folk_import_server::infrastructure::config::Config;
use folk_import_server::infrastructure::database;
use folk_import_server::infrastructure::folk_client::FolkClient;
use folk_import_server::infrastructure::metrics::ImportMetrics;
use folk_import_server::infrastructure::operation_client::OperationEndpointWriter;
use folk_import_server::infrastructure::telemetry;
use folk_import_server::usecase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let cfg = Config::load(&config_path)?;

    telemetry::init_logger(&cfg.app.environment, &cfg.logging.format);

    info!(
        app_name = %cfg.app.name,
        version = %cfg.app.version,
        environment = %cfg.app.environment,
        "starting folk import server"
    );

    // Database
    let db_pool = if let Ok(url) = std::env::var("DATABASE_URL") {
        let max_connections = cfg.database.as_ref().map_or(25, |db| db.max_open_conns);
        let pool = database::connect(&url, max_connections).await?;
        info!("database connection pool established from DATABASE_URL");
        Some(pool)
    } else if let Some(ref db_config) = cfg.database {
        info!("connecting to database");
        let pool = database::connect(&db_config.connection_url(), db_config.max_open_conns).await?;
        info!("database connection pool established");
        Some(pool)
    } else {
        info!("no database configured, using in-memory repositories");
        None
    };

    let (run_repo, contact_repo): (Arc<dyn ImportRunRepository>, Arc<dyn InvestorContactRepository>) =
        if let Some(ref pool) = db_pool {
            (
                Arc::new(ImportRunPostgresRepository::new(pool.clone())),
                Arc::new(InvestorContactPostgresRepository::new(pool.clone())),
            )
        } else {
            (
                Arc::new(InMemoryImportRunRepository::new()),
                Arc::new(InMemoryInvestorContactRepository::new()),
            )
        };

    // Folk
    let source: Arc<dyn RecordSource> = if let Some(ref folk) = cfg.folk {
        info!(base_url = %folk.base_url, "using folk api as record source");
        Arc::new(FolkClient::new(folk)?)
    } else {
        info!("no folk api configured, using empty in-memory record source");
        Arc::new(InMemoryRecordSource::new())
    };

    // Destination writers
    let mut writers = WriterRegistry::new().with(
        BulkOperation::Import,
        Arc::new(ContactImportWriter::new(contact_repo)) as Arc<dyn RecordWriter>,
    );
    for (operation, endpoint) in cfg.operation_endpoints() {
        info!(operation = %operation, url = %endpoint.url, "operation endpoint configured");
        writers = writers.with(
            operation,
            Arc::new(OperationEndpointWriter::new(operation, &endpoint)?),
        );
    }

    let metrics = Arc::new(ImportMetrics::new(&cfg.app.name)?);
    let store = Arc::new(ImportJobStore::new(run_repo));
    let active = Arc::new(usecase::ActiveRuns::new());

    let recovered = usecase::RecoverImportRunsUseCase::new(store.clone())
        .execute()
        .await?;
    if recovered > 0 {
        info!(count = recovered, "unfinished import runs marked failed at startup");
    }

    let runner = Arc::new(usecase::RunImportUseCase::new(
        store.clone(),
        source.clone(),
        writers.clone(),
        metrics.clone(),
    ));

    let state = AppState {
        start_import_uc: Arc::new(usecase::StartImportUseCase::new(
            store.clone(),
            runner,
            active.clone(),
            cfg.import.max_concurrent_runs,
        )),
        list_import_runs_uc: Arc::new(usecase::ListImportRunsUseCase::new(store.clone())),
        get_import_run_uc: Arc::new(usecase::GetImportRunUseCase::new(store.clone())),
        delete_import_run_uc: Arc::new(usecase::DeleteImportRunUseCase::new(store.clone())),
        get_failed_records_uc: Arc::new(usecase::GetFailedRecordsUseCase::new(store.clone())),
        retry_failed_records_uc: Arc::new(usecase::RetryFailedRecordsUseCase::new(
            store.clone(),
            source.clone(),
            writers,
            metrics.clone(),
        )),
        cancel_import_run_uc: Arc::new(usecase::CancelImportRunUseCase::new(
            store.clone(),
            active.clone(),
        )),
        get_import_status_uc: Arc::new(usecase::GetImportStatusUseCase::new(
            store.clone(),
            cfg.import.poll_interval_ms,
        )),
        preview_records_uc: Arc::new(usecase::PreviewRecordsUseCase::new(source)),
        metrics,
    };

    let app = handler::router(state);

    let host: std::net::IpAddr = cfg.server.host.parse()?;
    let rest_addr = SocketAddr::new(host, cfg.server.port);
    info!("REST server starting on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(active))
        .await?;

    info!("folk import server stopped");
    Ok(())
}

/// 停止シグナルを待ち、実行中のインポートにキャンセルを伝える。
async fn shutdown_signal(active: Arc<usecase::ActiveRuns>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received, cancelling active import runs");
    active.cancel_all();
}
