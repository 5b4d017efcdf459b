//! インポート実行のエンドツーエンドテスト（インメモリアダプター使用）
//!
//! 実際に REST サーバーを起動し、StatusClient の HTTP 実装から操作する。
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use folk_import_server::adapter::handler::{self, AppState};
use folk_import_server::adapter::repository::{
    InMemoryImportRunRepository, InMemoryInvestorContactRepository,
};
use folk_import_server::adapter::source::InMemoryRecordSource;
use folk_import_server::client::{
    ClientError, FailedRecordSelection, HttpImportApi, ImportApi,
    ImportRunResponse, StatusPoller,
};
use folk_import_server::domain::entity::{
    BulkOperation, ImportRunStatus, NewImportRun, RunUpdate, SourceRecord, SourceType,
};
use folk_import_server::domain::service::{
    ContactImportWriter, ImportJobStore, RecordSource, RecordWriter, WriterRegistry,
};
use folk_import_server::infrastructure::metrics::ImportMetrics;
use folk_import_server::usecase::{self, recover_import_runs::INTERRUPTED_SUMMARY};

struct TestServer {
    base_url: String,
    api: HttpImportApi,
    http: reqwest::Client,
    source: Arc<InMemoryRecordSource>,
    contacts: Arc<InMemoryInvestorContactRepository>,
}

async fn start_server() -> TestServer {
    let store = Arc::new(ImportJobStore::new(Arc::new(
        InMemoryImportRunRepository::new(),
    )));
    let source = Arc::new(InMemoryRecordSource::new());
    let contacts = Arc::new(InMemoryInvestorContactRepository::new());
    let writers = WriterRegistry::new().with(
        BulkOperation::Import,
        Arc::new(ContactImportWriter::new(contacts.clone())) as Arc<dyn RecordWriter>,
    );
    let metrics = Arc::new(ImportMetrics::new("folk-import-e2e").unwrap());
    let active = Arc::new(usecase::ActiveRuns::new());
    let record_source: Arc<dyn RecordSource> = source.clone();

    let runner = Arc::new(usecase::RunImportUseCase::new(
        store.clone(),
        record_source.clone(),
        writers.clone(),
        metrics.clone(),
    ));
    let state = AppState {
        start_import_uc: Arc::new(usecase::StartImportUseCase::new(
            store.clone(),
            runner,
            active.clone(),
            2,
        )),
        list_import_runs_uc: Arc::new(usecase::ListImportRunsUseCase::new(store.clone())),
        get_import_run_uc: Arc::new(usecase::GetImportRunUseCase::new(store.clone())),
        delete_import_run_uc: Arc::new(usecase::DeleteImportRunUseCase::new(store.clone())),
        get_failed_records_uc: Arc::new(usecase::GetFailedRecordsUseCase::new(store.clone())),
        retry_failed_records_uc: Arc::new(usecase::RetryFailedRecordsUseCase::new(
            store.clone(),
            record_source.clone(),
            writers,
            metrics.clone(),
        )),
        cancel_import_run_uc: Arc::new(usecase::CancelImportRunUseCase::new(
            store.clone(),
            active,
        )),
        get_import_status_uc: Arc::new(usecase::GetImportStatusUseCase::new(store.clone(), 50)),
        preview_records_uc: Arc::new(usecase::PreviewRecordsUseCase::new(record_source)),
        metrics,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, handler::router(state)).await.unwrap();
    });

    TestServer {
        api: HttpImportApi::new(&base_url, Duration::from_secs(5)).unwrap(),
        http: reqwest::Client::new(),
        base_url,
        source,
        contacts,
    }
}

fn person(folk_id: &str, payload: serde_json::Value) -> SourceRecord {
    SourceRecord::new(folk_id, SourceType::People, payload)
}

impl TestServer {
    async fn seed_group(&self) {
        self.source
            .insert(
                "grp_investors",
                person(
                    "per_1",
                    serde_json::json!({"id": "per_1", "fullName": "Alice Smith", "email": "alice@example.com"}),
                ),
            )
            .await;
        self.source
            .insert(
                "grp_investors",
                person("per_2", serde_json::json!({"id": "per_2", "email": "bob@example.com"})),
            )
            .await;
        self.source
            .insert(
                "grp_investors",
                person(
                    "per_3",
                    serde_json::json!({"id": "per_3", "firstName": "Carol", "lastName": "Jones"}),
                ),
            )
            .await;
    }

    async fn start_import(&self, body: serde_json::Value) -> ImportRunResponse {
        let response = self
            .http
            .post(format!("{}/api/admin/folk/bulk/import", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        response.json().await.unwrap()
    }

    async fn get_run(&self, run_id: &str) -> ImportRunResponse {
        self.http
            .get(format!("{}/api/admin/folk/import-runs/{}", self.base_url, run_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_terminal(&self, run_id: &str) -> ImportRunResponse {
        for _ in 0..200 {
            let run = self.get_run(run_id).await;
            if matches!(run.status, ImportRunStatus::Completed | ImportRunStatus::Failed) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("import run {run_id} did not finish");
    }
}

#[tokio::test]
async fn test_import_retry_and_reimport_flow() {
    let server = start_server().await;
    server.seed_group().await;

    // 3 件中 1 件が名前なしで失敗する
    let run = server
        .start_import(serde_json::json!({"groupId": "grp_investors", "initiatedBy": "ops@example.com"}))
        .await;
    assert_eq!(run.status, ImportRunStatus::Pending);

    let run = server.wait_terminal(&run.id).await;
    assert_eq!(run.status, ImportRunStatus::Completed);
    assert_eq!(run.total_records, 3);
    assert_eq!(run.processed_records, 3);
    assert_eq!(run.created_records, 2);
    assert_eq!(run.failed_records, 1);
    assert_eq!(run.progress_percent, Some(100));
    assert!(run.completed_at.is_some());
    assert_eq!(server.contacts.len().await, 2);

    let failed = server.api.failed_records(&run.id).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].folk_id, "per_2");
    assert_eq!(failed[0].error_code, "VALIDATION_ERROR");
    assert_eq!(failed[0].retry_count, 0);
    assert!(failed[0].resolved_at.is_none());

    // 存在しない folkId を含むリトライは 404 で、何も変わらない
    let err = server
        .api
        .retry(&run.id, Some(vec!["per_2".to_string(), "per_999".to_string()]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let unchanged = server.get_run(&run.id).await;
    assert_eq!(unchanged.failed_records, 1);
    assert_eq!(server.api.failed_records(&run.id).await.unwrap()[0].retry_count, 0);

    // ソース側で修正してから選択リトライ
    server
        .source
        .insert(
            "grp_investors",
            person(
                "per_2",
                serde_json::json!({"id": "per_2", "fullName": "Bob Brown", "email": "bob@example.com"}),
            ),
        )
        .await;
    let mut selection = FailedRecordSelection::new(&failed);
    assert!(selection.select("per_2"));
    let submitted = selection.selected_records(&failed);
    let accepted = selection.retry_selected(&server.api, &run.id).await.unwrap();
    assert_eq!(accepted.total_records, 1);
    assert!(selection.is_empty());

    let watch = selection
        .await_retry(
            &server.api,
            &run.id,
            &submitted,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(watch.pending.is_empty());
    let resolved = watch.records.iter().find(|r| r.folk_id == "per_2").unwrap();
    assert_eq!(resolved.retry_count, 1);
    assert!(resolved.resolved_at.is_some());
    assert!(!selection.select("per_2"));

    let run = server.get_run(&run.id).await;
    assert_eq!(run.created_records, 3);
    assert_eq!(run.failed_records, 0);
    assert_eq!(run.processed_records, 3);
    assert_eq!(server.contacts.len().await, 3);

    // 同じグループの再インポートは何も変更しない
    let second = server
        .start_import(serde_json::json!({"groupId": "grp_investors"}))
        .await;
    assert_eq!(second.initiated_by, "system");
    let second = server.wait_terminal(&second.id).await;
    assert_eq!(second.status, ImportRunStatus::Completed);
    assert_eq!(second.skipped_records, 3);
    assert_eq!(second.created_records, 0);
    assert_eq!(second.updated_records, 0);
    assert_eq!(server.contacts.len().await, 3);

    // 実行中の実行がなければポーリングは 1 回で止まる
    let poller = StatusPoller::new(Arc::new(
        HttpImportApi::new(&server.base_url, Duration::from_secs(5)).unwrap(),
    ))
    .with_interval(Duration::from_millis(10));
    let mut snapshots = Vec::new();
    let polls = poller
        .run(|s| snapshots.push(s.clone()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(polls, 1);
    assert!(!snapshots[0].should_poll);
    assert_eq!(snapshots[0].runs.len(), 2);
    assert_eq!(snapshots[0].totals.processed, 6);

    // 終端状態の実行はキャンセルできない
    let err = server.api.cancel(&second.id).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 409, .. }));
}

#[tokio::test]
async fn test_range_selection_and_preview() {
    let server = start_server().await;
    server.seed_group().await;

    let response = server
        .http
        .post(format!("{}/api/admin/folk/bulk/preview", server.base_url))
        .json(&serde_json::json!({"groupId": "grp_investors", "last": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let preview: serde_json::Value = response.json().await.unwrap();
    assert_eq!(preview["totalRecords"], 2);
    assert_eq!(preview["records"][0]["folkId"], "per_2");

    let run = server
        .start_import(serde_json::json!({"groupId": "grp_investors", "start": 3, "end": 10}))
        .await;
    assert_eq!(run.total_records, 8);
    let run = server.wait_terminal(&run.id).await;
    assert_eq!(run.total_records, 1);
    assert_eq!(run.created_records, 1);
    assert!(server.api.list_runs().await.unwrap().iter().any(|r| r.id == run.id));
}

#[tokio::test]
async fn test_recovery_marks_interrupted_runs_failed() {
    let store = Arc::new(ImportJobStore::new(Arc::new(
        InMemoryImportRunRepository::new(),
    )));
    let new_run = || NewImportRun {
        source_type: SourceType::People,
        operation: BulkOperation::Import,
        group_id: "grp_investors".to_string(),
        total_records: 0,
        parameters: serde_json::json!({}),
        initiated_by: "ops".to_string(),
    };
    let pending = store.create_run(new_run()).await.unwrap();
    let running = store.create_run(new_run()).await.unwrap();
    store
        .transition_run(running.id, ImportRunStatus::InProgress, RunUpdate::default())
        .await
        .unwrap();

    let recovered = usecase::RecoverImportRunsUseCase::new(store.clone())
        .execute()
        .await
        .unwrap();
    assert_eq!(recovered, 2);

    for id in [pending.id, running.id] {
        let run = store.get_run(id).await.unwrap();
        assert_eq!(run.status, ImportRunStatus::Failed);
        assert_eq!(run.error_summary.as_deref(), Some(INTERRUPTED_SUMMARY));
        assert!(run.completed_at.is_some());
    }
}
