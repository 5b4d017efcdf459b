use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use super::api::{ClientError, ImportApi};
use super::{FailedImportRecordResponse, RetryResponse};

/// FailedRecordSelection はリトライ対象として選択された folkId の集合。
/// クライアント内だけで保持し、永続化しない。選択できるのは未解決のレコードだけ。
#[derive(Debug, Default)]
pub struct FailedRecordSelection {
    selected: BTreeSet<String>,
    unresolved: HashSet<String>,
}

impl FailedRecordSelection {
    pub fn new(records: &[FailedImportRecordResponse]) -> Self {
        let mut selection = Self::default();
        selection.refresh(records);
        selection
    }

    /// 最新の失敗レコード一覧を反映する。解決済みになったレコードは選択から外れる。
    pub fn refresh(&mut self, records: &[FailedImportRecordResponse]) {
        self.unresolved = records
            .iter()
            .filter(|r| r.resolved_at.is_none())
            .map(|r| r.folk_id.clone())
            .collect();
        let unresolved = &self.unresolved;
        self.selected.retain(|id| unresolved.contains(id));
    }

    /// 選択する。未解決のレコードでなければ false。
    pub fn select(&mut self, folk_id: &str) -> bool {
        if !self.unresolved.contains(folk_id) {
            return false;
        }
        self.selected.insert(folk_id.to_string());
        true
    }

    pub fn select_all(&mut self) {
        self.selected.extend(self.unresolved.iter().cloned());
    }

    pub fn is_selected(&self, folk_id: &str) -> bool {
        self.selected.contains(folk_id)
    }

    /// 一覧のうち選択中のレコード。リトライ送信前の状態を控えておくのに使う。
    pub fn selected_records(
        &self,
        records: &[FailedImportRecordResponse],
    ) -> Vec<FailedImportRecordResponse> {
        records
            .iter()
            .filter(|r| self.is_selected(&r.folk_id))
            .cloned()
            .collect()
    }

    pub fn selected(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// 選択中のレコードをリトライし、受け付けられたら選択を解除する。
    pub async fn retry_selected(
        &mut self,
        api: &dyn ImportApi,
        run_id: &str,
    ) -> Result<RetryResponse, ClientError> {
        if self.selected.is_empty() {
            return Err(ClientError::EmptySelection);
        }
        let response = api.retry(run_id, Some(self.selected())).await?;
        self.selected.clear();
        Ok(response)
    }

    /// 未解決の失敗レコードをすべてリトライする。
    pub async fn retry_all(
        &mut self,
        api: &dyn ImportApi,
        run_id: &str,
    ) -> Result<RetryResponse, ClientError> {
        let response = api.retry(run_id, None).await?;
        self.selected.clear();
        Ok(response)
    }

    /// リトライ受付後、送信したレコードの結果が出るまで失敗レコード一覧を取り直す。
    /// 解決済みになったか retryCount が進んだレコードを結果が出たものとみなし、
    /// timeout を過ぎたらその時点の一覧を返す。
    pub async fn await_retry(
        &mut self,
        api: &dyn ImportApi,
        run_id: &str,
        submitted: &[FailedImportRecordResponse],
        interval: Duration,
        timeout: Duration,
    ) -> Result<RetryWatch, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = api.failed_records(run_id).await?;
            self.refresh(&records);

            let pending: Vec<String> = submitted
                .iter()
                .filter(|before| !is_settled(before, &records))
                .map(|before| before.folk_id.clone())
                .collect();
            if pending.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(RetryWatch { records, pending });
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// RetryWatch はリトライ後に取り直した失敗レコードと、結果がまだ出ていない folkId。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryWatch {
    pub records: Vec<FailedImportRecordResponse>,
    pub pending: Vec<String>,
}

fn is_settled(before: &FailedImportRecordResponse, records: &[FailedImportRecordResponse]) -> bool {
    records
        .iter()
        .find(|r| r.id == before.id)
        .map_or(true, |now| {
            now.resolved_at.is_some() || now.retry_count > before.retry_count
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::MockImportApi;
    use crate::domain::entity::SourceType;

    fn record(folk_id: &str, resolved: bool) -> FailedImportRecordResponse {
        FailedImportRecordResponse {
            id: format!("id-{folk_id}"),
            run_id: "run-1".to_string(),
            record_type: SourceType::People,
            folk_id: folk_id.to_string(),
            payload: serde_json::json!({}),
            error_code: "VALIDATION_ERROR".to_string(),
            error_message: "name is required".to_string(),
            retry_count: 0,
            resolved_at: resolved.then(|| "2026-01-01T00:00:00+00:00".to_string()),
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn accepted(total: usize) -> RetryResponse {
        RetryResponse {
            message: format!("retrying {total} failed records"),
            total_records: total,
        }
    }

    #[test]
    fn test_only_unresolved_records_can_be_selected() {
        let mut selection =
            FailedRecordSelection::new(&[record("per_1", false), record("per_2", true)]);
        assert!(selection.select("per_1"));
        assert!(!selection.select("per_2"));
        assert!(!selection.select("per_404"));
        assert_eq!(selection.selected(), vec!["per_1".to_string()]);
        assert!(selection.is_selected("per_1"));
        assert!(!selection.is_selected("per_2"));
    }

    #[test]
    fn test_refresh_drops_resolved_selection() {
        let mut selection =
            FailedRecordSelection::new(&[record("per_1", false), record("per_2", false)]);
        selection.select_all();
        assert_eq!(selection.len(), 2);

        selection.refresh(&[record("per_1", true), record("per_2", false)]);
        assert_eq!(selection.selected(), vec!["per_2".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_selected_sends_and_clears() {
        let mut api = MockImportApi::new();
        api.expect_retry()
            .withf(|run_id, folk_ids| {
                run_id == "run-1" && folk_ids.as_deref() == Some(&["per_1".to_string()][..])
            })
            .times(1)
            .returning(|_, _| Ok(accepted(1)));

        let mut selection = FailedRecordSelection::new(&[record("per_1", false)]);
        selection.select("per_1");
        let response = selection.retry_selected(&api, "run-1").await.unwrap();
        assert_eq!(response.total_records, 1);
        assert!(selection.is_empty());
    }

    #[tokio::test]
    async fn test_retry_selected_requires_selection() {
        let mut api = MockImportApi::new();
        api.expect_retry().never();

        let mut selection = FailedRecordSelection::new(&[record("per_1", false)]);
        let result = selection.retry_selected(&api, "run-1").await;
        assert!(matches!(result, Err(ClientError::EmptySelection)));
    }

    #[tokio::test]
    async fn test_retry_all_sends_no_folk_ids() {
        let mut api = MockImportApi::new();
        api.expect_retry()
            .withf(|_, folk_ids| folk_ids.is_none())
            .times(1)
            .returning(|_, _| Ok(accepted(2)));

        let mut selection =
            FailedRecordSelection::new(&[record("per_1", false), record("per_2", false)]);
        selection.select("per_2");
        selection.retry_all(&api, "run-1").await.unwrap();
        assert!(selection.is_empty());
    }

    fn retried(folk_id: &str, retry_count: i32, resolved: bool) -> FailedImportRecordResponse {
        FailedImportRecordResponse {
            retry_count,
            ..record(folk_id, resolved)
        }
    }

    #[tokio::test]
    async fn test_await_retry_polls_until_submitted_records_settle() {
        let mut api = MockImportApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_failed_records()
            .withf(|run_id| run_id == "run-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![record("per_1", false), record("per_2", false)]));
        api.expect_failed_records()
            .withf(|run_id| run_id == "run-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![retried("per_1", 1, false), retried("per_2", 1, true)]));

        let before = vec![record("per_1", false), record("per_2", false)];
        let mut selection = FailedRecordSelection::new(&before);
        selection.select_all();
        let submitted = selection.selected_records(&before);
        assert_eq!(submitted.len(), 2);

        let watch = selection
            .await_retry(
                &api,
                "run-1",
                &submitted,
                Duration::from_millis(1),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(watch.pending.is_empty());
        assert_eq!(watch.records[0].retry_count, 1);
        assert!(watch.records[1].resolved_at.is_some());

        // 解決済みになった per_2 は選択できない
        assert!(selection.select("per_1"));
        assert!(!selection.select("per_2"));
    }

    #[tokio::test]
    async fn test_await_retry_gives_up_after_timeout() {
        let mut api = MockImportApi::new();
        api.expect_failed_records()
            .returning(|_| Ok(vec![record("per_1", false)]));

        let before = vec![record("per_1", false)];
        let mut selection = FailedRecordSelection::new(&before);
        selection.select("per_1");
        let submitted = selection.selected_records(&before);

        let watch = selection
            .await_retry(
                &api,
                "run-1",
                &submitted,
                Duration::from_millis(1),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        assert_eq!(watch.pending, vec!["per_1".to_string()]);
        assert_eq!(watch.records.len(), 1);
    }

    #[tokio::test]
    async fn test_await_retry_propagates_api_error() {
        let mut api = MockImportApi::new();
        api.expect_failed_records().returning(|_| {
            Err(ClientError::Api {
                status: 404,
                code: "FOLK_IMPORT_NOT_FOUND".to_string(),
                message: "import run not found".to_string(),
            })
        });

        let mut selection = FailedRecordSelection::default();
        let result = selection
            .await_retry(
                &api,
                "run-1",
                &[record("per_1", false)],
                Duration::from_millis(1),
                Duration::from_secs(1),
            )
            .await;
        assert!(result.unwrap_err().is_not_found());
    }
}
