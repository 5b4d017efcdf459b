use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{FailedImportRecordResponse, ImportRunResponse, ImportStatusResponse, RetryResponse};

/// ClientError はインポート管理 API 呼び出しのエラー。
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// サーバーがエラーレスポンスを返した。
    #[error("{status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("no failed records selected")]
    EmptySelection,
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

/// ImportApi はインポート管理 API のクライアント側の窓口。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImportApi: Send + Sync {
    async fn list_runs(&self) -> Result<Vec<ImportRunResponse>, ClientError>;

    async fn failed_records(
        &self,
        run_id: &str,
    ) -> Result<Vec<FailedImportRecordResponse>, ClientError>;

    /// `folk_ids` が None なら未解決の失敗レコードをすべてリトライする。
    async fn retry(
        &self,
        run_id: &str,
        folk_ids: Option<Vec<String>>,
    ) -> Result<RetryResponse, ClientError>;

    async fn cancel(&self, run_id: &str) -> Result<ImportRunResponse, ClientError>;

    async fn status(&self) -> Result<ImportStatusResponse, ClientError>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// HttpImportApi は reqwest による ImportApi の実装。
pub struct HttpImportApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImportApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/admin/folk{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (String::new(), text),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ImportApi for HttpImportApi {
    async fn list_runs(&self) -> Result<Vec<ImportRunResponse>, ClientError> {
        self.get("/import-runs").await
    }

    async fn failed_records(
        &self,
        run_id: &str,
    ) -> Result<Vec<FailedImportRecordResponse>, ClientError> {
        self.get(&format!("/import-runs/{run_id}/failed")).await
    }

    async fn retry(
        &self,
        run_id: &str,
        folk_ids: Option<Vec<String>>,
    ) -> Result<RetryResponse, ClientError> {
        let body = match folk_ids {
            Some(ids) => serde_json::json!({ "folkIds": ids }),
            None => serde_json::json!({}),
        };
        self.post(&format!("/import-runs/{run_id}/retry"), body).await
    }

    async fn cancel(&self, run_id: &str) -> Result<ImportRunResponse, ClientError> {
        self.post(&format!("/import-runs/{run_id}/cancel"), serde_json::json!({}))
            .await
    }

    async fn status(&self) -> Result<ImportStatusResponse, ClientError> {
        self.get("/import-status").await
    }
}
