use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::config::OperationEndpointConfig;
use crate::domain::entity::{BulkOperation, SourceRecord, WriteOutcome};
use crate::domain::service::{RecordWriter, WriteError};

/// OperationEndpointWriter は enrich / email などの一括操作を外部エンドポイントへ 1 レコードずつ送る。
///
/// ステータスコードの対応:
/// - 201 → created
/// - 200 → updated
/// - 204 / 208 → skipped
/// - それ以外 → そのレコードだけの失敗（`HTTP_<status>`）
///
/// 接続エラーとタイムアウトは致命的エラーとして実行を中断させる。
pub struct OperationEndpointWriter {
    client: reqwest::Client,
    operation: BulkOperation,
    url: String,
}

impl OperationEndpointWriter {
    pub fn new(operation: BulkOperation, config: &OperationEndpointConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            operation,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RecordWriter for OperationEndpointWriter {
    async fn write(
        &self,
        record: &SourceRecord,
        options: &serde_json::Value,
    ) -> Result<WriteOutcome, WriteError> {
        let body = serde_json::json!({
            "operation": self.operation.as_str(),
            "folkId": record.folk_id,
            "recordType": record.record_type.as_str(),
            "record": record.payload,
            "options": options,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                WriteError::Fatal(format!("{} endpoint unreachable: {}", self.operation, e))
            })?;

        let status = response.status();
        match status {
            StatusCode::CREATED => Ok(WriteOutcome::Created),
            StatusCode::OK => Ok(WriteOutcome::Updated),
            StatusCode::NO_CONTENT | StatusCode::ALREADY_REPORTED => Ok(WriteOutcome::Skipped),
            _ => {
                let text = response.text().await.unwrap_or_default();
                let message = if text.is_empty() {
                    format!("{} endpoint returned {}", self.operation, status)
                } else {
                    text.chars().take(500).collect()
                };
                Err(WriteError::Record {
                    code: format!("HTTP_{}", status.as_u16()),
                    message,
                })
            }
        }
    }
}
