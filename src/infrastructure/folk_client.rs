use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::config::FolkConfig;
use crate::domain::entity::{SourceRecord, SourceType};
use crate::domain::service::{RecordSource, SourceError};

/// Folk CRM HTTP API client.
pub struct FolkClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    page_size: u32,
}

impl FolkClient {
    pub fn new(config: &FolkConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            page_size: config.page_size.max(1),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>, SourceError> {
        let mut request = self.client.get(url).query(query);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized(
                format!("folk returned {}", response.status()),
            )),
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(SourceError::Unavailable(format!(
                "folk returned {status} for {url}"
            ))),
            _ => response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| SourceError::Unavailable(format!("invalid folk response: {e}"))),
        }
    }
}

fn to_record(item: Value, source_type: SourceType) -> Option<SourceRecord> {
    let folk_id = item.get("id").and_then(Value::as_str)?.to_string();
    Some(SourceRecord::new(folk_id, source_type, item))
}

#[async_trait]
impl RecordSource for FolkClient {
    /// Walks `/v2/groups/{groupId}/{people|companies}` following `pagination.nextCursor`.
    async fn list_group_records(
        &self,
        group_id: &str,
        source_type: SourceType,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let url = format!(
            "{}/v2/groups/{}/{}",
            self.base_url,
            group_id,
            source_type.as_str()
        );
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }

            let body = self
                .get_json(&url, &query)
                .await?
                .ok_or_else(|| SourceError::Unavailable(format!("folk group not found: {group_id}")))?;
            let data = body.get("data").cloned().unwrap_or(Value::Null);

            let items = data
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in items {
                match to_record(item, source_type) {
                    Some(record) => records.push(record),
                    None => tracing::warn!(group_id = %group_id, "skipping folk item without id"),
                }
            }

            cursor = data
                .get("pagination")
                .and_then(|p| p.get("nextCursor"))
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(ToString::to_string);
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(group_id = %group_id, count = records.len(), "folk group records fetched");
        Ok(records)
    }

    async fn fetch_record(
        &self,
        source_type: SourceType,
        folk_id: &str,
    ) -> Result<Option<SourceRecord>, SourceError> {
        let url = format!("{}/v2/{}/{}", self.base_url, source_type.as_str(), folk_id);
        let Some(body) = self.get_json(&url, &[]).await? else {
            return Ok(None);
        };
        let item = body.get("data").cloned().unwrap_or(body);
        Ok(to_record(item, source_type))
    }
}
