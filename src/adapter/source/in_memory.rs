use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::entity::{SourceRecord, SourceType};
use crate::domain::service::{RecordSource, SourceError};

/// InMemoryRecordSource は Folk を使わない dev モードとテスト用のレコードソース。
/// グループごとにレコードを登録順で保持する。
#[derive(Default)]
pub struct InMemoryRecordSource {
    groups: RwLock<HashMap<(String, SourceType), Vec<SourceRecord>>>,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, group_id: &str, record: SourceRecord) {
        let mut groups = self.groups.write().await;
        let records = groups
            .entry((group_id.to_string(), record.record_type))
            .or_default();
        match records.iter_mut().find(|r| r.folk_id == record.folk_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub async fn remove(&self, source_type: SourceType, folk_id: &str) {
        let mut groups = self.groups.write().await;
        for ((_, record_type), records) in groups.iter_mut() {
            if *record_type == source_type {
                records.retain(|r| r.folk_id != folk_id);
            }
        }
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn list_group_records(
        &self,
        group_id: &str,
        source_type: SourceType,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(&(group_id.to_string(), source_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_record(
        &self,
        source_type: SourceType,
        folk_id: &str,
    ) -> Result<Option<SourceRecord>, SourceError> {
        let groups = self.groups.read().await;
        Ok(groups
            .iter()
            .filter(|((_, record_type), _)| *record_type == source_type)
            .flat_map(|(_, records)| records.iter())
            .find(|r| r.folk_id == folk_id)
            .cloned())
    }
}
