use std::sync::Arc;

use crate::domain::entity::{RecordRange, SourceRecord, SourceType};
use crate::domain::service::{RecordSource, SourceError};

/// RecordPreview は実行を作らずに取得した対象レコード。
#[derive(Debug, Clone)]
pub struct RecordPreview {
    pub records: Vec<SourceRecord>,
    pub total_records: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// PreviewRecordsUseCase はグループから範囲指定でレコードを取得して返す。状態は変更しない。
pub struct PreviewRecordsUseCase {
    source: Arc<dyn RecordSource>,
}

impl PreviewRecordsUseCase {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    pub async fn execute(
        &self,
        group_id: &str,
        source_type: SourceType,
        range: RecordRange,
    ) -> Result<RecordPreview, PreviewError> {
        if group_id.trim().is_empty() {
            return Err(PreviewError::Validation("groupId is required".to_string()));
        }
        range
            .validate()
            .map_err(|e| PreviewError::Validation(e.to_string()))?;

        let records = range.apply(self.source.list_group_records(group_id, source_type).await?);
        Ok(RecordPreview {
            total_records: records.len(),
            records,
        })
    }
}
