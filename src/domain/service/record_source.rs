use async_trait::async_trait;

use crate::domain::entity::{SourceRecord, SourceType};

/// SourceError は取り込み元（Folk）からの取得失敗。いずれも実行にとっては致命的。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source rejected credentials: {0}")]
    Unauthorized(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// RecordSource はグループ単位のレコード一覧と、folk_id 単位の再取得を提供する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// グループに属するレコードをソース側の順序で全件取得する。
    async fn list_group_records(
        &self,
        group_id: &str,
        source_type: SourceType,
    ) -> Result<Vec<SourceRecord>, SourceError>;

    /// 1 レコードを取得する。存在しない場合は None。
    async fn fetch_record(
        &self,
        source_type: SourceType,
        folk_id: &str,
    ) -> Result<Option<SourceRecord>, SourceError>;
}
