use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::import_run::SourceType;

/// FailedImportRecord はインポート実行中に書き込みに失敗した 1 レコードの記録。
/// folk_id ごとに未解決の行は高々 1 件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImportRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub record_type: SourceType,
    pub folk_id: String,
    pub payload: serde_json::Value,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: i32,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedImportRecord {
    pub fn new(
        run_id: Uuid,
        record_type: SourceType,
        folk_id: String,
        payload: serde_json::Value,
        error_code: String,
        error_message: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            record_type,
            folk_id,
            payload,
            error_code,
            error_message,
            retry_count: 0,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// 同じレコードが再度失敗した。エラー内容を更新し retry_count を進める。
    /// 解決済みのレコードは変更しない。
    pub fn record_failure(
        &mut self,
        error_code: &str,
        error_message: &str,
        payload: Option<serde_json::Value>,
    ) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.retry_count += 1;
        self.error_code = error_code.to_string();
        self.error_message = error_message.to_string();
        if let Some(payload) = payload {
            self.payload = payload;
        }
        self.updated_at = Utc::now();
        true
    }

    /// リトライ成功として解決する。既に解決済みなら何もせず false を返す。
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.retry_count += 1;
        self.resolved_at = Some(at);
        self.updated_at = at;
        true
    }
}
