use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entity::{BulkOperation, SourceRecord, WriteOutcome};

/// WriteError は 1 レコードの書き込み失敗。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// このレコードだけの失敗。失敗レコードとして記録し、実行は続行する。
    #[error("{code}: {message}")]
    Record { code: String, message: String },

    /// 書き込み先そのものが使えない。実行を中断する。
    #[error("fatal: {0}")]
    Fatal(String),
}

impl WriteError {
    pub fn record(code: &str, message: impl Into<String>) -> Self {
        Self::Record {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// RecordWriter は一括操作ごとの書き込み先。同じ folk_id の再書き込みは冪等でなければならない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(
        &self,
        record: &SourceRecord,
        options: &serde_json::Value,
    ) -> Result<WriteOutcome, WriteError>;
}

/// WriterRegistry は一括操作と書き込み先の対応表。
#[derive(Clone, Default)]
pub struct WriterRegistry {
    writers: HashMap<BulkOperation, Arc<dyn RecordWriter>>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, operation: BulkOperation, writer: Arc<dyn RecordWriter>) -> Self {
        self.writers.insert(operation, writer);
        self
    }

    pub fn get(&self, operation: BulkOperation) -> Option<Arc<dyn RecordWriter>> {
        self.writers.get(&operation).cloned()
    }

    pub fn supports(&self, operation: BulkOperation) -> bool {
        self.writers.contains_key(&operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = WriterRegistry::new().with(
            BulkOperation::Import,
            Arc::new(MockRecordWriter::new()) as Arc<dyn RecordWriter>,
        );
        assert!(registry.supports(BulkOperation::Import));
        assert!(registry.get(BulkOperation::Import).is_some());
        assert!(!registry.supports(BulkOperation::Email));
        assert!(registry.get(BulkOperation::Email).is_none());
    }

    #[test]
    fn test_write_error_display() {
        let err = WriteError::record("VALIDATION_ERROR", "name is required");
        assert_eq!(err.to_string(), "VALIDATION_ERROR: name is required");
        assert_eq!(
            WriteError::Fatal("connection refused".to_string()).to_string(),
            "fatal: connection refused"
        );
    }
}
