use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entity::{
    BulkOperation, FailedImportRecord, ImportOutcome, ImportRun, ImportRunStatus, SourceType,
    WriteOutcome,
};

/// ImportRunListParams はインポート実行一覧取得のパラメータ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRunListParams {
    pub status: Option<ImportRunStatus>,
    pub source_type: Option<SourceType>,
    pub operation: Option<BulkOperation>,
    pub limit: i64,
}

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 500;

impl Default for ImportRunListParams {
    fn default() -> Self {
        Self {
            status: None,
            source_type: None,
            operation: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// OutcomeRecord は 1 レコード分の処理結果の書き込み内容。
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub run_id: Uuid,
    pub folk_id: String,
    pub record_type: SourceType,
    pub outcome: ImportOutcome,
    pub payload: serde_json::Value,
}

/// ImportRunRepository はインポート実行と失敗レコードの永続化トレイト。
/// 条件付き更新はすべて単一のトランザクション（またはロック）内で判定と書き込みを行う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImportRunRepository: Send + Sync {
    /// 新しい実行を作成する。
    async fn create(&self, run: &ImportRun) -> anyhow::Result<()>;

    /// ID で実行を検索する。
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ImportRun>>;

    /// 実行一覧を新しい順に取得する。
    async fn list(&self, params: &ImportRunListParams) -> anyhow::Result<Vec<ImportRun>>;

    /// pending / in_progress のまま残っている実行を取得する（起動時リカバリ用）。
    async fn find_unfinished(&self) -> anyhow::Result<Vec<ImportRun>>;

    /// ステータス・ステージ・総件数・タイムスタンプを書き込む。カウンタは書き換えない。
    /// 現在のステータスが expected と異なる場合、新しい総件数が processed_records を
    /// 下回る場合、completed なのに processed_records が総件数と一致しない場合は
    /// 何もせず false を返す。
    async fn update_lifecycle(
        &self,
        run: &ImportRun,
        expected: ImportRunStatus,
    ) -> anyhow::Result<bool>;

    /// カウンタを原子的に加算し、failed の場合は未解決の失敗レコードを upsert する。
    /// 実行が in_progress でない、または processed_records が総件数に達している場合は None。
    async fn record_outcome(&self, record: &OutcomeRecord) -> anyhow::Result<Option<ImportRun>>;

    /// 実行に属する失敗レコードを作成順に取得する。
    async fn find_failed_records(&self, run_id: Uuid) -> anyhow::Result<Vec<FailedImportRecord>>;

    /// ID で失敗レコードを検索する。
    async fn find_failed_record(&self, id: Uuid) -> anyhow::Result<Option<FailedImportRecord>>;

    /// 未解決の失敗レコードを解決済みにし、実行の failed_records を resolved_as のカウンタへ移す。
    /// 既に解決済みなら false。
    async fn resolve_failed_record(
        &self,
        id: Uuid,
        resolved_as: WriteOutcome,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// 未解決の失敗レコードの retry_count を進めエラー内容を更新する。解決済みなら None。
    async fn record_retry_failure(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> anyhow::Result<Option<FailedImportRecord>>;

    /// 終端状態の実行を失敗レコードごと削除する。終端でない場合は false。
    async fn delete_terminal(&self, id: Uuid) -> anyhow::Result<bool>;
}
