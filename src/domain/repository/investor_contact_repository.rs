use async_trait::async_trait;

use crate::domain::entity::InvestorContact;

/// UpsertResult は folk_id をキーにした upsert の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertResult {
    Created,
    Updated,
    Unchanged,
    /// メールアドレスが別の folk_id の連絡先で使われている。
    EmailConflict { owner_folk_id: String },
}

/// InvestorContactRepository は取り込み先の連絡先テーブル。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvestorContactRepository: Send + Sync {
    /// folk_id をキーに作成または更新する。内容が同一なら書き込まない。
    async fn upsert_by_folk_id(&self, contact: &InvestorContact) -> anyhow::Result<UpsertResult>;

    /// folk_id で連絡先を検索する。
    async fn find_by_folk_id(&self, folk_id: &str) -> anyhow::Result<Option<InvestorContact>>;
}
