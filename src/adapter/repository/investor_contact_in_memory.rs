use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::entity::InvestorContact;
use crate::domain::repository::{InvestorContactRepository, UpsertResult};

/// InMemoryInvestorContactRepository は dev モードとテスト用のインメモリ連絡先テーブル。
#[derive(Default)]
pub struct InMemoryInvestorContactRepository {
    contacts: RwLock<HashMap<String, InvestorContact>>,
}

impl InMemoryInvestorContactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contacts.read().await.is_empty()
    }
}

#[async_trait]
impl InvestorContactRepository for InMemoryInvestorContactRepository {
    async fn upsert_by_folk_id(&self, contact: &InvestorContact) -> anyhow::Result<UpsertResult> {
        let mut contacts = self.contacts.write().await;

        if let Some(email) = contact.email.as_deref() {
            if let Some(owner) = contacts
                .values()
                .find(|c| c.folk_id != contact.folk_id && c.email.as_deref() == Some(email))
            {
                return Ok(UpsertResult::EmailConflict {
                    owner_folk_id: owner.folk_id.clone(),
                });
            }
        }

        match contacts.get_mut(&contact.folk_id) {
            Some(existing) if existing.same_content(contact) => Ok(UpsertResult::Unchanged),
            Some(existing) => {
                let id = existing.id;
                let created_at = existing.created_at;
                *existing = InvestorContact {
                    id,
                    created_at,
                    updated_at: Utc::now(),
                    ..contact.clone()
                };
                Ok(UpsertResult::Updated)
            }
            None => {
                contacts.insert(contact.folk_id.clone(), contact.clone());
                Ok(UpsertResult::Created)
            }
        }
    }

    async fn find_by_folk_id(&self, folk_id: &str) -> anyhow::Result<Option<InvestorContact>> {
        Ok(self.contacts.read().await.get(folk_id).cloned())
    }
}
