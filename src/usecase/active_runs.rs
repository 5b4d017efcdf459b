use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// ActiveRuns は実行中（または実行待ち）のインポートのキャンセル用トークンを保持する。
#[derive(Default)]
pub struct ActiveRuns {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// 実行用のトークンを登録して返す。
    pub fn register(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, token.clone());
        token
    }

    /// 実行をキャンセルする。登録されていなければ false。
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, run_id: Uuid) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
    }

    pub fn contains(&self, run_id: Uuid) -> bool {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&run_id)
    }

    /// サーバー停止時にすべての実行をキャンセルする。
    pub fn cancel_all(&self) {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_cancel_remove() {
        let active = ActiveRuns::new();
        let run_id = Uuid::new_v4();
        let token = active.register(run_id);
        assert!(active.contains(run_id));
        assert!(!token.is_cancelled());

        assert!(active.cancel(run_id));
        assert!(token.is_cancelled());

        active.remove(run_id);
        assert!(!active.contains(run_id));
        assert!(!active.cancel(run_id));
    }
}
