use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::api::{ClientError, ImportApi};
use super::ImportStatusResponse;
use crate::domain::entity::ImportRunStatus;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// StatusPoller は in_progress の実行がある間だけ進捗をポーリングする。
///
/// 1 回の取得が終わってから次の待機に入るため、ポーリングが重なることはない。
/// キャンセルトークン（画面のアンマウント）で即座に止まる。
pub struct StatusPoller {
    api: Arc<dyn ImportApi>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn ImportApi>) -> Self {
        Self {
            api,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 停止するまでポーリングし、取得した回数を返す。
    pub async fn run<F>(&self, mut observer: F, cancel: CancellationToken) -> Result<usize, ClientError>
    where
        F: FnMut(&ImportStatusResponse) + Send,
    {
        let mut polls = 0;
        loop {
            let snapshot = tokio::select! {
                () = cancel.cancelled() => return Ok(polls),
                snapshot = self.api.status() => snapshot?,
            };
            polls += 1;
            observer(&snapshot);

            if is_idle(&snapshot) {
                debug!(polls = polls, "no import run in progress, polling stopped");
                return Ok(polls);
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(polls),
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

fn is_idle(snapshot: &ImportStatusResponse) -> bool {
    snapshot.active_runs == 0
        && snapshot
            .runs
            .iter()
            .all(|run| run.status != ImportRunStatus::InProgress)
}
