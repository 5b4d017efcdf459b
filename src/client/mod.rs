//! 管理画面・CLI 向けのインポート状況クライアント。
//!
//! REST API のレスポンス型はサーバー側のハンドラー DTO をそのまま使う。

pub mod api;
pub mod poller;
pub mod render;
pub mod selection;

pub use crate::adapter::handler::import_handler::{
    FailedImportRecordResponse, ImportRunResponse, ImportStatusResponse, RetryResponse,
    StatusTotalsResponse,
};
pub use api::{ClientError, HttpImportApi, ImportApi};
pub use poller::{StatusPoller, DEFAULT_POLL_INTERVAL};
pub use selection::{FailedRecordSelection, RetryWatch};
