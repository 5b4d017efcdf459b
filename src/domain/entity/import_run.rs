use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ImportRunStatus はインポート実行のステータス。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ImportRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl ImportRunStatus {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => anyhow::bail!("invalid import run status: {}", s),
        }
    }

    /// 終端状態かどうかを返す。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// from から to への遷移が許可されているかを返す。
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

/// BulkOperation は実行を生成する一括操作の種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BulkOperation {
    Import,
    Enrich,
    Email,
    SyncToFolk,
    TriggerEnrichment,
}

impl std::fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BulkOperation {
    pub const ALL: [BulkOperation; 5] = [
        Self::Import,
        Self::Enrich,
        Self::Email,
        Self::SyncToFolk,
        Self::TriggerEnrichment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Enrich => "enrich",
            Self::Email => "email",
            Self::SyncToFolk => "sync-to-folk",
            Self::TriggerEnrichment => "trigger-enrichment",
        }
    }

    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("invalid bulk operation: {}", s))
    }
}

/// SourceType は取り込み元レコードの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    People,
    Companies,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Companies => "companies",
        }
    }

    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "people" => Ok(Self::People),
            "companies" => Ok(Self::Companies),
            _ => anyhow::bail!("invalid source type: {}", s),
        }
    }
}

/// WriteOutcome は 1 レコードの書き込みに成功した場合の分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Updated,
    Skipped,
}

impl std::fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// ImportOutcome は recordOutcome に渡す 1 レコードの処理結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Written(WriteOutcome),
    Failed {
        error_code: String,
        error_message: String,
    },
}

impl ImportOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Written(WriteOutcome::Created) => "created",
            Self::Written(WriteOutcome::Updated) => "updated",
            Self::Written(WriteOutcome::Skipped) => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// ImportRunError はインポート実行の状態機械が拒否した操作を表す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportRunError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ImportRunStatus,
        to: ImportRunStatus,
    },

    #[error("import run is not in progress (status={0})")]
    NotInProgress(ImportRunStatus),

    #[error("processed records would exceed total records ({0})")]
    TotalExceeded(i64),

    #[error("import run cannot complete: {processed}/{total} records processed")]
    Unfinished { processed: i64, total: i64 },
}

/// RunUpdate は状態遷移やステージ更新で同時に書き換えるフィールド。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunUpdate {
    pub import_stage: Option<String>,
    pub error_summary: Option<String>,
    pub total_records: Option<i64>,
}

impl RunUpdate {
    pub fn stage(stage: &str) -> Self {
        Self {
            import_stage: Some(stage.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, error_summary: impl Into<String>) -> Self {
        self.error_summary = Some(error_summary.into());
        self
    }

    #[must_use]
    pub fn with_total(mut self, total_records: i64) -> Self {
        self.total_records = Some(total_records);
        self
    }
}

/// RunCounters は実行のレコードカウンタ。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub processed_records: i64,
    pub created_records: i64,
    pub updated_records: i64,
    pub skipped_records: i64,
    pub failed_records: i64,
}

impl RunCounters {
    /// processed = created + updated + skipped + failed が成り立つかを返す。
    pub fn is_balanced(&self) -> bool {
        self.processed_records
            == self.created_records
                + self.updated_records
                + self.skipped_records
                + self.failed_records
    }

    pub fn add(&mut self, other: &RunCounters) {
        self.processed_records += other.processed_records;
        self.created_records += other.created_records;
        self.updated_records += other.updated_records;
        self.skipped_records += other.skipped_records;
        self.failed_records += other.failed_records;
    }

    fn credit(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created_records += 1,
            WriteOutcome::Updated => self.updated_records += 1,
            WriteOutcome::Skipped => self.skipped_records += 1,
        }
    }
}

/// ImportRun は一括インポート（またはリトライ対象を含む一括操作）1 回分の実行記録。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub source_type: SourceType,
    pub operation: BulkOperation,
    pub group_id: String,
    pub status: ImportRunStatus,
    pub total_records: i64,
    pub counters: RunCounters,
    pub import_stage: Option<String>,
    pub error_summary: Option<String>,
    pub parameters: serde_json::Value,
    pub initiated_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// NewImportRun は createRun の入力。
#[derive(Debug, Clone)]
pub struct NewImportRun {
    pub source_type: SourceType,
    pub operation: BulkOperation,
    pub group_id: String,
    pub total_records: i64,
    pub parameters: serde_json::Value,
    pub initiated_by: String,
}

pub const STAGE_QUEUED: &str = "queued";
pub const STAGE_FETCHING: &str = "fetching";
pub const STAGE_PERSISTING: &str = "persisting";
pub const STAGE_COMPLETED: &str = "completed";
pub const STAGE_FAILED: &str = "failed";
pub const STAGE_CANCELLED: &str = "cancelled";

impl ImportRun {
    /// 新しい ImportRun を pending で作成する。カウンタはすべて 0。
    pub fn new(input: NewImportRun) -> Result<Self, ImportRunError> {
        if input.total_records < 0 {
            return Err(ImportRunError::InvalidInput(format!(
                "total_records must not be negative: {}",
                input.total_records
            )));
        }
        if input.initiated_by.trim().is_empty() {
            return Err(ImportRunError::InvalidInput(
                "initiated_by is required".to_string(),
            ));
        }
        if input.group_id.trim().is_empty() {
            return Err(ImportRunError::InvalidInput(
                "group_id is required".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            source_type: input.source_type,
            operation: input.operation,
            group_id: input.group_id,
            status: ImportRunStatus::Pending,
            total_records: input.total_records,
            counters: RunCounters::default(),
            import_stage: Some(STAGE_QUEUED.to_string()),
            error_summary: None,
            parameters: input.parameters,
            initiated_by: input.initiated_by,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status == ImportRunStatus::InProgress
    }

    /// 進捗率（0〜100）を返す。total_records が 0 の場合は不定として None。
    pub fn progress_percent(&self) -> Option<u8> {
        if self.total_records <= 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.counters.processed_records as f64 / self.total_records as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (ratio * 100.0).round().clamp(0.0, 100.0) as u8;
        Some(percent)
    }

    /// ステータスを遷移させる。遷移規則に反する場合はエラー。
    pub fn transition(
        &mut self,
        to: ImportRunStatus,
        update: RunUpdate,
    ) -> Result<(), ImportRunError> {
        if !self.status.can_transition_to(to) {
            return Err(ImportRunError::IllegalTransition {
                from: self.status,
                to,
            });
        }

        if let Some(total) = update.total_records {
            self.set_total(total)?;
        }

        if to == ImportRunStatus::Completed
            && self.counters.processed_records != self.total_records
        {
            return Err(ImportRunError::Unfinished {
                processed: self.counters.processed_records,
                total: self.total_records,
            });
        }

        let now = Utc::now();
        match to {
            ImportRunStatus::InProgress => self.started_at = Some(now),
            ImportRunStatus::Completed | ImportRunStatus::Failed => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
            }
            ImportRunStatus::Pending => {}
        }

        self.error_summary = if to == ImportRunStatus::Failed {
            update.error_summary
        } else {
            None
        };
        if let Some(stage) = update.import_stage {
            self.import_stage = Some(stage);
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// 非終端の実行のステージや総件数を更新する。
    pub fn apply_update(&mut self, update: RunUpdate) -> Result<(), ImportRunError> {
        if self.is_terminal() {
            return Err(ImportRunError::IllegalTransition {
                from: self.status,
                to: self.status,
            });
        }
        if let Some(total) = update.total_records {
            self.set_total(total)?;
        }
        if let Some(stage) = update.import_stage {
            self.import_stage = Some(stage);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn set_total(&mut self, total: i64) -> Result<(), ImportRunError> {
        if total < 0 {
            return Err(ImportRunError::InvalidInput(format!(
                "total_records must not be negative: {total}"
            )));
        }
        if total < self.counters.processed_records {
            return Err(ImportRunError::InvalidInput(format!(
                "total_records {} is below processed_records {}",
                total, self.counters.processed_records
            )));
        }
        self.total_records = total;
        Ok(())
    }

    /// 1 レコードの処理結果をカウンタへ反映する。
    pub fn apply_outcome(&mut self, outcome: &ImportOutcome) -> Result<(), ImportRunError> {
        if self.status != ImportRunStatus::InProgress {
            return Err(ImportRunError::NotInProgress(self.status));
        }
        if self.counters.processed_records >= self.total_records {
            return Err(ImportRunError::TotalExceeded(self.total_records));
        }

        self.counters.processed_records += 1;
        match outcome {
            ImportOutcome::Written(written) => self.counters.credit(*written),
            ImportOutcome::Failed { .. } => self.counters.failed_records += 1,
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// リトライで解決された失敗レコード 1 件分を failed から成功側のカウンタへ移す。
    /// processed_records は変わらない。
    pub fn apply_resolution(&mut self, resolved_as: WriteOutcome) {
        if self.counters.failed_records > 0 {
            self.counters.failed_records -= 1;
            self.counters.credit(resolved_as);
        }
        self.updated_at = Utc::now();
    }
}
