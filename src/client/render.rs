use std::fmt::Write;

use super::{FailedImportRecordResponse, ImportRunResponse, ImportStatusResponse};
use crate::domain::entity::ImportRunStatus;

const BAR_WIDTH: usize = 20;

pub fn status_badge(status: ImportRunStatus) -> &'static str {
    match status {
        ImportRunStatus::Pending => "[PENDING]",
        ImportRunStatus::InProgress => "[RUNNING]",
        ImportRunStatus::Completed => "[DONE]",
        ImportRunStatus::Failed => "[FAILED]",
    }
}

/// 進捗バー。総件数が未確定（None）の場合は不定表示になる。
pub fn progress_bar(percent: Option<u8>) -> String {
    match percent {
        Some(p) => {
            let p = usize::from(p.min(100));
            let filled = p * BAR_WIDTH / 100;
            format!(
                "[{}{}] {:>3}%",
                "#".repeat(filled),
                "-".repeat(BAR_WIDTH - filled),
                p
            )
        }
        None => format!("[{}]   ?%", "?".repeat(BAR_WIDTH)),
    }
}

/// 実行 1 件を 1 行で描画する。進捗バーは in_progress の間だけ表示する。
pub fn render_run(run: &ImportRunResponse) -> String {
    let mut line = format!(
        "{:<9} {} {} {} group={}",
        status_badge(run.status),
        run.id,
        run.operation.as_str(),
        run.source_type.as_str(),
        run.group_id
    );
    if run.status == ImportRunStatus::InProgress {
        let _ = write!(line, " {}", progress_bar(run.progress_percent));
    }
    let _ = write!(
        line,
        " {}/{} (created {}, updated {}, skipped {}, failed {})",
        run.processed_records,
        run.total_records,
        run.created_records,
        run.updated_records,
        run.skipped_records,
        run.failed_records
    );
    if let Some(ref stage) = run.import_stage {
        let _ = write!(line, " stage={stage}");
    }
    if let Some(ref summary) = run.error_summary {
        let _ = write!(line, " error={summary}");
    }
    line
}

pub fn render_status(snapshot: &ImportStatusResponse) -> String {
    let mut out = String::new();
    for run in &snapshot.runs {
        out.push_str(&render_run(run));
        out.push('\n');
    }
    let t = snapshot.totals;
    let _ = writeln!(
        out,
        "active {} | processed {} (created {}, updated {}, skipped {}, failed {})",
        snapshot.active_runs, t.processed, t.created, t.updated, t.skipped, t.failed
    );
    out
}

/// 失敗レコードをエラーメッセージ付きで描画する。
pub fn render_failed_record(record: &FailedImportRecordResponse) -> String {
    let mut line = format!(
        "{} [{}] {} (retries {})",
        record.folk_id, record.error_code, record.error_message, record.retry_count
    );
    if let Some(ref at) = record.resolved_at {
        let _ = write!(line, " resolved at {at}");
    }
    line
}
