mod fines;
mod history;
mod reminders;
mod report;

pub use fines::calculate_fines;
pub use history::load_history;
pub use reminders::generate_reminders;
pub use report::{ReportKind, generate_report};

use chrono::NaiveDate;
use futures::StreamExt;

use crate::application::ServiceDependencies;
use crate::application::tasks::{self, BoxError, TaskContext, TaskHandle};
use crate::ports::{LoanSnapshot, ScanFilter};

// ============================================================
// ジョブ投入のエントリポイント
// ============================================================

/// 罰金計算ジョブを投入する
pub fn submit_fines_job(
    deps: ServiceDependencies,
    filter: ScanFilter,
    today: NaiveDate,
) -> TaskHandle<String> {
    tasks::submit(move |ctx| async move { calculate_fines(&deps, &ctx, filter, today).await })
}

/// 督促状生成ジョブを投入する
pub fn submit_reminders_job(
    deps: ServiceDependencies,
    filter: ScanFilter,
    today: NaiveDate,
) -> TaskHandle<String> {
    tasks::submit(move |ctx| async move { generate_reminders(&deps, &ctx, filter, today).await })
}

/// レポート生成ジョブを投入する
pub fn submit_report_job(
    deps: ServiceDependencies,
    kind: ReportKind,
    filter: ScanFilter,
    today: NaiveDate,
) -> TaskHandle<String> {
    tasks::submit(move |ctx| async move { generate_report(&deps, &ctx, kind, filter, today).await })
}

/// 貸出履歴の読み込みジョブを投入する（構造化された結果を返すジョブの例）
pub fn submit_history_job(deps: ServiceDependencies) -> TaskHandle<Vec<LoanSnapshot>> {
    tasks::submit(move |ctx| async move { load_history(&deps, &ctx).await })
}

// ============================================================
// ジョブ共通のヘルパー
// ============================================================

/// スキャンを吸い上げてスナップショットの列にする
///
/// 行ごとにキャンセルを確認し、観測したら`None`を返す（部分結果は
/// 呼び出し側のジョブが決める）。
async fn collect_snapshots(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
) -> Result<Option<Vec<LoanSnapshot>>, BoxError> {
    let mut stream = deps.store.scan_loans(filter);
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        rows.push(row?);
    }
    Ok(Some(rows))
}

/// 会員の表示名。名前が空欄または会員行が消えていれば "Member #<id>"
fn member_label(row: &LoanSnapshot) -> String {
    match &row.member_name {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => format!("Member #{}", row.member_id),
    }
}

/// 書籍タイトルの表示名。欠損は "<unknown>"
fn book_title(row: &LoanSnapshot) -> String {
    match &row.book_title {
        Some(title) if !title.trim().is_empty() => title.clone(),
        _ => "<unknown>".to_string(),
    }
}

/// 著者の表示名。欠損は "<unknown>"
fn book_author(row: &LoanSnapshot) -> String {
    match &row.book_author {
        Some(author) if !author.trim().is_empty() => author.clone(),
        _ => "<unknown>".to_string(),
    }
}
