use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::application::ServiceDependencies;
use crate::application::tasks::{BoxError, TaskContext};
use crate::domain::loan;
use crate::ports::{LoanSnapshot, ScanFilter};

use super::{book_author, book_title, collect_snapshots, member_label};

/// レポートの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// 延滞中の貸出一覧（罰金つき）
    OverdueBooks,
    /// 書籍・著者・貸出日ごとの貸出件数
    BorrowingStats,
    /// 会員ごとの貸出中・返却済み件数
    MemberActivity,
}

/// フィルタ付きレポートをテキストで生成する
///
/// フィルタ（期間・テキスト・会員）の適用はストアのスキャンに任せる。
/// 出力が空のレポートは定型文に置き換える。
pub async fn generate_report(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    kind: ReportKind,
    filter: ScanFilter,
    today: NaiveDate,
) -> Result<String, BoxError> {
    let text = match kind {
        ReportKind::OverdueBooks => overdue_books(deps, ctx, filter, today).await?,
        ReportKind::BorrowingStats => borrowing_stats(deps, ctx, filter).await?,
        ReportKind::MemberActivity => member_activity(deps, ctx, filter).await?,
    };
    if text.trim().is_empty() {
        return Ok("No records found.".to_string());
    }
    Ok(text)
}

/// 延滞一覧：未返却かつ期限超過の貸出を、貸出日を先頭に1行ずつ
async fn overdue_books(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
    today: NaiveDate,
) -> Result<String, BoxError> {
    ctx.report(0, 0, "Loading overdue...");

    let Some(mut rows) = collect_snapshots(deps, ctx, filter).await? else {
        return Ok(String::new());
    };
    rows.retain(|row| {
        row.is_active() && loan::is_overdue_as_of(row.borrow_date, today, deps.policy.grace_days)
    });
    rows.sort_by_key(|row| (row.borrow_date, row.loan_id.value()));

    let n = rows.len() as u64;
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(out);
        }
        let overdue = loan::overdue_days(row.borrow_date, today, deps.policy.grace_days);
        let fine = loan::fine_amount(overdue, deps.policy.daily_fine);
        out.push_str(&format!(
            "{} – Member: {} – Book: {} – Days Overdue: {overdue} – Fine: ${fine:.2}\n",
            row.borrow_date,
            member_label(row),
            book_title(row),
        ));
        ctx.report(i as u64 + 1, n.max(1), format!("Scanning {}/{n}", i + 1));
    }
    Ok(out)
}

/// 統計：返却済みも含めた全貸出を、書籍・著者・貸出日で集計する
async fn borrowing_stats(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
) -> Result<String, BoxError> {
    ctx.report(0, 0, "Loading stats...");

    let Some(rows) = collect_snapshots(deps, ctx, filter).await? else {
        return Ok(String::new());
    };

    let total = rows.len() as u64;
    let mut by_book: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_author: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_date: BTreeMap<String, u64> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(String::new());
        }
        *by_book.entry(book_title(row)).or_insert(0) += 1;
        *by_author.entry(book_author(row)).or_insert(0) += 1;
        *by_date.entry(row.borrow_date.to_string()).or_insert(0) += 1;
        ctx.report(i as u64 + 1, total.max(1), format!("Scanning {}/{total}", i + 1));
    }

    let mut out = String::new();
    out.push_str("== Counts per Book ==\n");
    append_counts(&mut out, &by_book);
    out.push_str("\n== Counts per Author ==\n");
    append_counts(&mut out, &by_author);
    out.push_str("\n== Counts per Date ==\n");
    append_counts(&mut out, &by_date);
    Ok(out)
}

/// 会員アクティビティ：会員ID昇順に1行ずつ
async fn member_activity(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
) -> Result<String, BoxError> {
    ctx.report(0, 0, "Loading member activity...");

    let Some(rows) = collect_snapshots(deps, ctx, filter).await? else {
        return Ok(String::new());
    };

    let mut by_member: BTreeMap<i32, Vec<&LoanSnapshot>> = BTreeMap::new();
    for row in &rows {
        by_member.entry(row.member_id.value()).or_default().push(row);
    }

    let total = rows.len() as u64;
    let mut scanned = 0u64;
    let mut out = String::new();

    for loans in by_member.values() {
        if ctx.is_cancelled() {
            return Ok(out);
        }
        let active = loans.iter().filter(|row| row.is_active()).count();
        let returned = loans.len() - active;
        let label = member_label(loans[0]);
        out.push_str(&format!("{label} — Active: {active}, Returned: {returned}\n"));

        scanned += loans.len() as u64;
        ctx.report(scanned, total.max(1), format!("Scanning {scanned}/{}", total.max(1)));
    }
    Ok(out)
}

/// 件数の多い順に出力する。同数はキーの辞書順で安定させる。
fn append_counts(out: &mut String, counts: &BTreeMap<String, u64>) {
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (key, count) in entries {
        out.push_str(&format!("{key}: {count}\n"));
    }
}
