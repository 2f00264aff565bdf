use chrono::NaiveDate;

use crate::application::ServiceDependencies;
use crate::application::tasks::{BoxError, TaskContext};
use crate::domain::loan;
use crate::ports::ScanFilter;

use super::{book_title, collect_snapshots, member_label};

/// 延滞罰金の一覧をテキストで計算する
///
/// 対象はフィルタ（期間・テキスト・会員）を通過した未返却の貸出すべて
/// （新しい貸出ID順）。猶予期間を超えた日数×日額が罰金になる。
/// 延滞が1件もなければ定型文を返す。キャンセルを観測したら
/// そこまでの部分結果を返す。
pub async fn calculate_fines(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
    today: NaiveDate,
) -> Result<String, BoxError> {
    ctx.report(0, 0, "Calculating fines...");

    let Some(mut rows) = collect_snapshots(deps, ctx, filter).await? else {
        return Ok(String::new());
    };
    rows.retain(|row| row.is_active());
    rows.sort_by(|a, b| b.loan_id.value().cmp(&a.loan_id.value()));

    if rows.is_empty() {
        return Ok("No fines due.\n".to_string());
    }

    let total = rows.len() as u64;
    let mut out = String::new();
    let mut overdue_count = 0u32;

    for (i, row) in rows.iter().enumerate() {
        if ctx.is_cancelled() {
            return Ok(out);
        }
        ctx.report(i as u64 + 1, total, format!("Processing {}/{total}", i + 1));

        let overdue = loan::overdue_days(row.borrow_date, today, deps.policy.grace_days);
        if overdue > 0 {
            overdue_count += 1;
            let fine = loan::fine_amount(overdue, deps.policy.daily_fine);
            out.push_str(&format!(
                "{today} – Member: {} – Book: {} – Days Overdue: {overdue} – Fine: ${fine:.2}\n",
                member_label(row),
                book_title(row),
            ));
        }
    }

    ctx.report(total, total, "Done.");
    if overdue_count == 0 {
        return Ok("No fines due.\n".to_string());
    }
    Ok(out)
}
