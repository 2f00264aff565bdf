use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::application::ServiceDependencies;
use crate::application::tasks::{BoxError, TaskContext};
use crate::domain::loan;
use crate::ports::{LoanSnapshot, ScanFilter};

use super::{book_title, collect_snapshots, member_label};

/// 返却期限が迫っている貸出の督促状テキストを生成する
///
/// due = borrow + 猶予日数なので、48時間以内に期限が来るのは
/// borrow_date ∈ [today-14, today-12]（両端を含む）。呼び出し側の
/// フィルタはこの窓と交差させて適用する。会員名の辞書順に束ね、
/// 会員内は貸出日の昇順で並べる。
pub async fn generate_reminders(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
    filter: ScanFilter,
    today: NaiveDate,
) -> Result<String, BoxError> {
    ctx.report(0, 0, "Generating reminders...");

    let window_from = today - Duration::days(deps.policy.grace_days);
    let window_to = today - Duration::days(deps.policy.grace_days - 2);
    let filter = ScanFilter {
        from: Some(filter.from.map_or(window_from, |from| from.max(window_from))),
        to: Some(filter.to.map_or(window_to, |to| to.min(window_to))),
        ..filter
    };
    let Some(mut rows) = collect_snapshots(deps, ctx, filter).await? else {
        return Ok(String::new());
    };
    rows.retain(|row| row.is_active());

    if rows.is_empty() {
        return Ok("No upcoming due items.\n".to_string());
    }

    let mut by_member: BTreeMap<String, Vec<&LoanSnapshot>> = BTreeMap::new();
    for row in &rows {
        by_member.entry(member_label(row)).or_default().push(row);
    }
    for loans in by_member.values_mut() {
        loans.sort_by_key(|row| row.borrow_date);
    }

    let total = rows.len() as u64;
    let mut scanned = 0u64;
    let mut out = String::new();

    for (name, loans) in &by_member {
        out.push_str(&format!("Member: {name}\n"));
        for row in loans {
            if ctx.is_cancelled() {
                return Ok(out);
            }
            scanned += 1;
            ctx.report(scanned, total, format!("Processing {scanned}/{total}"));

            let due = loan::due_date(row.borrow_date, deps.policy.grace_days);
            out.push_str(&format!("  • {} – Due: {due}\n", book_title(row)));
        }
        out.push('\n');
    }

    ctx.report(total, total, "Done.");
    Ok(out)
}
