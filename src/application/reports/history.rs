use crate::application::ServiceDependencies;
use crate::application::tasks::{BoxError, TaskContext};
use crate::ports::{LoanSnapshot, ScanFilter};

use super::collect_snapshots;

/// 貸出履歴の全件をスキャン順で読み込む
///
/// テキストではなく構造化された結果を返すジョブ。キャンセル時は空列。
pub async fn load_history(
    deps: &ServiceDependencies,
    ctx: &TaskContext,
) -> Result<Vec<LoanSnapshot>, BoxError> {
    ctx.report(0, 0, "Loading history...");

    let Some(rows) = collect_snapshots(deps, ctx, ScanFilter::default()).await? else {
        return Ok(Vec::new());
    };

    let n = rows.len() as u64;
    ctx.report(n, n.max(1), format!("Loaded {n} records."));
    Ok(rows)
}
