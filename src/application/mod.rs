pub mod lending;
pub mod reports;
pub mod tasks;

use std::sync::Arc;

use crate::domain::LendingPolicy;
use crate::ports::LedgerStore;

/// サービスの依存関係
///
/// 振る舞いは持たず、純粋な関数に依存関係を渡すためのデータ構造。
/// Lending Engineと各Analytics Jobが共有する。
#[derive(Clone)]
pub struct ServiceDependencies {
    pub store: Arc<dyn LedgerStore>,
    pub policy: LendingPolicy,
}
