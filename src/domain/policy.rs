use serde::{Deserialize, Serialize};

/// 会員1人あたりの最大貸出冊数
pub const MAX_ACTIVE_LOANS: u32 = 5;

/// 貸出の猶予期間（日数）。これを過ぎると延滞。
pub const LOAN_GRACE_DAYS: i64 = 14;

/// 延滞金の日額
pub const DAILY_FINE: f64 = 1.0;

/// 貸出ポリシー設定
///
/// 既定値は運用中の図書館ルール（5冊・14日・$1/日）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LendingPolicy {
    pub max_active_loans: u32,
    pub grace_days: i64,
    pub daily_fine: f64,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            max_active_loans: MAX_ACTIVE_LOANS,
            grace_days: LOAN_GRACE_DAYS,
            daily_fine: DAILY_FINE,
        }
    }
}

/// ポリシー判定の却下理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDenial {
    /// 貸出上限超過
    LimitExceeded { active: u32, limit: u32 },
    /// 延滞中の貸出を抱えている
    MemberBlocked,
}

/// 純粋関数：貸出可否の判定
///
/// ルールは順に評価され、最初に失敗したルールが勝つ：
/// 1. 貸出中の冊数が上限以上 → LimitExceeded
/// 2. 延滞中の貸出がある → MemberBlocked
/// 3. それ以外 → 許可
///
/// 両カウンタはBorrowが可用性チェックに使ったのと同じトランザクション
/// スナップショットから計算されていること（競合回避のための前提）。
pub fn evaluate_borrow(
    policy: &LendingPolicy,
    active_loan_count: u32,
    has_overdue_loan: bool,
) -> Result<(), PolicyDenial> {
    if active_loan_count >= policy.max_active_loans {
        return Err(PolicyDenial::LimitExceeded {
            active: active_loan_count,
            limit: policy.max_active_loans,
        });
    }
    if has_overdue_loan {
        return Err(PolicyDenial::MemberBlocked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // TDD: evaluate_borrow() のテスト
    #[test]
    fn test_allows_member_under_cap_without_overdue() {
        let policy = LendingPolicy::default();
        assert_eq!(evaluate_borrow(&policy, 0, false), Ok(()));
        assert_eq!(evaluate_borrow(&policy, 4, false), Ok(()));
    }

    #[test]
    fn test_denies_at_cap() {
        let policy = LendingPolicy::default();
        assert_eq!(
            evaluate_borrow(&policy, 5, false),
            Err(PolicyDenial::LimitExceeded { active: 5, limit: 5 })
        );
    }

    #[test]
    fn test_denies_overdue_holder() {
        let policy = LendingPolicy::default();
        assert_eq!(
            evaluate_borrow(&policy, 1, true),
            Err(PolicyDenial::MemberBlocked)
        );
    }

    #[test]
    fn test_cap_rule_wins_over_overdue_rule() {
        // 両方に違反している場合、先に評価される上限超過が理由になる
        let policy = LendingPolicy::default();
        assert_eq!(
            evaluate_borrow(&policy, 7, true),
            Err(PolicyDenial::LimitExceeded { active: 7, limit: 5 })
        );
    }

    #[test]
    fn test_custom_cap() {
        let policy = LendingPolicy {
            max_active_loans: 2,
            ..LendingPolicy::default()
        };
        assert_eq!(evaluate_borrow(&policy, 1, false), Ok(()));
        assert!(evaluate_borrow(&policy, 2, false).is_err());
    }
}
