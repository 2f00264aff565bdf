use chrono::NaiveDate;
use thiserror::Error;

use crate::ports::StoreError;

/// 貸出エンジンのエラー
///
/// 利用者に見えるすべての失敗はこのいずれか1つに帰着する。
/// どの失敗分岐でもトランザクションは中断され、Book/Member/Loanは
/// 変更されない。`Store`のうち一時的なもの以外は自動リトライ禁止。
#[derive(Debug, Error)]
pub enum LendingError {
    /// 書籍が存在しない
    #[error("Book not found")]
    BookNotFound,

    /// 会員が存在しない
    #[error("Member not found")]
    MemberNotFound,

    /// 貸出レコードが存在しない
    #[error("Loan not found")]
    LoanNotFound,

    /// 書籍が既に貸出中
    #[error("Book is already borrowed")]
    Unavailable,

    /// 既に返却済み
    #[error("Loan is already returned")]
    AlreadyReturned,

    /// 貸出上限超過
    #[error("Member already has {active} active loans (limit {limit})")]
    PolicyViolation { active: u32, limit: u32 },

    /// 延滞中の貸出を抱えている会員
    #[error("Member has overdue items")]
    MemberBlocked,

    /// 未来日の貸出日（貸出日は当日以前であること）
    #[error("Borrow date {0} is in the future")]
    InvalidBorrowDate(NaiveDate),

    /// 永続化層のエラー（トランザクションはロールバック済み）
    #[error("Ledger store error")]
    Store(#[from] StoreError),
}

/// 貸出エンジンの Result型
pub type Result<T> = std::result::Result<T, LendingError>;
