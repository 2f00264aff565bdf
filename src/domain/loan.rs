use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{BookId, LoanId, MemberId, errors::CloseLoanError};

/// Loan集約 - 1冊の書籍の1回の貸出
///
/// ライフサイクル：Borrowコミットで作成され、Returnコミットで一度だけ
/// `return_date`が設定される。それ以外は不変で、コアが削除することはない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: LoanId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
}

impl Loan {
    /// 貸出中（返却日が未記録）か
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }
}

/// 採番前の貸出レコード
///
/// 貸出IDはストアがINSERT時に採番するため、作成コマンドはIDを持たない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLoan {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: NaiveDate,
}

/// 純粋関数：貸出レコードを起こす
pub fn open_loan(book_id: BookId, member_id: MemberId, borrow_date: NaiveDate) -> NewLoan {
    NewLoan {
        book_id,
        member_id,
        borrow_date,
    }
}

/// 純粋関数：貸出を閉じる（返却日を記録する）
///
/// ビジネスルール：returnDateは一度しか書かれない。再オープンは存在しない。
///
/// 副作用なし。新しいLoanを返す。
pub fn close_loan(loan: &Loan, returned_at: NaiveDate) -> Result<Loan, CloseLoanError> {
    if loan.return_date.is_some() {
        return Err(CloseLoanError::AlreadyReturned);
    }
    Ok(Loan {
        return_date: Some(returned_at),
        ..loan.clone()
    })
}

/// 純粋関数：返却期限
///
/// due date = borrow date + 猶予期間（既定14日）。保存されない導出値。
pub fn due_date(borrow_date: NaiveDate, grace_days: i64) -> NaiveDate {
    borrow_date + Duration::days(grace_days)
}

/// 純粋関数：延滞日数
///
/// overdue days = max(0, 評価日 - 返却期限)。
pub fn overdue_days(borrow_date: NaiveDate, today: NaiveDate, grace_days: i64) -> i64 {
    ((today - borrow_date).num_days() - grace_days).max(0)
}

/// 純粋関数：延滞判定（評価日時点）
pub fn is_overdue_as_of(borrow_date: NaiveDate, today: NaiveDate, grace_days: i64) -> bool {
    due_date(borrow_date, grace_days) < today
}

/// 純粋関数：延滞金
///
/// fine = 延滞日数 × 日額（既定 $1.00/日）。
pub fn fine_amount(overdue_days: i64, daily_rate: f64) -> f64 {
    overdue_days as f64 * daily_rate
}
