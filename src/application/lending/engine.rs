use chrono::{Duration, NaiveDate};

use crate::application::ServiceDependencies;
use crate::domain::{
    Loan, book,
    commands::{BorrowBook, ReturnBook},
    errors::CloseLoanError,
    loan, policy,
    policy::PolicyDenial,
};
use crate::ports::{LedgerTx, StoreError};

use super::errors::{LendingError, Result};

/// 返却コミットが書き込み競合で敗れたときの再試行回数上限
const MAX_CONFLICT_RETRIES: u32 = 3;

/// 失敗分岐の共通処理：ロールバックして業務エラーを返す
///
/// ロールバック自体の失敗は業務エラーを覆い隠さない（ログのみ）。
async fn abort<T>(tx: Box<dyn LedgerTx>, err: LendingError) -> Result<T> {
    if let Err(rollback_err) = tx.rollback().await {
        tracing::warn!(error = %rollback_err, "rollback failed after aborted transaction");
    }
    Err(err)
}

/// 書籍を借りる（Borrowトランザクション）
///
/// ビジネスルール：
/// - 貸出日は当日以前であること
/// - 書籍が存在し、Availableであること
/// - 会員が存在すること
/// - ポリシー（上限5冊・延滞者ブロック）を満たすこと
///
/// 同一書籍への同時Borrowは書籍行の排他ロックで直列化される。ロックは
/// トランザクション終了まで保持され、敗者はロック下の再読み込みで
/// `Unavailable`（または一貫したポリシー却下）を観測する。待ち行列はない。
/// どの失敗分岐でもトランザクションは中断され、台帳は変更されない。
#[tracing::instrument(skip(deps, cmd), fields(book_id = %cmd.book_id, member_id = %cmd.member_id))]
pub async fn borrow_book(
    deps: &ServiceDependencies,
    cmd: BorrowBook,
    today: NaiveDate,
) -> Result<Loan> {
    // 0. 事前条件：未来日の貸出は受け付けない
    if cmd.borrow_date > today {
        return Err(LendingError::InvalidBorrowDate(cmd.borrow_date));
    }

    let mut tx = deps.store.begin().await?;

    // 1. 書籍行を排他ロックして読み直す（直列化点）
    let Some(current) = tx.lock_book_exclusive(cmd.book_id).await? else {
        return abort(tx, LendingError::BookNotFound).await;
    };
    if !current.is_available() {
        return abort(tx, LendingError::Unavailable).await;
    }

    // 2. 会員の存在確認（ロック下で読む）
    if tx.get_member(cmd.member_id).await?.is_none() {
        return abort(tx, LendingError::MemberNotFound).await;
    }

    // 3. ポリシー判定。カウンタは可用性チェックと同じ
    //    トランザクションスナップショットから計算する
    let active_count = tx.count_active_loans(cmd.member_id).await?;
    let cutoff = today - Duration::days(deps.policy.grace_days);
    let has_overdue = tx.has_overdue_loan(cmd.member_id, cutoff).await?;

    if let Err(denial) = policy::evaluate_borrow(&deps.policy, active_count, has_overdue) {
        let err = match denial {
            PolicyDenial::LimitExceeded { active, limit } => {
                LendingError::PolicyViolation { active, limit }
            }
            PolicyDenial::MemberBlocked => LendingError::MemberBlocked,
        };
        tracing::info!(?denial, "borrow denied by policy");
        return abort(tx, err).await;
    }

    // 4. 貸出レコードを起こし、書籍をBorrowedへ
    let loan_id = tx
        .create_loan(loan::open_loan(cmd.book_id, cmd.member_id, cmd.borrow_date))
        .await?;
    // ロック下でAvailableを確認済みなので遷移は失敗しない
    let borrowed = book::check_out(&current).map_err(|_| LendingError::Unavailable)?;
    tx.save_book(&borrowed).await?;

    tx.commit().await?;

    tracing::info!(%loan_id, "borrow committed");
    Ok(Loan {
        loan_id,
        book_id: cmd.book_id,
        member_id: cmd.member_id,
        borrow_date: cmd.borrow_date,
        return_date: None,
    })
}

/// 書籍を返却する（Returnトランザクション）
///
/// ビジネスルール：
/// - 貸出が存在すること
/// - 返却日は一度しか書かれない（二重返却は`AlreadyReturned`）
/// - 書籍行が消えていても貸出自体は閉じる
///
/// 書籍ロックは取らない。読み・検査・書き込みを単一の原子単位で行い、
/// 同時二重返却の敗者はコミット時の書き込み競合で弾かれる。その場合は
/// 再試行し、再読み込みが`AlreadyReturned`を報告する。
#[tracing::instrument(skip(deps, cmd), fields(loan_id = %cmd.loan_id))]
pub async fn return_book(deps: &ServiceDependencies, cmd: ReturnBook) -> Result<Loan> {
    for attempt in 0..MAX_CONFLICT_RETRIES {
        let mut tx = deps.store.begin().await?;

        // 1. 貸出を読み、未返却であることを検査する
        let Some(current) = tx.get_loan(cmd.loan_id).await? else {
            return abort(tx, LendingError::LoanNotFound).await;
        };
        let closed = match loan::close_loan(&current, cmd.return_date) {
            Ok(closed) => closed,
            Err(CloseLoanError::AlreadyReturned) => {
                return abort(tx, LendingError::AlreadyReturned).await;
            }
        };

        // 2. 返却日を書き、書籍を棚に戻す
        tx.save_loan(&closed).await?;
        if let Some(current_book) = tx.get_book(closed.book_id).await? {
            tx.save_book(&book::put_back(&current_book)).await?;
        }

        // 3. コミット。競合（同時二重返却の敗北）は再試行する
        match tx.commit().await {
            Ok(()) => {
                tracing::info!("return committed");
                return Ok(closed);
            }
            Err(StoreError::Conflict) => {
                tracing::debug!(attempt, "return commit lost a write conflict, retrying");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    // 再試行を使い切った。呼び出し側の再実行に委ねる
    tracing::warn!(
        retries = MAX_CONFLICT_RETRIES,
        "return abandoned after repeated write conflicts"
    );
    Err(LendingError::Store(StoreError::Conflict))
}
