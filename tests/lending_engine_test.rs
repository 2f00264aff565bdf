use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use futures::StreamExt;
use rusty_library_lending::adapters::memory::MemoryLedgerStore;
use rusty_library_lending::application::ServiceDependencies;
use rusty_library_lending::application::lending::{LendingError, borrow_book, return_book};
use rusty_library_lending::domain::commands::{BorrowBook, ReturnBook};
use rusty_library_lending::domain::{
    Book, BookId, BookStatus, LendingPolicy, Loan, LoanId, Member, MemberId, NewLoan,
};
use rusty_library_lending::ports::{
    LedgerStore, LedgerTx, LoanSnapshot, Result as StoreResult, ScanFilter, StoreError,
};

// ============================================================================
// テスト用のセットアップ
// ============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn today() -> NaiveDate {
    date(2024, 6, 15)
}

fn book(id: i32, title: &str, author: &str) -> Book {
    Book {
        book_id: BookId::new(id),
        title: title.to_string(),
        author: author.to_string(),
        status: BookStatus::Available,
    }
}

fn member(id: i32, name: &str) -> Member {
    Member {
        member_id: MemberId::new(id),
        name: name.to_string(),
        contact: format!("{name}@example.com"),
    }
}

fn loan(id: i32, book_id: i32, member_id: i32, borrowed: NaiveDate) -> Loan {
    Loan {
        loan_id: LoanId::new(id),
        book_id: BookId::new(book_id),
        member_id: MemberId::new(member_id),
        borrow_date: borrowed,
        return_date: None,
    }
}

/// 書籍2冊・会員2名を登録した台帳を用意する
fn setup() -> (Arc<MemoryLedgerStore>, ServiceDependencies) {
    let store = Arc::new(MemoryLedgerStore::new());
    store.add_book(book(1, "Dune", "Frank Herbert"));
    store.add_book(book(2, "Emma", "Jane Austen"));
    store.add_member(member(1, "Alice"));
    store.add_member(member(2, "Bob"));
    let deps = ServiceDependencies {
        store: store.clone(),
        policy: LendingPolicy::default(),
    };
    (store, deps)
}

fn borrow_cmd(book_id: i32, member_id: i32, borrowed: NaiveDate) -> BorrowBook {
    BorrowBook {
        book_id: BookId::new(book_id),
        member_id: MemberId::new(member_id),
        borrow_date: borrowed,
    }
}

// ============================================================================
// Borrow / Return の基本サイクル
// ============================================================================

#[tokio::test]
async fn test_borrow_then_return_keeps_book_invariant() {
    let (store, deps) = setup();

    let loan = borrow_book(&deps, borrow_cmd(1, 1, today()), today())
        .await
        .unwrap();
    assert!(loan.is_active());
    assert_eq!(store.book(BookId::new(1)).unwrap().status, BookStatus::Borrowed);

    let returned = return_book(
        &deps,
        ReturnBook {
            loan_id: loan.loan_id,
            return_date: today(),
        },
    )
    .await
    .unwrap();
    assert_eq!(returned.return_date, Some(today()));
    assert_eq!(store.book(BookId::new(1)).unwrap().status, BookStatus::Available);

    // 台帳にはちょうど1件、閉じた貸出が残る
    let rows: Vec<_> = store.scan_loans(ScanFilter::default()).collect().await;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].as_ref().unwrap().is_active());
}

#[tokio::test]
async fn test_borrow_of_borrowed_book_is_rejected_not_queued() {
    let (_store, deps) = setup();

    borrow_book(&deps, borrow_cmd(1, 1, today()), today())
        .await
        .unwrap();
    let second = borrow_book(&deps, borrow_cmd(1, 2, today()), today()).await;
    assert!(matches!(second, Err(LendingError::Unavailable)));
}

#[tokio::test]
async fn test_concurrent_borrows_have_exactly_one_winner() {
    let (store, deps) = setup();

    let mut handles = Vec::new();
    for i in 0..8 {
        let deps = deps.clone();
        let member_id = 1 + (i % 2);
        handles.push(tokio::spawn(async move {
            borrow_book(&deps, borrow_cmd(1, member_id, today()), today()).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(LendingError::Unavailable) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);

    // 貸出行もちょうど1件
    let rows: Vec<_> = store.scan_loans(ScanFilter::default()).collect().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(store.book(BookId::new(1)).unwrap().status, BookStatus::Borrowed);
}

#[tokio::test]
async fn test_double_return_second_caller_sees_already_returned() {
    let (_store, deps) = setup();

    let loan = borrow_book(&deps, borrow_cmd(1, 1, today()), today())
        .await
        .unwrap();
    let cmd = ReturnBook {
        loan_id: loan.loan_id,
        return_date: today(),
    };

    return_book(&deps, cmd.clone()).await.unwrap();
    let second = return_book(&deps, cmd).await;
    assert!(matches!(second, Err(LendingError::AlreadyReturned)));
}

#[tokio::test]
async fn test_return_date_is_never_overwritten() {
    let (store, deps) = setup();

    let loan = borrow_book(&deps, borrow_cmd(1, 1, today()), today())
        .await
        .unwrap();
    return_book(
        &deps,
        ReturnBook {
            loan_id: loan.loan_id,
            return_date: date(2024, 6, 16),
        },
    )
    .await
    .unwrap();
    let _ = return_book(
        &deps,
        ReturnBook {
            loan_id: loan.loan_id,
            return_date: date(2024, 6, 20),
        },
    )
    .await;

    assert_eq!(
        store.loan(loan.loan_id).unwrap().return_date,
        Some(date(2024, 6, 16))
    );
}

// ============================================================================
// ポリシー判定
// ============================================================================

#[tokio::test]
async fn test_borrow_denied_at_loan_cap() {
    let (store, deps) = setup();
    for i in 0..5 {
        store.add_loan(loan(100 + i, 50 + i, 1, today()));
    }

    let result = borrow_book(&deps, borrow_cmd(1, 1, today()), today()).await;
    assert!(matches!(
        result,
        Err(LendingError::PolicyViolation { active: 5, limit: 5 })
    ));
    // 却下された貸出は台帳に現れない
    assert_eq!(store.book(BookId::new(1)).unwrap().status, BookStatus::Available);
}

#[tokio::test]
async fn test_borrow_denied_for_member_with_overdue_loan() {
    let (store, deps) = setup();
    // 20日前に借りたまま → 猶予14日を超過
    store.add_loan(loan(100, 50, 1, today() - Duration::days(20)));

    let result = borrow_book(&deps, borrow_cmd(1, 1, today()), today()).await;
    assert!(matches!(result, Err(LendingError::MemberBlocked)));
}

#[tokio::test]
async fn test_loan_cap_is_checked_before_overdue_block() {
    let (store, deps) = setup();
    store.add_loan(loan(100, 50, 1, today() - Duration::days(20)));
    for i in 1..5 {
        store.add_loan(loan(100 + i, 50 + i, 1, today()));
    }

    // 両方に違反している場合、先に評価される上限の方が報告される
    let result = borrow_book(&deps, borrow_cmd(1, 1, today()), today()).await;
    assert!(matches!(
        result,
        Err(LendingError::PolicyViolation { active: 5, limit: 5 })
    ));
}

#[tokio::test]
async fn test_returned_loans_do_not_count_toward_cap() {
    let (store, deps) = setup();
    for i in 0..5 {
        let mut l = loan(100 + i, 50 + i, 1, today() - Duration::days(3));
        l.return_date = Some(today() - Duration::days(1));
        store.add_loan(l);
    }

    assert!(borrow_book(&deps, borrow_cmd(1, 1, today()), today()).await.is_ok());
}

// ============================================================================
// 失敗分岐
// ============================================================================

#[tokio::test]
async fn test_borrow_unknown_book() {
    let (_store, deps) = setup();
    let result = borrow_book(&deps, borrow_cmd(99, 1, today()), today()).await;
    assert!(matches!(result, Err(LendingError::BookNotFound)));
}

#[tokio::test]
async fn test_borrow_unknown_member_leaves_ledger_unchanged() {
    let (store, deps) = setup();
    let result = borrow_book(&deps, borrow_cmd(1, 99, today()), today()).await;
    assert!(matches!(result, Err(LendingError::MemberNotFound)));

    assert_eq!(store.book(BookId::new(1)).unwrap().status, BookStatus::Available);
    let rows: Vec<_> = store.scan_loans(ScanFilter::default()).collect().await;
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_borrow_with_future_date_is_rejected() {
    let (_store, deps) = setup();
    let tomorrow = today() + Duration::days(1);
    let result = borrow_book(&deps, borrow_cmd(1, 1, tomorrow), today()).await;
    assert!(matches!(result, Err(LendingError::InvalidBorrowDate(d)) if d == tomorrow));
}

#[tokio::test]
async fn test_return_unknown_loan() {
    let (_store, deps) = setup();
    let result = return_book(
        &deps,
        ReturnBook {
            loan_id: LoanId::new(99),
            return_date: today(),
        },
    )
    .await;
    assert!(matches!(result, Err(LendingError::LoanNotFound)));
}

#[tokio::test]
async fn test_return_closes_loan_even_when_book_row_is_gone() {
    let (store, deps) = setup();
    // 書籍99は台帳に存在しない
    store.add_loan(loan(7, 99, 1, today() - Duration::days(2)));

    let returned = return_book(
        &deps,
        ReturnBook {
            loan_id: LoanId::new(7),
            return_date: today(),
        },
    )
    .await
    .unwrap();
    assert_eq!(returned.return_date, Some(today()));
    assert!(!store.loan(LoanId::new(7)).unwrap().is_active());
}

// ============================================================================
// 書き込み競合の再試行枯渇
// ============================================================================

/// コミットが常に競合するストア（返却の再試行枯渇を再現するテスト用）
struct AlwaysConflictingStore {
    inner: Arc<MemoryLedgerStore>,
}

#[async_trait::async_trait]
impl LedgerStore for AlwaysConflictingStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        Ok(Box::new(AlwaysConflictingTx {
            inner: self.inner.begin().await?,
        }))
    }

    fn scan_loans(
        &self,
        filter: ScanFilter,
    ) -> futures::stream::BoxStream<'_, StoreResult<LoanSnapshot>> {
        self.inner.scan_loans(filter)
    }
}

struct AlwaysConflictingTx {
    inner: Box<dyn LedgerTx>,
}

#[async_trait::async_trait]
impl LedgerTx for AlwaysConflictingTx {
    async fn get_book(&mut self, id: BookId) -> StoreResult<Option<Book>> {
        self.inner.get_book(id).await
    }

    async fn lock_book_exclusive(&mut self, id: BookId) -> StoreResult<Option<Book>> {
        self.inner.lock_book_exclusive(id).await
    }

    async fn save_book(&mut self, book: &Book) -> StoreResult<()> {
        self.inner.save_book(book).await
    }

    async fn get_member(&mut self, id: MemberId) -> StoreResult<Option<Member>> {
        self.inner.get_member(id).await
    }

    async fn count_active_loans(&mut self, member_id: MemberId) -> StoreResult<u32> {
        self.inner.count_active_loans(member_id).await
    }

    async fn has_overdue_loan(
        &mut self,
        member_id: MemberId,
        cutoff: NaiveDate,
    ) -> StoreResult<bool> {
        self.inner.has_overdue_loan(member_id, cutoff).await
    }

    async fn create_loan(&mut self, loan: NewLoan) -> StoreResult<LoanId> {
        self.inner.create_loan(loan).await
    }

    async fn get_loan(&mut self, id: LoanId) -> StoreResult<Option<Loan>> {
        self.inner.get_loan(id).await
    }

    async fn save_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        self.inner.save_loan(loan).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await?;
        Err(StoreError::Conflict)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_return_gives_up_after_repeated_conflicts() {
    let (store, _deps) = setup();
    store.add_loan(loan(1, 1, 1, today() - Duration::days(2)));

    let deps = ServiceDependencies {
        store: Arc::new(AlwaysConflictingStore {
            inner: store.clone(),
        }),
        policy: LendingPolicy::default(),
    };
    let result = return_book(
        &deps,
        ReturnBook {
            loan_id: LoanId::new(1),
            return_date: today(),
        },
    )
    .await;

    // 有限回で諦め、競合エラーとして打ち切られる
    assert!(matches!(
        result,
        Err(LendingError::Store(StoreError::Conflict))
    ));
    // 台帳は未変更のまま
    assert!(store.loan(LoanId::new(1)).unwrap().is_active());
}
