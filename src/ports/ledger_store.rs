use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    Book, Loan, Member, NewLoan,
    value_objects::{BookId, LoanId, MemberId},
};

/// Errors surfaced by the Ledger Store.
///
/// `Conflict` means a committed row changed under an open transaction
/// (or a guarded write found its precondition gone). It is transient:
/// the caller may re-run the transaction and observe the new state.
/// Everything else is an opaque backend failure and always implies the
/// transaction rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict, transaction must be retried")]
    Conflict,

    #[error("ledger store backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Filter record for ledger scans.
///
/// All fields are optional and combine with AND:
/// - `from`/`to`: inclusive range on the borrow date,
/// - `text`: case-insensitive substring match on book title or author,
/// - `member_id`: exact member match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub text: Option<String>,
    pub member_id: Option<MemberId>,
}

impl ScanFilter {
    /// Whether a snapshot row passes this filter.
    ///
    /// A blank `text` filter matches everything; rows with no title and
    /// no author never match a non-blank one.
    pub fn matches(&self, row: &LoanSnapshot) -> bool {
        if let Some(from) = self.from {
            if row.borrow_date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if row.borrow_date > to {
                return false;
            }
        }
        if let Some(member_id) = self.member_id {
            if row.member_id != member_id {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.trim().to_lowercase();
            if !needle.is_empty() {
                let title = row.book_title.as_deref().unwrap_or("").to_lowercase();
                let author = row.book_author.as_deref().unwrap_or("").to_lowercase();
                if !title.contains(&needle) && !author.contains(&needle) {
                    return false;
                }
            }
        }
        true
    }
}

/// Read-side view of a loan joined with its book and member.
///
/// `book_title`/`book_author`/`member_name` are `None` when the
/// referenced row is missing or the field is blank; display fallbacks
/// are the consumer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSnapshot {
    pub loan_id: LoanId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub book_title: Option<String>,
    pub book_author: Option<String>,
    pub member_name: Option<String>,
}

impl LoanSnapshot {
    /// A loan is active while no return date is recorded.
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }
}

/// Ledger Store port: durable storage for Book, Member and Loan rows.
///
/// The store is an external collaborator; the core only relies on this
/// contract. Mutations go through a [`LedgerTx`] atomicity boundary;
/// analytics read committed snapshots through [`LedgerStore::scan_loans`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. Writes are only visible after `commit`;
    /// dropping the transaction without committing rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Stream committed loans joined with book/member data, oldest row id
    /// first. The stream is lazy so a scan job can stop early on
    /// cancellation. Read-committed: a mutation committing mid-scan may
    /// or may not be observed.
    fn scan_loans(&self, filter: ScanFilter) -> BoxStream<'_, Result<LoanSnapshot>>;
}

/// One atomic read-modify-write unit against the ledger.
///
/// Reads observe committed state as of the call. `commit` applies all
/// staged writes atomically or fails with `Conflict` when a row read in
/// this transaction changed underneath it.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read a book row without locking it.
    async fn get_book(&mut self, id: BookId) -> Result<Option<Book>>;

    /// Acquire the exclusive row lock for a book and read it. Blocks
    /// until the lock is obtained; the lock is held for the rest of the
    /// transaction. This is the serialization point for concurrent
    /// borrow attempts on the same book.
    async fn lock_book_exclusive(&mut self, id: BookId) -> Result<Option<Book>>;

    /// Stage a book update.
    async fn save_book(&mut self, book: &Book) -> Result<()>;

    /// Read a member row.
    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>>;

    /// Count the member's active loans in this transaction's snapshot.
    async fn count_active_loans(&mut self, member_id: MemberId) -> Result<u32>;

    /// Whether the member holds an active loan borrowed strictly before
    /// `cutoff` (cutoff = evaluation date minus the grace period).
    async fn has_overdue_loan(&mut self, member_id: MemberId, cutoff: NaiveDate) -> Result<bool>;

    /// Stage a loan insert; the returned id is assigned by the store.
    async fn create_loan(&mut self, loan: NewLoan) -> Result<LoanId>;

    /// Read a loan row.
    async fn get_loan(&mut self, id: LoanId) -> Result<Option<Loan>>;

    /// Stage a loan update. Closing a loan (setting `return_date`) is a
    /// guarded write: it fails the commit with `Conflict` if the row was
    /// closed concurrently.
    async fn save_loan(&mut self, loan: &Loan) -> Result<()>;

    /// Apply all staged writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all staged writes and release locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
