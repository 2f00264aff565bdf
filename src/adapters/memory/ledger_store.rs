use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{
    Book, Loan, Member, NewLoan,
    value_objects::{BookId, LoanId, MemberId},
};
use crate::ports::{LedgerStore, LedgerTx, LoanSnapshot, Result, ScanFilter, StoreError};

/// A committed row plus the counter bumped on every committed write.
#[derive(Debug, Clone)]
struct Versioned<T> {
    value: T,
    version: u64,
}

#[derive(Default)]
struct LedgerState {
    books: HashMap<BookId, Versioned<Book>>,
    members: HashMap<MemberId, Member>,
    loans: BTreeMap<LoanId, Versioned<Loan>>,
    next_loan_id: i32,
}

struct Inner {
    state: Mutex<LedgerState>,
    row_locks: Mutex<HashMap<BookId, Arc<RowLock<()>>>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    /// Lazily created per-book lock. The same Arc is handed to every
    /// transaction asking for the same book, so locking it serializes them.
    fn row_lock(&self, id: BookId) -> Arc<RowLock<()>> {
        self.row_locks.lock().unwrap().entry(id).or_default().clone()
    }
}

/// In-memory Ledger Store.
///
/// Committed state lives under one mutex; transactions stage their writes
/// and apply them atomically at commit. Every committed row carries a
/// version counter, and a commit fails with `Conflict` when a row read by
/// the transaction was overwritten in the meantime. `lock_book_exclusive`
/// holds a per-book async mutex for the rest of the transaction, which is
/// what serializes concurrent borrows of the same book.
///
/// Also carries the seeding surface the lending core does not own:
/// catalog and member registration are external concerns, so tests and
/// the demo wire rows in through `add_book` / `add_member` / `add_loan`.
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedgerState {
                    next_loan_id: 1,
                    ..LedgerState::default()
                }),
                row_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a book row.
    pub fn add_book(&self, book: Book) {
        self.inner
            .state()
            .books
            .insert(book.book_id, Versioned { value: book, version: 0 });
    }

    /// Register a member row.
    pub fn add_member(&self, member: Member) {
        self.inner.state().members.insert(member.member_id, member);
    }

    /// Insert a loan row with an explicit id, keeping the id sequence ahead.
    pub fn add_loan(&self, loan: Loan) {
        let mut state = self.inner.state();
        state.next_loan_id = state.next_loan_id.max(loan.loan_id.value() + 1);
        state
            .loans
            .insert(loan.loan_id, Versioned { value: loan, version: 0 });
    }

    /// Committed book row, for assertions.
    pub fn book(&self, id: BookId) -> Option<Book> {
        self.inner.state().books.get(&id).map(|row| row.value.clone())
    }

    /// Committed loan row, for assertions.
    pub fn loan(&self, id: LoanId) -> Option<Loan> {
        self.inner.state().loans.get(&id).map(|row| row.value.clone())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryLedgerTx {
            inner: self.inner.clone(),
            locks: Vec::new(),
            read_books: HashMap::new(),
            read_loans: HashMap::new(),
            staged_books: HashMap::new(),
            staged_loans: HashMap::new(),
            staged_new_loans: Vec::new(),
        }))
    }

    fn scan_loans(&self, filter: ScanFilter) -> BoxStream<'_, Result<LoanSnapshot>> {
        // Point-in-time snapshot under the state mutex, then a lazy
        // stream over it. Loan id ascending, as BTreeMap iterates.
        let state = self.inner.state();
        let rows: Vec<LoanSnapshot> = state
            .loans
            .values()
            .map(|row| {
                let loan = &row.value;
                let book = state.books.get(&loan.book_id).map(|b| &b.value);
                let member = state.members.get(&loan.member_id);
                LoanSnapshot {
                    loan_id: loan.loan_id,
                    book_id: loan.book_id,
                    member_id: loan.member_id,
                    borrow_date: loan.borrow_date,
                    return_date: loan.return_date,
                    book_title: book.and_then(|b| non_blank(&b.title)),
                    book_author: book.and_then(|b| non_blank(&b.author)),
                    member_name: member.and_then(|m| non_blank(&m.name)),
                }
            })
            .filter(|row| filter.matches(row))
            .collect();
        drop(state);

        futures::stream::iter(rows.into_iter().map(Ok)).boxed()
    }
}

fn non_blank(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// One transaction: staged writes plus the versions of the rows it read.
///
/// Dropping it without commit releases the row locks and discards the
/// staged writes, which is exactly the rollback contract.
struct MemoryLedgerTx {
    inner: Arc<Inner>,
    locks: Vec<OwnedMutexGuard<()>>,
    read_books: HashMap<BookId, u64>,
    read_loans: HashMap<LoanId, u64>,
    staged_books: HashMap<BookId, Book>,
    staged_loans: HashMap<LoanId, Loan>,
    staged_new_loans: Vec<Loan>,
}

impl MemoryLedgerTx {
    fn read_book(&mut self, id: BookId) -> Option<Book> {
        if let Some(staged) = self.staged_books.get(&id) {
            return Some(staged.clone());
        }
        let state = self.inner.state();
        let row = state.books.get(&id)?;
        self.read_books.entry(id).or_insert(row.version);
        Some(row.value.clone())
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn get_book(&mut self, id: BookId) -> Result<Option<Book>> {
        Ok(self.read_book(id))
    }

    async fn lock_book_exclusive(&mut self, id: BookId) -> Result<Option<Book>> {
        let lock = self.inner.row_lock(id);
        // Held until the transaction is dropped.
        self.locks.push(lock.lock_owned().await);
        Ok(self.read_book(id))
    }

    async fn save_book(&mut self, book: &Book) -> Result<()> {
        self.staged_books.insert(book.book_id, book.clone());
        Ok(())
    }

    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>> {
        Ok(self.inner.state().members.get(&id).cloned())
    }

    async fn count_active_loans(&mut self, member_id: MemberId) -> Result<u32> {
        let state = self.inner.state();
        let committed = state
            .loans
            .values()
            .map(|row| self.staged_loans.get(&row.value.loan_id).unwrap_or(&row.value))
            .filter(|loan| loan.member_id == member_id && loan.is_active())
            .count();
        let staged = self
            .staged_new_loans
            .iter()
            .filter(|loan| loan.member_id == member_id && loan.is_active())
            .count();
        Ok((committed + staged) as u32)
    }

    async fn has_overdue_loan(&mut self, member_id: MemberId, cutoff: NaiveDate) -> Result<bool> {
        let state = self.inner.state();
        Ok(state
            .loans
            .values()
            .map(|row| self.staged_loans.get(&row.value.loan_id).unwrap_or(&row.value))
            .any(|loan| {
                loan.member_id == member_id && loan.is_active() && loan.borrow_date < cutoff
            }))
    }

    async fn create_loan(&mut self, loan: NewLoan) -> Result<LoanId> {
        // Ids come from a shared sequence so concurrent transactions never
        // collide; an id burned by a rollback is simply skipped.
        let loan_id = {
            let mut state = self.inner.state();
            let id = LoanId::new(state.next_loan_id);
            state.next_loan_id += 1;
            id
        };
        self.staged_new_loans.push(Loan {
            loan_id,
            book_id: loan.book_id,
            member_id: loan.member_id,
            borrow_date: loan.borrow_date,
            return_date: None,
        });
        Ok(loan_id)
    }

    async fn get_loan(&mut self, id: LoanId) -> Result<Option<Loan>> {
        if let Some(staged) = self.staged_loans.get(&id) {
            return Ok(Some(staged.clone()));
        }
        if let Some(staged) = self.staged_new_loans.iter().find(|l| l.loan_id == id) {
            return Ok(Some(staged.clone()));
        }
        let state = self.inner.state();
        Ok(state.loans.get(&id).map(|row| {
            self.read_loans.entry(id).or_insert(row.version);
            row.value.clone()
        }))
    }

    async fn save_loan(&mut self, loan: &Loan) -> Result<()> {
        if let Some(staged) = self
            .staged_new_loans
            .iter_mut()
            .find(|l| l.loan_id == loan.loan_id)
        {
            *staged = loan.clone();
        } else {
            self.staged_loans.insert(loan.loan_id, loan.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.inner.state();

        // Validate: every row read by this transaction must still be at
        // the version it was read at, otherwise a concurrent commit won.
        for (id, version) in &self.read_books {
            if state.books.get(id).map(|row| row.version) != Some(*version) {
                return Err(StoreError::Conflict);
            }
        }
        for (id, version) in &self.read_loans {
            if state.loans.get(id).map(|row| row.version) != Some(*version) {
                return Err(StoreError::Conflict);
            }
        }

        // Apply all staged writes atomically.
        for (id, book) in self.staged_books {
            let version = state.books.get(&id).map_or(0, |row| row.version + 1);
            state.books.insert(id, Versioned { value: book, version });
        }
        for (id, loan) in self.staged_loans {
            let version = state.loans.get(&id).map_or(0, |row| row.version + 1);
            state.loans.insert(id, Versioned { value: loan, version });
        }
        for loan in self.staged_new_loans {
            state
                .loans
                .insert(loan.loan_id, Versioned { value: loan, version: 0 });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Staged writes and row locks are dropped with self.
        Ok(())
    }
}
