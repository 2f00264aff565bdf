use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::domain::{
    Book, Loan, Member, NewLoan,
    value_objects::{BookId, BookStatus, LoanId, MemberId},
};
use crate::ports::{LedgerStore, LedgerTx, LoanSnapshot, Result, ScanFilter, StoreError};

/// PostgreSQLの行をBookに変換する
fn map_row_to_book(row: &PgRow) -> Result<Book> {
    let status_str: &str = row.get("status");
    let status = BookStatus::from_str(status_str).map_err(StoreError::backend)?;
    Ok(Book {
        book_id: BookId::new(row.get("id")),
        title: row.get("title"),
        author: row.get("author"),
        status,
    })
}

fn map_row_to_member(row: &PgRow) -> Member {
    Member {
        member_id: MemberId::new(row.get("id")),
        name: row.get("name"),
        contact: row.get("contact"),
    }
}

fn map_row_to_loan(row: &PgRow) -> Loan {
    Loan {
        loan_id: LoanId::new(row.get("id")),
        book_id: BookId::new(row.get("book_id")),
        member_id: MemberId::new(row.get("member_id")),
        borrow_date: row.get("borrow_date"),
        return_date: row.get("return_date"),
    }
}

/// 結合済みスナップショット行の変換。空欄の表示名はNoneに正規化する。
fn map_row_to_snapshot(row: &PgRow) -> LoanSnapshot {
    LoanSnapshot {
        loan_id: LoanId::new(row.get("loan_id")),
        book_id: BookId::new(row.get("book_id")),
        member_id: MemberId::new(row.get("member_id")),
        borrow_date: row.get("borrow_date"),
        return_date: row.get("return_date"),
        book_title: non_blank(row.get("book_title")),
        book_author: non_blank(row.get("book_author")),
        member_name: non_blank(row.get("member_name")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Ledger StoreのPostgreSQL実装
///
/// 書籍行の排他は`SELECT ... FOR UPDATE`の行ロック、返却日の二重書き込みは
/// `WHERE return_date IS NULL`でガードしたUPDATEで防ぐ。スキーマは
/// `migrations/`を参照。
#[allow(dead_code)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

#[allow(dead_code)]
impl PostgresLedgerStore {
    /// PostgreSQLコネクションプールから新しいLedger Storeを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `migrations/`のスキーマを適用する
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(StoreError::backend)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(StoreError::backend)?;
        Ok(Box::new(PostgresLedgerTx { tx, conflicted: false }))
    }

    /// 貸出・書籍・会員を結合したスナップショットを行ID昇順でストリームする
    ///
    /// フィルタはアダプタ側で適用する。ストリームは遅延評価なので、
    /// キャンセルされたジョブは途中で読むのをやめられる。
    fn scan_loans(&self, filter: ScanFilter) -> BoxStream<'_, Result<LoanSnapshot>> {
        sqlx::query(
            r#"
            SELECT
                l.id          AS loan_id,
                l.book_id     AS book_id,
                l.member_id   AS member_id,
                l.borrow_date AS borrow_date,
                l.return_date AS return_date,
                b.title       AS book_title,
                b.author      AS book_author,
                m.name        AS member_name
            FROM loans l
            LEFT JOIN books b ON b.id = l.book_id
            LEFT JOIN members m ON m.id = l.member_id
            ORDER BY l.id ASC
            "#,
        )
        .fetch(&self.pool)
        .filter_map(move |row| {
            let item = match row {
                Ok(row) => {
                    let snapshot = map_row_to_snapshot(&row);
                    filter.matches(&snapshot).then(|| Ok(snapshot))
                }
                Err(err) => Some(Err(StoreError::backend(err))),
            };
            futures::future::ready(item)
        })
        .boxed()
    }
}

/// 1トランザクション分のガード付き書き込み単位
///
/// `conflicted`はガード付きUPDATEが0行に終わったこと（並行する返却に
/// 敗れたこと）を記録し、コミット時に`Conflict`として報告する。
struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
    conflicted: bool,
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn get_book(&mut self, id: BookId) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT id, title, author, status FROM books WHERE id = $1")
            .bind(id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(map_row_to_book).transpose()
    }

    /// 書籍行を`FOR UPDATE`でロックして読む
    ///
    /// 同じ書籍への同時Borrowの直列化点。ロックはトランザクションの
    /// 終了（コミットまたはロールバック）まで保持される。
    async fn lock_book_exclusive(&mut self, id: BookId) -> Result<Option<Book>> {
        let row =
            sqlx::query("SELECT id, title, author, status FROM books WHERE id = $1 FOR UPDATE")
                .bind(id.value())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(StoreError::backend)?;
        row.as_ref().map(map_row_to_book).transpose()
    }

    async fn save_book(&mut self, book: &Book) -> Result<()> {
        sqlx::query("UPDATE books SET title = $2, author = $3, status = $4 WHERE id = $1")
            .bind(book.book_id.value())
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>> {
        let row = sqlx::query("SELECT id, name, contact FROM members WHERE id = $1")
            .bind(id.value())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.as_ref().map(map_row_to_member))
    }

    async fn count_active_loans(&mut self, member_id: MemberId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE member_id = $1 AND return_date IS NULL",
        )
        .bind(member_id.value())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(count as u32)
    }

    async fn has_overdue_loan(&mut self, member_id: MemberId, cutoff: NaiveDate) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM loans
                WHERE member_id = $1 AND return_date IS NULL AND borrow_date < $2
            )
            "#,
        )
        .bind(member_id.value())
        .bind(cutoff)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)
    }

    async fn create_loan(&mut self, loan: NewLoan) -> Result<LoanId> {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO loans (book_id, member_id, borrow_date) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(loan.book_id.value())
        .bind(loan.member_id.value())
        .bind(loan.borrow_date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(LoanId::new(id))
    }

    async fn get_loan(&mut self, id: LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(
            "SELECT id, book_id, member_id, borrow_date, return_date FROM loans WHERE id = $1",
        )
        .bind(id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(row.as_ref().map(map_row_to_loan))
    }

    /// 貸出行を更新する
    ///
    /// 返却日を書く場合は`return_date IS NULL`でガードする。並行する返却が
    /// 先にコミットしていればこのUPDATEは0行に終わるので、それを記録して
    /// コミット時に`Conflict`を返す（呼び出し側が再試行して
    /// `AlreadyReturned`を観測する）。
    async fn save_loan(&mut self, loan: &Loan) -> Result<()> {
        match loan.return_date {
            Some(returned_at) => {
                let result = sqlx::query(
                    "UPDATE loans SET return_date = $2 WHERE id = $1 AND return_date IS NULL",
                )
                .bind(loan.loan_id.value())
                .bind(returned_at)
                .execute(&mut *self.tx)
                .await
                .map_err(StoreError::backend)?;
                if result.rows_affected() == 0 {
                    self.conflicted = true;
                }
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE loans
                    SET book_id = $2, member_id = $3, borrow_date = $4, return_date = NULL
                    WHERE id = $1
                    "#,
                )
                .bind(loan.loan_id.value())
                .bind(loan.book_id.value())
                .bind(loan.member_id.value())
                .bind(loan.borrow_date)
                .execute(&mut *self.tx)
                .await
                .map_err(StoreError::backend)?;
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.conflicted {
            self.tx.rollback().await.map_err(StoreError::backend)?;
            return Err(StoreError::Conflict);
        }
        self.tx.commit().await.map_err(StoreError::backend)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(StoreError::backend)
    }
}
