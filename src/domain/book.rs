use serde::{Deserialize, Serialize};

use super::{BookId, BookStatus, errors::BookStateError};

/// 書籍エンティティ - 蔵書台帳の1行
///
/// 作成・編集はカタログ管理（コア外）の責務。
/// コアが書き換えるのは`status`のみで、書き手はLending Engineに限られる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub status: BookStatus,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available
    }
}

/// 純粋関数：書籍を貸出中にする
///
/// 状態機械：`Available --borrow--> Borrowed` のみ。
/// 貸出中の書籍への再貸出は拒否される（待ち行列には入らない）。
///
/// 副作用なし。新しいBookを返す。
pub fn check_out(book: &Book) -> Result<Book, BookStateError> {
    if book.status == BookStatus::Borrowed {
        return Err(BookStateError::AlreadyBorrowed);
    }
    Ok(Book {
        status: BookStatus::Borrowed,
        ..book.clone()
    })
}

/// 純粋関数：書籍を棚に戻す
///
/// 返却時は無条件にAvailableへ戻す（`Borrowed --return--> Available`）。
///
/// 副作用なし。新しいBookを返す。
pub fn put_back(book: &Book) -> Book {
    Book {
        status: BookStatus::Available,
        ..book.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book(status: BookStatus) -> Book {
        Book {
            book_id: BookId::new(1),
            title: "The Rust Programming Language".to_string(),
            author: "Steve Klabnik".to_string(),
            status,
        }
    }

    // TDD: check_out() のテスト
    #[test]
    fn test_check_out_available_book() {
        let book = sample_book(BookStatus::Available);
        let borrowed = check_out(&book).unwrap();
        assert_eq!(borrowed.status, BookStatus::Borrowed);
        // 他のフィールドは変わらない
        assert_eq!(borrowed.book_id, book.book_id);
        assert_eq!(borrowed.title, book.title);
    }

    #[test]
    fn test_check_out_borrowed_book_is_rejected() {
        let book = sample_book(BookStatus::Borrowed);
        assert_eq!(check_out(&book), Err(BookStateError::AlreadyBorrowed));
    }

    // TDD: put_back() のテスト
    #[test]
    fn test_put_back_makes_book_available() {
        let book = sample_book(BookStatus::Borrowed);
        assert_eq!(put_back(&book).status, BookStatus::Available);
    }

    #[test]
    fn test_full_status_cycle() {
        let book = sample_book(BookStatus::Available);
        let borrowed = check_out(&book).unwrap();
        let returned = put_back(&borrowed);
        assert!(returned.is_available());
    }
}
