use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 書籍ID - 蔵書台帳上の安定した整数ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookId(i32);

impl BookId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 会員ID - 会員名簿への参照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(i32);

impl MemberId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 貸出ID - 貸出台帳上のレコードID（ストアが採番する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoanId(i32);

impl LoanId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 書籍の貸出状態
///
/// 不変条件：Borrowed ⇔ その書籍を参照する未返却のLoanがちょうど1件存在する。
/// 状態遷移はLending Engineのみが行う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookStatus {
    Available,
    Borrowed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "Available",
            BookStatus::Borrowed => "Borrowed",
        }
    }
}

/// ステータス文字列の解析エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBookStatusError(pub String);

impl fmt::Display for ParseBookStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown book status: {}", self.0)
    }
}

impl std::error::Error for ParseBookStatusError {}

impl FromStr for BookStatus {
    type Err = ParseBookStatusError;

    /// 永続化層の表記ゆれを吸収するため大文字小文字を区別しない
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("available") {
            Ok(BookStatus::Available)
        } else if s.eq_ignore_ascii_case("borrowed") {
            Ok(BookStatus::Borrowed)
        } else {
            Err(ParseBookStatusError(s.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_compare_by_value() {
        assert_eq!(BookId::new(1), BookId::new(1));
        assert_ne!(BookId::new(1), BookId::new(2));
        assert_eq!(LoanId::new(7).value(), 7);
        assert_eq!(MemberId::new(3).to_string(), "3");
    }

    #[test]
    fn test_book_status_parse_is_case_insensitive() {
        assert_eq!("available".parse::<BookStatus>(), Ok(BookStatus::Available));
        assert_eq!("Available".parse::<BookStatus>(), Ok(BookStatus::Available));
        assert_eq!("BORROWED".parse::<BookStatus>(), Ok(BookStatus::Borrowed));
    }

    #[test]
    fn test_book_status_parse_rejects_unknown() {
        let err = "lost".parse::<BookStatus>().unwrap_err();
        assert_eq!(err, ParseBookStatusError("lost".to_string()));
    }

    #[test]
    fn test_book_status_round_trips_through_as_str() {
        for status in [BookStatus::Available, BookStatus::Borrowed] {
            assert_eq!(status.as_str().parse::<BookStatus>(), Ok(status));
        }
    }
}
