/// 書籍の状態遷移エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStateError {
    /// 既に貸出中の書籍を貸し出そうとした
    AlreadyBorrowed,
}

/// 返却のエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseLoanError {
    /// 既に返却済み（returnDateは一度しか書かれない）
    AlreadyReturned,
}
