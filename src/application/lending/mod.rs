mod engine;
mod errors;

pub use engine::{borrow_book, return_book};
pub use errors::{LendingError, Result};
