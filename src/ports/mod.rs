pub mod ledger_store;

pub use ledger_store::{LedgerStore, LedgerTx, LoanSnapshot, Result, ScanFilter, StoreError};
