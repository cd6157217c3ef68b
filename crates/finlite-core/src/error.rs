//! Error types for finlite

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid amount: {0}")]
    ParseAmount(String),

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Unbalanced transaction: {0}")]
    UnbalancedTransaction(String),

    #[error("Posting amount cannot be zero")]
    ZeroAmountPosting,

    #[error("Invalid account type: {0}")]
    InvalidAccountType(String),

    #[error("Invalid date: {0}")]
    InvalidDateFormat(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Import batch not found: {0}")]
    ImportBatchNotFound(Uuid),

    #[error("Statement entry not found: {0}")]
    StatementEntryNotFound(Uuid),

    #[error("Account code already exists: {0}")]
    DuplicateAccount(String),

    #[error("File already imported as batch {existing}")]
    DuplicateImport { existing: Uuid },

    #[error("Statement entry already exists in batch: {0}")]
    DuplicateStatementEntry(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Account {0} still has active children")]
    AccountHasActiveChildren(String),

    #[error("Account {0} is referenced by postings and cannot be deleted")]
    AccountInUse(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
