use thiserror::Error;

/// The error kinds the storage core can surface.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Logical storage errors: slot full/empty, descriptor mismatch,
    /// no such table, no such tuple on this page, etc.
    #[error("db error: {0}")]
    Db(String),

    /// Lock acquisition aborted the transaction (deadlock or interrupt).
    /// The caller must roll back.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Physical read/write failure on a heap or log file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Rollback was asked to undo a transaction that never began.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// A corrupt or partially truncated record encountered by recovery.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
