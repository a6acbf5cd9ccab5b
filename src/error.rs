//! Error types for pagelog operations.

use thiserror::Error;

use crate::tx::TransactionId;

/// Result type alias using [`PagelogError`].
pub type Result<T> = std::result::Result<T, PagelogError>;

/// Error types for pagelog operations.
#[derive(Debug, Error)]
pub enum PagelogError {
    /// A BEGIN record was requested for a transaction that is already live.
    #[error("transaction {0} has already begun")]
    DuplicateBegin(TransactionId),

    /// Rollback was requested for a transaction not in the live-transaction table.
    #[error("transaction {0} is not in the live-transaction table")]
    UnknownTid(TransactionId),

    /// The log file contains a malformed record, a truncated record, a bad
    /// type tag, or a checkpoint pointer that does not lead to a checkpoint.
    #[error("corrupt log: {0}")]
    CorruptLog(String),

    /// An underlying storage operation failed.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// The page store rejected an operation.
    #[error("page store error: {0}")]
    Store(String),
}
