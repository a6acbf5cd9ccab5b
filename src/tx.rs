//! Transaction identifier type.

/// Unique identifier for a transaction.
///
/// Transaction ids are opaque 64-bit integers, unique within the lifetime of
/// the log. On disk they are stored as big-endian `i64`; the checkpoint
/// record's `-1` placeholder is written by the log codec and is never a
/// `TransactionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Creates a transaction id from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
