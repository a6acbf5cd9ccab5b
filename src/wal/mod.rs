//! Write-ahead logging and crash recovery.
//!
//! # Log file format
//!
//! The first 8 bytes of the file hold the offset of the most recent
//! CHECKPOINT record, or `-1` if none exists. The rest of the file is a
//! sequence of variable-length records, each beginning with an `i32` type
//! tag and (except CHECKPOINT, which stores a `-1` placeholder) an `i64`
//! transaction id, and each ending with an `i64` start offset naming the
//! record's own beginning so the log can be read backwards:
//!
//! ```text
//! file       := checkpoint_ptr:i64  record*
//! BEGIN      := 4:i32 tid:i64 start:i64
//! COMMIT     := 2:i32 tid:i64 start:i64
//! ABORT      := 1:i32 tid:i64 start:i64
//! UPDATE     := 3:i32 tid:i64 page_image page_image start:i64
//! page_image := page_tag:utf id_tag:utf n:i32 id_ints:i32*n len:i32 data
//! CHECKPOINT := 5:i32 (-1):i64 count:i32 (tid:i64 first_off:i64)*count start:i64
//! ```
//!
//! All integers are big-endian. UPDATE records carry the full before and
//! after images of one page; restoring consistency after a crash is a matter
//! of re-installing the right images in the right order (see
//! [`Wal::recover`]).
//!
//! # Write-ahead discipline
//!
//! It is the caller's job to log an update *before* writing the changed page
//! to its table file, and to force the log (directly or via a commit, abort,
//! or checkpoint) before that page write happens. [`Wal::log_commit`]
//! returns only after the commit record and everything before it is durable.

mod checkpoint;
mod record;
mod recovery;
mod rollback;
mod writer;

pub use record::{
    CheckpointEntry, LogRecord, PageImage, ABORT_RECORD, BEGIN_RECORD, CHECKPOINT_RECORD,
    COMMIT_RECORD, LOG_HEADER_SIZE, NO_CHECKPOINT, UPDATE_RECORD,
};

use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::page::Page;
use crate::store::PageStore;
use crate::tx::TransactionId;
use writer::LogWriter;

/// Installs a logged page image through the store, optionally discarding any
/// cached copy of the page first.
pub(crate) fn install_image(
    store: &dyn PageStore,
    image: &PageImage,
    discard_cached: bool,
) -> Result<()> {
    let id = store.reconstruct_page_id(&image.id_tag, &image.id)?;
    if discard_cached {
        store.discard_cached(&*id);
    }
    let page = store.reconstruct_page(&image.page_tag, &*id, image.data.clone())?;
    store.write_page(&*page)
}

/// The write-ahead log.
///
/// Wraps the log writer in the log mutex and pairs it with the
/// [`PageStore`] capability. Operations that mutate buffered pages (abort,
/// checkpoint, recovery) acquire the store's pool mutex before the log
/// mutex; the same order a store must use when it logs a page flush while
/// holding the pool mutex. Any new operation must follow the same order.
pub struct Wal {
    store: Arc<dyn PageStore>,
    log: Mutex<LogWriter>,
}

impl Wal {
    /// Opens (or creates) the log at `path`, backed by `store`.
    ///
    /// Whether the existing log contents matter is decided lazily: a call to
    /// [`Wal::recover`] replays them, while the first append discards them
    /// (the caller evidently started a fresh database).
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened.
    pub fn open(path: &Path, store: Arc<dyn PageStore>) -> Result<Self> {
        Ok(Self {
            store,
            log: Mutex::new(LogWriter::open(path)?),
        })
    }

    /// Logs the start of a transaction.
    ///
    /// # Errors
    ///
    /// [`crate::PagelogError::DuplicateBegin`] if the transaction is already
    /// live.
    pub fn log_begin(&self, tid: TransactionId) -> Result<()> {
        self.log.lock().log_begin(tid)
    }

    /// Logs an update with before and after images of one page. Not forced.
    ///
    /// A buffer pool must call this before writing the new page image to
    /// disk (the write-ahead rule).
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    pub fn log_update(&self, tid: TransactionId, before: &dyn Page, after: &dyn Page) -> Result<()> {
        self.log.lock().log_update(tid, before, after)
    }

    /// Logs a commit and forces it to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or force fails; on success the commit
    /// is durable.
    pub fn log_commit(&self, tid: TransactionId) -> Result<()> {
        self.log.lock().log_commit(tid)
    }

    /// Rolls the transaction back, then logs and forces an abort record.
    ///
    /// # Errors
    ///
    /// [`crate::PagelogError::UnknownTid`] if the transaction is not live.
    pub fn log_abort(&self, tid: TransactionId) -> Result<()> {
        let _pool = self.store.pool_lock();
        self.log.lock().log_abort(tid, &*self.store)
    }

    /// Writes a checkpoint record and truncates the log behind it.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing pages or rewriting the log fails.
    pub fn log_checkpoint(&self) -> Result<()> {
        let _pool = self.store.pool_lock();
        self.log.lock().log_checkpoint(&*self.store)
    }

    /// Replays the log after a restart, restoring database consistency.
    ///
    /// Must be called before any new appends.
    ///
    /// # Errors
    ///
    /// [`crate::PagelogError::CorruptLog`] or
    /// [`crate::PagelogError::IoFailure`]; both mean the database must not
    /// open.
    pub fn recover(&self) -> Result<()> {
        let _pool = self.store.pool_lock();
        self.log.lock().recover(&*self.store)
    }

    /// Flushes all buffered log writes, including file metadata. Blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn force(&self) -> Result<()> {
        self.log.lock().force()
    }

    /// Writes a final checkpoint and releases the log.
    ///
    /// After a clean shutdown the next startup needs no recovery work.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails; the file is closed either
    /// way when `self` drops.
    pub fn shutdown(self) -> Result<()> {
        let _pool = self.store.pool_lock();
        self.log.lock().shutdown(&*self.store)
    }

    /// Writes a human-readable dump of the log to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or `out` rejects a write.
    pub fn dump(&self, out: &mut dyn io::Write) -> Result<()> {
        self.log.lock().dump(out)
    }

    /// Prints a human-readable dump of the log to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn print(&self) -> Result<()> {
        self.dump(&mut io::stdout())
    }

    /// Number of append preambles run so far.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.log.lock().total_records()
    }

    /// Number of transactions currently in the live-transaction table.
    #[must_use]
    pub fn live_transaction_count(&self) -> usize {
        self.log.lock().live_transaction_count()
    }
}
