//! Page store capability consumed by the log.
//!
//! The log never touches table files directly; every page it installs during
//! rollback or recovery goes through a [`PageStore`]. The store owns the page
//! cache, the table files, and the *pool mutex*.
//!
//! # Lock ordering
//!
//! The store's pool mutex and the log mutex are both plain blocking mutexes
//! with a fixed acquisition order: **pool, then log**. Log operations that
//! mutate buffered pages (abort, checkpoint, recovery) take
//! [`PageStore::pool_lock`] before the log mutex; a store that writes log
//! records while flushing pages likewise holds only the pool mutex when it
//! calls into the log. A store must never hold its internal state lock across
//! a call into the log.

mod heap_store;

pub use heap_store::HeapStore;

use parking_lot::MutexGuard;

use crate::error::Result;
use crate::page::{Page, PageId};

/// Capability the log uses to read, install, and discard pages.
pub trait PageStore: Send + Sync {
    /// Acquires the pool mutex. See the module docs for the lock order.
    fn pool_lock(&self) -> MutexGuard<'_, ()>;

    /// Loads a page, from cache or from its backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be read.
    fn load_page(&self, id: &dyn PageId) -> Result<Box<dyn Page>>;

    /// Writes a page through to its backing file, updating any cached copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_page(&self, page: &dyn Page) -> Result<()>;

    /// Drops any cached copy of the page without writing it back.
    fn discard_cached(&self, id: &dyn PageId);

    /// Writes every dirty cached page to its backing file and syncs the files.
    ///
    /// # Errors
    ///
    /// Returns an error if a write or sync fails.
    fn flush_all_dirty(&self) -> Result<()>;

    /// Rebuilds a page id from a logged type tag and integer vector.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PagelogError::CorruptLog`] for an unknown tag.
    fn reconstruct_page_id(&self, tag: &str, ints: &[i32]) -> Result<Box<dyn PageId>>;

    /// Rebuilds a page from a logged type tag, its id, and raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PagelogError::CorruptLog`] for an unknown tag.
    fn reconstruct_page(&self, tag: &str, id: &dyn PageId, data: Vec<u8>) -> Result<Box<dyn Page>>;
}
