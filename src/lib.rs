//! pagelog - write-ahead logging and crash recovery for a page-based
//! relational database.
//!
//! The log records full before and after images of every page update,
//! forces commits to durable storage, and replays itself after a crash so
//! that committed effects survive and in-flight effects vanish. Pages are
//! opaque here: the log reads and installs them through a
//! [`PageStore`] capability, reconstructing concrete page types via a
//! string-tag [`PageRegistry`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagelog::{HeapPage, HeapPageId, HeapStore, TransactionId, Wal, PAGE_SIZE};
//!
//! # fn main() -> pagelog::Result<()> {
//! let store = Arc::new(HeapStore::open("db".as_ref())?);
//! let wal = Wal::open("db/wal.log".as_ref(), store.clone())?;
//! wal.recover()?;
//!
//! let tid = TransactionId::new(1);
//! let pid = HeapPageId::new(0, 0);
//! let before = HeapPage::new(pid, vec![0u8; PAGE_SIZE])?;
//! let after = HeapPage::new(pid, vec![1u8; PAGE_SIZE])?;
//!
//! wal.log_begin(tid)?;
//! wal.log_update(tid, &before, &after)?;   // log first...
//! store.put_page(&after)?;                 // ...then buffer the new image
//! wal.log_commit(tid)?;                    // durable on return
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod page;
pub mod store;
pub mod tx;
pub mod wal;

pub use error::{PagelogError, Result};
pub use page::{HeapPage, HeapPageId, Page, PageId, PageRegistry, PAGE_SIZE};
pub use store::{HeapStore, PageStore};
pub use tx::TransactionId;
pub use wal::{CheckpointEntry, LogRecord, PageImage, Wal};
