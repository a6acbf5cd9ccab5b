//! Rollback: restoring before-images of unfinished transactions.

use std::collections::HashSet;

use log::debug;

use crate::error::{PagelogError, Result};
use crate::store::PageStore;
use crate::tx::TransactionId;
use crate::wal::record::{read_err, read_i64, LogRecord, PageImage};
use crate::wal::writer::LogWriter;

impl LogWriter {
    /// Rolls back one live transaction by restoring its before-images.
    ///
    /// Scans forward from the transaction's BEGIN record to the end of the
    /// log, collecting the before-image of every UPDATE the transaction
    /// wrote, then restores them newest-first. The LIFO order matters: when
    /// a page was updated more than once, the earliest before-image is the
    /// one applied last, which is the pre-transaction state. Each restore
    /// discards any cached copy of the page and writes the before-image
    /// through the store.
    ///
    /// Valid only for transactions in the live table; the append cursor is
    /// not touched.
    ///
    /// # Errors
    ///
    /// [`PagelogError::UnknownTid`] if the transaction is not live,
    /// [`PagelogError::CorruptLog`] for malformed records.
    pub(super) fn rollback(&mut self, tid: TransactionId, store: &dyn PageStore) -> Result<()> {
        let first = *self
            .live
            .get(&tid)
            .ok_or(PagelogError::UnknownTid(tid))?;
        let end = self.current_offset;

        let mut before_images: Vec<PageImage> = Vec::new();
        let mut pos = self.seek(first)?;
        while pos < end {
            let Some((record, _)) = LogRecord::read_from(&mut self.file)? else {
                return Err(PagelogError::CorruptLog(format!(
                    "log ended at {pos} before the expected end offset {end}"
                )));
            };
            if let LogRecord::Update {
                tid: record_tid,
                before,
                ..
            } = record
            {
                if record_tid == tid {
                    before_images.push(before);
                }
            }
            pos = self.position()?;
        }

        debug!(
            "rollback {tid}: restoring {} before images",
            before_images.len()
        );
        for image in before_images.iter().rev() {
            super::install_image(store, image, true)?;
        }
        Ok(())
    }

    /// Bulk undo over `[start, end)` for a set of loser transactions.
    ///
    /// Walks the log backwards by following each record's trailing start
    /// offset, restoring the before-image of every UPDATE belonging to a
    /// loser as it is encountered. Newest-first application leaves the
    /// earliest before-image of each page in place, the same end state the
    /// LIFO restore in [`LogWriter::rollback`] produces.
    pub(super) fn undo_transactions(
        &mut self,
        losers: &HashSet<TransactionId>,
        start: u64,
        end: u64,
        store: &dyn PageStore,
    ) -> Result<()> {
        let mut pos = end;
        while pos > start {
            self.seek(pos - 8)?;
            let record_start = read_i64(&mut self.file).map_err(read_err)?;
            let record_start = u64::try_from(record_start)
                .ok()
                .filter(|&s| s >= start && s < pos)
                .ok_or_else(|| {
                    PagelogError::CorruptLog(format!(
                        "trailing start offset {record_start} at {} points outside [{start}, {pos})",
                        pos - 8
                    ))
                })?;

            self.seek(record_start)?;
            let Some((record, _)) = LogRecord::read_from(&mut self.file)? else {
                return Err(PagelogError::CorruptLog(format!(
                    "no record at start offset {record_start}"
                )));
            };
            if let LogRecord::Update {
                tid, before, ..
            } = &record
            {
                if losers.contains(tid) {
                    super::install_image(store, before, true)?;
                }
            }
            pos = record_start;
        }
        Ok(())
    }
}
