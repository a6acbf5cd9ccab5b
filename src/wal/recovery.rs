//! Crash recovery: analysis, redo, undo, and winner redo.

use std::collections::{HashMap, HashSet};

use log::info;

use crate::error::{PagelogError, Result};
use crate::store::PageStore;
use crate::tx::TransactionId;
use crate::wal::record::{read_err, read_i64, write_err, write_i64, LogRecord, LOG_HEADER_SIZE, NO_CHECKPOINT};
use crate::wal::writer::LogWriter;

impl LogWriter {
    /// Restores database consistency after a crash.
    ///
    /// Must run before any new appends. Four passes over the log:
    ///
    /// - **Analysis**: follow the checkpoint pointer and seed the loser set
    ///   with the transactions the checkpoint lists as live.
    /// - **Redo all**: from the record after the checkpoint (offset 8 when
    ///   there is none), install every UPDATE's after-image, track BEGIN /
    ///   COMMIT / ABORT to refine losers and winners.
    /// - **Undo losers**: walk the whole log backwards restoring loser
    ///   before-images, newest first.
    /// - **Redo winners**: re-install committed after-images, since the undo
    ///   pass may have overwritten pages that winners legally modified after
    ///   a loser touched them.
    ///
    /// Redoing everything before undoing tolerates the out-of-order page
    /// writes that happen when uncommitted pages were evicted before a
    /// committed transaction touched the same page.
    ///
    /// Transactions that aborted before the crash are undone again rather
    /// than skipped: their before-images were written back at abort time but
    /// possibly never synced to the table files, and re-applying them is
    /// idempotent.
    ///
    /// The caller holds the store's pool mutex.
    ///
    /// # Errors
    ///
    /// [`PagelogError::CorruptLog`] for a truncated or malformed record or a
    /// dangling checkpoint pointer, [`PagelogError::IoFailure`] for storage
    /// errors. Both are fatal: the database must not open.
    pub(super) fn recover(&mut self, store: &dyn PageStore) -> Result<()> {
        self.recovery_undecided = false;

        let len = self
            .file
            .metadata()
            .map_err(|e| PagelogError::IoFailure(format!("failed to stat log file: {e}")))?
            .len();
        if len == 0 {
            // Brand-new database: write the empty-log header and move on.
            self.seek(0)?;
            write_i64(&mut self.file, NO_CHECKPOINT).map_err(write_err)?;
            self.current_offset = LOG_HEADER_SIZE;
            return Ok(());
        }
        if len < LOG_HEADER_SIZE {
            return Err(PagelogError::CorruptLog(
                "log is shorter than its checkpoint pointer".to_string(),
            ));
        }

        // Analysis: seed losers from the checkpoint, if there is one.
        self.seek(0)?;
        let cp_loc = read_i64(&mut self.file).map_err(read_err)?;
        let mut losers: HashMap<TransactionId, u64> = HashMap::new();
        let mut winners: HashSet<TransactionId> = HashSet::new();
        let mut redo_from = LOG_HEADER_SIZE;
        if cp_loc != NO_CHECKPOINT {
            let cp_loc = u64::try_from(cp_loc).map_err(|_| {
                PagelogError::CorruptLog(format!("checkpoint pointer {cp_loc} is negative"))
            })?;
            self.seek(cp_loc)?;
            match LogRecord::read_from(&mut self.file)? {
                Some((LogRecord::Checkpoint { live }, _)) => {
                    for entry in live {
                        losers.insert(entry.tid, entry.first_record);
                    }
                }
                Some(_) => {
                    return Err(PagelogError::CorruptLog(format!(
                        "checkpoint pointer {cp_loc} does not lead to a checkpoint record"
                    )))
                }
                None => {
                    return Err(PagelogError::CorruptLog(format!(
                        "checkpoint pointer {cp_loc} points past the end of the log"
                    )))
                }
            }
            redo_from = self.position()?;
        }

        // Redo all: install every after-image, classify transactions.
        let mut pos = self.seek(redo_from)?;
        loop {
            match LogRecord::read_from(&mut self.file)? {
                None => break,
                Some((record, _)) => {
                    match record {
                        LogRecord::Update { after, .. } => {
                            super::install_image(store, &after, true)?;
                        }
                        LogRecord::Begin { tid } => {
                            losers.insert(tid, pos);
                        }
                        LogRecord::Commit { tid } => {
                            losers.remove(&tid);
                            winners.insert(tid);
                        }
                        // Aborted transactions stay in the loser set so the
                        // undo pass re-installs their before-images.
                        LogRecord::Abort { .. } | LogRecord::Checkpoint { .. } => {}
                    }
                    pos = self.position()?;
                }
            }
        }
        let end = pos;

        // Undo losers over the whole log, backwards.
        let undo_set: HashSet<TransactionId> = losers.keys().copied().collect();
        if !undo_set.is_empty() {
            self.undo_transactions(&undo_set, LOG_HEADER_SIZE, end, store)?;
        }

        // Redo winners: their after-images win over any undo the previous
        // pass performed on shared pages.
        self.seek(LOG_HEADER_SIZE)?;
        loop {
            match LogRecord::read_from(&mut self.file)? {
                None => break,
                Some((LogRecord::Update { tid, after, .. }, _)) if winners.contains(&tid) => {
                    super::install_image(store, &after, false)?;
                }
                Some(_) => {}
            }
        }

        info!(
            "recovery complete: {} winners redone, {} losers undone",
            winners.len(),
            undo_set.len()
        );
        self.live.clear();
        self.current_offset = end;
        Ok(())
    }
}
