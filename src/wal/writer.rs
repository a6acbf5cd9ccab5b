//! Log writer: owns the log file and the append protocol.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{PagelogError, Result};
use crate::page::Page;
use crate::store::PageStore;
use crate::tx::TransactionId;
use crate::wal::record::{
    read_err, read_i64, write_err, write_i64, LogRecord, PageImage, LOG_HEADER_SIZE, NO_CHECKPOINT,
};

/// Owner of the append-only log file.
///
/// Holds the random-access handle, the current write offset, the
/// live-transaction table, and the `recovery_undecided` flag. All access is
/// serialized by the log mutex in [`Wal`](crate::wal::Wal); operations that
/// also mutate buffered pages additionally hold the store's pool mutex, which
/// is always acquired first.
pub struct LogWriter {
    pub(super) path: PathBuf,
    pub(super) file: File,
    /// Offset where the next record will be appended.
    pub(super) current_offset: u64,
    /// Count of append preambles, kept as a cheap activity statistic.
    pub(super) total_records: u64,
    /// Live-transaction table: TID to the offset of its BEGIN record.
    pub(super) live: HashMap<TransactionId, u64>,
    /// True until the caller either recovers or appends. The first append
    /// without a recover() means the caller chose a fresh database, so the
    /// old log contents are discarded at that point.
    pub(super) recovery_undecided: bool,
}

impl LogWriter {
    /// Opens (or creates) the log file at `path`.
    ///
    /// Whether the existing contents matter is not decided here: a call to
    /// `recover()` keeps them, the first append discards them.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PagelogError::IoFailure(format!("failed to open log file: {e}")))?;

        let len = file
            .metadata()
            .map_err(|e| PagelogError::IoFailure(format!("failed to stat log file: {e}")))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            current_offset: len,
            total_records: 0,
            live: HashMap::new(),
            recovery_undecided: true,
        })
    }

    /// Append preamble, run at the start of every public write operation.
    ///
    /// The first append since open means the caller chose not to recover:
    /// the file is reset to an empty log with a `-1` checkpoint pointer.
    pub(super) fn pre_append(&mut self) -> Result<()> {
        self.total_records += 1;
        if self.recovery_undecided {
            self.recovery_undecided = false;
            self.file
                .set_len(0)
                .map_err(|e| PagelogError::IoFailure(format!("failed to reset log: {e}")))?;
            self.seek(0)?;
            write_i64(&mut self.file, NO_CHECKPOINT).map_err(write_err)?;
            self.current_offset = LOG_HEADER_SIZE;
        }
        Ok(())
    }

    pub(super) fn seek(&mut self, offset: u64) -> Result<u64> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| PagelogError::IoFailure(format!("failed to seek log: {e}")))
    }

    pub(super) fn position(&mut self) -> Result<u64> {
        self.file
            .stream_position()
            .map_err(|e| PagelogError::IoFailure(format!("failed to read log position: {e}")))
    }

    /// Appends one record at the current write offset and returns the offset
    /// it was written at (which is also its trailing start offset).
    pub(super) fn append_record(&mut self, record: &LogRecord) -> Result<u64> {
        let start = self.current_offset;
        self.seek(start)?;
        record.write_to(&mut self.file, start)?;
        self.current_offset = self.position()?;
        Ok(start)
    }

    /// Writes a BEGIN record and adds the transaction to the live table.
    ///
    /// # Errors
    ///
    /// [`PagelogError::DuplicateBegin`] if the transaction is already live.
    pub(super) fn log_begin(&mut self, tid: TransactionId) -> Result<()> {
        if self.live.contains_key(&tid) {
            return Err(PagelogError::DuplicateBegin(tid));
        }
        self.pre_append()?;
        let start = self.append_record(&LogRecord::Begin { tid })?;
        self.live.insert(tid, start);
        debug!("BEGIN {tid} at offset {start}");
        Ok(())
    }

    /// Writes a COMMIT record, forces the log, and removes the transaction
    /// from the live table. On return the commit is durable.
    pub(super) fn log_commit(&mut self, tid: TransactionId) -> Result<()> {
        self.pre_append()?;
        let start = self.append_record(&LogRecord::Commit { tid })?;
        self.force()?;
        self.live.remove(&tid);
        debug!("COMMIT {tid} at offset {start}");
        Ok(())
    }

    /// Writes an UPDATE record with before and after images of one page.
    ///
    /// Does **not** force: the caller must log the update before writing the
    /// new page image to its table file, and must force (directly or via a
    /// later commit, abort, or checkpoint) before that page write happens.
    pub(super) fn log_update(
        &mut self,
        tid: TransactionId,
        before: &dyn Page,
        after: &dyn Page,
    ) -> Result<()> {
        self.pre_append()?;
        let start = self.append_record(&LogRecord::Update {
            tid,
            before: PageImage::from_page(before),
            after: PageImage::from_page(after),
        })?;
        debug!("UPDATE {tid} at offset {start}");
        Ok(())
    }

    /// Rolls the transaction back, then writes an ABORT record, forces, and
    /// removes the transaction from the live table.
    ///
    /// The caller holds the store's pool mutex.
    ///
    /// # Errors
    ///
    /// [`PagelogError::UnknownTid`] if the transaction is not live.
    pub(super) fn log_abort(&mut self, tid: TransactionId, store: &dyn PageStore) -> Result<()> {
        self.pre_append()?;
        self.rollback(tid, store)?;
        let start = self.append_record(&LogRecord::Abort { tid })?;
        self.force()?;
        self.live.remove(&tid);
        debug!("ABORT {tid} at offset {start}");
        Ok(())
    }

    /// Flushes the log file and its metadata to durable storage. Blocking.
    pub(super) fn force(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| PagelogError::IoFailure(format!("failed to force log: {e}")))
    }

    pub(super) fn total_records(&self) -> u64 {
        self.total_records
    }

    pub(super) fn live_transaction_count(&self) -> usize {
        self.live.len()
    }

    /// Writes a human-readable dump of the whole log to `out`, then restores
    /// the file cursor.
    pub(super) fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let saved = self.position()?;

        let len = self
            .file
            .metadata()
            .map_err(|e| PagelogError::IoFailure(format!("failed to stat log file: {e}")))?
            .len();
        if len < LOG_HEADER_SIZE {
            writeln!(out, "<empty log>").map_err(write_err)?;
            return Ok(());
        }

        self.seek(0)?;
        let cp = read_i64(&mut self.file).map_err(read_err)?;
        writeln!(out, "0: CHECKPOINT POINTER {cp}").map_err(write_err)?;

        loop {
            let offset = self.position()?;
            let Some((record, start)) = LogRecord::read_from(&mut self.file)? else {
                break;
            };
            match &record {
                LogRecord::Begin { tid } => {
                    writeln!(out, "{offset}: BEGIN {tid}").map_err(write_err)?;
                }
                LogRecord::Commit { tid } => {
                    writeln!(out, "{offset}: COMMIT {tid}").map_err(write_err)?;
                }
                LogRecord::Abort { tid } => {
                    writeln!(out, "{offset}: ABORT {tid}").map_err(write_err)?;
                }
                LogRecord::Update { tid, before, after } => {
                    writeln!(
                        out,
                        "{offset}: UPDATE {tid} page {:?} ({} byte before image, {} byte after image)",
                        before.id,
                        before.data.len(),
                        after.data.len()
                    )
                    .map_err(write_err)?;
                }
                LogRecord::Checkpoint { live } => {
                    writeln!(out, "{offset}: CHECKPOINT, {} outstanding", live.len())
                        .map_err(write_err)?;
                    for entry in live {
                        writeln!(out, "    {} first record at {}", entry.tid, entry.first_record)
                            .map_err(write_err)?;
                    }
                }
            }
            writeln!(out, "    RECORD START OFFSET: {start}").map_err(write_err)?;
        }

        self.seek(saved)?;
        Ok(())
    }
}
