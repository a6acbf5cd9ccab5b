//! Checkpointing and log truncation.

use std::fs::OpenOptions;
use std::io::Seek;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::error::{PagelogError, Result};
use crate::store::PageStore;
use crate::wal::record::{
    read_err, read_i64, write_err, write_i64, CheckpointEntry, LogRecord, LOG_HEADER_SIZE,
    NO_CHECKPOINT,
};
use crate::wal::writer::LogWriter;

impl LogWriter {
    /// Writes a checkpoint record and truncates the log behind it.
    ///
    /// The sequence is: force the log, flush every dirty page out of the
    /// store (so all updates preceding the checkpoint are durable in their
    /// table files), append a CHECKPOINT record listing the live
    /// transactions, patch the checkpoint pointer at offset 0, then truncate.
    /// Between the append and the pointer patch the file briefly holds the
    /// new checkpoint while the pointer still names the previous one; a crash
    /// in that window just replays from the old checkpoint.
    ///
    /// The caller holds the store's pool mutex.
    pub(super) fn log_checkpoint(&mut self, store: &dyn PageStore) -> Result<()> {
        self.pre_append()?;
        self.force()?;
        store.flush_all_dirty()?;

        let live: Vec<CheckpointEntry> = self
            .live
            .iter()
            .map(|(tid, first)| CheckpointEntry {
                tid: *tid,
                first_record: *first,
            })
            .collect();
        let start = self.append_record(&LogRecord::Checkpoint { live })?;

        self.seek(0)?;
        write_i64(&mut self.file, start as i64).map_err(write_err)?;
        info!(
            "checkpoint at offset {start}, {} outstanding transactions",
            self.live.len()
        );

        self.log_truncate()
    }

    /// Rewrites the log, discarding every record before `min_log_record`:
    /// the smaller of the current checkpoint offset and the earliest first
    /// log record of any transaction the checkpoint lists as live.
    ///
    /// Surviving records are copied into a sibling temp file with every
    /// embedded offset (trailing start offsets and checkpoint entries)
    /// shifted by `min_log_record - 8`; the 8-byte checkpoint-pointer slot
    /// stays in place. Live-transaction-table entries for BEGIN records
    /// encountered are re-pointed at their new offsets. The temp file is
    /// renamed over the log on success.
    ///
    /// A no-op when no checkpoint has been written yet.
    pub(super) fn log_truncate(&mut self) -> Result<()> {
        self.pre_append()?;
        self.seek(0)?;
        let cp_loc = read_i64(&mut self.file).map_err(read_err)?;
        if cp_loc == NO_CHECKPOINT {
            return Ok(());
        }
        let cp_loc = u64::try_from(cp_loc).map_err(|_| {
            PagelogError::CorruptLog(format!("checkpoint pointer {cp_loc} is negative"))
        })?;

        self.seek(cp_loc)?;
        let Some((record, _)) = LogRecord::read_from(&mut self.file)? else {
            return Err(PagelogError::CorruptLog(format!(
                "checkpoint pointer {cp_loc} points past the end of the log"
            )));
        };
        let LogRecord::Checkpoint { live } = record else {
            return Err(PagelogError::CorruptLog(format!(
                "checkpoint pointer {cp_loc} does not lead to a checkpoint record"
            )));
        };

        let min_log_record = live
            .iter()
            .map(|entry| entry.first_record)
            .fold(cp_loc, u64::min);
        let shift = min_log_record - LOG_HEADER_SIZE;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let tmp_path = self.path.with_file_name(format!("logtmp{millis}"));
        let mut new_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| PagelogError::IoFailure(format!("failed to create temp log: {e}")))?;

        write_i64(&mut new_file, (cp_loc - shift) as i64).map_err(write_err)?;

        // Records keep their relative layout; only embedded offsets move.
        let old_len = self
            .file
            .metadata()
            .map_err(|e| PagelogError::IoFailure(format!("failed to stat log file: {e}")))?
            .len();
        self.seek(min_log_record)?;
        while let Some((mut record, _)) = LogRecord::read_from(&mut self.file)? {
            let new_start = new_file
                .stream_position()
                .map_err(|e| PagelogError::IoFailure(format!("failed to read temp log position: {e}")))?;
            match &mut record {
                LogRecord::Checkpoint { live } => {
                    // Entries of a stale, superseded checkpoint can point
                    // before the cut; the wrap keeps their bytes consistent
                    // with the shift without ever being followed.
                    for entry in live {
                        entry.first_record = entry.first_record.wrapping_sub(shift);
                    }
                }
                LogRecord::Begin { tid } => {
                    if let Some(first) = self.live.get_mut(tid) {
                        *first = new_start;
                    }
                }
                _ => {}
            }
            record.write_to(&mut new_file, new_start)?;
        }

        new_file
            .sync_all()
            .map_err(|e| PagelogError::IoFailure(format!("failed to sync temp log: {e}")))?;
        let new_len = new_file
            .metadata()
            .map_err(|e| PagelogError::IoFailure(format!("failed to stat temp log: {e}")))?
            .len();
        drop(new_file);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            PagelogError::IoFailure(format!("failed to rename temp log over log file: {e}"))
        })?;
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| PagelogError::IoFailure(format!("failed to reopen log file: {e}")))?;
        self.current_offset = new_len;

        info!("truncated log from {old_len} to {new_len} bytes (dropped prefix before {min_log_record})");
        Ok(())
    }

    /// Writes a final checkpoint so the next startup needs no recovery.
    /// The log file handle is released when the writer is dropped.
    pub(super) fn shutdown(&mut self, store: &dyn PageStore) -> Result<()> {
        self.log_checkpoint(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{HeapPage, HeapPageId, PAGE_SIZE};
    use crate::store::HeapStore;
    use crate::tx::TransactionId;
    use tempfile::TempDir;

    fn setup() -> (LogWriter, HeapStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let writer = LogWriter::open(&temp_dir.path().join("wal.log")).unwrap();
        let store = HeapStore::open(&temp_dir.path().join("tables")).unwrap();
        (writer, store, temp_dir)
    }

    fn page_with(id: HeapPageId, byte: u8) -> HeapPage {
        HeapPage::new(id, vec![byte; PAGE_SIZE]).unwrap()
    }

    fn read_all_records(writer: &mut LogWriter) -> Vec<(LogRecord, u64)> {
        writer.seek(LOG_HEADER_SIZE).unwrap();
        let mut records = Vec::new();
        loop {
            let offset = writer.position().unwrap();
            match LogRecord::read_from(&mut writer.file).unwrap() {
                Some((record, start)) => {
                    assert_eq!(start, offset);
                    records.push((record, offset));
                }
                None => break,
            }
        }
        records
    }

    fn checkpoint_pointer(writer: &mut LogWriter) -> i64 {
        writer.seek(0).unwrap();
        read_i64(&mut writer.file).unwrap()
    }

    #[test]
    fn test_checkpoint_with_no_live_transactions_empties_log() {
        let (mut writer, store, _temp) = setup();
        let tid = TransactionId::new(1);
        writer.log_begin(tid).unwrap();
        writer.log_commit(tid).unwrap();

        writer.log_checkpoint(&store).unwrap();

        // Only the checkpoint itself survives truncation.
        let records = read_all_records(&mut writer);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].0, LogRecord::Checkpoint { ref live } if live.is_empty()));
        assert_eq!(checkpoint_pointer(&mut writer), LOG_HEADER_SIZE as i64);
    }

    #[test]
    fn test_checkpoint_lists_live_transactions() {
        let (mut writer, store, _temp) = setup();
        let tid = TransactionId::new(1);
        writer.log_begin(tid).unwrap();

        writer.log_checkpoint(&store).unwrap();

        let records = read_all_records(&mut writer);
        let live = match &records.last().unwrap().0 {
            LogRecord::Checkpoint { live } => live.clone(),
            other => panic!("expected checkpoint, got type {}", other.kind()),
        };
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].tid, tid);
    }

    #[test]
    fn test_truncate_shifts_offsets_uniformly() {
        let (mut writer, store, _temp) = setup();
        let done = TransactionId::new(1);
        let open = TransactionId::new(2);
        let pid = HeapPageId::new(0, 0);

        // A finished transaction makes a discardable prefix; an open one
        // pins the log from its BEGIN record onward.
        writer.log_begin(done).unwrap();
        writer.log_commit(done).unwrap();
        writer.log_begin(open).unwrap();
        writer
            .log_update(open, &page_with(pid, 0xAA), &page_with(pid, 0xBB))
            .unwrap();

        writer.log_checkpoint(&store).unwrap();

        // Surviving records: the open BEGIN (now at offset 8), its update,
        // and the checkpoint; every trailing start offset still matches its
        // record's position (read_all_records asserts that).
        let records = read_all_records(&mut writer);
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0].0, LogRecord::Begin { tid } if tid == open));
        assert_eq!(records[0].1, LOG_HEADER_SIZE);

        // The live table follows the BEGIN to its new offset, and the
        // checkpoint entry agrees with it.
        match &records[2].0 {
            LogRecord::Checkpoint { live } => {
                assert_eq!(live.len(), 1);
                assert_eq!(live[0].first_record, LOG_HEADER_SIZE);
            }
            other => panic!("expected checkpoint, got type {}", other.kind()),
        }
        assert_eq!(checkpoint_pointer(&mut writer) as u64, records[2].1);
    }

    #[test]
    fn test_truncate_without_checkpoint_is_noop() {
        let (mut writer, _store, _temp) = setup();
        let tid = TransactionId::new(1);
        writer.log_begin(tid).unwrap();

        writer.log_truncate().unwrap();

        let records = read_all_records(&mut writer);
        assert_eq!(records.len(), 1);
        assert_eq!(checkpoint_pointer(&mut writer), NO_CHECKPOINT);
    }

    #[test]
    fn test_appends_continue_after_truncation() {
        let (mut writer, store, _temp) = setup();
        let t1 = TransactionId::new(1);
        writer.log_begin(t1).unwrap();
        writer.log_checkpoint(&store).unwrap();

        // The writer keeps appending to the rewritten file.
        writer.log_commit(t1).unwrap();
        let t2 = TransactionId::new(2);
        writer.log_begin(t2).unwrap();

        let records = read_all_records(&mut writer);
        let kinds: Vec<i32> = records.iter().map(|(r, _)| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                crate::wal::record::BEGIN_RECORD,
                crate::wal::record::CHECKPOINT_RECORD,
                crate::wal::record::COMMIT_RECORD,
                crate::wal::record::BEGIN_RECORD,
            ]
        );
    }
}
