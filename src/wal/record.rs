//! Log record types and their on-disk codec.
//!
//! All integers are big-endian. `i32` is 4 bytes, `i64` is 8 bytes, and a
//! `utf` string is a 2-byte length prefix followed by that many UTF-8 bytes.
//! Every record ends with an 8-byte start offset naming its own beginning,
//! which is what makes backward scans possible.

use std::io::{self, Read, Write};

use crate::error::{PagelogError, Result};
use crate::page::Page;
use crate::tx::TransactionId;

/// Record type tag for ABORT.
pub const ABORT_RECORD: i32 = 1;
/// Record type tag for COMMIT.
pub const COMMIT_RECORD: i32 = 2;
/// Record type tag for UPDATE.
pub const UPDATE_RECORD: i32 = 3;
/// Record type tag for BEGIN.
pub const BEGIN_RECORD: i32 = 4;
/// Record type tag for CHECKPOINT.
pub const CHECKPOINT_RECORD: i32 = 5;

/// Checkpoint pointer value meaning "no checkpoint yet".
pub const NO_CHECKPOINT: i64 = -1;

/// Size of the checkpoint-pointer header at the start of the log file.
pub const LOG_HEADER_SIZE: u64 = 8;

/// The wire form of a logged page: type tags, serialized id, raw bytes.
///
/// Two images are logged per update; both refer to the same page id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Type tag of the concrete page type.
    pub page_tag: String,
    /// Type tag of the concrete page-id type.
    pub id_tag: String,
    /// The page id's integer representation.
    pub id: Vec<i32>,
    /// The page's raw bytes.
    pub data: Vec<u8>,
}

impl PageImage {
    /// Captures the image of a live page.
    #[must_use]
    pub fn from_page(page: &dyn Page) -> Self {
        Self {
            page_tag: page.type_tag().to_string(),
            id_tag: page.id().type_tag().to_string(),
            id: page.id().serialize(),
            data: page.data().to_vec(),
        }
    }

    pub(crate) fn read_from(r: &mut impl Read) -> Result<Self> {
        let page_tag = read_utf(r).map_err(read_err)?;
        let id_tag = read_utf(r).map_err(read_err)?;

        let count = read_i32(r).map_err(read_err)?;
        if count < 0 {
            return Err(PagelogError::CorruptLog(format!(
                "negative page-id integer count {count}"
            )));
        }
        let mut id = Vec::with_capacity(count as usize);
        for _ in 0..count {
            id.push(read_i32(r).map_err(read_err)?);
        }

        let len = read_i32(r).map_err(read_err)?;
        if len < 0 {
            return Err(PagelogError::CorruptLog(format!(
                "negative page data length {len}"
            )));
        }
        let mut data = vec![0u8; len as usize];
        r.read_exact(&mut data).map_err(read_err)?;

        Ok(Self {
            page_tag,
            id_tag,
            id,
            data,
        })
    }

    pub(crate) fn write_to(&self, w: &mut impl Write) -> Result<()> {
        write_utf(w, &self.page_tag).map_err(write_err)?;
        write_utf(w, &self.id_tag).map_err(write_err)?;
        write_i32(w, self.id.len() as i32).map_err(write_err)?;
        for v in &self.id {
            write_i32(w, *v).map_err(write_err)?;
        }
        write_i32(w, self.data.len() as i32).map_err(write_err)?;
        w.write_all(&self.data).map_err(write_err)?;
        Ok(())
    }
}

/// One live transaction listed in a checkpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// The live transaction.
    pub tid: TransactionId,
    /// File offset of that transaction's first log record.
    pub first_record: u64,
}

/// A parsed log record.
#[derive(Debug, Clone)]
pub enum LogRecord {
    /// A transaction began.
    Begin {
        /// The transaction.
        tid: TransactionId,
    },
    /// A transaction committed.
    Commit {
        /// The transaction.
        tid: TransactionId,
    },
    /// A transaction aborted (its before-images were restored at abort time).
    Abort {
        /// The transaction.
        tid: TransactionId,
    },
    /// A page changed: before and after images of the same page.
    Update {
        /// The transaction that changed the page.
        tid: TransactionId,
        /// The page just before the update.
        before: PageImage,
        /// The page just after the update.
        after: PageImage,
    },
    /// Transactions live at checkpoint time and their first log offsets.
    Checkpoint {
        /// The live transactions. The on-disk tid slot holds a `-1`
        /// placeholder handled by the codec.
        live: Vec<CheckpointEntry>,
    },
}

impl LogRecord {
    /// Returns the record's on-disk type tag.
    #[must_use]
    pub fn kind(&self) -> i32 {
        match self {
            LogRecord::Abort { .. } => ABORT_RECORD,
            LogRecord::Commit { .. } => COMMIT_RECORD,
            LogRecord::Update { .. } => UPDATE_RECORD,
            LogRecord::Begin { .. } => BEGIN_RECORD,
            LogRecord::Checkpoint { .. } => CHECKPOINT_RECORD,
        }
    }

    /// Returns the record's transaction, if it has one.
    #[must_use]
    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            LogRecord::Begin { tid }
            | LogRecord::Commit { tid }
            | LogRecord::Abort { tid }
            | LogRecord::Update { tid, .. } => Some(*tid),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Reads one record, including its trailing start offset.
    ///
    /// Returns `Ok(None)` on a clean end of log (no bytes where the next
    /// record would begin). An end of file anywhere inside a record is
    /// [`PagelogError::CorruptLog`].
    ///
    /// # Errors
    ///
    /// `CorruptLog` for truncated or malformed records, `IoFailure` for
    /// underlying read errors.
    pub fn read_from(r: &mut impl Read) -> Result<Option<(Self, u64)>> {
        let kind = match try_read_i32(r)? {
            Some(kind) => kind,
            None => return Ok(None),
        };

        let tid_raw = read_i64(r).map_err(read_err)?;
        let record = match kind {
            BEGIN_RECORD => LogRecord::Begin {
                tid: TransactionId::new(tid_raw as u64),
            },
            COMMIT_RECORD => LogRecord::Commit {
                tid: TransactionId::new(tid_raw as u64),
            },
            ABORT_RECORD => LogRecord::Abort {
                tid: TransactionId::new(tid_raw as u64),
            },
            UPDATE_RECORD => {
                let before = PageImage::read_from(r)?;
                let after = PageImage::read_from(r)?;
                LogRecord::Update {
                    tid: TransactionId::new(tid_raw as u64),
                    before,
                    after,
                }
            }
            CHECKPOINT_RECORD => {
                let count = read_i32(r).map_err(read_err)?;
                if count < 0 {
                    return Err(PagelogError::CorruptLog(format!(
                        "negative checkpoint transaction count {count}"
                    )));
                }
                let mut live = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let tid = read_i64(r).map_err(read_err)?;
                    let first_record = read_i64(r).map_err(read_err)?;
                    live.push(CheckpointEntry {
                        tid: TransactionId::new(tid as u64),
                        first_record: first_record as u64,
                    });
                }
                LogRecord::Checkpoint { live }
            }
            other => {
                return Err(PagelogError::CorruptLog(format!(
                    "unknown record type tag {other}"
                )))
            }
        };

        let start = read_i64(r).map_err(read_err)?;
        Ok(Some((record, start as u64)))
    }

    /// Writes the record with `start` as its trailing start offset.
    ///
    /// # Errors
    ///
    /// Returns `IoFailure` if a write fails.
    pub fn write_to(&self, w: &mut impl Write, start: u64) -> Result<()> {
        write_i32(w, self.kind()).map_err(write_err)?;
        let tid_raw = self.tid().map_or(NO_CHECKPOINT, |tid| tid.id() as i64);
        write_i64(w, tid_raw).map_err(write_err)?;

        match self {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => {}
            LogRecord::Update { before, after, .. } => {
                before.write_to(w)?;
                after.write_to(w)?;
            }
            LogRecord::Checkpoint { live } => {
                write_i32(w, live.len() as i32).map_err(write_err)?;
                for entry in live {
                    write_i64(w, entry.tid.id() as i64).map_err(write_err)?;
                    write_i64(w, entry.first_record as i64).map_err(write_err)?;
                }
            }
        }

        write_i64(w, start as i64).map_err(write_err)?;
        Ok(())
    }
}

/// Reads the next record's type tag, distinguishing a clean end of log
/// (zero bytes available) from a torn record (one to three bytes).
fn try_read_i32(r: &mut impl Read) -> Result<Option<i32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(read_err(e)),
        }
    }
    match filled {
        0 => Ok(None),
        4 => Ok(Some(i32::from_be_bytes(buf))),
        n => Err(PagelogError::CorruptLog(format!(
            "log ends with {n} stray bytes where a record should begin"
        ))),
    }
}

pub(crate) fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub(crate) fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub(crate) fn read_utf(r: &mut impl Read) -> io::Result<String> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {e}")))
}

pub(crate) fn write_i32(w: &mut impl Write, v: i32) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

pub(crate) fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_be_bytes())
}

pub(crate) fn write_utf(w: &mut impl Write, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes does not fit a utf field", s.len()),
        )
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(s.as_bytes())
}

/// Maps a read-side I/O error: a short read inside a record means the log is
/// corrupt, anything else is a storage failure.
pub(crate) fn read_err(e: io::Error) -> PagelogError {
    if e.kind() == io::ErrorKind::UnexpectedEof || e.kind() == io::ErrorKind::InvalidData {
        PagelogError::CorruptLog(format!("unexpected end of log inside a record: {e}"))
    } else {
        PagelogError::IoFailure(format!("log read failed: {e}"))
    }
}

pub(crate) fn write_err(e: io::Error) -> PagelogError {
    PagelogError::IoFailure(format!("log write failed: {e}"))
}
