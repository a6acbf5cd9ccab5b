//! Heap-file page types.
//!
//! A heap page is one fixed-size slot of a table's heap file, addressed by
//! `(table, page_no)`. These are the page types logged and recovered in the
//! tests and in the bundled [`HeapStore`](crate::store::HeapStore); other
//! embeddings can register their own page types alongside.

use std::any::Any;

use crate::error::{PagelogError, Result};
use crate::page::{Page, PageId, PAGE_SIZE};

/// Stable type tag written to the log for [`HeapPage`].
pub const HEAP_PAGE_TAG: &str = "heap.page";

/// Stable type tag written to the log for [`HeapPageId`].
pub const HEAP_PAGE_ID_TAG: &str = "heap.page_id";

/// Identifies one page of a table's heap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageId {
    /// Table the page belongs to.
    pub table: i32,
    /// Page number within the table's file.
    pub page_no: i32,
}

impl HeapPageId {
    /// Creates a new heap page id.
    #[must_use]
    pub const fn new(table: i32, page_no: i32) -> Self {
        Self { table, page_no }
    }

    /// Rebuilds an id from its serialized integers.
    ///
    /// # Errors
    ///
    /// Returns [`PagelogError::CorruptLog`] unless given exactly two integers.
    pub fn from_ints(ints: &[i32]) -> Result<Self> {
        match ints {
            [table, page_no] => Ok(Self::new(*table, *page_no)),
            _ => Err(PagelogError::CorruptLog(format!(
                "heap page id wants 2 integers, got {}",
                ints.len()
            ))),
        }
    }

    /// Downcasts a trait-object page id to a heap page id.
    ///
    /// # Errors
    ///
    /// Returns [`PagelogError::Store`] if the id is of a different type.
    pub fn downcast(id: &dyn PageId) -> Result<Self> {
        id.as_any()
            .downcast_ref::<Self>()
            .copied()
            .ok_or_else(|| {
                PagelogError::Store(format!("expected a heap page id, got `{}`", id.type_tag()))
            })
    }

    /// Returns the byte offset of this page within its table file.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.page_no as u64 * PAGE_SIZE as u64
    }
}

impl PageId for HeapPageId {
    fn type_tag(&self) -> &'static str {
        HEAP_PAGE_ID_TAG
    }

    fn serialize(&self) -> Vec<i32> {
        vec![self.table, self.page_no]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Display for HeapPageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page({}/{})", self.table, self.page_no)
    }
}

/// One fixed-size page of a table's heap file.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: HeapPageId,
    data: Vec<u8>,
}

impl HeapPage {
    /// Creates a page from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PagelogError::CorruptLog`] if `data` is not exactly
    /// [`PAGE_SIZE`] bytes.
    pub fn new(id: HeapPageId, data: Vec<u8>) -> Result<Self> {
        if data.len() != PAGE_SIZE {
            return Err(PagelogError::CorruptLog(format!(
                "heap page image is {} bytes, expected {PAGE_SIZE}",
                data.len()
            )));
        }
        Ok(Self { id, data })
    }

    /// Creates an all-zero page.
    #[must_use]
    pub fn zeroed(id: HeapPageId) -> Self {
        Self {
            id,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// Returns the page's heap id.
    #[must_use]
    pub fn heap_id(&self) -> HeapPageId {
        self.id
    }

    /// Mutable access to the page bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Page for HeapPage {
    fn type_tag(&self) -> &'static str {
        HEAP_PAGE_TAG
    }

    fn id(&self) -> &dyn PageId {
        &self.id
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serialize_roundtrip() {
        let id = HeapPageId::new(5, 9);
        assert_eq!(id.serialize(), vec![5, 9]);
        assert_eq!(HeapPageId::from_ints(&id.serialize()).unwrap(), id);
    }

    #[test]
    fn test_id_rejects_wrong_arity() {
        assert!(HeapPageId::from_ints(&[1]).is_err());
        assert!(HeapPageId::from_ints(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_page_rejects_wrong_size() {
        let id = HeapPageId::new(0, 0);
        assert!(HeapPage::new(id, vec![0u8; 17]).is_err());
        assert!(HeapPage::new(id, vec![0u8; PAGE_SIZE]).is_ok());
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(HeapPageId::new(0, 0).offset(), 0);
        assert_eq!(HeapPageId::new(0, 3).offset(), 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_downcast() {
        let id = HeapPageId::new(2, 4);
        let dynid: &dyn PageId = &id;
        assert_eq!(HeapPageId::downcast(dynid).unwrap(), id);
    }
}
