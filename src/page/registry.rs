//! Type-tag registry for reconstructing pages from logged bytes.

use std::collections::HashMap;

use crate::error::{PagelogError, Result};
use crate::page::{Page, PageId};

type IdCtor = Box<dyn Fn(&[i32]) -> Result<Box<dyn PageId>> + Send + Sync>;
type PageCtor = Box<dyn Fn(&dyn PageId, Vec<u8>) -> Result<Box<dyn Page>> + Send + Sync>;

/// Registry mapping stable type tags to page and page-id constructors.
///
/// A store registers one entry per concrete page type at startup. The log
/// records page and id tags next to every page image; on the read side the
/// registry turns `(tag, ints)` back into a page id and `(tag, id, bytes)`
/// back into a page.
#[derive(Default)]
pub struct PageRegistry {
    id_ctors: HashMap<&'static str, IdCtor>,
    page_ctors: HashMap<&'static str, PageCtor>,
}

impl PageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page-id constructor under `tag`.
    pub fn register_id<F>(&mut self, tag: &'static str, ctor: F)
    where
        F: Fn(&[i32]) -> Result<Box<dyn PageId>> + Send + Sync + 'static,
    {
        self.id_ctors.insert(tag, Box::new(ctor));
    }

    /// Registers a page constructor under `tag`.
    pub fn register_page<F>(&mut self, tag: &'static str, ctor: F)
    where
        F: Fn(&dyn PageId, Vec<u8>) -> Result<Box<dyn Page>> + Send + Sync + 'static,
    {
        self.page_ctors.insert(tag, Box::new(ctor));
    }

    /// Rebuilds a page id from its serialized integers.
    ///
    /// # Errors
    ///
    /// Returns [`PagelogError::CorruptLog`] if the tag is not registered, or
    /// whatever the constructor rejects.
    pub fn make_id(&self, tag: &str, ints: &[i32]) -> Result<Box<dyn PageId>> {
        let ctor = self
            .id_ctors
            .get(tag)
            .ok_or_else(|| PagelogError::CorruptLog(format!("unknown page-id type tag `{tag}`")))?;
        ctor(ints)
    }

    /// Rebuilds a page from an id and raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PagelogError::CorruptLog`] if the tag is not registered, or
    /// whatever the constructor rejects.
    pub fn make_page(&self, tag: &str, id: &dyn PageId, data: Vec<u8>) -> Result<Box<dyn Page>> {
        let ctor = self
            .page_ctors
            .get(tag)
            .ok_or_else(|| PagelogError::CorruptLog(format!("unknown page type tag `{tag}`")))?;
        ctor(id, data)
    }
}
