//! File-backed page store for heap tables.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{PagelogError, Result};
use crate::page::{
    HeapPage, HeapPageId, Page, PageId, PageRegistry, HEAP_PAGE_ID_TAG, HEAP_PAGE_TAG, PAGE_SIZE,
};
use crate::store::PageStore;

/// Page store keeping one fixed-size-page file per table under a directory.
///
/// Pages live in an in-memory cache with dirty tracking; [`HeapStore::put_page`]
/// is the buffer-side mutation path, [`PageStore::flush_all_dirty`] makes the
/// cached updates durable. There is no eviction: the cache only grows, which
/// is all the recovery subsystem needs from its collaborator.
pub struct HeapStore {
    dir: PathBuf,
    pool_mutex: Mutex<()>,
    registry: PageRegistry,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    cache: HashMap<HeapPageId, Vec<u8>>,
    dirty: HashSet<HeapPageId>,
}

impl HeapStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// Registers the heap page types in the store's [`PageRegistry`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| {
                PagelogError::IoFailure(format!("failed to create store directory: {e}"))
            })?;
        }

        let mut registry = PageRegistry::new();
        registry.register_id(HEAP_PAGE_ID_TAG, |ints| {
            Ok(Box::new(HeapPageId::from_ints(ints)?) as Box<dyn PageId>)
        });
        registry.register_page(HEAP_PAGE_TAG, |id, data| {
            let id = HeapPageId::downcast(id)?;
            Ok(Box::new(HeapPage::new(id, data)?) as Box<dyn Page>)
        });

        Ok(Self {
            dir: dir.to_path_buf(),
            pool_mutex: Mutex::new(()),
            registry,
            inner: Mutex::new(StoreInner::default()),
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Installs a page into the cache and marks it dirty.
    ///
    /// This is the path a buffer pool takes when a transaction mutates a
    /// page: the change is buffered here and reaches the table file on
    /// [`PageStore::flush_all_dirty`] (or is dropped by
    /// [`PageStore::discard_cached`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the page is not a heap page.
    pub fn put_page(&self, page: &dyn Page) -> Result<()> {
        let id = HeapPageId::downcast(page.id())?;
        let mut inner = self.inner.lock();
        inner.cache.insert(id, page.data().to_vec());
        inner.dirty.insert(id);
        Ok(())
    }

    fn table_path(&self, table: i32) -> PathBuf {
        self.dir.join(format!("table_{table}.dat"))
    }

    /// Reads a page's bytes from its table file, zero-filled past EOF.
    fn read_page_bytes(&self, id: HeapPageId) -> Result<Vec<u8>> {
        let mut data = vec![0u8; PAGE_SIZE];
        let path = self.table_path(id.table);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(data),
            Err(e) => {
                return Err(PagelogError::IoFailure(format!(
                    "failed to open table file {}: {e}",
                    path.display()
                )))
            }
        };

        file.seek(SeekFrom::Start(id.offset()))
            .map_err(|e| PagelogError::IoFailure(format!("failed to seek to {id}: {e}")))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            match file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    return Err(PagelogError::IoFailure(format!("failed to read {id}: {e}")))
                }
            }
        }
        Ok(data)
    }

    fn write_page_bytes(&self, id: HeapPageId, data: &[u8]) -> Result<File> {
        let path = self.table_path(id.table);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                PagelogError::IoFailure(format!(
                    "failed to open table file {}: {e}",
                    path.display()
                ))
            })?;
        file.seek(SeekFrom::Start(id.offset()))
            .map_err(|e| PagelogError::IoFailure(format!("failed to seek to {id}: {e}")))?;
        file.write_all(data)
            .map_err(|e| PagelogError::IoFailure(format!("failed to write {id}: {e}")))?;
        Ok(file)
    }
}

impl PageStore for HeapStore {
    fn pool_lock(&self) -> MutexGuard<'_, ()> {
        self.pool_mutex.lock()
    }

    fn load_page(&self, id: &dyn PageId) -> Result<Box<dyn Page>> {
        let id = HeapPageId::downcast(id)?;
        let mut inner = self.inner.lock();
        if let Some(bytes) = inner.cache.get(&id) {
            return Ok(Box::new(HeapPage::new(id, bytes.clone())?));
        }
        let bytes = self.read_page_bytes(id)?;
        inner.cache.insert(id, bytes.clone());
        Ok(Box::new(HeapPage::new(id, bytes)?))
    }

    fn write_page(&self, page: &dyn Page) -> Result<()> {
        let id = HeapPageId::downcast(page.id())?;
        self.write_page_bytes(id, page.data())?;
        let mut inner = self.inner.lock();
        inner.cache.insert(id, page.data().to_vec());
        inner.dirty.remove(&id);
        Ok(())
    }

    fn discard_cached(&self, id: &dyn PageId) {
        if let Ok(id) = HeapPageId::downcast(id) {
            let mut inner = self.inner.lock();
            inner.cache.remove(&id);
            inner.dirty.remove(&id);
        }
    }

    fn flush_all_dirty(&self) -> Result<()> {
        let pages: Vec<(HeapPageId, Vec<u8>)> = {
            let mut inner = self.inner.lock();
            let pages = inner
                .dirty
                .iter()
                .filter_map(|id| inner.cache.get(id).map(|bytes| (*id, bytes.clone())))
                .collect();
            inner.dirty.clear();
            pages
        };

        let mut table_files: HashMap<i32, File> = HashMap::new();
        for (id, bytes) in &pages {
            let file = self.write_page_bytes(*id, bytes)?;
            table_files.insert(id.table, file);
        }
        for (table, file) in &table_files {
            file.sync_all().map_err(|e| {
                PagelogError::IoFailure(format!("failed to sync table file for table {table}: {e}"))
            })?;
        }
        Ok(())
    }

    fn reconstruct_page_id(&self, tag: &str, ints: &[i32]) -> Result<Box<dyn PageId>> {
        self.registry.make_id(tag, ints)
    }

    fn reconstruct_page(&self, tag: &str, id: &dyn PageId, data: Vec<u8>) -> Result<Box<dyn Page>> {
        self.registry.make_page(tag, id, data)
    }
}
