//! Buffer pool: maps `(file, pageNo)` to pinned, cached `DBPage`s.
//!
//! Capacity is a page count derived from a byte budget. Eviction is
//! approximate LRU over unpinned pages only; pinned pages are never
//! evicted. Before a dirty page is written back, the pool calls into a
//! `WalForcer` to force the log up to the page's `pageLSN` — the WAL rule
//! is enforced unconditionally, with no bypass.
//!
//! The forcer is passed in per call rather than owned by the pool, since
//! the real `WalForcer` (the `wal` crate's `WalManager`) is also owned
//! directly by the transaction manager, which needs to append records to
//! it outside of any buffer pool operation. A single `BufferPool` can
//! therefore be driven by callers with or without a live WAL (tests and
//! the B+-tree sketch pass `&mut NullForcer`).


use common::{DbError, DbResult};
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use storage::{DBFile, DBPage, DbFileType};

/// Hook the buffer pool calls before writing back a dirty page, so the WAL
/// component can fsync all log records up to and including `page.pageLSN`.
pub trait WalForcer {
    fn force_wal(&mut self, target: common::LogSequenceNumber) -> DbResult<()>;
}

/// Hook table managers call after mutating a pinned page, so the transaction
/// manager can append an `UPDATE_PAGE` record for the diff and stamp the
/// page's LSN. Extends [`WalForcer`] because any caller holding the logger
/// also needs it for pins that may evict dirty pages.
pub trait UpdateLogger: WalForcer {
    fn record_page_update(&mut self, page: &mut DBPage) -> DbResult<()>;
}

/// A `WalForcer`/`UpdateLogger` that does nothing; used when transactions
/// are disabled (direct, non-durable writes) and by components exercising
/// the buffer pool without a WAL attached.
#[derive(Default)]
pub struct NullForcer;

impl WalForcer for NullForcer {
    fn force_wal(&mut self, _target: common::LogSequenceNumber) -> DbResult<()> {
        Ok(())
    }
}

impl UpdateLogger for NullForcer {
    fn record_page_update(&mut self, _page: &mut DBPage) -> DbResult<()> {
        Ok(())
    }
}

/// Given a byte budget and a page size, how many pages fit.
pub fn pages_for_budget(budget_bytes: usize, page_size: usize) -> usize {
    (budget_bytes / page_size).max(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PageKey {
    file_index: usize,
    page_no: u64,
}

/// Page-level cache over a set of open `DBFile`s, identified by logical
/// name (e.g. `"wal-00003.log"`, `"Employee/Employee.id.tbl"`).
pub struct BufferPool {
    base_dir: PathBuf,
    max_pages: usize,
    files: Vec<DBFile>,
    file_names: HashMap<String, usize>,
    pages: HashMap<PageKey, DBPage>,
    /// Recency queue, most-recently-used at the back.
    recency: Vec<PageKey>,
}

impl BufferPool {
    pub fn new(base_dir: impl Into<PathBuf>, max_pages: usize) -> Self {
        assert!(max_pages > 0, "max_pages must be > 0");
        Self {
            base_dir: base_dir.into(),
            max_pages,
            files: Vec::new(),
            file_names: HashMap::new(),
            pages: HashMap::new(),
            recency: Vec::new(),
        }
    }

    fn resolve_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn file_index(&mut self, name: &str) -> Option<usize> {
        self.file_names.get(name).copied()
    }

    /// Registers a brand-new `DBFile`, failing if one already exists on disk.
    pub fn create_db_file(&mut self, name: &str, file_type: DbFileType, page_size: usize) -> DbResult<()> {
        let path = self.resolve_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = DBFile::create(&path, file_type, page_size)?;
        let idx = self.files.len();
        self.files.push(file);
        self.file_names.insert(name.to_string(), idx);
        Ok(())
    }

    /// Opens an existing `DBFile`, recovering its type/page size from the
    /// page-0 header.
    pub fn open_db_file(&mut self, name: &str) -> DbResult<()> {
        let path = self.resolve_path(name);
        let file = DBFile::open(&path)?;
        let idx = self.files.len();
        self.files.push(file);
        self.file_names.insert(name.to_string(), idx);
        Ok(())
    }

    pub fn create_or_open_db_file(&mut self, name: &str, file_type: DbFileType, page_size: usize) -> DbResult<()> {
        if self.resolve_path(name).exists() {
            self.open_db_file(name)
        } else {
            self.create_db_file(name, file_type, page_size)
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.file_names.contains_key(name)
    }

    /// On-disk page count of an open file, including pages not yet cached.
    pub fn file_num_pages(&mut self, name: &str) -> DbResult<u64> {
        let file_index = self.file_index(name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {name:?}"))
        })?;
        self.files[file_index].num_pages()
    }

    /// The `DbFileType` recorded in an open file's page-0 header.
    pub fn file_type(&self, name: &str) -> DbResult<DbFileType> {
        let file_index = self.file_names.get(name).copied().ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {name:?}"))
        })?;
        Ok(self.files[file_index].file_type)
    }

    /// The page size recorded in an open file's page-0 header.
    pub fn file_page_size(&self, name: &str) -> DbResult<usize> {
        let file_index = self.file_names.get(name).copied().ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {name:?}"))
        })?;
        Ok(self.files[file_index].page_size)
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.resolve_path(name)
    }

    fn touch(&mut self, key: PageKey) {
        self.recency.retain(|k| *k != key);
        self.recency.push(key);
    }

    fn evict_one(&mut self, forcer: &mut dyn WalForcer) -> DbResult<()> {
        let victim_pos = self
            .recency
            .iter()
            .position(|key| !self.pages.get(key).expect("recency/pages out of sync").is_pinned());
        let Some(pos) = victim_pos else {
            return Err(DbError::Execution(
                "buffer pool exhausted: all cached pages are pinned".into(),
            ));
        };
        let key = self.recency.remove(pos);
        let mut page = self.pages.remove(&key).expect("recency/pages out of sync");
        if page.is_dirty() {
            self.write_back(&key, &mut page, forcer)?;
        }
        Ok(())
    }

    fn write_back(&mut self, key: &PageKey, page: &mut DBPage, forcer: &mut dyn WalForcer) -> DbResult<()> {
        if let Some(lsn) = page.page_lsn {
            forcer.force_wal(lsn)?;
        }
        let file = &mut self.files[key.file_index];
        file.write_page(key.page_no, &page.data)?;
        page.clear_dirty();
        Ok(())
    }

    /// Fetch a page, incrementing its pin count. Loads from disk (or
    /// allocates, if `create` and the page is past EOF) on a cache miss,
    /// evicting an unpinned victim first if the pool is at capacity.
    pub fn pin(
        &mut self,
        file_name: &str,
        page_no: u64,
        create: bool,
        forcer: &mut dyn WalForcer,
    ) -> DbResult<&mut DBPage> {
        let file_index = self.file_index(file_name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {file_name:?}"))
        })?;
        let key = PageKey { file_index, page_no };

        if !self.pages.contains_key(&key) {
            if self.pages.len() >= self.max_pages {
                self.evict_one(forcer)?;
            }
            let page_size = self.files[file_index].page_size;
            let mut buf = vec![0u8; page_size];
            self.files[file_index].read_page(page_no, &mut buf, create)?;
            let page = DBPage::new(file_name.to_string(), page_no, buf);
            self.pages.insert(key, page);
            self.recency.push(key);
        }

        self.touch(key);
        let page = self.pages.get_mut(&key).expect("just inserted");
        page.pin();
        Ok(page)
    }

    /// Decrement a page's pin count.
    pub fn unpin(&mut self, file_name: &str, page_no: u64) -> DbResult<()> {
        let file_index = self.file_index(file_name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {file_name:?}"))
        })?;
        let key = PageKey { file_index, page_no };
        let page = self
            .pages
            .get_mut(&key)
            .ok_or_else(|| DbError::InvalidArgument(format!("page {page_no} of {file_name:?} is not cached")))?;
        page.unpin()
            .map_err(|e| DbError::InvalidArgument(format!("unpin {file_name:?}:{page_no}: {e}")))?;
        Ok(())
    }

    pub fn mark_dirty(&mut self, file_name: &str, page_no: u64) -> DbResult<()> {
        let file_index = self.file_index(file_name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {file_name:?}"))
        })?;
        let key = PageKey { file_index, page_no };
        let page = self
            .pages
            .get_mut(&key)
            .ok_or_else(|| DbError::InvalidArgument(format!("page {page_no} of {file_name:?} is not cached")))?;
        page.mark_dirty();
        Ok(())
    }

    /// Direct access to a cached page without touching its pin count or
    /// recency, for callers (the transaction manager) that already hold a
    /// pin and need to inspect or patch page state such as `pageLSN`.
    pub fn page_mut(&mut self, file_name: &str, page_no: u64) -> DbResult<&mut DBPage> {
        let file_index = self.file_index(file_name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {file_name:?}"))
        })?;
        let key = PageKey { file_index, page_no };
        self.pages
            .get_mut(&key)
            .ok_or_else(|| DbError::InvalidArgument(format!("page {page_no} of {file_name:?} is not cached")))
    }

    /// Writes dirty pages belonging to `file_name` (optionally restricted
    /// to `page_range`) back to disk, forcing the WAL first.
    pub fn flush(
        &mut self,
        file_name: &str,
        page_range: Option<std::ops::Range<u64>>,
        sync: bool,
        forcer: &mut dyn WalForcer,
    ) -> DbResult<()> {
        let file_index = self.file_index(file_name).ok_or_else(|| {
            DbError::InvalidArgument(format!("no open DBFile registered under {file_name:?}"))
        })?;
        let keys: Vec<PageKey> = self
            .pages
            .keys()
            .copied()
            .filter(|k| k.file_index == file_index)
            .filter(|k| page_range.as_ref().is_none_or(|r| r.contains(&k.page_no)))
            .collect();
        for key in keys {
            let mut page = self.pages.remove(&key).expect("just listed");
            if page.is_dirty() {
                self.write_back(&key, &mut page, forcer)?;
            }
            self.pages.insert(key, page);
        }
        if sync {
            self.files[file_index].sync()?;
        }
        Ok(())
    }

    /// Writes every dirty page in the pool back to disk. With `sync`,
    /// every open file is fsynced, covering pages written during earlier
    /// evictions as well as this pass.
    pub fn flush_all(&mut self, sync: bool, forcer: &mut dyn WalForcer) -> DbResult<()> {
        let keys: Vec<PageKey> = self.pages.keys().copied().collect();
        for key in keys {
            let mut page = self.pages.remove(&key).expect("just listed");
            if page.is_dirty() {
                self.write_back(&key, &mut page, forcer)?;
            }
            self.pages.insert(key, page);
        }
        if sync {
            for file in &mut self.files {
                file.sync()?;
            }
        }
        Ok(())
    }

    pub fn num_cached_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
