//! Heap table manager: variable-length tuples in slotted pages, with the
//! table's schema persisted on page 0 of its file.
//!
//! All page access goes through the buffer pool; mutations are reported to
//! an [`UpdateLogger`] (the transaction manager, or a no-op when
//! transactions are disabled) so the WAL sees every byte change.

pub mod schema;
pub mod slotted;
pub mod tuple;

#[cfg(test)]
mod tests;

use buffer::{BufferPool, UpdateLogger, WalForcer};
use catalog::TableSchema;
use common::{DbError, DbResult, PageId, RecordId, Row};
use schema::{SCHEMA_OFFSET, decode_schema, encode_schema};

/// Logical file name of a table inside the data directory:
/// `<table>/<table>.tbl`.
pub fn table_file_name(table: &str) -> String {
    format!("{table}/{table}.tbl")
}

/// Sequential access over a table's rows. Both table kinds support this.
pub trait Scannable {
    fn next_row(&mut self, pool: &mut BufferPool, forcer: &mut dyn WalForcer) -> DbResult<Option<Row>>;
    /// Restart the scan from the first row.
    fn rewind(&mut self);
}

/// Single-tuple lookup by record id. Column stores cannot serve this.
pub trait RandomAccess {
    fn get(&self, pool: &mut BufferPool, forcer: &mut dyn WalForcer, rid: RecordId) -> DbResult<Row>;
}

/// Tuple-at-a-time mutation. Column stores are bulk-loaded instead.
pub trait Insertable {
    fn insert(&self, pool: &mut BufferPool, log: &mut dyn UpdateLogger, row: &Row) -> DbResult<RecordId>;
    fn delete(&self, pool: &mut BufferPool, log: &mut dyn UpdateLogger, rid: RecordId) -> DbResult<()>;
}

/// A heap table: schema header on page 0, slotted data pages from page 1.
pub struct HeapFile {
    file_name: String,
    schema: TableSchema,
}

impl HeapFile {
    /// Creates the table file, writing the schema header. The header write
    /// is flushed immediately; DDL is not transactional.
    pub fn create(
        pool: &mut BufferPool,
        table: &str,
        schema: TableSchema,
        page_size: usize,
    ) -> DbResult<Self> {
        let file_name = table_file_name(table);
        let encoded = encode_schema(&schema)?;
        if SCHEMA_OFFSET + encoded.len() > page_size {
            return Err(DbError::Schema(format!(
                "schema of '{table}' does not fit a {page_size}-byte header page"
            )));
        }
        pool.create_db_file(&file_name, storage::DbFileType::HeapData, page_size)?;
        let page = pool.pin(&file_name, 0, false, &mut buffer::NullForcer)?;
        page.mark_dirty();
        page.data[SCHEMA_OFFSET..SCHEMA_OFFSET + encoded.len()].copy_from_slice(&encoded);
        pool.unpin(&file_name, 0)?;
        pool.flush(&file_name, Some(0..1), true, &mut buffer::NullForcer)?;
        tracing::debug!(table, "heap table created");
        Ok(Self { file_name, schema })
    }

    /// Opens an existing table, reading its schema from page 0.
    pub fn open(pool: &mut BufferPool, forcer: &mut dyn WalForcer, table: &str) -> DbResult<Self> {
        let file_name = table_file_name(table);
        if !pool.is_open(&file_name) {
            pool.open_db_file(&file_name)?;
        }
        if pool.file_type(&file_name)? != storage::DbFileType::HeapData {
            return Err(DbError::Schema(format!("'{table}' is not a heap table")));
        }
        let page = pool.pin(&file_name, 0, false, forcer)?;
        let schema = decode_schema(&page.data[SCHEMA_OFFSET..])?;
        pool.unpin(&file_name, 0)?;
        Ok(Self { file_name, schema })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn num_pages(&self, pool: &mut BufferPool) -> DbResult<u64> {
        pool.file_num_pages(&self.file_name)
    }

    /// Inserts a tuple into the first data page with room, extending the
    /// file with a fresh page when none has enough free space.
    pub fn add_tuple(
        &self,
        pool: &mut BufferPool,
        log: &mut dyn UpdateLogger,
        row: &Row,
    ) -> DbResult<RecordId> {
        let bytes = tuple::encode_tuple(&self.schema.columns, row)?;
        let num_pages = pool.file_num_pages(&self.file_name)?;

        let mut target = None;
        for page_no in 1..num_pages {
            let page = pool.pin(&self.file_name, page_no, false, &mut *log)?;
            let fits = slotted::can_hold(&page.data, bytes.len());
            if fits {
                target = Some(page_no);
                break;
            }
            pool.unpin(&self.file_name, page_no)?;
        }
        let page_no = match target {
            Some(n) => n,
            None => {
                let n = num_pages.max(1);
                let page = pool.pin(&self.file_name, n, true, &mut *log)?;
                if !slotted::can_hold(&page.data, bytes.len()) {
                    pool.unpin(&self.file_name, n)?;
                    return Err(DbError::Execution(format!(
                        "tuple of {} bytes cannot fit an empty page",
                        bytes.len()
                    )));
                }
                n
            }
        };

        let page = pool.page_mut(&self.file_name, page_no)?;
        page.mark_dirty();
        let slot = slotted::insert_tuple(&mut page.data, &bytes)?;
        log.record_page_update(page)?;
        pool.unpin(&self.file_name, page_no)?;
        Ok(RecordId {
            page_id: PageId(page_no),
            slot,
        })
    }

    pub fn get_tuple(
        &self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
        rid: RecordId,
    ) -> DbResult<Row> {
        self.check_data_page(pool, rid.page_id.0)?;
        let page = pool.pin(&self.file_name, rid.page_id.0, false, forcer)?;
        let row = slotted::tuple_bytes(&page.data, rid.slot)
            .and_then(|bytes| tuple::decode_tuple(&self.schema.columns, bytes));
        pool.unpin(&self.file_name, rid.page_id.0)?;
        let mut row = row?;
        row.set_rid(Some(rid));
        Ok(row)
    }

    pub fn delete_tuple(
        &self,
        pool: &mut BufferPool,
        log: &mut dyn UpdateLogger,
        rid: RecordId,
    ) -> DbResult<()> {
        self.check_data_page(pool, rid.page_id.0)?;
        let page = pool.pin(&self.file_name, rid.page_id.0, false, &mut *log)?;
        page.mark_dirty();
        let deleted = slotted::delete_tuple(&mut page.data, rid.slot);
        if deleted.is_ok() {
            let page = pool.page_mut(&self.file_name, rid.page_id.0)?;
            log.record_page_update(page)?;
        }
        pool.unpin(&self.file_name, rid.page_id.0)?;
        deleted
    }

    /// First tuple in page/slot order, or `None` for an empty table.
    pub fn first_tuple(
        &self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
    ) -> DbResult<Option<(RecordId, Row)>> {
        self.scan_from(pool, forcer, 1, 0)
    }

    /// Tuple following `after` in page/slot order.
    pub fn next_tuple(
        &self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
        after: RecordId,
    ) -> DbResult<Option<(RecordId, Row)>> {
        self.scan_from(pool, forcer, after.page_id.0, after.slot + 1)
    }

    fn scan_from(
        &self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
        mut page_no: u64,
        mut slot: u16,
    ) -> DbResult<Option<(RecordId, Row)>> {
        let num_pages = pool.file_num_pages(&self.file_name)?;
        while page_no < num_pages {
            let page = pool.pin(&self.file_name, page_no, false, forcer)?;
            let count = slotted::slot_count(&page.data);
            let mut found = None;
            while slot < count {
                if slotted::is_live(&page.data, slot) {
                    let bytes = slotted::tuple_bytes(&page.data, slot)?;
                    found = Some((slot, tuple::decode_tuple(&self.schema.columns, bytes)?));
                    break;
                }
                slot += 1;
            }
            pool.unpin(&self.file_name, page_no)?;
            if let Some((slot, mut row)) = found {
                let rid = RecordId {
                    page_id: PageId(page_no),
                    slot,
                };
                row.set_rid(Some(rid));
                return Ok(Some((rid, row)));
            }
            page_no += 1;
            slot = 0;
        }
        Ok(None)
    }

    fn check_data_page(&self, pool: &mut BufferPool, page_no: u64) -> DbResult<()> {
        if page_no == 0 || page_no >= pool.file_num_pages(&self.file_name)? {
            return Err(DbError::InvalidArgument(format!(
                "page {page_no} is not a data page of {}",
                self.file_name
            )));
        }
        Ok(())
    }
}

impl RandomAccess for HeapFile {
    fn get(&self, pool: &mut BufferPool, forcer: &mut dyn WalForcer, rid: RecordId) -> DbResult<Row> {
        self.get_tuple(pool, forcer, rid)
    }
}

impl Insertable for HeapFile {
    fn insert(&self, pool: &mut BufferPool, log: &mut dyn UpdateLogger, row: &Row) -> DbResult<RecordId> {
        self.add_tuple(pool, log, row)
    }

    fn delete(&self, pool: &mut BufferPool, log: &mut dyn UpdateLogger, rid: RecordId) -> DbResult<()> {
        self.delete_tuple(pool, log, rid)
    }
}

/// Stateful full-scan cursor over a heap table.
pub struct HeapScan {
    file: HeapFile,
    cursor: Option<RecordId>,
    done: bool,
}

impl HeapScan {
    pub fn new(file: HeapFile) -> Self {
        Self {
            file,
            cursor: None,
            done: false,
        }
    }

    pub fn table(&self) -> &HeapFile {
        &self.file
    }
}

impl Scannable for HeapScan {
    fn next_row(&mut self, pool: &mut BufferPool, forcer: &mut dyn WalForcer) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let next = match self.cursor {
            None => self.file.first_tuple(pool, forcer)?,
            Some(rid) => self.file.next_tuple(pool, forcer, rid)?,
        };
        match next {
            Some((rid, row)) => {
                self.cursor = Some(rid);
                Ok(Some(row))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn rewind(&mut self) {
        self.cursor = None;
        self.done = false;
    }
}
