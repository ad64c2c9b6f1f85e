//! Column-store table manager: one file per column, loaded in bulk with a
//! per-column encoding chosen by an analyzer.
//!
//! The header file `<table>/<table>.tbl` carries the full table schema in
//! the same page-0 layout heap tables use. Each column file
//! `<table>/<table>.<col>.tbl` starts with its encoding tag, value count,
//! and (for dictionary columns) the dictionary itself, followed by encoded
//! data pages. Column stores are read via sequential block readers only;
//! they serve no single-tuple random access and no tuple-at-a-time writes.

pub mod block;
pub mod encoding;

#[cfg(test)]
mod tests;

use block::{ColStoreBlock, decode_page, encode_dict_pages, encode_plain_pages, encode_rle_pages};
use buffer::{BufferPool, NullForcer, WalForcer};
use byteorder::{BigEndian, ByteOrder};
use catalog::TableSchema;
use common::{DbError, DbResult, Row};
use encoding::{ColumnAnalyzer, ColumnEncoding, build_dictionary};
use heap::schema::{SCHEMA_OFFSET, decode_schema, encode_schema};
use heap::tuple::{coerce_value, decode_value, encode_value};
use std::rc::Rc;
use types::{SqlType, Value};

/// Header file of a column-store table, `<table>/<table>.tbl`.
pub fn header_file_name(table: &str) -> String {
    format!("{table}/{table}.tbl")
}

/// Data file of one column, `<table>/<table>.<col>.tbl`.
pub fn column_file_name(table: &str, column: &str) -> String {
    format!("{table}/{table}.{column}.tbl")
}

/// Column-file page-0 metadata starts right after the common file header:
/// `[encoding:u8][valueCount:u32]`, then for dictionary columns
/// `[dictLen:u16]` and the length-prefixed entries.
const META_OFFSET: usize = 3;

/// A column-store table. Created only by [`write_table`](Self::write_table);
/// mutation after the bulk load is not supported.
#[derive(Debug)]
pub struct ColStoreTable {
    table: String,
    schema: TableSchema,
}

impl ColStoreTable {
    /// Bulk-loads `rows` into a new column-store table, choosing an
    /// encoding per column via `analyzer`. The load is not transactional:
    /// every file is flushed and fsynced before this returns.
    pub fn write_table(
        pool: &mut BufferPool,
        analyzer: &dyn ColumnAnalyzer,
        table: &str,
        schema: TableSchema,
        rows: &[Row],
        page_size: usize,
    ) -> DbResult<Self> {
        for row in rows {
            if row.values.len() != schema.columns.len() {
                return Err(DbError::Schema(format!(
                    "row has {} values but '{table}' declares {} columns",
                    row.values.len(),
                    schema.columns.len()
                )));
            }
        }

        let header_name = header_file_name(table);
        let encoded_schema = encode_schema(&schema)?;
        pool.create_db_file(&header_name, storage::DbFileType::ColStoreData, page_size)?;
        write_page_tail(pool, &header_name, 0, SCHEMA_OFFSET, &encoded_schema)?;
        pool.flush(&header_name, None, true, &mut NullForcer)?;

        for (idx, column) in schema.columns.iter().enumerate() {
            let mut values = Vec::with_capacity(rows.len());
            for row in rows {
                values.push(coerce_value(&row.values[idx], column.ty)?);
            }
            let chosen = analyzer.choose_encoding(column, &values);
            tracing::debug!(table, column = %column.name, ?chosen, "column encoding chosen");

            let (meta, pages) = match chosen {
                ColumnEncoding::Uncompressed => {
                    (Vec::new(), encode_plain_pages(column.ty, &values, page_size)?)
                }
                ColumnEncoding::RunLength => {
                    (Vec::new(), encode_rle_pages(column.ty, &values, page_size)?)
                }
                ColumnEncoding::Dictionary => {
                    let dict = build_dictionary(&values)?;
                    let mut meta = Vec::new();
                    meta.extend_from_slice(&(dict.len() as u16).to_be_bytes());
                    for entry in &dict {
                        encode_value(column.ty, entry, &mut meta)?;
                    }
                    (meta, encode_dict_pages(&dict, &values, page_size)?)
                }
            };

            let col_name = column_file_name(table, &column.name);
            pool.create_db_file(&col_name, storage::DbFileType::ColStoreData, page_size)?;
            let mut page0 = vec![chosen.tag()];
            page0.extend_from_slice(&(values.len() as u32).to_be_bytes());
            page0.extend_from_slice(&meta);
            write_page_tail(pool, &col_name, 0, META_OFFSET, &page0)?;
            for (i, page) in pages.iter().enumerate() {
                write_page_tail(pool, &col_name, i as u64 + 1, 0, page)?;
            }
            pool.flush(&col_name, None, true, &mut NullForcer)?;
        }

        tracing::info!(table, rows = rows.len(), "column-store bulk load complete");
        Ok(Self {
            table: table.to_string(),
            schema,
        })
    }

    /// Opens an existing column-store table by reading the header file's
    /// schema page.
    pub fn open(pool: &mut BufferPool, forcer: &mut dyn WalForcer, table: &str) -> DbResult<Self> {
        let header_name = header_file_name(table);
        if !pool.is_open(&header_name) {
            pool.open_db_file(&header_name)?;
        }
        if pool.file_type(&header_name)? != storage::DbFileType::ColStoreData {
            return Err(DbError::Schema(format!("'{table}' is not a column-store table")));
        }
        let page = pool.pin(&header_name, 0, false, forcer)?;
        let schema = decode_schema(&page.data[SCHEMA_OFFSET..])?;
        pool.unpin(&header_name, 0)?;
        Ok(Self {
            table: table.to_string(),
            schema,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Total data pages across all column files, for cost estimation.
    pub fn num_data_pages(&self, pool: &mut BufferPool) -> DbResult<u64> {
        let mut total = 0;
        for column in &self.schema.columns {
            let name = column_file_name(&self.table, &column.name);
            if !pool.is_open(&name) {
                pool.open_db_file(&name)?;
            }
            total += pool.file_num_pages(&name)?.saturating_sub(1);
        }
        Ok(total)
    }

    /// Opens a sequential reader over one column.
    pub fn column_reader(
        &self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
        column_index: usize,
    ) -> DbResult<ColumnReader> {
        let column = self.schema.columns.get(column_index).ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "column index {column_index} out of range for '{}'",
                self.table
            ))
        })?;
        let file_name = column_file_name(&self.table, &column.name);
        if !pool.is_open(&file_name) {
            pool.open_db_file(&file_name)?;
        }

        let page = pool.pin(&file_name, 0, false, forcer)?;
        let data = &page.data;
        let encoding = ColumnEncoding::from_tag(data[META_OFFSET])?;
        let num_values = BigEndian::read_u32(&data[META_OFFSET + 1..META_OFFSET + 5]);
        let dict = if encoding == ColumnEncoding::Dictionary {
            let mut pos = META_OFFSET + 5;
            let len = BigEndian::read_u16(&data[pos..pos + 2]) as usize;
            pos += 2;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                entries.push(decode_value(column.ty, data, &mut pos)?);
            }
            entries
        } else {
            Vec::new()
        };
        pool.unpin(&file_name, 0)?;
        let num_pages = pool.file_num_pages(&file_name)?;

        Ok(ColumnReader {
            file_name,
            ty: column.ty,
            encoding,
            dict: Rc::new(dict),
            num_values,
            num_pages,
            next_page: 1,
            values_read: 0,
            current: None,
        })
    }

    /// Opens a full-table scan that zips every column's reader.
    pub fn scan(&self, pool: &mut BufferPool, forcer: &mut dyn WalForcer) -> DbResult<ColStoreScan> {
        let mut readers = Vec::with_capacity(self.schema.columns.len());
        for idx in 0..self.schema.columns.len() {
            readers.push(self.column_reader(pool, forcer, idx)?);
        }
        Ok(ColStoreScan { readers })
    }
}

/// Streams one column's values in row order, block by block.
pub struct ColumnReader {
    file_name: String,
    ty: SqlType,
    encoding: ColumnEncoding,
    dict: Rc<Vec<Value>>,
    num_values: u32,
    num_pages: u64,
    next_page: u64,
    values_read: u32,
    current: Option<ColStoreBlock>,
}

impl ColumnReader {
    pub fn num_values(&self) -> u32 {
        self.num_values
    }

    pub fn next_value(
        &mut self,
        pool: &mut BufferPool,
        forcer: &mut dyn WalForcer,
    ) -> DbResult<Option<Value>> {
        loop {
            if let Some(block) = &mut self.current {
                if let Some(value) = block.next_value()? {
                    self.values_read += 1;
                    return Ok(Some(value));
                }
                self.current = None;
            }
            if self.next_page >= self.num_pages {
                if self.values_read < self.num_values {
                    return Err(DbError::Corruption(format!(
                        "{} ended after {} of {} values",
                        self.file_name, self.values_read, self.num_values
                    )));
                }
                return Ok(None);
            }
            let page = pool.pin(&self.file_name, self.next_page, false, forcer)?;
            let block = decode_page(self.ty, self.encoding, &self.dict, &page.data);
            pool.unpin(&self.file_name, self.next_page)?;
            self.current = Some(block?);
            self.next_page += 1;
        }
    }

    pub fn rewind(&mut self) {
        self.next_page = 1;
        self.values_read = 0;
        self.current = None;
    }
}

/// Row-at-a-time scan over a column-store table.
pub struct ColStoreScan {
    readers: Vec<ColumnReader>,
}

impl heap::Scannable for ColStoreScan {
    fn next_row(&mut self, pool: &mut BufferPool, forcer: &mut dyn WalForcer) -> DbResult<Option<Row>> {
        let mut values = Vec::with_capacity(self.readers.len());
        for (idx, reader) in self.readers.iter_mut().enumerate() {
            match reader.next_value(pool, forcer)? {
                Some(v) => values.push(v),
                None if idx == 0 => return Ok(None),
                None => {
                    return Err(DbError::Corruption(
                        "column files disagree on row count".into(),
                    ));
                }
            }
        }
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(Row::new(values)))
    }

    fn rewind(&mut self) {
        for reader in &mut self.readers {
            reader.rewind();
        }
    }
}

/// Writes `bytes` into a page at `offset`, creating the page as needed,
/// without WAL logging (bulk load and DDL are flushed directly).
fn write_page_tail(
    pool: &mut BufferPool,
    file_name: &str,
    page_no: u64,
    offset: usize,
    bytes: &[u8],
) -> DbResult<()> {
    let page = pool.pin(file_name, page_no, true, &mut NullForcer)?;
    if offset + bytes.len() > page.data.len() {
        pool.unpin(file_name, page_no)?;
        return Err(DbError::Execution(format!(
            "{} bytes do not fit page {page_no} of {file_name}",
            bytes.len()
        )));
    }
    page.mark_dirty();
    page.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    pool.unpin(file_name, page_no)?;
    Ok(())
}
