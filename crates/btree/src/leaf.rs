//! Leaf page layout:
//!
//! ```text
//! [pageType:u8][entryCount:u16][key₀][rid₀][key₁][rid₁]…
//! ```
//!
//! Keys are length-prefixed serialized tuples; each is followed by the
//! `(pageNo:u32, slot:u16)` heap record it indexes. Entries are kept in
//! key order by the caller; this module only maintains positions.

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult, PageId, RecordId};

use crate::LEAF_PAGE_TYPE;

const COUNT_OFFSET: usize = 1;
const ENTRIES_OFFSET: usize = 3;
const RID_SIZE: usize = 6;

/// Mutable view of a leaf page's bytes.
pub struct LeafPage<'a> {
    data: &'a mut [u8],
}

impl<'a> LeafPage<'a> {
    pub fn init(data: &'a mut [u8]) -> Self {
        data[0] = LEAF_PAGE_TYPE;
        BigEndian::write_u16(&mut data[COUNT_OFFSET..COUNT_OFFSET + 2], 0);
        Self { data }
    }

    pub fn wrap(data: &'a mut [u8]) -> DbResult<Self> {
        if data[0] != LEAF_PAGE_TYPE {
            return Err(DbError::Corruption(format!(
                "expected leaf page type {LEAF_PAGE_TYPE}, found {}",
                data[0]
            )));
        }
        Ok(Self { data })
    }

    pub fn entry_count(&self) -> u16 {
        BigEndian::read_u16(&self.data[COUNT_OFFSET..COUNT_OFFSET + 2])
    }

    fn set_entry_count(&mut self, count: u16) {
        BigEndian::write_u16(&mut self.data[COUNT_OFFSET..COUNT_OFFSET + 2], count);
    }

    fn entry_offset(&self, index: u16) -> usize {
        let mut at = ENTRIES_OFFSET;
        for _ in 0..index {
            at += 2 + BigEndian::read_u16(&self.data[at..at + 2]) as usize + RID_SIZE;
        }
        at
    }

    fn end_offset(&self) -> usize {
        self.entry_offset(self.entry_count())
    }

    pub fn free_space(&self) -> usize {
        self.data.len() - self.end_offset()
    }

    pub fn key(&self, index: u16) -> DbResult<&[u8]> {
        self.check_index(index)?;
        let at = self.entry_offset(index);
        let len = BigEndian::read_u16(&self.data[at..at + 2]) as usize;
        Ok(&self.data[at + 2..at + 2 + len])
    }

    pub fn record_id(&self, index: u16) -> DbResult<RecordId> {
        self.check_index(index)?;
        let at = self.entry_offset(index);
        let len = BigEndian::read_u16(&self.data[at..at + 2]) as usize;
        let rid_at = at + 2 + len;
        Ok(RecordId {
            page_id: PageId(BigEndian::read_u32(&self.data[rid_at..rid_at + 4]) as u64),
            slot: BigEndian::read_u16(&self.data[rid_at + 4..rid_at + 6]),
        })
    }

    /// Inserts an entry at `index`, shifting later entries up. The caller
    /// chooses `index` so keys stay sorted.
    pub fn insert_entry(&mut self, index: u16, key: &[u8], rid: RecordId) -> DbResult<()> {
        if index > self.entry_count() {
            return Err(DbError::InvalidArgument(format!(
                "insert position {index} past {} entries",
                self.entry_count()
            )));
        }
        let entry_len = 2 + key.len() + RID_SIZE;
        if self.free_space() < entry_len {
            return Err(DbError::Execution("leaf page is full".into()));
        }
        let at = self.entry_offset(index);
        let end = self.end_offset();
        self.data.copy_within(at..end, at + entry_len);

        BigEndian::write_u16(&mut self.data[at..at + 2], key.len() as u16);
        self.data[at + 2..at + 2 + key.len()].copy_from_slice(key);
        let rid_at = at + 2 + key.len();
        let page_no: u32 = rid.page_id.0.try_into().map_err(|_| {
            DbError::InvalidArgument(format!("heap page {} exceeds the indexable range", rid.page_id.0))
        })?;
        BigEndian::write_u32(&mut self.data[rid_at..rid_at + 4], page_no);
        BigEndian::write_u16(&mut self.data[rid_at + 4..rid_at + 6], rid.slot);

        let count = self.entry_count();
        self.set_entry_count(count + 1);
        Ok(())
    }

    pub fn remove_entry(&mut self, index: u16) -> DbResult<()> {
        self.check_index(index)?;
        let at = self.entry_offset(index);
        let next = self.entry_offset(index + 1);
        let end = self.end_offset();
        self.data.copy_within(next..end, at);
        let count = self.entry_count();
        self.set_entry_count(count - 1);
        Ok(())
    }

    /// Moves the leftmost `count` entries to `sibling` (appended at its
    /// right end). Returns the separator: this page's new first key, the
    /// key immediately outside the moved range.
    pub fn move_first_to(&mut self, sibling: &mut LeafPage, count: u16) -> DbResult<Vec<u8>> {
        if count == 0 || count >= self.entry_count() {
            return Err(DbError::InvalidArgument(format!(
                "cannot move {count} of {} entries",
                self.entry_count()
            )));
        }
        for i in 0..count {
            let key = self.key(i)?.to_vec();
            let rid = self.record_id(i)?;
            let at = sibling.entry_count();
            sibling.insert_entry(at, &key, rid)?;
        }
        let keep_from = self.entry_offset(count);
        let end = self.end_offset();
        self.data.copy_within(keep_from..end, ENTRIES_OFFSET);
        let remaining = self.entry_count() - count;
        self.set_entry_count(remaining);
        Ok(self.key(0)?.to_vec())
    }

    /// Moves the rightmost `count` entries to `sibling` (prepended before
    /// its old content). Returns the separator: the sibling's new first
    /// key, the first key of the moved range.
    pub fn move_last_to(&mut self, sibling: &mut LeafPage, count: u16) -> DbResult<Vec<u8>> {
        if count == 0 || count >= self.entry_count() {
            return Err(DbError::InvalidArgument(format!(
                "cannot move {count} of {} entries",
                self.entry_count()
            )));
        }
        let first_moved = self.entry_count() - count;
        for i in first_moved..self.entry_count() {
            let key = self.key(i)?.to_vec();
            let rid = self.record_id(i)?;
            sibling.insert_entry(i - first_moved, &key, rid)?;
        }
        self.set_entry_count(first_moved);
        Ok(sibling.key(0)?.to_vec())
    }

    fn check_index(&self, index: u16) -> DbResult<()> {
        if index >= self.entry_count() {
            return Err(DbError::InvalidArgument(format!(
                "entry index {index} out of range 0..{}",
                self.entry_count()
            )));
        }
        Ok(())
    }
}
