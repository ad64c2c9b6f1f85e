//! Inner (non-leaf) page layout:
//!
//! ```text
//! [pageType:u8][pointerCount:u16][ptr₀:u16][key₀][ptr₁][key₁]…[ptrₙ]
//! ```
//!
//! Pointers are child page numbers; each key is a length-prefixed
//! serialized tuple sitting between the two pointers whose subtree key
//! ranges it separates. A page with `n` pointers holds `n − 1` keys.

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult};

use crate::INNER_PAGE_TYPE;

const COUNT_OFFSET: usize = 1;
const ENTRIES_OFFSET: usize = 3;

/// Mutable view of an inner page's bytes.
pub struct InnerPage<'a> {
    data: &'a mut [u8],
}

impl<'a> InnerPage<'a> {
    /// Formats `data` as an empty inner page (zero pointers).
    pub fn init(data: &'a mut [u8]) -> Self {
        data[0] = INNER_PAGE_TYPE;
        BigEndian::write_u16(&mut data[COUNT_OFFSET..COUNT_OFFSET + 2], 0);
        Self { data }
    }

    /// Wraps an existing inner page, validating the type byte.
    pub fn wrap(data: &'a mut [u8]) -> DbResult<Self> {
        if data[0] != INNER_PAGE_TYPE {
            return Err(DbError::Corruption(format!(
                "expected inner page type {INNER_PAGE_TYPE}, found {}",
                data[0]
            )));
        }
        Ok(Self { data })
    }

    pub fn pointer_count(&self) -> u16 {
        BigEndian::read_u16(&self.data[COUNT_OFFSET..COUNT_OFFSET + 2])
    }

    pub fn key_count(&self) -> u16 {
        self.pointer_count().saturating_sub(1)
    }

    fn set_pointer_count(&mut self, count: u16) {
        BigEndian::write_u16(&mut self.data[COUNT_OFFSET..COUNT_OFFSET + 2], count);
    }

    /// Byte offset just past the last pointer.
    fn end_offset(&self) -> usize {
        let mut at = ENTRIES_OFFSET;
        let count = self.pointer_count();
        for i in 0..count {
            at += 2;
            if i + 1 < count {
                at += 2 + BigEndian::read_u16(&self.data[at..at + 2]) as usize;
            }
        }
        at
    }

    pub fn free_space(&self) -> usize {
        self.data.len() - self.end_offset()
    }

    fn pointer_offset(&self, index: u16) -> usize {
        let mut at = ENTRIES_OFFSET;
        for _ in 0..index {
            at += 2;
            at += 2 + BigEndian::read_u16(&self.data[at..at + 2]) as usize;
        }
        at
    }

    pub fn pointer(&self, index: u16) -> DbResult<u16> {
        self.check_index(index, self.pointer_count(), "pointer")?;
        let at = self.pointer_offset(index);
        Ok(BigEndian::read_u16(&self.data[at..at + 2]))
    }

    /// Key `i`, separating the subtrees of pointers `i` and `i + 1`.
    pub fn key(&self, index: u16) -> DbResult<&[u8]> {
        self.check_index(index, self.key_count(), "key")?;
        let at = self.pointer_offset(index) + 2;
        let len = BigEndian::read_u16(&self.data[at..at + 2]) as usize;
        Ok(&self.data[at + 2..at + 2 + len])
    }

    /// Installs the first pointer of an empty page.
    pub fn set_first_pointer(&mut self, ptr: u16) -> DbResult<()> {
        if self.pointer_count() != 0 {
            return Err(DbError::InvalidArgument(
                "page already has a first pointer".into(),
            ));
        }
        BigEndian::write_u16(&mut self.data[ENTRIES_OFFSET..ENTRIES_OFFSET + 2], ptr);
        self.set_pointer_count(1);
        Ok(())
    }

    /// Appends `[key, ptr]` after the current last pointer.
    pub fn append_entry(&mut self, key: &[u8], ptr: u16) -> DbResult<()> {
        if self.pointer_count() == 0 {
            return Err(DbError::InvalidArgument(
                "cannot append a keyed entry before the first pointer".into(),
            ));
        }
        if self.free_space() < 4 + key.len() {
            return Err(DbError::Execution("inner page is full".into()));
        }
        let mut at = self.end_offset();
        BigEndian::write_u16(&mut self.data[at..at + 2], key.len() as u16);
        at += 2;
        self.data[at..at + key.len()].copy_from_slice(key);
        at += key.len();
        BigEndian::write_u16(&mut self.data[at..at + 2], ptr);
        let count = self.pointer_count();
        self.set_pointer_count(count + 1);
        Ok(())
    }

    /// Moves the leftmost `count` pointers into `sibling` (its right end).
    /// `parent_key` glues the sibling's old last pointer to the first moved
    /// one and may be omitted only for an empty sibling (growing the tree).
    /// Returns the separating key immediately outside the moved range,
    /// which the caller promotes into the parent; it is removed from this
    /// page along with the moved entries.
    pub fn move_first_to(
        &mut self,
        sibling: &mut InnerPage,
        count: u16,
        parent_key: Option<&[u8]>,
    ) -> DbResult<Vec<u8>> {
        if count == 0 || count >= self.pointer_count() {
            return Err(DbError::InvalidArgument(format!(
                "cannot move {count} of {} pointers",
                self.pointer_count()
            )));
        }
        if sibling.pointer_count() > 0 && parent_key.is_none() {
            return Err(DbError::InvalidArgument(
                "a non-empty sibling needs the parent key to glue the ranges".into(),
            ));
        }

        // Copy the moved run into the sibling, glued by parent_key.
        for i in 0..count {
            let ptr = self.pointer(i)?;
            if sibling.pointer_count() == 0 {
                sibling.set_first_pointer(ptr)?;
            } else if i == 0 {
                sibling.append_entry(parent_key.expect("checked above"), ptr)?;
            } else {
                let key = self.key(i - 1)?.to_vec();
                sibling.append_entry(&key, ptr)?;
            }
        }

        // The separator is the key just past the moved pointers.
        let separator = self.key(count - 1)?.to_vec();

        // Shift the remainder of this page down over the moved prefix.
        let keep_from = self.pointer_offset(count);
        let end = self.end_offset();
        self.data.copy_within(keep_from..end, ENTRIES_OFFSET);
        let remaining = self.pointer_count() - count;
        self.set_pointer_count(remaining);
        Ok(separator)
    }

    /// Moves the rightmost `count` pointers into `sibling` (its left end).
    /// Mirror image of [`move_first_to`]; the returned separator is the key
    /// immediately before the moved range.
    pub fn move_last_to(
        &mut self,
        sibling: &mut InnerPage,
        count: u16,
        parent_key: Option<&[u8]>,
    ) -> DbResult<Vec<u8>> {
        if count == 0 || count >= self.pointer_count() {
            return Err(DbError::InvalidArgument(format!(
                "cannot move {count} of {} pointers",
                self.pointer_count()
            )));
        }
        if sibling.pointer_count() > 0 && parent_key.is_none() {
            return Err(DbError::InvalidArgument(
                "a non-empty sibling needs the parent key to glue the ranges".into(),
            ));
        }

        let total = self.pointer_count();
        let first_moved = total - count;

        // Gather the rebuilt sibling content: the moved run, then (glued by
        // the parent key) the sibling's old entries.
        let sibling_first = self.pointer(first_moved)?;
        let mut rebuilt: Vec<(Vec<u8>, u16)> = Vec::new();
        for i in first_moved + 1..total {
            rebuilt.push((self.key(i - 1)?.to_vec(), self.pointer(i)?));
        }
        if sibling.pointer_count() > 0 {
            rebuilt.push((
                parent_key.expect("checked above").to_vec(),
                sibling.pointer(0)?,
            ));
            for i in 1..sibling.pointer_count() {
                rebuilt.push((sibling.key(i - 1)?.to_vec(), sibling.pointer(i)?));
            }
        }
        sibling.set_pointer_count(0);
        sibling.set_first_pointer(sibling_first)?;
        for (key, ptr) in &rebuilt {
            sibling.append_entry(key, *ptr)?;
        }

        // Truncating to `first_moved` pointers drops the moved run and the
        // separating key just before it, which moves up into the parent.
        let separator = self.key(first_moved - 1)?.to_vec();
        self.set_pointer_count(first_moved);
        Ok(separator)
    }

    fn check_index(&self, index: u16, count: u16, what: &str) -> DbResult<()> {
        if index >= count {
            return Err(DbError::InvalidArgument(format!(
                "{what} index {index} out of range 0..{count}"
            )));
        }
        Ok(())
    }
}
