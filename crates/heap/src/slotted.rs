//! Slotted-page layout for heap data pages.
//!
//! A directory of `(offset, length)` entries grows from the page start;
//! tuple bodies grow from the page end; the free region sits in between.
//! A slot with offset and length both zero is empty (offset 0 can never
//! address a tuple body, since bodies live at the high end of the page).
//!
//! ```text
//! [slotCount:u16][off₀:u16 len₀:u16][off₁ len₁]…   free   …[body₁][body₀]
//! ```

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult};

const DIR_START: usize = 2;
const SLOT_ENTRY_SIZE: usize = 4;

pub fn slot_count(data: &[u8]) -> u16 {
    BigEndian::read_u16(&data[0..2])
}

fn set_slot_count(data: &mut [u8], count: u16) {
    BigEndian::write_u16(&mut data[0..2], count);
}

fn slot_entry(data: &[u8], slot: u16) -> (u16, u16) {
    let at = DIR_START + slot as usize * SLOT_ENTRY_SIZE;
    (
        BigEndian::read_u16(&data[at..at + 2]),
        BigEndian::read_u16(&data[at + 2..at + 4]),
    )
}

fn set_slot_entry(data: &mut [u8], slot: u16, offset: u16, len: u16) {
    let at = DIR_START + slot as usize * SLOT_ENTRY_SIZE;
    BigEndian::write_u16(&mut data[at..at + 2], offset);
    BigEndian::write_u16(&mut data[at + 2..at + 4], len);
}

fn is_empty_slot(entry: (u16, u16)) -> bool {
    entry == (0, 0)
}

fn directory_end(data: &[u8]) -> usize {
    DIR_START + slot_count(data) as usize * SLOT_ENTRY_SIZE
}

/// Offset of the lowest live tuple body, or the page size when none exist.
fn body_start(data: &[u8]) -> usize {
    let mut start = data.len();
    for slot in 0..slot_count(data) {
        let entry = slot_entry(data, slot);
        if !is_empty_slot(entry) {
            start = start.min(entry.0 as usize);
        }
    }
    start
}

/// Contiguous free bytes between the directory and the tuple bodies.
pub fn free_space(data: &[u8]) -> usize {
    body_start(data).saturating_sub(directory_end(data))
}

/// Whether a tuple of `len` bytes fits, counting the directory entry a
/// fresh slot would need.
pub fn can_hold(data: &[u8], len: usize) -> bool {
    let has_empty_slot = (0..slot_count(data)).any(|s| is_empty_slot(slot_entry(data, s)));
    let need = len + if has_empty_slot { 0 } else { SLOT_ENTRY_SIZE };
    free_space(data) >= need
}

/// Appends a tuple body and fills a slot (reusing an empty one if any),
/// returning the slot index.
pub fn insert_tuple(data: &mut [u8], bytes: &[u8]) -> DbResult<u16> {
    if !can_hold(data, bytes.len()) {
        return Err(DbError::Execution(format!(
            "page has {} free bytes, tuple needs {}",
            free_space(data),
            bytes.len()
        )));
    }
    let count = slot_count(data);
    let slot = (0..count)
        .find(|&s| is_empty_slot(slot_entry(data, s)))
        .unwrap_or(count);
    if slot == count {
        set_slot_count(data, count + 1);
    }
    let offset = body_start(data) - bytes.len();
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
    set_slot_entry(data, slot, offset as u16, bytes.len() as u16);
    Ok(slot)
}

/// The raw bytes of a live tuple.
pub fn tuple_bytes<'a>(data: &'a [u8], slot: u16) -> DbResult<&'a [u8]> {
    if slot >= slot_count(data) {
        return Err(DbError::InvalidArgument(format!(
            "slot {slot} past the end of a {}-slot directory",
            slot_count(data)
        )));
    }
    let (offset, len) = slot_entry(data, slot);
    if is_empty_slot((offset, len)) {
        return Err(DbError::InvalidArgument(format!("slot {slot} is empty")));
    }
    Ok(&data[offset as usize..offset as usize + len as usize])
}

pub fn is_live(data: &[u8], slot: u16) -> bool {
    slot < slot_count(data) && !is_empty_slot(slot_entry(data, slot))
}

/// Marks a slot free and compacts the tuple bodies so the freed bytes
/// rejoin the contiguous free region. Trailing empty slots are trimmed
/// from the directory.
pub fn delete_tuple(data: &mut [u8], slot: u16) -> DbResult<()> {
    if slot >= slot_count(data) {
        return Err(DbError::InvalidArgument(format!(
            "slot {slot} past the end of a {}-slot directory",
            slot_count(data)
        )));
    }
    let (offset, len) = slot_entry(data, slot);
    if is_empty_slot((offset, len)) {
        return Err(DbError::InvalidArgument(format!("slot {slot} is already empty")));
    }

    // Slide every body below the deleted one up by its length.
    let start = body_start(data);
    let (offset, len) = (offset as usize, len as usize);
    data.copy_within(start..offset, start + len);
    for s in 0..slot_count(data) {
        let entry = slot_entry(data, s);
        if !is_empty_slot(entry) && (entry.0 as usize) < offset {
            set_slot_entry(data, s, entry.0 + len as u16, entry.1);
        }
    }
    set_slot_entry(data, slot, 0, 0);

    let mut count = slot_count(data);
    while count > 0 && is_empty_slot(slot_entry(data, count - 1)) {
        count -= 1;
    }
    set_slot_count(data, count);
    Ok(())
}
