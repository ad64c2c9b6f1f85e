//! ARIES-style redo/undo recovery and single-transaction rollback.
//!
//! Recovery operates directly on data files through `storage::DBFile`,
//! bypassing the buffer pool: at startup there is no live buffer pool yet,
//! and recovery's writes are immediately fsynced page by page, so there is
//! nothing left for a buffer pool to flush afterward.

use crate::record::{RedoSegment, WalRecord};
use crate::{HEADER_LEN, WalManager, wal_file_name};
use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult, LogSequenceNumber, TransactionId};
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeSet;
use std::path::Path;
use storage::{DBFile, apply_new_bytes};

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub redone_updates: usize,
    pub txns_redone_complete: usize,
    pub txns_undone: Vec<TransactionId>,
}

struct WalFileHandle {
    bytes: Vec<u8>,
    prev_file_last_offset: u32,
}

fn load_wal_file(dir: &Path, number: u16) -> DbResult<WalFileHandle> {
    let bytes = std::fs::read(dir.join(wal_file_name(number)))?;
    if bytes.len() < HEADER_LEN as usize {
        return Err(DbError::Corruption(format!("WAL file {number} shorter than its header")));
    }
    let prev_file_last_offset = BigEndian::read_u32(&bytes[2..6]);
    Ok(WalFileHandle {
        bytes,
        prev_file_last_offset,
    })
}

fn get_or_load<'a>(cache: &'a mut HashMap<u16, WalFileHandle>, dir: &Path, number: u16) -> DbResult<&'a WalFileHandle> {
    if !cache.contains_key(&number) {
        let handle = load_wal_file(dir, number)?;
        cache.insert(number, handle);
    }
    Ok(cache.get(&number).unwrap())
}

/// Reads and decodes the record at `lsn`. Used by single-transaction
/// rollback, which walks a live transaction's own `prevLSN` chain directly
/// rather than the terminator-byte backward scan crash recovery needs.
pub fn read_record(dir: &Path, lsn: LogSequenceNumber) -> DbResult<WalRecord> {
    let handle = load_wal_file(dir, lsn.file_number)?;
    let (record, _) = WalRecord::decode(&handle.bytes[lsn.file_offset as usize..])?;
    Ok(record)
}

fn open_data_file<'a>(
    dir: &Path,
    open_files: &'a mut HashMap<String, DBFile>,
    file_name: &str,
) -> DbResult<&'a mut DBFile> {
    if !open_files.contains_key(file_name) {
        let file = DBFile::open(&dir.join(file_name))?;
        open_files.insert(file_name.to_string(), file);
    }
    Ok(open_files.get_mut(file_name).unwrap())
}

fn apply_segments<'a>(
    dir: &Path,
    open_files: &mut HashMap<String, DBFile>,
    file_name: &str,
    page_no: u16,
    segments: impl Iterator<Item = (u32, &'a [u8])>,
) -> DbResult<()> {
    let file = open_data_file(dir, open_files, file_name)?;
    let page_size = file.page_size;
    let mut buf = vec![0u8; page_size];
    file.read_page(page_no as u64, &mut buf, false)?;
    for (index, bytes) in segments {
        apply_new_bytes(&mut buf, index, bytes);
    }
    file.write_page(page_no as u64, &buf)?;
    Ok(())
}

/// Walks the log from `from` (inclusive) up to (but not including) `to`,
/// rolling across files as needed, calling `visit` for each decoded record.
/// Returns the cursor position after the last record visited, which must
/// equal `to` for a well-formed log.
fn forward_scan(
    dir: &Path,
    from: LogSequenceNumber,
    to: LogSequenceNumber,
    mut visit: impl FnMut(LogSequenceNumber, &WalRecord) -> DbResult<()>,
) -> DbResult<LogSequenceNumber> {
    let mut file_number = from.file_number;
    let mut offset = from.file_offset as usize;
    let mut bytes = std::fs::read(dir.join(wal_file_name(file_number)))?;

    loop {
        let here = LogSequenceNumber::new(file_number, offset as u32);
        if here >= to {
            return Ok(here);
        }
        if offset >= bytes.len() {
            file_number = file_number.wrapping_add(1);
            bytes = std::fs::read(dir.join(wal_file_name(file_number)))?;
            offset = HEADER_LEN as usize;
            continue;
        }
        let (record, consumed) = WalRecord::decode(&bytes[offset..])?;
        visit(LogSequenceNumber::new(file_number, offset as u32), &record)?;
        offset += consumed;
    }
}

/// Given the position right after a terminator byte, finds the LSN of the
/// preceding record, or `None` if there is none (the true start of the log).
fn step_backward(
    dir: &Path,
    cache: &mut HashMap<u16, WalFileHandle>,
    file_number: u16,
    offset: u32,
) -> DbResult<Option<LogSequenceNumber>> {
    if offset == HEADER_LEN as u32 {
        let handle = get_or_load(cache, dir, file_number)?;
        if file_number == 0 && handle.prev_file_last_offset == 0 {
            return Ok(None);
        }
        let prev_file_number = file_number.wrapping_sub(1);
        return Ok(Some(LogSequenceNumber::new(prev_file_number, handle.prev_file_last_offset)));
    }
    let handle = get_or_load(cache, dir, file_number)?;
    let term_pos = offset as usize - 1;
    let term_type = *handle
        .bytes
        .get(term_pos)
        .ok_or_else(|| DbError::Corruption("WAL backward scan ran off the start of the file".into()))?;
    use crate::record::{ABORT_TXN, COMMIT_TXN, START_TXN, UPDATE_PAGE, UPDATE_PAGE_REDO_ONLY};
    match term_type {
        START_TXN => Ok(Some(LogSequenceNumber::new(file_number, offset - 6))),
        COMMIT_TXN | ABORT_TXN => Ok(Some(LogSequenceNumber::new(file_number, offset - 12))),
        UPDATE_PAGE | UPDATE_PAGE_REDO_ONLY => {
            let start_off = BigEndian::read_u32(&handle.bytes[term_pos - 4..term_pos]);
            Ok(Some(LogSequenceNumber::new(file_number, start_off)))
        }
        other => Err(DbError::Corruption(format!("unknown WAL terminator byte {other}"))),
    }
}

/// Runs the full two-pass recovery algorithm described for the write-ahead
/// log: redo forward from `first_lsn` to `next_lsn`, then undo backward,
/// compensating incomplete transactions with `UPDATE_PAGE_REDO_ONLY`
/// records and `ABORT_TXN`. Returns the new `nextLSN` to persist into the
/// txn-state page.
pub fn recover(
    dir: &Path,
    first_lsn: LogSequenceNumber,
    next_lsn: LogSequenceNumber,
    page_size: usize,
) -> DbResult<(LogSequenceNumber, RecoveryReport)> {
    if first_lsn == next_lsn {
        return Ok((next_lsn, RecoveryReport::default()));
    }

    let mut incomplete: HashMap<TransactionId, LogSequenceNumber> = HashMap::new();
    let mut completed: HashSet<TransactionId> = HashSet::new();
    let mut open_files: HashMap<String, DBFile> = HashMap::new();
    let mut report = RecoveryReport::default();

    let cursor = forward_scan(dir, first_lsn, next_lsn, |lsn, record| {
        match record {
            WalRecord::StartTxn { txn_id } => {
                incomplete.insert(*txn_id, lsn);
            }
            WalRecord::CommitTxn { txn_id, .. } | WalRecord::AbortTxn { txn_id, .. } => {
                incomplete.remove(txn_id);
                completed.insert(*txn_id);
                report.txns_redone_complete += 1;
            }
            WalRecord::UpdatePage {
                txn_id,
                file_name,
                page_no,
                segments,
                ..
            } => {
                apply_segments(
                    dir,
                    &mut open_files,
                    file_name,
                    *page_no,
                    segments.iter().map(|s| (s.index, s.new_bytes.as_slice())),
                )?;
                incomplete.insert(*txn_id, lsn);
                report.redone_updates += 1;
            }
            WalRecord::UpdatePageRedoOnly {
                txn_id,
                file_name,
                page_no,
                segments,
                ..
            } => {
                apply_segments(
                    dir,
                    &mut open_files,
                    file_name,
                    *page_no,
                    segments.iter().map(|s| (s.index, s.new_bytes.as_slice())),
                )?;
                incomplete.insert(*txn_id, lsn);
                report.redone_updates += 1;
            }
        }
        Ok(())
    })?;

    if cursor != next_lsn {
        return Err(DbError::Corruption(format!(
            "WAL redo pass ended at {cursor} but expected {next_lsn}"
        )));
    }

    // Undo pass: a WalManager resumed at the log's physical tail appends
    // compensating records as it walks backward. The tail may extend past
    // `next_lsn` when the crash left appended-but-never-forced records; the
    // WAL rule guarantees no data page depends on that orphan region, and
    // the backward scan below starts at `next_lsn`, not the tail.
    let mut wal = WalManager::open_or_create(dir, page_size)?;
    if wal.next_lsn() < next_lsn {
        return Err(DbError::Corruption(format!(
            "WAL ends at {} but the txn-state page recorded nextLSN {next_lsn}",
            wal.next_lsn()
        )));
    }
    let mut cache: HashMap<u16, WalFileHandle> = HashMap::new();
    // next_lsn is one past the last record; step back once to land on it.
    let mut cursor = step_backward(dir, &mut cache, next_lsn.file_number, next_lsn.file_offset)?;

    while let Some(lsn) = cursor {
        if incomplete.is_empty() {
            break;
        }
        let handle = get_or_load(&mut cache, dir, lsn.file_number)?;
        let (record, _) = WalRecord::decode(&handle.bytes[lsn.file_offset as usize..])?;
        let txn_id = record.txn_id();

        if let Some(&last_lsn) = incomplete.get(&txn_id) {
            match &record {
                WalRecord::StartTxn { .. } => {
                    wal.append(&WalRecord::AbortTxn {
                        txn_id,
                        prev_lsn: last_lsn,
                    })?;
                    incomplete.remove(&txn_id);
                    report.txns_undone.push(txn_id);
                }
                WalRecord::UpdatePage {
                    file_name,
                    page_no,
                    segments,
                    ..
                } => {
                    apply_segments(
                        dir,
                        &mut open_files,
                        file_name,
                        *page_no,
                        segments.iter().map(|s| (s.index, s.old_bytes.as_slice())),
                    )?;
                    let redo_segments: Vec<RedoSegment> = segments
                        .iter()
                        .map(|s| RedoSegment {
                            index: s.index,
                            new_bytes: s.old_bytes.clone(),
                        })
                        .collect();
                    let new_lsn = wal.append(&WalRecord::UpdatePageRedoOnly {
                        txn_id,
                        prev_lsn: last_lsn,
                        file_name: file_name.clone(),
                        page_no: *page_no,
                        segments: redo_segments,
                        start_off: 0,
                    })?;
                    incomplete.insert(txn_id, new_lsn);
                }
                WalRecord::UpdatePageRedoOnly { .. } => {
                    // Already a compensation record from an earlier undo; skip.
                }
                WalRecord::CommitTxn { .. } | WalRecord::AbortTxn { .. } => {
                    unreachable!("a completed transaction cannot still be incomplete")
                }
            }
        }
        if lsn <= first_lsn {
            break;
        }
        cursor = step_backward(dir, &mut cache, lsn.file_number, lsn.file_offset)?;
    }

    let touched: BTreeSet<String> = open_files.keys().cloned().collect();
    for name in touched {
        open_files.get_mut(&name).unwrap().sync()?;
    }

    Ok((wal.next_lsn(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{DbFileType, diff_bytes};
    use tempfile::tempdir;

    fn first_lsn_at_start() -> LogSequenceNumber {
        LogSequenceNumber::new(0, HEADER_LEN as u32)
    }

    #[test]
    fn uncommitted_transaction_is_undone_on_recovery() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("t.tbl");
        {
            let mut file = DBFile::create(&data_path, DbFileType::HeapData, 512).unwrap();
            file.read_page(1, &mut vec![0u8; 512], true).unwrap();
            let old = vec![0u8; 512];
            file.write_page(1, &old).unwrap();
        }

        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn0 = wal.append(&WalRecord::StartTxn { txn_id: 1 }).unwrap();

        let old_page = vec![0u8; 512];
        let mut new_page = old_page.clone();
        new_page[10] = 7;
        let segments = diff_bytes(&old_page, &new_page);

        wal.append(&WalRecord::UpdatePage {
            txn_id: 1,
            prev_lsn: lsn0,
            file_name: "t.tbl".into(),
            page_no: 1,
            segments,
            start_off: 0,
        })
        .unwrap();
        // Simulate a crash: the buffer pool never wrote the change back, so
        // the data file on disk still holds old_page.
        let next_lsn = wal.next_lsn();
        drop(wal);

        let (new_next_lsn, report) = recover(dir.path(), first_lsn_at_start(), next_lsn, 512).unwrap();
        assert_eq!(report.txns_undone, vec![1]);
        assert!(new_next_lsn > next_lsn);

        let mut file = DBFile::open(&data_path).unwrap();
        let mut buf = vec![0u8; 512];
        file.read_page(1, &mut buf, false).unwrap();
        assert_eq!(buf, old_page, "undo must leave the page exactly as it was before the txn");
    }

    #[test]
    fn committed_transaction_is_redone_but_not_undone() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("t.tbl");
        {
            let mut file = DBFile::create(&data_path, DbFileType::HeapData, 512).unwrap();
            file.read_page(1, &mut vec![0u8; 512], true).unwrap();
            file.write_page(1, &vec![0u8; 512]).unwrap();
        }

        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn0 = wal.append(&WalRecord::StartTxn { txn_id: 1 }).unwrap();

        let old_page = vec![0u8; 512];
        let mut new_page = old_page.clone();
        new_page[20] = 42;
        let segments = diff_bytes(&old_page, &new_page);

        let lsn1 = wal
            .append(&WalRecord::UpdatePage {
                txn_id: 1,
                prev_lsn: lsn0,
                file_name: "t.tbl".into(),
                page_no: 1,
                segments,
                start_off: 0,
            })
            .unwrap();
        wal.append(&WalRecord::CommitTxn {
            txn_id: 1,
            prev_lsn: lsn1,
        })
        .unwrap();
        let next_lsn = wal.next_lsn();
        drop(wal);

        let (_new_next_lsn, report) = recover(dir.path(), first_lsn_at_start(), next_lsn, 512).unwrap();
        assert!(report.txns_undone.is_empty());
        assert_eq!(report.redone_updates, 1);

        let mut file = DBFile::open(&data_path).unwrap();
        let mut buf = vec![0u8; 512];
        file.read_page(1, &mut buf, false).unwrap();
        assert_eq!(buf, new_page, "a committed update must be redone");
    }

    #[test]
    fn recovery_is_a_no_op_when_first_equals_next() {
        let dir = tempdir().unwrap();
        let _wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn = LogSequenceNumber::new(0, HEADER_LEN as u32);
        let (new_next, report) = recover(dir.path(), lsn, lsn, 512).unwrap();
        assert_eq!(new_next, lsn);
        assert_eq!(report.redone_updates, 0);
    }
}
