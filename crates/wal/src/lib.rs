//! Physical, LSN-addressed write-ahead log with ARIES-style redo/undo
//! recovery.
//!
//! The log is a sequence of rolling files (`wal-NNNNN.log`, capped at
//! [`MAX_WAL_FILE_SIZE`], file numbers wrapping modulo 65536). Every record
//! carries its type tag at both ends so the log can be scanned in either
//! direction; `UPDATE_PAGE` records carry a trailing `startOff` that lets
//! backward scanning jump straight to a variable-length record's start.

pub mod record;
mod recovery;

pub use record::{RedoSegment, WalRecord};
pub use recovery::{RecoveryReport, read_record, recover};

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult, LogSequenceNumber};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// 10 MiB; once a write would cross this, the active file rolls over.
pub const MAX_WAL_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Single-byte file-type marker stored at WAL file offset 0. Distinct from
/// `storage::DbFileType`'s 2-byte code because the WAL header packs type and
/// page-size into bytes 0–1 to leave room for the rolling-file back-pointer
/// at bytes 2–5.
const WAL_FILE_MARKER: u8 = 5;

/// Records start at this offset in every WAL file, after the 6-byte header.
pub const HEADER_LEN: u64 = 6;

fn wal_file_name(n: u16) -> String {
    format!("wal-{n:05}.log")
}

fn encode_page_size_code(page_size: usize) -> DbResult<u8> {
    if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
        return Err(DbError::InvalidArgument(format!(
            "page size {page_size} must be a power of two in [512, 65536]"
        )));
    }
    Ok((page_size.trailing_zeros() - 9) as u8)
}

/// Appends records to the active WAL file, rolling to a new file when the
/// active one would exceed [`MAX_WAL_FILE_SIZE`], and enforces the WAL rule
/// via [`force_wal`](WalManager::force_wal).
pub struct WalManager {
    dir: PathBuf,
    page_size: usize,
    current_file_number: u16,
    current_file: File,
    current_offset: u64,
    /// Start offset of the most recently appended record in the current
    /// file; stamped into the next file's header when rolling. Zero means
    /// "no record written to this file yet".
    last_record_start: u32,
    forced_through: LogSequenceNumber,
}

impl WalManager {
    /// Opens the highest-numbered `wal-NNNNN.log` file in `dir`, or creates
    /// `wal-00000.log` if the directory holds none.
    pub fn open_or_create(dir: impl Into<PathBuf>, page_size: usize) -> DbResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let existing = list_wal_file_numbers(&dir)?;
        match existing.iter().max().copied() {
            None => {
                let file = Self::create_file(&dir, 0, page_size, 0)?;
                Ok(Self {
                    dir,
                    page_size,
                    current_file_number: 0,
                    current_file: file,
                    current_offset: HEADER_LEN,
                    last_record_start: 0,
                    forced_through: LogSequenceNumber::ZERO,
                })
            }
            Some(n) => {
                let path = dir.join(wal_file_name(n));
                let bytes = std::fs::read(&path)?;
                if bytes.len() < HEADER_LEN as usize {
                    return Err(DbError::Corruption(format!("WAL file {path:?} is shorter than its header")));
                }
                let mut offset = HEADER_LEN as usize;
                let mut last_record_start = 0u32;
                while offset < bytes.len() {
                    let (_, consumed) = WalRecord::decode(&bytes[offset..])?;
                    last_record_start = offset as u32;
                    offset += consumed;
                }
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                Ok(Self {
                    dir,
                    page_size,
                    current_file_number: n,
                    current_file: file,
                    current_offset: offset as u64,
                    last_record_start,
                    forced_through: LogSequenceNumber::ZERO,
                })
            }
        }
    }

    fn create_file(dir: &Path, number: u16, page_size: usize, prev_last_offset: u32) -> DbResult<File> {
        let size_code = encode_page_size_code(page_size)?;
        let path = dir.join(wal_file_name(number));
        let mut file = OpenOptions::new().read(true).write(true).create_new(true).open(&path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        header[0] = WAL_FILE_MARKER;
        header[1] = size_code;
        BigEndian::write_u32(&mut header[2..6], prev_last_offset);
        file.write_all(&header)?;
        Ok(file)
    }

    pub fn next_lsn(&self) -> LogSequenceNumber {
        LogSequenceNumber::new(self.current_file_number, self.current_offset as u32)
    }

    fn roll(&mut self) -> DbResult<()> {
        let new_number = self.current_file_number.wrapping_add(1);
        tracing::info!(from = self.current_file_number, to = new_number, "rolling WAL file");
        // The retiring file must be durable before it stops being the active
        // one; force_wal only ever fsyncs the current file.
        self.current_file.sync_all()?;
        self.current_file = Self::create_file(&self.dir, new_number, self.page_size, self.last_record_start)?;
        self.current_file_number = new_number;
        self.current_offset = HEADER_LEN;
        self.last_record_start = 0;
        Ok(())
    }

    fn roll_if_needed(&mut self, additional: u64) -> DbResult<()> {
        if self.current_offset + additional > MAX_WAL_FILE_SIZE {
            self.roll()?;
        }
        Ok(())
    }

    /// Appends a record, stamping its `start_off` field (for UPDATE
    /// variants) with the final LSN it is written at.
    pub fn append(&mut self, record: &WalRecord) -> DbResult<LogSequenceNumber> {
        let draft = record.with_start_off(0).encode()?;
        self.roll_if_needed(draft.len() as u64)?;
        let lsn = self.next_lsn();
        let bytes = record.with_start_off(lsn.file_offset).encode()?;
        debug_assert_eq!(bytes.len(), draft.len());

        self.current_file.seek(SeekFrom::Start(self.current_offset))?;
        self.current_file.write_all(&bytes)?;
        self.last_record_start = lsn.file_offset;
        self.current_offset += bytes.len() as u64;
        tracing::debug!(?lsn, txn_id = record.txn_id(), "appended WAL record");
        Ok(lsn)
    }

    /// Flushes all WAL records with LSN ≤ `target` to disk. Idempotent and
    /// monotonic. Conservatively fsyncs the whole active file rather than the
    /// page-granular byte range, which is always a safe superset; files the
    /// log has already rolled past were synced as they were retired.
    pub fn force_wal(&mut self, target: LogSequenceNumber) -> DbResult<()> {
        if target <= self.forced_through {
            return Ok(());
        }
        self.current_file.sync_all()?;
        self.forced_through = self.next_lsn();
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl buffer::WalForcer for WalManager {
    fn force_wal(&mut self, target: LogSequenceNumber) -> DbResult<()> {
        WalManager::force_wal(self, target)
    }
}

fn list_wal_file_numbers(dir: &Path) -> DbResult<Vec<u16>> {
    let mut numbers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(n) = parse_wal_file_name(name) {
            numbers.push(n);
        }
    }
    Ok(numbers)
}

fn parse_wal_file_name(name: &str) -> Option<u16> {
    let digits = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    digits.parse().ok()
}

#[cfg(test)]
fn read_header_prev_offset(dir: &Path, number: u16) -> DbResult<u32> {
    let path = dir.join(wal_file_name(number));
    let mut file = File::open(&path)?;
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)?;
    Ok(BigEndian::read_u32(&header[2..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::LogSequenceNumber;
    use record::{RedoSegment, WalRecord};
    use storage::DiffSegment;
    use tempfile::tempdir;

    #[test]
    fn fresh_manager_starts_at_header_end() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        assert_eq!(wal.next_lsn(), LogSequenceNumber::new(0, HEADER_LEN as u32));
    }

    #[test]
    fn append_advances_lsn_by_record_size() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn1 = wal.append(&WalRecord::StartTxn { txn_id: 1 }).unwrap();
        let lsn2 = wal.append(&WalRecord::CommitTxn {
            txn_id: 1,
            prev_lsn: lsn1,
        }).unwrap();
        assert_eq!(lsn1.file_offset + 6, lsn2.file_offset);
    }

    #[test]
    fn update_page_start_off_matches_its_own_lsn() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn = wal
            .append(&WalRecord::UpdatePage {
                txn_id: 1,
                prev_lsn: LogSequenceNumber::ZERO,
                file_name: "t.tbl".into(),
                page_no: 0,
                segments: vec![DiffSegment {
                    index: 0,
                    old_bytes: vec![0],
                    new_bytes: vec![1],
                }],
                start_off: 0,
            })
            .unwrap();

        let bytes = std::fs::read(dir.path().join("wal-00000.log")).unwrap();
        let (decoded, _) = WalRecord::decode(&bytes[lsn.file_offset as usize..]).unwrap();
        match decoded {
            WalRecord::UpdatePage { start_off, .. } => assert_eq!(start_off, lsn.file_offset),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn reopen_resumes_after_last_record() {
        let dir = tempdir().unwrap();
        let lsn_after;
        {
            let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
            wal.append(&WalRecord::StartTxn { txn_id: 1 }).unwrap();
            lsn_after = wal.next_lsn();
        }
        let wal2 = WalManager::open_or_create(dir.path(), 512).unwrap();
        assert_eq!(wal2.next_lsn(), lsn_after);
    }

    #[test]
    fn rolling_creates_new_file_and_stamps_back_pointer() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let mut last_lsn = LogSequenceNumber::ZERO;
        // Force a roll by writing large UPDATE_PAGE records.
        for i in 0..2000u32 {
            last_lsn = wal
                .append(&WalRecord::UpdatePage {
                    txn_id: 1,
                    prev_lsn: last_lsn,
                    file_name: "t.tbl".into(),
                    page_no: 0,
                    segments: vec![DiffSegment {
                        index: 0,
                        old_bytes: vec![0; 4000],
                        new_bytes: vec![i as u8; 4000],
                    }],
                    start_off: 0,
                })
                .unwrap();
        }
        assert!(wal.current_file_number >= 1);
        let prev_offset = read_header_prev_offset(dir.path(), wal.current_file_number).unwrap();
        assert!(prev_offset >= HEADER_LEN as u32);
    }

    #[test]
    fn force_wal_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open_or_create(dir.path(), 512).unwrap();
        let lsn = wal.append(&WalRecord::StartTxn { txn_id: 1 }).unwrap();
        wal.force_wal(lsn).unwrap();
        wal.force_wal(lsn).unwrap();
        wal.force_wal(LogSequenceNumber::ZERO).unwrap();
    }

    #[test]
    fn redo_only_segment_has_no_old_bytes() {
        let seg = RedoSegment {
            index: 2,
            new_bytes: vec![9, 9],
        };
        assert_eq!(seg.new_bytes.len(), 2);
    }
}
