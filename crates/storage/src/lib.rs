//! File manager and pinned-page abstraction.
//!
//! `DBFile` owns page-aligned reads/writes against a single on-disk file and
//! its page-0 type/size header. `DBPage` is the in-memory, mutable view of
//! one page that upper layers (the buffer pool, table managers, WAL) mutate;
//! it carries a snapshot of its bytes as of the last time it was marked
//! clean, which the WAL diffs against when producing `UPDATE_PAGE` records.

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult, LogSequenceNumber};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Threshold below which an embedded run of equal bytes is folded into the
/// surrounding differing segment rather than split out, because emitting two
/// tiny segments costs more than including a few redundant bytes.
pub const RUN_MERGE_GAP: usize = 4;

/// File types enumerated on page 0 of every `DBFile`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbFileType {
    HeapData,
    ColStoreData,
    BTreeIndex,
    TxnState,
    Wal,
}

impl DbFileType {
    fn code(self) -> u16 {
        match self {
            DbFileType::HeapData => 1,
            DbFileType::ColStoreData => 2,
            DbFileType::BTreeIndex => 3,
            DbFileType::TxnState => 4,
            DbFileType::Wal => 5,
        }
    }

    fn from_code(code: u16) -> DbResult<Self> {
        Ok(match code {
            1 => DbFileType::HeapData,
            2 => DbFileType::ColStoreData,
            3 => DbFileType::BTreeIndex,
            4 => DbFileType::TxnState,
            5 => DbFileType::Wal,
            other => return Err(DbError::Corruption(format!("unknown file type code {other}"))),
        })
    }
}

/// `log2(page_size) - 9`, the byte stored at page-0 offset 2.
fn encode_page_size(page_size: usize) -> DbResult<u8> {
    if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
        return Err(DbError::InvalidArgument(format!(
            "page size {page_size} must be a power of two in [512, 65536]"
        )));
    }
    Ok((page_size.trailing_zeros() - 9) as u8)
}

fn decode_page_size(code: u8) -> usize {
    1usize << (code as u32 + 9)
}

/// A page-aligned file on disk, tagged with a `DbFileType` and page size in
/// its page-0 header.
pub struct DBFile {
    path: PathBuf,
    file: File,
    pub file_type: DbFileType,
    pub page_size: usize,
}

impl DBFile {
    /// Create a new file, writing the page-0 header. Fails if the file
    /// already exists.
    pub fn create(path: &Path, file_type: DbFileType, page_size: usize) -> DbResult<Self> {
        let size_code = encode_page_size(page_size)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut header = vec![0u8; page_size];
        BigEndian::write_u16(&mut header[0..2], file_type.code());
        header[2] = size_code;
        file.write_all(&header)?;
        file.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_type,
            page_size,
        })
    }

    /// Open an existing file, reading its page-0 header to recover type and
    /// page size.
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut probe = [0u8; 3];
        file.read_exact(&mut probe)?;
        let file_type = DbFileType::from_code(BigEndian::read_u16(&probe[0..2]))?;
        let page_size = decode_page_size(probe[2]);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_type,
            page_size,
        })
    }

    /// Open the file if it exists, otherwise create it with the given type
    /// and page size.
    pub fn create_or_open(path: &Path, file_type: DbFileType, page_size: usize) -> DbResult<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, file_type, page_size)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len() / self.page_size as u64)
    }

    /// Read one page into `buf`, which must be exactly `page_size` bytes.
    /// Reading past EOF without `create` fails; with `create`, the file is
    /// extended with zero-filled pages up through `page_no`.
    pub fn read_page(&mut self, page_no: u64, buf: &mut [u8], create: bool) -> DbResult<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let num_pages = self.num_pages()?;
        if page_no >= num_pages {
            if !create {
                return Err(DbError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("page {page_no} does not exist in {:?}", self.path),
                )));
            }
            self.truncate(page_no + 1)?;
            buf.fill(0);
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(page_no * self.page_size as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_no: u64, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        self.file.seek(SeekFrom::Start(page_no * self.page_size as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Extend (zero-filling) or shrink the file to exactly `page_count` pages.
    pub fn truncate(&mut self, page_count: u64) -> DbResult<()> {
        self.file.set_len(page_count * self.page_size as u64)?;
        Ok(())
    }
}

/// A diff segment: a contiguous run of bytes that changed between a page's
/// snapshot and its current contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffSegment {
    pub index: u32,
    pub old_bytes: Vec<u8>,
    pub new_bytes: Vec<u8>,
}

/// Pinned, mutable view of one page. Created and owned by the buffer pool;
/// table managers and the WAL mutate `data` and call `mark_dirty`.
pub struct DBPage {
    pub file_name: String,
    pub page_no: u64,
    pub data: Vec<u8>,
    /// Snapshot of `data` as of the last clean state; `Some` only while
    /// `dirty` is true.
    old_data: Option<Vec<u8>>,
    dirty: bool,
    pin_count: u32,
    pub page_lsn: Option<LogSequenceNumber>,
}

/// Error returned when an operation violates the pin-count invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinError {
    PinCountNotPositive(u32),
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinError::PinCountNotPositive(n) => write!(f, "pin count is not positive (value is {n})"),
        }
    }
}

impl DBPage {
    pub fn new(file_name: String, page_no: u64, data: Vec<u8>) -> Self {
        Self {
            file_name,
            page_no,
            data,
            old_data: None,
            dirty: false,
            pin_count: 0,
            page_lsn: None,
        }
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) -> Result<(), PinError> {
        if self.pin_count == 0 {
            return Err(PinError::PinCountNotPositive(0));
        }
        self.pin_count -= 1;
        Ok(())
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the page dirty, capturing the pre-image snapshot exactly at the
    /// clean-to-dirty transition (repeated mutations within one dirty
    /// interval diff against the same original snapshot).
    pub fn mark_dirty(&mut self) {
        if !self.dirty {
            self.old_data = Some(self.data.clone());
            self.dirty = true;
        }
    }

    /// Clears the dirty flag and snapshot after the page has been written
    /// back to disk.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.old_data = None;
    }

    /// Re-bases the pre-image snapshot to the current bytes without clearing
    /// the dirty flag; used by the transaction manager after it has logged
    /// one `UPDATE_PAGE` record so a subsequent mutation within the same
    /// dirty interval diffs against freshly-logged bytes.
    pub fn rebase_snapshot(&mut self) {
        self.old_data = Some(self.data.clone());
    }

    /// Computes the byte-diff segments between the pre-image snapshot and
    /// the current bytes. Returns an empty vector if the page isn't dirty.
    pub fn diff(&self) -> Vec<DiffSegment> {
        let Some(old) = &self.old_data else {
            return Vec::new();
        };
        diff_bytes(old, &self.data)
    }
}

/// Standalone byte-diff used both by `DBPage::diff` and by WAL recovery,
/// which reconstructs segments from logged `(old, new)` byte slices.
///
/// Skips runs of equal bytes; emits one segment per run of differing bytes,
/// extending a segment across an embedded equal-byte run of at most
/// `RUN_MERGE_GAP` bytes when more differing bytes follow the gap.
pub fn diff_bytes(old: &[u8], new: &[u8]) -> Vec<DiffSegment> {
    debug_assert_eq!(old.len(), new.len());
    let len = old.len();
    let mut segments = Vec::new();
    let mut i = 0usize;
    while i < len {
        if old[i] == new[i] {
            i += 1;
            continue;
        }
        let start = i;
        let mut end = i + 1;
        loop {
            while end < len && old[end] != new[end] {
                end += 1;
            }
            if end >= len {
                break;
            }
            let gap_start = end;
            while end < len && old[end] == new[end] {
                end += 1;
            }
            let gap_len = end - gap_start;
            if gap_len <= RUN_MERGE_GAP && end < len {
                continue;
            }
            end = gap_start;
            break;
        }
        segments.push(DiffSegment {
            index: start as u32,
            old_bytes: old[start..end].to_vec(),
            new_bytes: new[start..end].to_vec(),
        });
        i = end;
    }
    segments
}

/// Applies logged `new_bytes` (redo) to a byte buffer at `index`.
pub fn apply_new_bytes(buf: &mut [u8], index: u32, bytes: &[u8]) {
    let start = index as usize;
    buf[start..start + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_header_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        {
            let mut f = DBFile::create(&path, DbFileType::HeapData, 8192).unwrap();
            assert_eq!(f.num_pages().unwrap(), 1);
            f.sync().unwrap();
        }
        let f = DBFile::open(&path).unwrap();
        assert_eq!(f.file_type, DbFileType::HeapData);
        assert_eq!(f.page_size, 8192);
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tbl");
        assert!(DBFile::create(&path, DbFileType::HeapData, 1000).is_err());
    }

    #[test]
    fn read_past_eof_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let mut f = DBFile::create(&path, DbFileType::HeapData, 512).unwrap();
        let mut buf = vec![0u8; 512];
        assert!(f.read_page(5, &mut buf, false).is_err());
    }

    #[test]
    fn read_past_eof_with_create_zero_fills() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let mut f = DBFile::create(&path, DbFileType::HeapData, 512).unwrap();
        let mut buf = vec![0xFFu8; 512];
        f.read_page(3, &mut buf, true).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(f.num_pages().unwrap(), 4);
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tbl");
        let mut f = DBFile::create(&path, DbFileType::HeapData, 512).unwrap();
        let page = vec![7u8; 512];
        f.write_page(1, &page).unwrap();
        let mut buf = vec![0u8; 512];
        f.read_page(1, &mut buf, false).unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn dirty_snapshot_taken_once_per_interval() {
        let mut page = DBPage::new("t.tbl".into(), 0, vec![0u8; 16]);
        page.mark_dirty();
        page.data[0] = 1;
        page.data[1] = 2;
        page.mark_dirty(); // no-op, already dirty
        let diffs = page.diff();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].index, 0);
        assert_eq!(diffs[0].new_bytes, vec![1, 2]);
    }

    #[test]
    fn pin_unpin_tracks_count() {
        let mut page = DBPage::new("t.tbl".into(), 0, vec![0u8; 16]);
        assert!(!page.is_pinned());
        page.pin();
        page.pin();
        assert_eq!(page.pin_count(), 2);
        page.unpin().unwrap();
        assert!(page.is_pinned());
        page.unpin().unwrap();
        assert!(!page.is_pinned());
    }

    #[test]
    fn unpin_below_zero_errors() {
        let mut page = DBPage::new("t.tbl".into(), 0, vec![0u8; 16]);
        assert_eq!(page.unpin(), Err(PinError::PinCountNotPositive(0)));
    }

    #[test]
    fn diff_segmentation_merges_small_gaps_but_not_large_ones() {
        // Scenario: differences at [10..14) and [20..25), equal bytes
        // between them. The inner equal run (length 6) exceeds
        // RUN_MERGE_GAP, so two segments are emitted.
        let old = vec![0u8; 100];
        let mut new = old.clone();
        for i in 10..14 {
            new[i] = 0xAA;
        }
        for i in 20..25 {
            new[i] = 0xBB;
        }
        let segs = diff_bytes(&old, &new);
        assert_eq!(segs.len(), 2);
        assert_eq!((segs[0].index, segs[0].new_bytes.len()), (10, 4));
        assert_eq!((segs[1].index, segs[1].new_bytes.len()), (20, 5));

        // Shrink the gap to <= RUN_MERGE_GAP: a single merged segment.
        let old2 = vec![0u8; 100];
        let mut new2 = old2.clone();
        new2[10] = 1;
        new2[14] = 1; // 3 equal bytes (11,12,13) between the two diffs
        let segs2 = diff_bytes(&old2, &new2);
        assert_eq!(segs2.len(), 1);
        assert_eq!(segs2[0].index, 10);
        assert_eq!(segs2[0].new_bytes.len(), 5);
    }

    #[test]
    fn diff_round_trip_reconstructs_page() {
        let old = vec![5u8; 64];
        let mut new = old.clone();
        new[3] = 9;
        new[40] = 1;
        let segs = diff_bytes(&old, &new);
        let mut reconstructed = old.clone();
        for seg in &segs {
            apply_new_bytes(&mut reconstructed, seg.index, &seg.new_bytes);
        }
        assert_eq!(reconstructed, new);
    }

    proptest::proptest! {
        /// Applying the emitted segments to a copy of the snapshot must
        /// reproduce the new page byte for byte, and applying the old
        /// halves to the new page must reproduce the snapshot.
        #[test]
        fn diff_round_trips_both_directions(
            old in proptest::collection::vec(proptest::prelude::any::<u8>(), 128),
            new in proptest::collection::vec(proptest::prelude::any::<u8>(), 128),
        ) {
            let segs = diff_bytes(&old, &new);
            let mut redo = old.clone();
            let mut undo = new.clone();
            for seg in &segs {
                apply_new_bytes(&mut redo, seg.index, &seg.new_bytes);
                apply_new_bytes(&mut undo, seg.index, &seg.old_bytes);
            }
            proptest::prop_assert_eq!(&redo, &new);
            proptest::prop_assert_eq!(&undo, &old);
        }
    }
}
