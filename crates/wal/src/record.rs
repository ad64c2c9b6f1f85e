//! WAL record framing: every record starts and ends with the same 1-byte
//! type tag, so the log can be scanned forward or backward.

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult, LogSequenceNumber, TransactionId};
use storage::DiffSegment;

pub const START_TXN: u8 = 1;
pub const COMMIT_TXN: u8 = 2;
pub const ABORT_TXN: u8 = 3;
pub const UPDATE_PAGE: u8 = 4;
pub const UPDATE_PAGE_REDO_ONLY: u8 = 5;

/// A diff segment carrying only the redo payload, used by
/// `UPDATE_PAGE_REDO_ONLY` records (produced during undo).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedoSegment {
    pub index: u32,
    pub new_bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalRecord {
    StartTxn {
        txn_id: TransactionId,
    },
    CommitTxn {
        txn_id: TransactionId,
        prev_lsn: LogSequenceNumber,
    },
    AbortTxn {
        txn_id: TransactionId,
        prev_lsn: LogSequenceNumber,
    },
    UpdatePage {
        txn_id: TransactionId,
        prev_lsn: LogSequenceNumber,
        file_name: String,
        page_no: u16,
        segments: Vec<DiffSegment>,
        start_off: u32,
    },
    UpdatePageRedoOnly {
        txn_id: TransactionId,
        prev_lsn: LogSequenceNumber,
        file_name: String,
        page_no: u16,
        segments: Vec<RedoSegment>,
        start_off: u32,
    },
}

impl WalRecord {
    pub fn txn_id(&self) -> TransactionId {
        match self {
            WalRecord::StartTxn { txn_id }
            | WalRecord::CommitTxn { txn_id, .. }
            | WalRecord::AbortTxn { txn_id, .. }
            | WalRecord::UpdatePage { txn_id, .. }
            | WalRecord::UpdatePageRedoOnly { txn_id, .. } => *txn_id,
        }
    }

    /// Returns a copy with `start_off` replaced; a no-op for non-UPDATE
    /// variants. `WalManager::append` uses this to stamp each UPDATE record
    /// with its own final file offset right before encoding.
    pub fn with_start_off(&self, off: u32) -> WalRecord {
        match self.clone() {
            WalRecord::UpdatePage { start_off: _, .. } => {
                let WalRecord::UpdatePage {
                    txn_id,
                    prev_lsn,
                    file_name,
                    page_no,
                    segments,
                    ..
                } = self.clone()
                else {
                    unreachable!()
                };
                WalRecord::UpdatePage {
                    txn_id,
                    prev_lsn,
                    file_name,
                    page_no,
                    segments,
                    start_off: off,
                }
            }
            WalRecord::UpdatePageRedoOnly { start_off: _, .. } => {
                let WalRecord::UpdatePageRedoOnly {
                    txn_id,
                    prev_lsn,
                    file_name,
                    page_no,
                    segments,
                    ..
                } = self.clone()
                else {
                    unreachable!()
                };
                WalRecord::UpdatePageRedoOnly {
                    txn_id,
                    prev_lsn,
                    file_name,
                    page_no,
                    segments,
                    start_off: off,
                }
            }
            other => other,
        }
    }

    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            WalRecord::StartTxn { txn_id } => {
                buf.push(START_TXN);
                buf.extend_from_slice(&txn_id.to_be_bytes());
                buf.push(START_TXN);
            }
            WalRecord::CommitTxn { txn_id, prev_lsn } => {
                buf.push(COMMIT_TXN);
                buf.extend_from_slice(&txn_id.to_be_bytes());
                write_lsn(&mut buf, *prev_lsn);
                buf.push(COMMIT_TXN);
            }
            WalRecord::AbortTxn { txn_id, prev_lsn } => {
                buf.push(ABORT_TXN);
                buf.extend_from_slice(&txn_id.to_be_bytes());
                write_lsn(&mut buf, *prev_lsn);
                buf.push(ABORT_TXN);
            }
            WalRecord::UpdatePage {
                txn_id,
                prev_lsn,
                file_name,
                page_no,
                segments,
                start_off,
            } => {
                buf.push(UPDATE_PAGE);
                buf.extend_from_slice(&txn_id.to_be_bytes());
                write_lsn(&mut buf, *prev_lsn);
                write_vstr(&mut buf, file_name)?;
                buf.extend_from_slice(&page_no.to_be_bytes());
                buf.extend_from_slice(&(segments.len() as u16).to_be_bytes());
                for seg in segments {
                    write_segment(&mut buf, seg.index, &seg.old_bytes, Some(&seg.new_bytes))?;
                }
                buf.extend_from_slice(&start_off.to_be_bytes());
                buf.push(UPDATE_PAGE);
            }
            WalRecord::UpdatePageRedoOnly {
                txn_id,
                prev_lsn,
                file_name,
                page_no,
                segments,
                start_off,
            } => {
                buf.push(UPDATE_PAGE_REDO_ONLY);
                buf.extend_from_slice(&txn_id.to_be_bytes());
                write_lsn(&mut buf, *prev_lsn);
                write_vstr(&mut buf, file_name)?;
                buf.extend_from_slice(&page_no.to_be_bytes());
                buf.extend_from_slice(&(segments.len() as u16).to_be_bytes());
                for seg in segments {
                    write_segment(&mut buf, seg.index, &[], Some(&seg.new_bytes))?;
                }
                buf.extend_from_slice(&start_off.to_be_bytes());
                buf.push(UPDATE_PAGE_REDO_ONLY);
            }
        }
        Ok(buf)
    }

    /// Decodes one record starting at `buf[0]`, returning it and the number
    /// of bytes consumed.
    pub fn decode(buf: &[u8]) -> DbResult<(WalRecord, usize)> {
        let tag = *buf.first().ok_or_else(|| DbError::Corruption("empty WAL record buffer".into()))?;
        match tag {
            START_TXN => {
                let txn_id = BigEndian::read_u32(&buf[1..5]);
                expect_terminator(buf, 5, START_TXN)?;
                Ok((WalRecord::StartTxn { txn_id }, 6))
            }
            COMMIT_TXN | ABORT_TXN => {
                let txn_id = BigEndian::read_u32(&buf[1..5]);
                let prev_lsn = read_lsn(buf, 5);
                expect_terminator(buf, 11, tag)?;
                let record = if tag == COMMIT_TXN {
                    WalRecord::CommitTxn { txn_id, prev_lsn }
                } else {
                    WalRecord::AbortTxn { txn_id, prev_lsn }
                };
                Ok((record, 12))
            }
            UPDATE_PAGE | UPDATE_PAGE_REDO_ONLY => {
                let txn_id = BigEndian::read_u32(&buf[1..5]);
                let prev_lsn = read_lsn(buf, 5);
                let (file_name, vstr_len) = read_vstr(buf, 11)?;
                let mut at = 11 + vstr_len;
                let page_no = BigEndian::read_u16(&buf[at..at + 2]);
                at += 2;
                let n_seg = BigEndian::read_u16(&buf[at..at + 2]) as usize;
                at += 2;

                if tag == UPDATE_PAGE {
                    let mut segments = Vec::with_capacity(n_seg);
                    for _ in 0..n_seg {
                        let index = BigEndian::read_u16(&buf[at..at + 2]) as u32;
                        let len = BigEndian::read_u16(&buf[at + 2..at + 4]) as usize;
                        at += 4;
                        let old_bytes = buf[at..at + len].to_vec();
                        at += len;
                        let new_bytes = buf[at..at + len].to_vec();
                        at += len;
                        segments.push(DiffSegment {
                            index,
                            old_bytes,
                            new_bytes,
                        });
                    }
                    let start_off = BigEndian::read_u32(&buf[at..at + 4]);
                    at += 4;
                    expect_terminator(buf, at, UPDATE_PAGE)?;
                    Ok((
                        WalRecord::UpdatePage {
                            txn_id,
                            prev_lsn,
                            file_name,
                            page_no,
                            segments,
                            start_off,
                        },
                        at + 1,
                    ))
                } else {
                    let mut segments = Vec::with_capacity(n_seg);
                    for _ in 0..n_seg {
                        let index = BigEndian::read_u16(&buf[at..at + 2]) as u32;
                        let len = BigEndian::read_u16(&buf[at + 2..at + 4]) as usize;
                        at += 4;
                        let new_bytes = buf[at..at + len].to_vec();
                        at += len;
                        segments.push(RedoSegment { index, new_bytes });
                    }
                    let start_off = BigEndian::read_u32(&buf[at..at + 4]);
                    at += 4;
                    expect_terminator(buf, at, UPDATE_PAGE_REDO_ONLY)?;
                    Ok((
                        WalRecord::UpdatePageRedoOnly {
                            txn_id,
                            prev_lsn,
                            file_name,
                            page_no,
                            segments,
                            start_off,
                        },
                        at + 1,
                    ))
                }
            }
            other => Err(DbError::Corruption(format!("unknown WAL record type {other}"))),
        }
    }
}

fn expect_terminator(buf: &[u8], at: usize, expected: u8) -> DbResult<()> {
    let got = *buf
        .get(at)
        .ok_or_else(|| DbError::Corruption("WAL record truncated before terminator byte".into()))?;
    if got != expected {
        return Err(DbError::Corruption(format!(
            "WAL record terminator mismatch: expected {expected}, got {got}"
        )));
    }
    Ok(())
}

fn write_lsn(buf: &mut Vec<u8>, lsn: LogSequenceNumber) {
    buf.extend_from_slice(&lsn.file_number.to_be_bytes());
    buf.extend_from_slice(&lsn.file_offset.to_be_bytes());
}

fn read_lsn(buf: &[u8], at: usize) -> LogSequenceNumber {
    LogSequenceNumber::new(BigEndian::read_u16(&buf[at..at + 2]), BigEndian::read_u32(&buf[at + 2..at + 6]))
}

fn write_vstr(buf: &mut Vec<u8>, s: &str) -> DbResult<()> {
    if s.len() > 255 {
        return Err(DbError::InvalidArgument(format!(
            "WAL file name {s:?} exceeds the 255-byte vstr limit"
        )));
    }
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_vstr(buf: &[u8], at: usize) -> DbResult<(String, usize)> {
    let len = *buf
        .get(at)
        .ok_or_else(|| DbError::Corruption("WAL record truncated before vstr length".into()))? as usize;
    let bytes = buf
        .get(at + 1..at + 1 + len)
        .ok_or_else(|| DbError::Corruption("WAL record truncated inside vstr".into()))?;
    let s = String::from_utf8(bytes.to_vec()).map_err(|e| DbError::Corruption(e.to_string()))?;
    Ok((s, 1 + len))
}

fn write_segment(buf: &mut Vec<u8>, index: u32, old_bytes: &[u8], new_bytes: Option<&[u8]>) -> DbResult<()> {
    let new_bytes = new_bytes.unwrap_or(&[]);
    let index: u16 = index
        .try_into()
        .map_err(|_| DbError::InvalidArgument("WAL segment index exceeds u16 range".into()))?;
    let len: u16 = new_bytes
        .len()
        .try_into()
        .map_err(|_| DbError::InvalidArgument("WAL segment length exceeds u16 range".into()))?;
    buf.extend_from_slice(&index.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(old_bytes);
    buf.extend_from_slice(new_bytes);
    Ok(())
}
