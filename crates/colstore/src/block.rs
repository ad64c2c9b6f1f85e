//! Data-page codecs for the three column encodings, and the block objects
//! that hand values back one at a time during a scan.
//!
//! Page layouts (all big-endian, starting at offset 0 of pages ≥ 1):
//!
//! - Uncompressed: `[count:u16]` then per value `[null:u8][bytes…]`.
//! - Run-length:   `[count:u16]` then per run
//!   `[startRow:u32][runLength:u32][null:u8][bytes…]`.
//! - Dictionary:   `[count:u16]` then `⌈count / codesPerWord⌉` packed
//!   16-bit words, codes laid low-bits-first; code 0 is NULL, code `k`
//!   is dictionary entry `k − 1`.

use byteorder::{BigEndian, ByteOrder};
use common::{DbError, DbResult};
use heap::tuple::{decode_value, encode_value};
use std::rc::Rc;
use types::{SqlType, Value};

use crate::encoding::dictionary_bit_width;

/// One encoded page's worth of column values, yielding them in row order.
pub enum ColStoreBlock {
    Plain {
        ty: SqlType,
        bytes: Vec<u8>,
        pos: usize,
        remaining: u16,
    },
    Rle {
        ty: SqlType,
        bytes: Vec<u8>,
        pos: usize,
        remaining_runs: u16,
        current: Option<(Value, u32)>,
    },
    Packed {
        dict: Rc<Vec<Value>>,
        words: Vec<u16>,
        bit_width: u32,
        codes_per_word: u32,
        index: u32,
        count: u16,
    },
}

impl ColStoreBlock {
    /// The next value in the block, or `None` when it is exhausted.
    pub fn next_value(&mut self) -> DbResult<Option<Value>> {
        match self {
            ColStoreBlock::Plain {
                ty,
                bytes,
                pos,
                remaining,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
                Ok(Some(read_flagged_value(*ty, bytes, pos)?))
            }
            ColStoreBlock::Rle {
                ty,
                bytes,
                pos,
                remaining_runs,
                current,
            } => {
                loop {
                    if let Some((value, left)) = current {
                        if *left > 0 {
                            *left -= 1;
                            return Ok(Some(value.clone()));
                        }
                        *current = None;
                    }
                    if *remaining_runs == 0 {
                        return Ok(None);
                    }
                    *remaining_runs -= 1;
                    // startRow is redundant for a sequential scan; skip it.
                    *pos += 4;
                    let run_len = BigEndian::read_u32(&bytes[*pos..*pos + 4]);
                    *pos += 4;
                    let value = read_flagged_value(*ty, bytes, pos)?;
                    *current = Some((value, run_len));
                }
            }
            ColStoreBlock::Packed {
                dict,
                words,
                bit_width,
                codes_per_word,
                index,
                count,
            } => {
                if *index >= *count as u32 {
                    return Ok(None);
                }
                let word = words[(*index / *codes_per_word) as usize];
                let shift = (*index % *codes_per_word) * *bit_width;
                let mask = (1u16 << *bit_width) - 1;
                let code = (word >> shift) & mask;
                *index += 1;
                if code == 0 {
                    Ok(Some(Value::Null))
                } else {
                    dict.get(code as usize - 1).cloned().map(Some).ok_or_else(|| {
                        DbError::Corruption(format!("dictionary code {code} out of range"))
                    })
                }
            }
        }
    }
}

fn read_flagged_value(ty: SqlType, bytes: &[u8], pos: &mut usize) -> DbResult<Value> {
    let flag = *bytes
        .get(*pos)
        .ok_or_else(|| DbError::Corruption("column page truncated at a null flag".into()))?;
    *pos += 1;
    if flag != 0 {
        Ok(Value::Null)
    } else {
        decode_value(ty, bytes, pos)
    }
}

fn write_flagged_value(ty: SqlType, value: &Value, out: &mut Vec<u8>) -> DbResult<()> {
    if value.is_null() {
        out.push(1);
    } else {
        out.push(0);
        encode_value(ty, value, out)?;
    }
    Ok(())
}

/// Splits a column's values into encoded pages of at most `page_size`
/// bytes each.
pub fn encode_plain_pages(ty: SqlType, values: &[Value], page_size: usize) -> DbResult<Vec<Vec<u8>>> {
    let mut pages = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    let mut count: u16 = 0;
    for value in values {
        let mut encoded = Vec::new();
        write_flagged_value(ty, value, &mut encoded)?;
        if 2 + body.len() + encoded.len() > page_size || count == u16::MAX {
            if count == 0 {
                return Err(DbError::Execution(
                    "column value larger than a whole page".into(),
                ));
            }
            pages.push(finish_page(count, &body, page_size));
            body.clear();
            count = 0;
        }
        body.extend_from_slice(&encoded);
        count += 1;
    }
    if count > 0 {
        pages.push(finish_page(count, &body, page_size));
    }
    Ok(pages)
}

pub fn encode_rle_pages(ty: SqlType, values: &[Value], page_size: usize) -> DbResult<Vec<Vec<u8>>> {
    // Collapse into (value, startRow, runLength) triplets first.
    let mut runs: Vec<(Value, u32, u32)> = Vec::new();
    for (row, value) in values.iter().enumerate() {
        match runs.last_mut() {
            Some((v, _, len)) if v == value => *len += 1,
            _ => runs.push((value.clone(), row as u32, 1)),
        }
    }

    let mut pages = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    let mut count: u16 = 0;
    for (value, start, len) in &runs {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&start.to_be_bytes());
        encoded.extend_from_slice(&len.to_be_bytes());
        write_flagged_value(ty, value, &mut encoded)?;
        if 2 + body.len() + encoded.len() > page_size || count == u16::MAX {
            if count == 0 {
                return Err(DbError::Execution(
                    "column value larger than a whole page".into(),
                ));
            }
            pages.push(finish_page(count, &body, page_size));
            body.clear();
            count = 0;
        }
        body.extend_from_slice(&encoded);
        count += 1;
    }
    if count > 0 {
        pages.push(finish_page(count, &body, page_size));
    }
    Ok(pages)
}

pub fn encode_dict_pages(
    dict: &[Value],
    values: &[Value],
    page_size: usize,
) -> DbResult<Vec<Vec<u8>>> {
    let bit_width = dictionary_bit_width(dict.len().max(1));
    let codes_per_word = 16 / bit_width;
    let words_per_page = (page_size - 2) / 2;
    let codes_per_page = (words_per_page as u32 * codes_per_word).min(u16::MAX as u32) as usize;

    let mut pages = Vec::new();
    for chunk in values.chunks(codes_per_page) {
        let mut words = vec![0u16; chunk.len().div_ceil(codes_per_word as usize)];
        for (i, value) in chunk.iter().enumerate() {
            let code: u16 = if value.is_null() {
                0
            } else {
                dict.iter()
                    .position(|d| d == value)
                    .map(|p| p as u16 + 1)
                    .ok_or_else(|| {
                        DbError::Execution(format!("value {value:?} missing from the dictionary"))
                    })?
            };
            let word = &mut words[i / codes_per_word as usize];
            let shift = (i as u32 % codes_per_word) * bit_width;
            *word |= code << shift;
        }
        let mut page = vec![0u8; page_size];
        BigEndian::write_u16(&mut page[0..2], chunk.len() as u16);
        for (i, word) in words.iter().enumerate() {
            BigEndian::write_u16(&mut page[2 + i * 2..4 + i * 2], *word);
        }
        pages.push(page);
    }
    Ok(pages)
}

fn finish_page(count: u16, body: &[u8], page_size: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    BigEndian::write_u16(&mut page[0..2], count);
    page[2..2 + body.len()].copy_from_slice(body);
    page
}

/// Decodes one data page into a block, given the column's declared type,
/// encoding metadata, and (for dictionary columns) the shared dictionary.
pub fn decode_page(
    ty: SqlType,
    encoding: crate::encoding::ColumnEncoding,
    dict: &Rc<Vec<Value>>,
    data: &[u8],
) -> DbResult<ColStoreBlock> {
    let count = BigEndian::read_u16(&data[0..2]);
    Ok(match encoding {
        crate::encoding::ColumnEncoding::Uncompressed => ColStoreBlock::Plain {
            ty,
            bytes: data.to_vec(),
            pos: 2,
            remaining: count,
        },
        crate::encoding::ColumnEncoding::RunLength => ColStoreBlock::Rle {
            ty,
            bytes: data.to_vec(),
            pos: 2,
            remaining_runs: count,
            current: None,
        },
        crate::encoding::ColumnEncoding::Dictionary => {
            let bit_width = dictionary_bit_width(dict.len().max(1));
            let codes_per_word = 16 / bit_width;
            let n_words = (count as u32).div_ceil(codes_per_word) as usize;
            if 2 + n_words * 2 > data.len() {
                return Err(DbError::Corruption("dictionary page shorter than its code array".into()));
            }
            let words = (0..n_words)
                .map(|i| BigEndian::read_u16(&data[2 + i * 2..4 + i * 2]))
                .collect();
            ColStoreBlock::Packed {
                dict: Rc::clone(dict),
                words,
                bit_width,
                codes_per_word,
                index: 0,
                count,
            }
        }
    })
}
