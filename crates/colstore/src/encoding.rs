//! Per-column encoding selection for the bulk loader.

use catalog::Column;
use common::{DbError, DbResult};
use types::{SqlType, Value};

/// How a column's values are stored in its data pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnEncoding {
    /// Values laid out sequentially, fixed-width or length-prefixed.
    Uncompressed,
    /// `(value, startRow, runLength)` blocks.
    RunLength,
    /// Distinct string values mapped to small integer codes, packed
    /// several codes per 16-bit word.
    Dictionary,
}

impl ColumnEncoding {
    pub fn tag(self) -> u8 {
        match self {
            ColumnEncoding::Uncompressed => 0,
            ColumnEncoding::RunLength => 1,
            ColumnEncoding::Dictionary => 2,
        }
    }

    pub fn from_tag(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0 => ColumnEncoding::Uncompressed,
            1 => ColumnEncoding::RunLength,
            2 => ColumnEncoding::Dictionary,
            other => {
                return Err(DbError::Corruption(format!(
                    "unknown column encoding tag {other}"
                )));
            }
        })
    }
}

/// Chooses an encoding per column by inspecting the input before the bulk
/// load writes anything.
pub trait ColumnAnalyzer {
    fn choose_encoding(&self, column: &Column, values: &[Value]) -> ColumnEncoding;
}

/// Default heuristics: dictionary-encode low-cardinality string columns,
/// run-length-encode columns dominated by repeats, store the rest plain.
#[derive(Default)]
pub struct BasicAnalyzer;

/// Above this many distinct values a dictionary stops paying for itself.
const MAX_DICT_SIZE: usize = 255;

/// Minimum mean run length before run-length encoding wins.
const MIN_MEAN_RUN: f64 = 4.0;

impl ColumnAnalyzer for BasicAnalyzer {
    fn choose_encoding(&self, column: &Column, values: &[Value]) -> ColumnEncoding {
        if values.is_empty() {
            return ColumnEncoding::Uncompressed;
        }

        if matches!(column.ty, SqlType::Char(_) | SqlType::Varchar(_)) {
            let mut distinct: Vec<&Value> = Vec::new();
            for v in values.iter().filter(|v| !v.is_null()) {
                if !distinct.contains(&v) {
                    distinct.push(v);
                }
                if distinct.len() > MAX_DICT_SIZE {
                    break;
                }
            }
            if !distinct.is_empty()
                && distinct.len() <= MAX_DICT_SIZE
                && distinct.len() * 2 <= values.len()
            {
                return ColumnEncoding::Dictionary;
            }
        }

        let mut runs = 1usize;
        for pair in values.windows(2) {
            if pair[0] != pair[1] {
                runs += 1;
            }
        }
        if values.len() as f64 / runs as f64 >= MIN_MEAN_RUN {
            return ColumnEncoding::RunLength;
        }

        ColumnEncoding::Uncompressed
    }
}

/// The distinct non-null values of a dictionary column, in first-seen
/// order. Code 0 is reserved for NULL; value `i` gets code `i + 1`.
pub fn build_dictionary(values: &[Value]) -> DbResult<Vec<Value>> {
    let mut dict: Vec<Value> = Vec::new();
    for v in values.iter().filter(|v| !v.is_null()) {
        if !dict.contains(v) {
            dict.push(v.clone());
        }
    }
    if dict.len() > MAX_DICT_SIZE {
        return Err(DbError::Execution(format!(
            "column has {} distinct values, too many for a dictionary",
            dict.len()
        )));
    }
    Ok(dict)
}

/// `⌈log₂(|D| + 1)⌉`: the +1 accounts for the reserved NULL code.
pub fn dictionary_bit_width(dict_len: usize) -> u32 {
    usize::BITS - dict_len.leading_zeros()
}
