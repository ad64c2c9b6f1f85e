//! Tuple wire format: a NULL bitmap prefix followed by the non-null column
//! values in declaration order, big-endian throughout.

use byteorder::{BigEndian, ByteOrder};
use catalog::Column;
use common::{DbError, DbResult, Row};
use types::{SqlType, Value};

/// Encodes one value of a declared type. `Char` is space-padded to its
/// declared width; `Varchar` is length-prefixed (1 byte when the declared
/// maximum fits in 255 bytes, 2 bytes otherwise).
pub fn encode_value(ty: SqlType, value: &Value, out: &mut Vec<u8>) -> DbResult<()> {
    match (ty, value) {
        (SqlType::Integer, Value::Integer(i)) => out.extend_from_slice(&i.to_be_bytes()),
        (SqlType::BigInt, Value::BigInt(i)) => out.extend_from_slice(&i.to_be_bytes()),
        (SqlType::Float, Value::Float(f)) => out.extend_from_slice(&f.to_be_bytes()),
        (SqlType::Double, Value::Double(f)) => out.extend_from_slice(&f.to_be_bytes()),
        (SqlType::Boolean, Value::Boolean(b)) => out.push(*b as u8),
        (SqlType::Char(n), Value::Char(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() > n as usize {
                return Err(DbError::Schema(format!(
                    "value of length {} exceeds CHAR({n})",
                    bytes.len()
                )));
            }
            out.extend_from_slice(bytes);
            out.extend(std::iter::repeat_n(b' ', n as usize - bytes.len()));
        }
        (SqlType::Varchar(n), Value::Varchar(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() > n as usize {
                return Err(DbError::Schema(format!(
                    "value of length {} exceeds VARCHAR({n})",
                    bytes.len()
                )));
            }
            if n <= 255 {
                out.push(bytes.len() as u8);
            } else {
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            }
            out.extend_from_slice(bytes);
        }
        (ty, value) => {
            return Err(DbError::Schema(format!(
                "value {value:?} does not match declared type {ty:?}"
            )));
        }
    }
    Ok(())
}

/// Decodes one value of a declared type from `buf[*pos..]`, advancing `pos`.
pub fn decode_value(ty: SqlType, buf: &[u8], pos: &mut usize) -> DbResult<Value> {
    let need = |n: usize, pos: usize| -> DbResult<()> {
        if pos + n > buf.len() {
            Err(DbError::Corruption("tuple truncated mid-value".into()))
        } else {
            Ok(())
        }
    };
    let value = match ty {
        SqlType::Integer => {
            need(4, *pos)?;
            let v = Value::Integer(BigEndian::read_i32(&buf[*pos..*pos + 4]));
            *pos += 4;
            v
        }
        SqlType::BigInt => {
            need(8, *pos)?;
            let v = Value::BigInt(BigEndian::read_i64(&buf[*pos..*pos + 8]));
            *pos += 8;
            v
        }
        SqlType::Float => {
            need(4, *pos)?;
            let v = Value::Float(BigEndian::read_f32(&buf[*pos..*pos + 4]));
            *pos += 4;
            v
        }
        SqlType::Double => {
            need(8, *pos)?;
            let v = Value::Double(BigEndian::read_f64(&buf[*pos..*pos + 8]));
            *pos += 8;
            v
        }
        SqlType::Boolean => {
            need(1, *pos)?;
            let v = Value::Boolean(buf[*pos] != 0);
            *pos += 1;
            v
        }
        SqlType::Char(n) => {
            need(n as usize, *pos)?;
            let s = std::str::from_utf8(&buf[*pos..*pos + n as usize])
                .map_err(|e| DbError::Corruption(e.to_string()))?;
            *pos += n as usize;
            Value::Char(s.trim_end_matches(' ').to_string())
        }
        SqlType::Varchar(n) => {
            let len = if n <= 255 {
                need(1, *pos)?;
                let l = buf[*pos] as usize;
                *pos += 1;
                l
            } else {
                need(2, *pos)?;
                let l = BigEndian::read_u16(&buf[*pos..*pos + 2]) as usize;
                *pos += 2;
                l
            };
            need(len, *pos)?;
            let s = std::str::from_utf8(&buf[*pos..*pos + len])
                .map_err(|e| DbError::Corruption(e.to_string()))?;
            *pos += len;
            Value::Varchar(s.to_string())
        }
    };
    Ok(value)
}

/// Widens or re-tags a value to fit a declared column type, so literals like
/// an INTEGER `27` can land in a BIGINT or DOUBLE column. NULL always fits.
pub fn coerce_value(value: &Value, ty: SqlType) -> DbResult<Value> {
    let coerced = match (value, ty) {
        (Value::Null, _) => Value::Null,
        (Value::Integer(i), SqlType::BigInt) => Value::BigInt(*i as i64),
        (Value::Integer(i), SqlType::Float) => Value::Float(*i as f32),
        (Value::Integer(i), SqlType::Double) => Value::Double(*i as f64),
        (Value::BigInt(i), SqlType::Double) => Value::Double(*i as f64),
        (Value::Float(f), SqlType::Double) => Value::Double(*f as f64),
        (Value::Varchar(s), SqlType::Char(_)) => Value::Char(s.clone()),
        (Value::Char(s), SqlType::Varchar(_)) => Value::Varchar(s.clone()),
        (v, ty) if matches_type(v, ty) => v.clone(),
        (v, ty) => {
            return Err(DbError::Schema(format!(
                "cannot store {v:?} in a column of type {ty:?}"
            )));
        }
    };
    Ok(coerced)
}

fn matches_type(value: &Value, ty: SqlType) -> bool {
    matches!(
        (value, ty),
        (Value::Integer(_), SqlType::Integer)
            | (Value::BigInt(_), SqlType::BigInt)
            | (Value::Float(_), SqlType::Float)
            | (Value::Double(_), SqlType::Double)
            | (Value::Char(_), SqlType::Char(_))
            | (Value::Varchar(_), SqlType::Varchar(_))
            | (Value::Boolean(_), SqlType::Boolean)
    )
}

/// Encodes a whole row: `ceil(ncols / 8)` bitmap bytes (bit set = NULL),
/// then each non-null value.
pub fn encode_tuple(columns: &[Column], row: &Row) -> DbResult<Vec<u8>> {
    if row.values.len() != columns.len() {
        return Err(DbError::Schema(format!(
            "row has {} values but the schema declares {} columns",
            row.values.len(),
            columns.len()
        )));
    }
    let bitmap_len = columns.len().div_ceil(8);
    let mut out = vec![0u8; bitmap_len];
    for (i, (col, value)) in columns.iter().zip(&row.values).enumerate() {
        if value.is_null() {
            if !col.nullable {
                return Err(DbError::Schema(format!(
                    "NULL in non-nullable column '{}'",
                    col.name
                )));
            }
            out[i / 8] |= 1 << (i % 8);
        }
    }
    for (col, value) in columns.iter().zip(&row.values) {
        if !value.is_null() {
            let coerced = coerce_value(value, col.ty)?;
            encode_value(col.ty, &coerced, &mut out)?;
        }
    }
    Ok(out)
}

pub fn decode_tuple(columns: &[Column], bytes: &[u8]) -> DbResult<Row> {
    let bitmap_len = columns.len().div_ceil(8);
    if bytes.len() < bitmap_len {
        return Err(DbError::Corruption("tuple shorter than its NULL bitmap".into()));
    }
    let mut pos = bitmap_len;
    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        if bytes[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
        } else {
            values.push(decode_value(col.ty, bytes, &mut pos)?);
        }
    }
    Ok(Row::new(values))
}

/// Estimated encoded size of one tuple under a schema, used by plan-cost
/// estimation. Variable-length columns count at half their declared maximum.
pub fn estimated_tuple_size(columns: &[Column]) -> f32 {
    let mut size = columns.len().div_ceil(8) as f32;
    for col in columns {
        size += match col.ty.fixed_width() {
            Some(w) => w as f32,
            None => match col.ty {
                SqlType::Varchar(n) => 1.0 + n as f32 / 2.0,
                _ => 8.0,
            },
        };
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", SqlType::Integer),
            Column::new("name", SqlType::Varchar(32)),
            Column::new("score", SqlType::Double),
        ]
    }

    #[test]
    fn tuple_round_trips() {
        let cols = columns();
        let row = Row::new(vec![
            Value::Integer(7),
            Value::Varchar("Ada".into()),
            Value::Double(2.5),
        ]);
        let bytes = encode_tuple(&cols, &row).unwrap();
        let back = decode_tuple(&cols, &bytes).unwrap();
        assert_eq!(back.values, row.values);
    }

    #[test]
    fn null_bitmap_skips_values() {
        let cols = columns();
        let row = Row::new(vec![Value::Integer(1), Value::Null, Value::Null]);
        let bytes = encode_tuple(&cols, &row).unwrap();
        // one bitmap byte + one 4-byte integer, nothing for the NULLs
        assert_eq!(bytes.len(), 1 + 4);
        assert_eq!(bytes[0], 0b0000_0110);
        let back = decode_tuple(&cols, &bytes).unwrap();
        assert_eq!(back.values, row.values);
    }

    #[test]
    fn char_values_are_space_padded() {
        let cols = vec![Column::new("code", SqlType::Char(4))];
        let row = Row::new(vec![Value::Char("ab".into())]);
        let bytes = encode_tuple(&cols, &row).unwrap();
        assert_eq!(&bytes[1..], b"ab  ");
        let back = decode_tuple(&cols, &bytes).unwrap();
        assert_eq!(back.values[0], Value::Char("ab".into()));
    }

    #[test]
    fn oversized_varchar_is_rejected() {
        let cols = vec![Column::new("s", SqlType::Varchar(2))];
        let row = Row::new(vec![Value::Varchar("long".into())]);
        assert!(matches!(encode_tuple(&cols, &row), Err(DbError::Schema(_))));
    }

    #[test]
    fn null_in_not_null_column_is_rejected() {
        let cols = vec![Column::new("id", SqlType::Integer).not_null()];
        let row = Row::new(vec![Value::Null]);
        assert!(matches!(encode_tuple(&cols, &row), Err(DbError::Schema(_))));
    }

    #[test]
    fn integer_literal_coerces_into_bigint_column() {
        let coerced = coerce_value(&Value::Integer(27), SqlType::BigInt).unwrap();
        assert_eq!(coerced, Value::BigInt(27));
        assert!(coerce_value(&Value::Varchar("x".into()), SqlType::Integer).is_err());
    }
}
