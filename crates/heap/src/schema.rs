//! On-disk schema header stored on page 0 of every table file, after the
//! common file-type/page-size header bytes.
//!
//! Layout: table name, column count, then per column
//! `(typeId, declaredLength?, flags, name)`, then the key-constraint
//! descriptors. Strings use the 1-byte-length `vstr` form; ordinals are
//! 16-bit, big-endian.

use byteorder::{BigEndian, ByteOrder};
use catalog::{Column, ForeignKey, KeyConstraints, TableSchema};
use common::{ColumnId, DbError, DbResult};
use types::SqlType;

/// Schema bytes begin at this offset on page 0, right after the file header.
pub const SCHEMA_OFFSET: usize = 3;

const FLAG_NOT_NULL: u8 = 0x01;

pub fn encode_schema(schema: &TableSchema) -> DbResult<Vec<u8>> {
    if schema.columns.len() > 255 {
        return Err(DbError::Schema(
            "a table file's schema header is limited to 255 columns".into(),
        ));
    }
    let mut out = Vec::new();
    write_vstr(&mut out, &schema.table_qualifier)?;
    out.push(schema.columns.len() as u8);
    for col in &schema.columns {
        out.push(col.ty.type_id());
        match col.ty {
            SqlType::Char(n) | SqlType::Varchar(n) => {
                out.extend_from_slice(&n.to_be_bytes());
            }
            _ => {}
        }
        out.push(if col.nullable { 0 } else { FLAG_NOT_NULL });
        write_vstr(&mut out, &col.name)?;
    }

    let keys = &schema.keys;
    match &keys.primary_key {
        None => out.push(0),
        Some(cols) => {
            out.push(1);
            write_ordinals(&mut out, cols)?;
        }
    }
    out.push(keys.candidate_keys.len() as u8);
    for key in &keys.candidate_keys {
        write_ordinals(&mut out, key)?;
    }
    out.push(keys.foreign_keys.len() as u8);
    for fk in &keys.foreign_keys {
        write_vstr(&mut out, &fk.referenced_table)?;
        write_ordinals(&mut out, &fk.columns)?;
        write_ordinals(&mut out, &fk.referenced_columns)?;
    }
    Ok(out)
}

pub fn decode_schema(buf: &[u8]) -> DbResult<TableSchema> {
    let mut pos = 0usize;
    let table = read_vstr(buf, &mut pos)?;
    let n_cols = read_u8(buf, &mut pos)? as usize;
    let mut columns = Vec::with_capacity(n_cols);
    for _ in 0..n_cols {
        let type_id = read_u8(buf, &mut pos)?;
        let len = match type_id {
            5 | 6 => read_u16(buf, &mut pos)?,
            _ => 0,
        };
        let ty = SqlType::from_type_id(type_id, len)
            .ok_or_else(|| DbError::Corruption(format!("unknown column type id {type_id}")))?;
        let flags = read_u8(buf, &mut pos)?;
        let name = read_vstr(buf, &mut pos)?;
        let mut col = Column::new(name, ty);
        if flags & FLAG_NOT_NULL != 0 {
            col = col.not_null();
        }
        columns.push(col);
    }

    let primary_key = match read_u8(buf, &mut pos)? {
        0 => None,
        _ => Some(read_ordinals(buf, &mut pos)?),
    };
    let n_candidates = read_u8(buf, &mut pos)? as usize;
    let mut candidate_keys = Vec::with_capacity(n_candidates);
    for _ in 0..n_candidates {
        candidate_keys.push(read_ordinals(buf, &mut pos)?);
    }
    let n_fks = read_u8(buf, &mut pos)? as usize;
    let mut foreign_keys = Vec::with_capacity(n_fks);
    for _ in 0..n_fks {
        let referenced_table = read_vstr(buf, &mut pos)?;
        let columns = read_ordinals(buf, &mut pos)?;
        let referenced_columns = read_ordinals(buf, &mut pos)?;
        foreign_keys.push(ForeignKey {
            columns,
            referenced_table,
            referenced_columns,
        });
    }

    TableSchema::try_new(
        &table,
        columns,
        KeyConstraints {
            primary_key,
            candidate_keys,
            foreign_keys,
        },
    )
}

fn write_vstr(out: &mut Vec<u8>, s: &str) -> DbResult<()> {
    if s.len() > 255 {
        return Err(DbError::Schema(format!("name {s:?} exceeds 255 bytes")));
    }
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_ordinals(out: &mut Vec<u8>, ordinals: &[ColumnId]) -> DbResult<()> {
    if ordinals.len() > 255 {
        return Err(DbError::Schema("key spans more than 255 columns".into()));
    }
    out.push(ordinals.len() as u8);
    for &o in ordinals {
        out.extend_from_slice(&o.to_be_bytes());
    }
    Ok(())
}

fn read_u8(buf: &[u8], pos: &mut usize) -> DbResult<u8> {
    let b = *buf
        .get(*pos)
        .ok_or_else(|| DbError::Corruption("schema header truncated".into()))?;
    *pos += 1;
    Ok(b)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> DbResult<u16> {
    let bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| DbError::Corruption("schema header truncated".into()))?;
    *pos += 2;
    Ok(BigEndian::read_u16(bytes))
}

fn read_vstr(buf: &[u8], pos: &mut usize) -> DbResult<String> {
    let len = read_u8(buf, pos)? as usize;
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| DbError::Corruption("schema header truncated inside a name".into()))?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).map_err(|e| DbError::Corruption(e.to_string()))
}

fn read_ordinals(buf: &[u8], pos: &mut usize) -> DbResult<Vec<ColumnId>> {
    let n = read_u8(buf, pos)? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_u16(buf, pos)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_round_trips_with_keys() {
        let schema = TableSchema::try_new(
            "Employee",
            vec![
                Column::new("id", SqlType::Integer).not_null(),
                Column::new("name", SqlType::Varchar(64)),
                Column::new("grade", SqlType::Char(2)),
                Column::new("salary", SqlType::Double),
            ],
            KeyConstraints {
                primary_key: Some(vec![0]),
                candidate_keys: vec![vec![1, 2]],
                foreign_keys: vec![ForeignKey {
                    columns: vec![2],
                    referenced_table: "Grade".into(),
                    referenced_columns: vec![0],
                }],
            },
        )
        .unwrap();

        let bytes = encode_schema(&schema).unwrap();
        let back = decode_schema(&bytes).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn truncated_header_is_corruption() {
        let schema = TableSchema::try_new(
            "t",
            vec![Column::new("a", SqlType::Integer)],
            KeyConstraints::default(),
        )
        .unwrap();
        let bytes = encode_schema(&schema).unwrap();
        let err = decode_schema(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, DbError::Corruption(_)));
    }
}
