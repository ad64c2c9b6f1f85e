use super::*;
use buffer::NullForcer;
use catalog::{Column, KeyConstraints, TableSchema};
use tempfile::tempdir;
use types::{SqlType, Value};

const PAGE: usize = 512;

fn test_schema() -> TableSchema {
    TableSchema::try_new(
        "t",
        vec![
            Column::new("a", SqlType::Integer),
            Column::new("b", SqlType::Integer),
        ],
        KeyConstraints::default(),
    )
    .unwrap()
}

fn row(a: i32, b: Option<i32>) -> Row {
    Row::new(vec![
        Value::Integer(a),
        b.map(Value::Integer).unwrap_or(Value::Null),
    ])
}

#[test]
fn create_then_open_recovers_schema_from_header_page() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();

    let mut pool2 = BufferPool::new(dir.path(), 8);
    let table = HeapFile::open(&mut pool2, &mut NullForcer, "t").unwrap();
    assert_eq!(table.schema(), &test_schema());
    assert_eq!(table.file_name(), "t/t.tbl");
}

#[test]
fn add_get_round_trip() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    let table = HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();

    let rid = table.add_tuple(&mut pool, &mut NullForcer, &row(1, Some(10))).unwrap();
    let fetched = table.get_tuple(&mut pool, &mut NullForcer, rid).unwrap();
    assert_eq!(fetched.values, vec![Value::Integer(1), Value::Integer(10)]);
    assert_eq!(fetched.rid(), Some(rid));
}

#[test]
fn full_scan_returns_every_row_including_nulls() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    let table = HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();

    let rows = [
        row(0, None),
        row(1, Some(10)),
        row(2, Some(20)),
        row(3, Some(30)),
        row(4, None),
    ];
    for r in &rows {
        table.add_tuple(&mut pool, &mut NullForcer, r).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = table.first_tuple(&mut pool, &mut NullForcer).unwrap();
    while let Some((rid, row)) = cursor {
        seen.push(row.values.clone());
        cursor = table.next_tuple(&mut pool, &mut NullForcer, rid).unwrap();
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], vec![Value::Integer(0), Value::Null]);
    assert_eq!(seen[4], vec![Value::Integer(4), Value::Null]);
}

#[test]
fn delete_removes_row_from_scan() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    let table = HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();

    let rid0 = table.add_tuple(&mut pool, &mut NullForcer, &row(1, Some(1))).unwrap();
    let rid1 = table.add_tuple(&mut pool, &mut NullForcer, &row(2, Some(2))).unwrap();
    table.delete_tuple(&mut pool, &mut NullForcer, rid0).unwrap();

    assert!(table.get_tuple(&mut pool, &mut NullForcer, rid0).is_err());
    let (first_rid, first) = table.first_tuple(&mut pool, &mut NullForcer).unwrap().unwrap();
    assert_eq!(first_rid, rid1);
    assert_eq!(first.values[0], Value::Integer(2));
    assert!(table.next_tuple(&mut pool, &mut NullForcer, first_rid).unwrap().is_none());
}

#[test]
fn inserts_spill_onto_new_pages_when_full() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 16);
    let schema = TableSchema::try_new(
        "big",
        vec![Column::new("s", SqlType::Varchar(200))],
        KeyConstraints::default(),
    )
    .unwrap();
    let table = HeapFile::create(&mut pool, "big", schema, PAGE).unwrap();

    // Each row is ~130 bytes; a 512-byte page holds three.
    let mut rids = Vec::new();
    for i in 0..8 {
        let r = Row::new(vec![Value::Varchar(format!("{i}{}", "x".repeat(128)))]);
        rids.push(table.add_tuple(&mut pool, &mut NullForcer, &r).unwrap());
    }
    let pages: std::collections::HashSet<u64> = rids.iter().map(|r| r.page_id.0).collect();
    assert!(pages.len() > 1, "rows should spill onto multiple pages");

    let mut count = 0;
    let mut cursor = table.first_tuple(&mut pool, &mut NullForcer).unwrap();
    while let Some((rid, _)) = cursor {
        count += 1;
        cursor = table.next_tuple(&mut pool, &mut NullForcer, rid).unwrap();
    }
    assert_eq!(count, 8);
}

#[test]
fn scan_cursor_restarts_cleanly() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    let table = HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();
    for i in 0..3 {
        table.add_tuple(&mut pool, &mut NullForcer, &row(i, Some(i))).unwrap();
    }

    let reopened = HeapFile::open(&mut pool, &mut NullForcer, "t").unwrap();
    let mut scan = HeapScan::new(reopened);
    let mut first_pass = 0;
    while scan.next_row(&mut pool, &mut NullForcer).unwrap().is_some() {
        first_pass += 1;
    }
    scan.rewind();
    let mut second_pass = 0;
    while scan.next_row(&mut pool, &mut NullForcer).unwrap().is_some() {
        second_pass += 1;
    }
    assert_eq!((first_pass, second_pass), (3, 3));
}

#[test]
fn header_page_is_never_a_data_page() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 8);
    let table = HeapFile::create(&mut pool, "t", test_schema(), PAGE).unwrap();
    let err = table
        .get_tuple(
            &mut pool,
            &mut NullForcer,
            RecordId {
                page_id: PageId(0),
                slot: 0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}
