use super::*;
use buffer::NullForcer;
use catalog::{Column, KeyConstraints};
use encoding::BasicAnalyzer;
use heap::Scannable;
use tempfile::tempdir;

const PAGE: usize = 512;

fn city_schema() -> TableSchema {
    TableSchema::try_new(
        "City",
        vec![
            Column::new("id", SqlType::Integer),
            Column::new("state", SqlType::Varchar(2)),
            Column::new("population", SqlType::Integer),
        ],
        KeyConstraints::default(),
    )
    .unwrap()
}

fn city_rows(n: usize) -> Vec<Row> {
    let states = ["CA", "NY", "WA"];
    (0..n)
        .map(|i| {
            Row::new(vec![
                Value::Integer(i as i32),
                Value::Varchar(states[i % states.len()].into()),
                // long runs so the analyzer picks RLE
                Value::Integer((i / 20) as i32),
            ])
        })
        .collect()
}

#[test]
fn bulk_load_then_scan_returns_rows_in_order() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 32);
    let rows = city_rows(60);
    let table =
        ColStoreTable::write_table(&mut pool, &BasicAnalyzer, "City", city_schema(), &rows, PAGE)
            .unwrap();

    let mut scan = table.scan(&mut pool, &mut NullForcer).unwrap();
    let mut seen = Vec::new();
    while let Some(row) = scan.next_row(&mut pool, &mut NullForcer).unwrap() {
        seen.push(row.values);
    }
    assert_eq!(seen.len(), 60);
    for (i, values) in seen.iter().enumerate() {
        assert_eq!(values, &rows[i].values);
    }
}

#[test]
fn open_recovers_schema_and_readers_from_disk() {
    let dir = tempdir().unwrap();
    {
        let mut pool = BufferPool::new(dir.path(), 32);
        ColStoreTable::write_table(
            &mut pool,
            &BasicAnalyzer,
            "City",
            city_schema(),
            &city_rows(25),
            PAGE,
        )
        .unwrap();
    }

    let mut pool = BufferPool::new(dir.path(), 32);
    let table = ColStoreTable::open(&mut pool, &mut NullForcer, "City").unwrap();
    assert_eq!(table.schema(), &city_schema());

    let mut reader = table.column_reader(&mut pool, &mut NullForcer, 1).unwrap();
    assert_eq!(reader.num_values(), 25);
    let first = reader.next_value(&mut pool, &mut NullForcer).unwrap();
    assert_eq!(first, Some(Value::Varchar("CA".into())));
}

#[test]
fn per_column_files_exist_on_disk() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 32);
    ColStoreTable::write_table(
        &mut pool,
        &BasicAnalyzer,
        "City",
        city_schema(),
        &city_rows(10),
        PAGE,
    )
    .unwrap();

    assert!(dir.path().join("City/City.tbl").exists());
    assert!(dir.path().join("City/City.id.tbl").exists());
    assert!(dir.path().join("City/City.state.tbl").exists());
    assert!(dir.path().join("City/City.population.tbl").exists());
}

#[test]
fn nulls_survive_the_bulk_load() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 32);
    let schema = TableSchema::try_new(
        "t",
        vec![Column::new("v", SqlType::Integer)],
        KeyConstraints::default(),
    )
    .unwrap();
    let rows = vec![
        Row::new(vec![Value::Integer(1)]),
        Row::new(vec![Value::Null]),
        Row::new(vec![Value::Integer(3)]),
    ];
    let table = ColStoreTable::write_table(&mut pool, &BasicAnalyzer, "t", schema, &rows, PAGE).unwrap();

    let mut scan = table.scan(&mut pool, &mut NullForcer).unwrap();
    let mut seen = Vec::new();
    while let Some(row) = scan.next_row(&mut pool, &mut NullForcer).unwrap() {
        seen.push(row.values[0].clone());
    }
    assert_eq!(seen, vec![Value::Integer(1), Value::Null, Value::Integer(3)]);
}

#[test]
fn rewound_scan_replays_from_the_first_row() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 32);
    let rows = city_rows(12);
    let table =
        ColStoreTable::write_table(&mut pool, &BasicAnalyzer, "City", city_schema(), &rows, PAGE)
            .unwrap();

    let mut scan = table.scan(&mut pool, &mut NullForcer).unwrap();
    let mut first = 0;
    while scan.next_row(&mut pool, &mut NullForcer).unwrap().is_some() {
        first += 1;
    }
    scan.rewind();
    let replayed = scan.next_row(&mut pool, &mut NullForcer).unwrap().unwrap();
    assert_eq!(first, 12);
    assert_eq!(replayed.values, rows[0].values);
}

#[test]
fn mismatched_row_width_is_rejected() {
    let dir = tempdir().unwrap();
    let mut pool = BufferPool::new(dir.path(), 32);
    let err = ColStoreTable::write_table(
        &mut pool,
        &BasicAnalyzer,
        "City",
        city_schema(),
        &[Row::new(vec![Value::Integer(1)])],
        PAGE,
    )
    .unwrap_err();
    assert!(matches!(err, DbError::Schema(_)));
}
