use super::*;
use buffer::{BufferPool, NullForcer};
use catalog::{Column, KeyConstraints, TableSchema};
use colstore::ColStoreTable;
use colstore::encoding::BasicAnalyzer;
use common::Row;
use executor::execute;
use heap::HeapFile;
use pretty_assertions::assert_eq;
use tempfile::{TempDir, tempdir};
use types::{SqlType, Value};

const PAGE: usize = 512;

fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        name: name.into(),
    }
}

fn qcol(table: &str, name: &str) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        name: name.into(),
    }
}

fn int(i: i32) -> Expr {
    Expr::Literal(Value::Integer(i))
}

fn cmp(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn and(left: Expr, right: Expr) -> Expr {
    cmp(left, BinaryOp::And, right)
}

fn setup() -> (TempDir, BufferPool) {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(dir.path(), 64);
    (dir, pool)
}

fn make_table(pool: &mut BufferPool, name: &str, cols: &[&str], rows: &[Vec<i32>]) {
    let columns = cols
        .iter()
        .map(|c| Column::new(*c, SqlType::Integer))
        .collect();
    let schema = TableSchema::try_new(name, columns, KeyConstraints::default()).unwrap();
    let table = HeapFile::create(pool, name, schema, PAGE).unwrap();
    for row in rows {
        let values = row.iter().map(|&v| Value::Integer(v)).collect();
        table.add_tuple(pool, &mut NullForcer, &Row::new(values)).unwrap();
    }
}

fn plan_and_run(clause: &SelectClause, pool: &mut BufferPool) -> Vec<Vec<Value>> {
    let mut forcer = NullForcer;
    let mut ctx = ExecutionContext {
        pool,
        forcer: &mut forcer,
    };
    let mut plan = make_plan(clause, &mut ctx).unwrap();
    execute(plan.as_mut(), &mut ctx)
        .unwrap()
        .into_iter()
        .map(|r| r.values)
        .collect()
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|&v| Value::Integer(v)).collect()
}

#[test]
fn conjuncts_flatten_and_dedup() {
    let e = and(
        and(cmp(col("a"), BinaryOp::Eq, int(1)), cmp(col("b"), BinaryOp::Lt, int(2))),
        cmp(col("a"), BinaryOp::Eq, int(1)),
    );
    let mut out = Vec::new();
    collect_conjuncts(&e, &mut out);
    assert_eq!(out.len(), 2);
}

#[test]
fn single_table_select_with_pushdown() {
    let (_dir, mut pool) = setup();
    make_table(
        &mut pool,
        "t",
        &["a", "b"],
        &[vec![1, 10], vec![2, 20], vec![3, 30]],
    );
    let clause = SelectClause::scan("t").with_where(cmp(col("b"), BinaryOp::Gt, int(15)));
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows, vec![ints(&[2, 20]), ints(&[3, 30])]);
}

#[test]
fn two_table_join_through_where_clause() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "emp", &["id", "dept"], &[vec![1, 10], vec![2, 20]]);
    make_table(&mut pool, "dept", &["did", "size"], &[vec![10, 5], vec![30, 6]]);

    let clause = SelectClause {
        from: FromClause::join(
            FromClause::BaseTable {
                table: "emp".into(),
                alias: None,
            },
            FromClause::BaseTable {
                table: "dept".into(),
                alias: None,
            },
            JoinType::Inner,
            None,
        ),
        where_expr: Some(cmp(col("dept"), BinaryOp::Eq, col("did"))),
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        select: vec![SelectValue::Wildcard],
        distinct: false,
    };
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows, vec![ints(&[1, 10, 10, 5])]);
}

#[test]
fn pushdown_is_sound_for_left_outer_joins() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "l", &["a"], &[vec![1], vec![2]]);
    make_table(&mut pool, "r", &["x"], &[vec![2]]);

    // l LEFT OUTER JOIN r ON a = x, WHERE a < 10: the WHERE conjunct
    // references the preserved side's partner... it must NOT be pushed to
    // the right side; pushing to the left is allowed and keeps both rows.
    let clause = SelectClause {
        from: FromClause::join(
            FromClause::BaseTable {
                table: "l".into(),
                alias: None,
            },
            FromClause::BaseTable {
                table: "r".into(),
                alias: None,
            },
            JoinType::LeftOuter,
            Some(cmp(col("a"), BinaryOp::Eq, col("x"))),
        ),
        where_expr: Some(cmp(col("a"), BinaryOp::Lt, int(10))),
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        select: vec![SelectValue::Wildcard],
        distinct: false,
    };
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&vec![Value::Integer(1), Value::Null]));
    assert!(rows.contains(&vec![Value::Integer(2), Value::Integer(2)]));
}

#[test]
fn derived_table_is_renamed_and_joinable() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "t", &["a", "b"], &[vec![1, 10], vec![2, 20]]);

    let clause = SelectClause {
        from: FromClause::Derived {
            query: Box::new(SelectClause::scan("t").with_where(cmp(col("a"), BinaryOp::Eq, int(2)))),
            alias: "sub".into(),
        },
        where_expr: Some(cmp(qcol("sub", "b"), BinaryOp::Gt, int(0))),
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        select: vec![SelectValue::column(Some("sub"), "b")],
        distinct: false,
    };
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows, vec![ints(&[20])]);
}

#[test]
fn order_by_wraps_plan_in_sort() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "t", &["a"], &[vec![3], vec![1], vec![2]]);
    let mut clause = SelectClause::scan("t");
    clause.order_by = vec![OrderBy {
        expr: col("a"),
        ascending: false,
    }];
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows, vec![ints(&[3]), ints(&[2]), ints(&[1])]);
}

#[test]
fn column_store_base_table_uses_cs_project() {
    let (_dir, mut pool) = setup();
    let schema = TableSchema::try_new(
        "cstab",
        vec![
            Column::new("a", SqlType::Integer),
            Column::new("b", SqlType::Integer),
        ],
        KeyConstraints::default(),
    )
    .unwrap();
    let rows: Vec<Row> = (0..6)
        .map(|i| Row::new(vec![Value::Integer(i), Value::Integer(i % 2)]))
        .collect();
    ColStoreTable::write_table(&mut pool, &BasicAnalyzer, "cstab", schema, &rows, PAGE).unwrap();

    let clause = SelectClause::scan("cstab").with_where(cmp(col("b"), BinaryOp::Eq, int(1)));
    let out = plan_and_run(&clause, &mut pool);
    assert_eq!(out, vec![ints(&[1, 1]), ints(&[3, 1]), ints(&[5, 1])]);
}

#[test]
fn grouping_is_rejected() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "t", &["a"], &[vec![1]]);
    let mut clause = SelectClause::scan("t");
    clause.group_by = vec![col("a")];
    let mut forcer = NullForcer;
    let mut ctx = ExecutionContext {
        pool: &mut pool,
        forcer: &mut forcer,
    };
    assert!(matches!(
        make_plan(&clause, &mut ctx),
        Err(DbError::Execution(_))
    ));
}

// --- DP enumeration over synthetic statistics ---

fn leaf(table: &str, cols: &[&str], tuples: f32, pages: f32) -> LeafInfo {
    LeafInfo {
        schema: PlanSchema {
            qualified: cols.iter().map(|c| format!("{table}.{c}")).collect(),
            columns: cols.iter().map(|c| Column::new(*c, SqlType::Integer)).collect(),
        },
        cost: PlanCost {
            num_tuples: tuples,
            tuple_size: 8.0,
            cpu_cost: tuples,
            num_block_ios: pages,
        },
    }
}

/// Flattens a left-deep order into the leaf visit sequence.
fn order_sequence(order: &JoinOrder, out: &mut Vec<usize>) {
    match order {
        JoinOrder::Leaf(i) => out.push(*i),
        JoinOrder::Join { left, right, .. } => {
            order_sequence(left, out);
            out.push(*right);
        }
    }
}

#[test]
fn dp_joins_small_tables_before_the_giant_one() {
    // A(1000) ⋈ B(10) ⋈ C(1_000_000) with A.id = B.id and B.id = C.id:
    // the optimal left-deep order starts with {A, B}; C never joins first.
    let leaves = vec![
        leaf("a", &["id"], 1_000.0, 10.0),
        leaf("b", &["id"], 10.0, 1.0),
        leaf("c", &["id"], 1_000_000.0, 10_000.0),
    ];
    let conjuncts = vec![
        cmp(qcol("a", "id"), BinaryOp::Eq, qcol("b", "id")),
        cmp(qcol("b", "id"), BinaryOp::Eq, qcol("c", "id")),
    ];
    let free: Vec<usize> = vec![0, 1];

    let best = enumerate_join_order(&leaves, &conjuncts, &free).unwrap();
    let mut sequence = Vec::new();
    order_sequence(&best.order, &mut sequence);

    assert_eq!(sequence.len(), 3);
    assert_eq!(sequence[2], 2, "C must be joined last");
    assert_eq!(best.conjuncts_used.len(), 2);
}

#[test]
fn dp_covers_all_leaves_exactly_once() {
    let leaves = vec![
        leaf("a", &["x"], 100.0, 2.0),
        leaf("b", &["y"], 100.0, 2.0),
        leaf("c", &["z"], 100.0, 2.0),
        leaf("d", &["w"], 100.0, 2.0),
    ];
    let best = enumerate_join_order(&leaves, &[], &[]).unwrap();
    let mut sequence = Vec::new();
    order_sequence(&best.order, &mut sequence);
    sequence.sort_unstable();
    assert_eq!(sequence, vec![0, 1, 2, 3]);
}

#[test]
fn dp_prefers_selective_predicates_early() {
    // Two tables with an equijoin beat a cross product in the DP table.
    let leaves = vec![
        leaf("a", &["id"], 100.0, 2.0),
        leaf("b", &["id"], 100.0, 2.0),
    ];
    let conjuncts = vec![cmp(qcol("a", "id"), BinaryOp::Eq, qcol("b", "id"))];
    let with_pred = enumerate_join_order(&leaves, &conjuncts, &[0]).unwrap();
    let without = enumerate_join_order(&leaves, &[], &[]).unwrap();
    assert!(with_pred.cost.num_tuples < without.cost.num_tuples);
    assert_eq!(with_pred.conjuncts_used, vec![0]);
}

#[test]
fn join_execution_matches_dp_plan_end_to_end() {
    let (_dir, mut pool) = setup();
    make_table(&mut pool, "a", &["id", "v"], &[vec![1, 100], vec![2, 200], vec![3, 300]]);
    make_table(&mut pool, "b", &["id", "w"], &[vec![2, 7], vec![3, 8]]);
    make_table(&mut pool, "c", &["id", "u"], &[vec![3, 50], vec![4, 60]]);

    let from = FromClause::join(
        FromClause::join(
            FromClause::BaseTable {
                table: "a".into(),
                alias: None,
            },
            FromClause::BaseTable {
                table: "b".into(),
                alias: None,
            },
            JoinType::Inner,
            Some(cmp(qcol("a", "id"), BinaryOp::Eq, qcol("b", "id"))),
        ),
        FromClause::BaseTable {
            table: "c".into(),
            alias: None,
        },
        JoinType::Inner,
        Some(cmp(qcol("b", "id"), BinaryOp::Eq, qcol("c", "id"))),
    );
    let clause = SelectClause {
        from,
        where_expr: None,
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        select: vec![
            SelectValue::column(Some("a"), "v"),
            SelectValue::column(Some("b"), "w"),
            SelectValue::column(Some("c"), "u"),
        ],
        distinct: false,
    };
    let rows = plan_and_run(&clause, &mut pool);
    assert_eq!(rows, vec![ints(&[300, 8, 50])]);
}
