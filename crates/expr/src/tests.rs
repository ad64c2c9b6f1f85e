use super::*;
use types::Value::*;

fn schema(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|s| s.to_string()).collect()
}

fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        name: name.to_string(),
    }
}

#[test]
fn eval_literals_and_columns() {
    let row = Row::new(vec![Integer(1), Varchar("Will".into()), Boolean(true)]);
    let schema = schema(&["id", "name", "active"]);
    let env = Environment::single(&schema, &row);

    assert_eq!(Expr::Literal(Integer(42)).evaluate(&env).unwrap(), Integer(42));
    assert_eq!(col("name").evaluate(&env).unwrap(), Varchar("Will".into()));
}

#[test]
fn qualified_and_unqualified_lookup() {
    let row = Row::new(vec![Integer(7)]);
    let schema = schema(&["users.id"]);
    let env = Environment::single(&schema, &row);

    assert_eq!(col("id").evaluate(&env).unwrap(), Integer(7));
    assert_eq!(
        Expr::Column {
            table: Some("users".into()),
            name: "id".into()
        }
        .evaluate(&env)
        .unwrap(),
        Integer(7)
    );
}

#[test]
fn eval_comparisons() {
    let row = Row::new(vec![Integer(10), Integer(20)]);
    let schema = schema(&["a", "b"]);
    let env = Environment::single(&schema, &row);

    let lt = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Lt,
        right: Box::new(col("b")),
    };
    assert_eq!(lt.evaluate(&env).unwrap(), Boolean(true));
}

#[test]
fn eval_logical_ops_are_three_valued() {
    let row = Row::new(vec![Boolean(false), Null]);
    let schema = schema(&["x", "y"]);
    let env = Environment::single(&schema, &row);

    // false AND NULL = false, never unknown.
    let and_expr = Expr::Binary {
        left: Box::new(col("x")),
        op: BinaryOp::And,
        right: Box::new(col("y")),
    };
    assert_eq!(and_expr.evaluate(&env).unwrap(), Boolean(false));

    // NULL OR NULL = NULL (unknown).
    let row2 = Row::new(vec![Null, Null]);
    let env2 = Environment::single(&schema, &row2);
    let or_expr = Expr::Binary {
        left: Box::new(col("x")),
        op: BinaryOp::Or,
        right: Box::new(col("y")),
    };
    assert_eq!(or_expr.evaluate(&env2).unwrap(), Null);
}

#[test]
fn not_operator() {
    let row = Row::new(vec![Boolean(false)]);
    let schema = schema(&["f"]);
    let env = Environment::single(&schema, &row);

    let expr = Expr::Unary {
        op: UnaryOp::Not,
        expr: Box::new(col("f")),
    };
    assert_eq!(expr.evaluate(&env).unwrap(), Boolean(true));
}

#[test]
fn mismatched_types_fail() {
    let row = Row::new(vec![Integer(1), Varchar("hi".into())]);
    let schema = schema(&["a", "b"]);
    let env = Environment::single(&schema, &row);

    let expr = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Eq,
        right: Box::new(col("b")),
    };

    let err = expr.evaluate(&env).unwrap_err();
    assert!(format!("{err}").contains("incompatible types"));
}

#[test]
fn predicate_treats_null_as_false() {
    let row = Row::new(vec![Null]);
    let schema = schema(&["a"]);
    let env = Environment::single(&schema, &row);
    assert!(!col("a").evaluate_predicate(&env).unwrap());
}

#[test]
fn arithmetic_division_by_zero_errors() {
    let row = Row::new(vec![Integer(10), Integer(0)]);
    let schema = schema(&["a", "b"]);
    let env = Environment::single(&schema, &row);
    let expr = Expr::Arithmetic {
        left: Box::new(col("a")),
        op: ArithOp::Div,
        right: Box::new(col("b")),
    };
    assert!(expr.evaluate(&env).is_err());
}

#[test]
fn arithmetic_null_propagates() {
    let row = Row::new(vec![Integer(10), Null]);
    let schema = schema(&["a", "b"]);
    let env = Environment::single(&schema, &row);
    let expr = Expr::Arithmetic {
        left: Box::new(col("a")),
        op: ArithOp::Add,
        right: Box::new(col("b")),
    };
    assert_eq!(expr.evaluate(&env).unwrap(), Null);
}

#[test]
fn function_calls_evaluate() {
    let row = Row::new(vec![Varchar("Hi".into())]);
    let schema = schema(&["s"]);
    let env = Environment::single(&schema, &row);
    let expr = Expr::FunctionCall {
        func: ScalarFn::Upper,
        args: vec![col("s")],
    };
    assert_eq!(expr.evaluate(&env).unwrap(), Varchar("HI".into()));
}

#[test]
fn environment_stack_resolves_deepest_binding_first() {
    let outer_row = Row::new(vec![Integer(1)]);
    let outer_schema = schema(&["a"]);
    let inner_row = Row::new(vec![Integer(99)]);
    let inner_schema = schema(&["a"]);

    let mut env = Environment::new();
    env.push(&outer_schema, &outer_row);
    env.push(&inner_schema, &inner_row);

    assert_eq!(col("a").evaluate(&env).unwrap(), Integer(99));
    env.pop();
    assert_eq!(col("a").evaluate(&env).unwrap(), Integer(1));
}

#[test]
fn get_all_symbols_collects_columns() {
    let expr = Expr::Binary {
        left: Box::new(col("a")),
        op: BinaryOp::Lt,
        right: Box::new(Expr::Arithmetic {
            left: Box::new(col("b")),
            op: ArithOp::Add,
            right: Box::new(Expr::Literal(Integer(1))),
        }),
    };
    let mut out = Vec::new();
    expr.get_all_symbols(&mut out);
    assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
}
