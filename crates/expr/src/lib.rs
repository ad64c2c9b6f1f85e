//! Expression algebra and schema-bound evaluation.
//!
//! `Expr` is a closed sum type of literal/column-reference/unary/binary/
//! arithmetic/function-call variants. `Environment` binds a stack of
//! `(schema, row)` pairs so that nested scopes (subqueries, join sides)
//! resolve a column reference against the deepest matching binding.

#[cfg(test)]
mod tests;

use catalog::Column;
use common::{DbError, DbResult, Row};
use std::cmp::Ordering;
use types::{SqlType, Value};

/// Binary comparison and logical operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operators (currently just logical NOT).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Not,
}

/// A scalar function name. The set is fixed (no dynamic dispatch, per the
/// closed-algebra treatment of expression trees): each is evaluated by a
/// single match arm in `eval_function`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScalarFn {
    Abs,
    Length,
    Upper,
    Lower,
    Coalesce,
}

/// Expression abstract syntax tree.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Literal(Value),
    /// Column reference with optional table/alias qualifier.
    Column {
        table: Option<String>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Arithmetic {
        left: Box<Expr>,
        op: ArithOp,
        right: Box<Expr>,
    },
    FunctionCall {
        func: ScalarFn,
        args: Vec<Expr>,
    },
}

/// Column descriptor returned by `Expr::get_column_info`: the name an
/// expression would be labeled with in an output schema, and its type when
/// statically known.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: Option<SqlType>,
}

/// A single `(schema, row)` binding. `schema` holds qualified column names
/// (`"table.column"`) in row order, matching
/// `catalog::TableSchema::qualified_names`.
pub struct Binding<'a> {
    pub schema: &'a [String],
    pub row: &'a Row,
}

/// A stack of bindings visible to expression evaluation. Column references
/// resolve against the most recently pushed (deepest) binding first, so an
/// inner scope can shadow an outer one.
#[derive(Default)]
pub struct Environment<'a> {
    bindings: Vec<Binding<'a>>,
}

impl<'a> Environment<'a> {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    /// Convenience constructor for the common single-binding case.
    pub fn single(schema: &'a [String], row: &'a Row) -> Self {
        let mut env = Self::new();
        env.push(schema, row);
        env
    }

    pub fn push(&mut self, schema: &'a [String], row: &'a Row) {
        self.bindings.push(Binding { schema, row });
    }

    pub fn pop(&mut self) {
        self.bindings.pop();
    }

    fn find_column(&self, table: Option<&str>, name: &str) -> DbResult<(usize, usize)> {
        for (depth, binding) in self.bindings.iter().enumerate().rev() {
            if let Some(col_idx) = find_in_schema(binding.schema, table, name) {
                return Ok((depth, col_idx));
            }
        }
        match table {
            Some(q) => Err(DbError::Schema(format!("unknown column '{q}.{name}'"))),
            None => Err(DbError::Schema(format!("unknown column '{name}'"))),
        }
    }
}

/// Matching rules: a qualified ref (`table.col`) matches `"table.col"`
/// exactly; an unqualified ref matches an exact simple name or a `.col`
/// suffix.
fn find_in_schema(schema: &[String], table: Option<&str>, name: &str) -> Option<usize> {
    if let Some(qualifier) = table {
        let full_name = format!("{qualifier}.{name}");
        schema.iter().position(|c| c.eq_ignore_ascii_case(&full_name))
    } else {
        schema.iter().position(|c| {
            c.eq_ignore_ascii_case(name)
                || c.to_lowercase().ends_with(&format!(".{}", name.to_lowercase()))
        })
    }
}

impl Expr {
    /// Evaluate the expression against an environment, returning its value.
    pub fn evaluate(&self, env: &Environment) -> DbResult<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column { table, name } => {
                let (depth, idx) = env.find_column(table.as_deref(), name)?;
                Ok(env.bindings[depth].row.values[idx].clone())
            }
            Expr::Unary { op, expr } => {
                let v = expr.evaluate(env)?;
                match op {
                    UnaryOp::Not => {
                        if v.is_null() {
                            return Ok(Value::Null);
                        }
                        let b = v
                            .as_bool()
                            .ok_or_else(|| DbError::Execution(format!("NOT expects bool, got {v:?}")))?;
                        Ok(Value::Boolean(!b))
                    }
                }
            }
            Expr::Binary { left, op, right } => {
                let lv = left.evaluate(env)?;
                let rv = right.evaluate(env)?;
                eval_binary(&lv, *op, &rv)
            }
            Expr::Arithmetic { left, op, right } => {
                let lv = left.evaluate(env)?;
                let rv = right.evaluate(env)?;
                eval_arith(&lv, *op, &rv)
            }
            Expr::FunctionCall { func, args } => {
                let vals: Vec<Value> = args.iter().map(|a| a.evaluate(env)).collect::<DbResult<_>>()?;
                eval_function(*func, &vals)
            }
        }
    }

    /// Evaluate the expression as a predicate: NULL propagates as `false`
    /// rather than as an error, matching the three-valued-logic-to-boolean
    /// collapse used by `WHERE`/`ON` clauses.
    pub fn evaluate_predicate(&self, env: &Environment) -> DbResult<bool> {
        match self.evaluate(env)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(DbError::Execution(format!(
                "predicate expression did not evaluate to bool: {other:?}"
            ))),
        }
    }

    /// Returns the column descriptor this expression would project as, given
    /// a row schema paired with its backing column metadata (same order).
    pub fn get_column_info(&self, schema: &[String], columns: &[Column]) -> DbResult<ColumnInfo> {
        match self {
            Expr::Literal(v) => Ok(ColumnInfo {
                name: "?column?".to_string(),
                ty: literal_type(v),
            }),
            Expr::Column { table, name } => {
                let idx = find_in_schema(schema, table.as_deref(), name)
                    .ok_or_else(|| DbError::Schema(format!("unknown column '{name}'")))?;
                Ok(ColumnInfo {
                    name: name.clone(),
                    ty: columns.get(idx).map(|c| c.ty),
                })
            }
            Expr::Unary { .. } | Expr::Binary { .. } => Ok(ColumnInfo {
                name: "?column?".to_string(),
                ty: Some(SqlType::Boolean),
            }),
            Expr::Arithmetic { .. } => Ok(ColumnInfo {
                name: "?column?".to_string(),
                ty: Some(SqlType::Double),
            }),
            Expr::FunctionCall { func, .. } => Ok(ColumnInfo {
                name: "?column?".to_string(),
                ty: match func {
                    ScalarFn::Length => Some(SqlType::Integer),
                    ScalarFn::Upper | ScalarFn::Lower => Some(SqlType::Varchar(u16::MAX)),
                    ScalarFn::Abs | ScalarFn::Coalesce => None,
                },
            }),
        }
    }

    /// Collects every column name (`"table.col"` or bare) referenced,
    /// appending into `out` in left-to-right, depth-first order.
    pub fn get_all_symbols(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column { table, name } => {
                out.push(match table {
                    Some(t) => format!("{t}.{name}"),
                    None => name.clone(),
                });
            }
            Expr::Unary { expr, .. } => expr.get_all_symbols(out),
            Expr::Binary { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                left.get_all_symbols(out);
                right.get_all_symbols(out);
            }
            Expr::FunctionCall { args, .. } => {
                for a in args {
                    a.get_all_symbols(out);
                }
            }
        }
    }
}

fn literal_type(v: &Value) -> Option<SqlType> {
    match v {
        Value::Integer(_) => Some(SqlType::Integer),
        Value::BigInt(_) => Some(SqlType::BigInt),
        Value::Float(_) => Some(SqlType::Float),
        Value::Double(_) => Some(SqlType::Double),
        Value::Char(s) => Some(SqlType::Char(s.len() as u16)),
        Value::Varchar(s) => Some(SqlType::Varchar(s.len() as u16)),
        Value::Boolean(_) => Some(SqlType::Boolean),
        Value::Null => None,
    }
}

fn eval_binary(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    use BinaryOp::*;

    if matches!(op, And | Or) {
        // Three-valued logic: NULL acts as "unknown" and is only absorbed
        // when the other operand already determines the result.
        let lb = l.as_bool();
        let rb = r.as_bool();
        return match (op, lb, rb) {
            (And, Some(false), _) | (And, _, Some(false)) => Ok(Value::Boolean(false)),
            (Or, Some(true), _) | (Or, _, Some(true)) => Ok(Value::Boolean(true)),
            (_, Some(a), Some(b)) => Ok(Value::Boolean(if op == And { a && b } else { a || b })),
            _ => Ok(Value::Null),
        };
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    let ord = l
        .cmp_same_type(r)
        .ok_or_else(|| DbError::Execution(format!("incompatible types for {op:?}: {l:?}, {r:?}")))?;

    let result = match op {
        Eq => ord == Ordering::Equal,
        Ne => ord != Ordering::Equal,
        Lt => ord == Ordering::Less,
        Le => ord != Ordering::Greater,
        Gt => ord == Ordering::Greater,
        Ge => ord != Ordering::Less,
        And | Or => unreachable!(),
    };
    Ok(Value::Boolean(result))
}

fn eval_arith(l: &Value, op: ArithOp, r: &Value) -> DbResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let a = l
        .as_f64()
        .ok_or_else(|| DbError::Execution(format!("not numeric: {l:?}")))?;
    let b = r
        .as_f64()
        .ok_or_else(|| DbError::Execution(format!("not numeric: {r:?}")))?;
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                return Err(DbError::Execution("division by zero".into()));
            }
            a / b
        }
    };
    // Integer-over-integer arithmetic stays integral.
    let both_integral = matches!(l, Value::Integer(_) | Value::BigInt(_))
        && matches!(r, Value::Integer(_) | Value::BigInt(_));
    if both_integral {
        Ok(Value::BigInt(result as i64))
    } else {
        Ok(Value::Double(result))
    }
}

fn eval_function(func: ScalarFn, args: &[Value]) -> DbResult<Value> {
    match func {
        ScalarFn::Abs => match args {
            [v] if v.is_null() => Ok(Value::Null),
            [v] => v
                .as_f64()
                .map(|f| Value::Double(f.abs()))
                .ok_or_else(|| DbError::Execution(format!("ABS expects numeric, got {v:?}"))),
            _ => Err(DbError::Execution("ABS takes exactly one argument".into())),
        },
        ScalarFn::Length => match args {
            [Value::Varchar(s)] | [Value::Char(s)] => Ok(Value::Integer(s.len() as i32)),
            [Value::Null] => Ok(Value::Null),
            _ => Err(DbError::Execution("LENGTH expects a string argument".into())),
        },
        ScalarFn::Upper => match args {
            [Value::Varchar(s)] => Ok(Value::Varchar(s.to_uppercase())),
            [Value::Char(s)] => Ok(Value::Char(s.to_uppercase())),
            [Value::Null] => Ok(Value::Null),
            _ => Err(DbError::Execution("UPPER expects a string argument".into())),
        },
        ScalarFn::Lower => match args {
            [Value::Varchar(s)] => Ok(Value::Varchar(s.to_lowercase())),
            [Value::Char(s)] => Ok(Value::Char(s.to_lowercase())),
            [Value::Null] => Ok(Value::Null),
            _ => Err(DbError::Execution("LOWER expects a string argument".into())),
        },
        ScalarFn::Coalesce => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
    }
}
