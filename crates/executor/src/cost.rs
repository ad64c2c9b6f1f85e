//! Plan-cost bookkeeping and predicate selectivity estimation.

use expr::{BinaryOp, Expr, UnaryOp};
use types::Value;

/// Estimated cost of evaluating a (sub)plan to completion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlanCost {
    /// Estimated number of tuples produced.
    pub num_tuples: f32,
    /// Estimated average size of one produced tuple, in bytes.
    pub tuple_size: f32,
    /// Abstract CPU units; the planner compares plans by this.
    pub cpu_cost: f32,
    /// Estimated block reads.
    pub num_block_ios: f32,
}

pub const SELECTIVITY_EQUALITY: f32 = 0.1;
pub const SELECTIVITY_INEQUALITY: f32 = 0.333;
pub const SELECTIVITY_RANGE: f32 = 0.25;
pub const SELECTIVITY_UNKNOWN: f32 = 0.25;

/// Estimated fraction of input rows a predicate keeps. Without statistics
/// the estimate is purely structural: equality comparisons keep 10%,
/// inequalities a third, range comparisons a quarter; AND multiplies,
/// OR complements, NOT inverts.
pub fn selectivity(expr: &Expr) -> f32 {
    match expr {
        Expr::Literal(Value::Boolean(true)) => 1.0,
        Expr::Literal(Value::Boolean(false)) => 0.0,
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => selectivity(left) * selectivity(right),
            BinaryOp::Or => 1.0 - (1.0 - selectivity(left)) * (1.0 - selectivity(right)),
            BinaryOp::Eq => SELECTIVITY_EQUALITY,
            BinaryOp::Ne => SELECTIVITY_INEQUALITY,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => SELECTIVITY_RANGE,
        },
        Expr::Unary {
            op: UnaryOp::Not,
            expr,
        } => 1.0 - selectivity(expr),
        _ => SELECTIVITY_UNKNOWN,
    }
}

/// Selectivity of a conjunction, the product over its terms. An empty
/// conjunction keeps everything.
pub fn conjunction_selectivity(conjuncts: &[Expr]) -> f32 {
    conjuncts.iter().map(selectivity).product()
}

/// Cost of an inner nested-loops join: the outer side runs once, the inner
/// side once per outer tuple.
pub fn nested_loops_cost(left: &PlanCost, right: &PlanCost, sel: f32) -> PlanCost {
    PlanCost {
        num_tuples: left.num_tuples * right.num_tuples * sel,
        tuple_size: left.tuple_size + right.tuple_size,
        cpu_cost: left.cpu_cost + left.num_tuples * right.cpu_cost,
        num_block_ios: left.num_block_ios + left.num_tuples.ceil() * right.num_block_ios,
    }
}
