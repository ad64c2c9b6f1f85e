//! Pull-based plan-node iterators.
//!
//! Every node implements [`PlanNode`]: `prepare` computes schema,
//! statistics and a cost estimate recursively; `initialize` (re)starts
//! iteration; `get_next_tuple` pulls one row; `clean_up` releases
//! resources. Nodes are stateful: clients prepare once, then drive
//! initialize + get_next_tuple to completion, possibly several times (the
//! inner side of a nested-loops join is restarted per outer row).

pub mod cost;
pub mod cs_project;
pub mod filter;
pub mod join;
pub mod project;
pub mod rename;
pub mod scan;
pub mod sort;


pub use cost::{PlanCost, selectivity};
pub use cs_project::CSProject;
pub use filter::SimpleFilter;
pub use join::{JoinType, NestedLoopsJoin};
pub use project::Project;
pub use rename::Rename;
pub use scan::FileScan;
pub use sort::{Sort, SortKey};

use buffer::{BufferPool, WalForcer};
use catalog::{Column, TableSchema};
use common::{DbResult, Row};
use expr::Expr;

/// Shared state threaded through every plan-node call: the buffer pool and
/// the WAL hook evictions must consult. Queries only read tuples, so no
/// update logger is needed here.
pub struct ExecutionContext<'a> {
    pub pool: &'a mut BufferPool,
    pub forcer: &'a mut dyn WalForcer,
}

/// Output schema of a plan node: qualified column names (`"table.col"`, or
/// a bare label for computed columns) in row order, paired with the column
/// metadata carried for type information.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanSchema {
    pub qualified: Vec<String>,
    pub columns: Vec<Column>,
}

impl PlanSchema {
    pub fn from_table_schema(schema: &TableSchema) -> Self {
        Self {
            qualified: schema.qualified_names(),
            columns: schema.columns.clone(),
        }
    }

    /// Left-then-right concatenation, as produced by a join.
    pub fn concat(&self, right: &PlanSchema) -> PlanSchema {
        PlanSchema {
            qualified: self.qualified.iter().chain(&right.qualified).cloned().collect(),
            columns: self.columns.iter().chain(&right.columns).cloned().collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Whether every column name in `symbols` resolves in this schema.
    pub fn resolves_all(&self, symbols: &[String]) -> bool {
        symbols.iter().all(|sym| {
            self.qualified.iter().any(|q| {
                q.eq_ignore_ascii_case(sym)
                    || q.to_lowercase().ends_with(&format!(".{}", sym.to_lowercase()))
            })
        })
    }
}

/// Schema, statistics and cost, computed once by `prepare`.
#[derive(Clone, Debug)]
pub struct PlanProperties {
    pub schema: PlanSchema,
    pub cost: PlanCost,
}

/// A pull-based iterator node in a query plan.
pub trait PlanNode {
    /// Computes this node's schema and cost estimate, recursing into
    /// children. Must run before any other method; running it again (as
    /// the planner does when it wraps a prepared subtree) just recomputes.
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties>;

    /// Output schema; only valid after `prepare`.
    fn schema(&self) -> &PlanSchema;

    /// Cost estimate; only valid after `prepare`.
    fn cost(&self) -> PlanCost;

    /// Resets iteration to the first tuple.
    fn initialize(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;

    /// The next tuple, or `None` when the node is exhausted.
    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>>;

    /// Releases buffered state; the node may be re-initialized afterwards.
    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;
}

/// Drives a prepared plan to completion and collects its output.
pub fn execute(root: &mut dyn PlanNode, ctx: &mut ExecutionContext) -> DbResult<Vec<Row>> {
    root.initialize(ctx)?;
    let mut rows = Vec::new();
    while let Some(row) = root.get_next_tuple(ctx)? {
        rows.push(row);
    }
    root.clean_up(ctx)?;
    Ok(rows)
}

/// One item of a projection list.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectValue {
    /// `SELECT *`
    Wildcard,
    /// `SELECT t.*`
    TableWildcard(String),
    /// An expression, optionally aliased.
    Expression { expr: Expr, alias: Option<String> },
}

impl SelectValue {
    pub fn column(table: Option<&str>, name: &str) -> SelectValue {
        SelectValue::Expression {
            expr: Expr::Column {
                table: table.map(str::to_string),
                name: name.to_string(),
            },
            alias: None,
        }
    }

    /// A projection list of exactly `[*]` needs no Project node at all.
    pub fn is_trivial_projection(select: &[SelectValue]) -> bool {
        matches!(select, [SelectValue::Wildcard])
    }
}
