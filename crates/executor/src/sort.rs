//! In-memory sort node with SQL-style NULL-last ordering.

use crate::cost::PlanCost;
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use common::{DbResult, Row};
use expr::{Environment, Expr};
use std::cmp::Ordering;
use types::Value;

/// One ordering key: an expression and its direction.
#[derive(Clone, Debug)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// Buffers the child's entire output, sorts it lexicographically over the
/// key list, then replays it.
pub struct Sort {
    child: Box<dyn PlanNode>,
    keys: Vec<SortKey>,
    props: Option<PlanProperties>,
    buffered: Option<Vec<Row>>,
    position: usize,
}

impl Sort {
    pub fn new(child: Box<dyn PlanNode>, keys: Vec<SortKey>) -> Self {
        Self {
            child,
            keys,
            props: None,
            buffered: None,
            position: 0,
        }
    }

    fn fill_buffer(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let schema = self
            .props
            .as_ref()
            .expect("prepare() must run first")
            .schema
            .qualified
            .clone();

        let mut keyed: Vec<(Vec<Value>, Row)> = Vec::new();
        while let Some(row) = self.child.get_next_tuple(ctx)? {
            let env = Environment::single(&schema, &row);
            let key_values = self
                .keys
                .iter()
                .map(|k| k.expr.evaluate(&env))
                .collect::<DbResult<Vec<Value>>>()?;
            keyed.push((key_values, row));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for (key, (av, bv)) in self.keys.iter().zip(a.iter().zip(b)) {
                let ord = compare_sql(av, bv, key.ascending);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        self.buffered = Some(keyed.into_iter().map(|(_, row)| row).collect());
        self.position = 0;
        Ok(())
    }
}

/// SQL ordering for one key: NULLs sort after every value regardless of
/// direction; the direction flag reverses only value-to-value comparisons.
fn compare_sql(a: &Value, b: &Value, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.cmp_same_type(b).unwrap_or(Ordering::Equal);
            if ascending { ord } else { ord.reverse() }
        }
    }
}

impl PlanNode for Sort {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let child = self.child.prepare(ctx)?;
        let n = child.cost.num_tuples.max(1.0);
        let cost = PlanCost {
            num_tuples: child.cost.num_tuples,
            tuple_size: child.cost.tuple_size,
            cpu_cost: child.cost.cpu_cost + n * n.log2().max(1.0),
            num_block_ios: child.cost.num_block_ios,
        };
        let props = PlanProperties {
            schema: child.schema,
            cost,
        };
        self.props = Some(props.clone());
        Ok(props)
    }

    fn schema(&self) -> &PlanSchema {
        &self.props.as_ref().expect("prepare() must run first").schema
    }

    fn cost(&self) -> PlanCost {
        self.props.as_ref().expect("prepare() must run first").cost
    }

    fn initialize(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.initialize(ctx)?;
        self.buffered = None;
        self.position = 0;
        Ok(())
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.buffered.is_none() {
            self.fill_buffer(ctx)?;
        }
        let rows = self.buffered.as_ref().expect("just filled");
        if self.position >= rows.len() {
            return Ok(None);
        }
        let row = rows[self.position].clone();
        self.position += 1;
        Ok(Some(row))
    }

    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.buffered = None;
        self.position = 0;
        self.child.clean_up(ctx)
    }
}
