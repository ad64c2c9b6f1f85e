//! Predicate filter node.

use crate::cost::{PlanCost, selectivity};
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use common::{DbResult, Row};
use expr::{Environment, Expr};

/// Forwards only the child tuples that satisfy the predicate. NULL
/// predicate results drop the tuple, per `evaluate_predicate`.
pub struct SimpleFilter {
    child: Box<dyn PlanNode>,
    predicate: Expr,
    props: Option<PlanProperties>,
}

impl SimpleFilter {
    pub fn new(child: Box<dyn PlanNode>, predicate: Expr) -> Self {
        Self {
            child,
            predicate,
            props: None,
        }
    }
}

impl PlanNode for SimpleFilter {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let child = self.child.prepare(ctx)?;
        let cost = PlanCost {
            num_tuples: child.cost.num_tuples * selectivity(&self.predicate),
            tuple_size: child.cost.tuple_size,
            cpu_cost: child.cost.cpu_cost + child.cost.num_tuples,
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
        self.child.initialize(ctx)
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        while let Some(row) = self.child.get_next_tuple(ctx)? {
            let schema = &self.props.as_ref().expect("prepared").schema;
            let env = Environment::single(&schema.qualified, &row);
            if self.predicate.evaluate_predicate(&env)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.clean_up(ctx)
    }
}
