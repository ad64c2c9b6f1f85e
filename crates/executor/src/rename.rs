//! Table-rename node: rewrites the output schema under a new qualifier, as
//! produced by `FROM (…) AS alias`.

use crate::cost::PlanCost;
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use common::{DbResult, Row};

pub struct Rename {
    child: Box<dyn PlanNode>,
    table_name: String,
    props: Option<PlanProperties>,
}

impl Rename {
    pub fn new(child: Box<dyn PlanNode>, table_name: impl Into<String>) -> Self {
        Self {
            child,
            table_name: table_name.into(),
            props: None,
        }
    }
}

impl PlanNode for Rename {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let child = self.child.prepare(ctx)?;
        let qualified = child
            .schema
            .columns
            .iter()
            .map(|c| format!("{}.{}", self.table_name, c.name))
            .collect();
        let props = PlanProperties {
            schema: PlanSchema {
                qualified,
                columns: child.schema.columns,
            },
            cost: child.cost,
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
        self.child.get_next_tuple(ctx)
    }

    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.clean_up(ctx)
    }
}
