//! Shortcut plan for a base scan of a column-store table: streams blocks
//! from the per-column files directly, with no heap machinery involved.

use crate::cost::PlanCost;
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use colstore::{ColStoreScan, ColStoreTable};
use common::{DbResult, Row};
use heap::Scannable;

pub struct CSProject {
    table: ColStoreTable,
    props: Option<PlanProperties>,
    scan: Option<ColStoreScan>,
}

impl CSProject {
    pub fn new(table: ColStoreTable) -> Self {
        Self {
            table,
            props: None,
            scan: None,
        }
    }

    /// Opens the named column-store table and wraps it.
    pub fn open(ctx: &mut ExecutionContext, table: &str) -> DbResult<Self> {
        let table = ColStoreTable::open(ctx.pool, ctx.forcer, table)?;
        Ok(Self::new(table))
    }

    pub fn table(&self) -> &ColStoreTable {
        &self.table
    }
}

impl PlanNode for CSProject {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let schema = PlanSchema::from_table_schema(self.table.schema());
        let data_pages = self.table.num_data_pages(ctx.pool)? as f32;
        let num_rows = self
            .table
            .column_reader(ctx.pool, ctx.forcer, 0)?
            .num_values() as f32;
        let cost = PlanCost {
            num_tuples: num_rows,
            tuple_size: heap::tuple::estimated_tuple_size(&schema.columns),
            cpu_cost: num_rows,
            num_block_ios: data_pages,
        };
        let props = PlanProperties { schema, cost };
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
        match &mut self.scan {
            Some(scan) => scan.rewind(),
            None => self.scan = Some(self.table.scan(ctx.pool, ctx.forcer)?),
        }
        Ok(())
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        match &mut self.scan {
            Some(scan) => scan.next_row(ctx.pool, ctx.forcer),
            None => Ok(None),
        }
    }

    fn clean_up(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.scan = None;
        Ok(())
    }
}
