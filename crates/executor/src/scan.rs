//! Heap-table scan node.

use crate::cost::{PlanCost, selectivity};
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use common::{DbResult, RecordId, Row};
use expr::{Environment, Expr};
use heap::HeapFile;

/// Full scan over a heap table, optionally filtering with a predicate
/// evaluated against each tuple as it is read.
pub struct FileScan {
    table: HeapFile,
    predicate: Option<Expr>,
    props: Option<PlanProperties>,
    cursor: Option<RecordId>,
    done: bool,
}

impl FileScan {
    pub fn new(table: HeapFile, predicate: Option<Expr>) -> Self {
        Self {
            table,
            predicate,
            props: None,
            cursor: None,
            done: false,
        }
    }

    /// Opens the named heap table and wraps it in a scan.
    pub fn open(ctx: &mut ExecutionContext, table: &str, predicate: Option<Expr>) -> DbResult<Self> {
        let table = HeapFile::open(ctx.pool, ctx.forcer, table)?;
        Ok(Self::new(table, predicate))
    }

    pub fn table(&self) -> &HeapFile {
        &self.table
    }
}

impl PlanNode for FileScan {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let schema = PlanSchema::from_table_schema(self.table.schema());

        // Estimated from page count and tuple size; page 0 is the header.
        let data_pages = self.table.num_pages(ctx.pool)?.saturating_sub(1) as f32;
        let page_size = ctx.pool.file_page_size(self.table.file_name())? as f32;
        let tuple_size = heap::tuple::estimated_tuple_size(&schema.columns);
        // Each slot costs a 4-byte directory entry beside the tuple body.
        let per_page = ((page_size - 2.0) / (tuple_size + 4.0)).floor().max(1.0);
        let table_tuples = data_pages * per_page;

        let sel = self.predicate.as_ref().map(selectivity).unwrap_or(1.0);
        let cost = PlanCost {
            num_tuples: table_tuples * sel,
            tuple_size,
            cpu_cost: table_tuples,
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

    fn initialize(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.cursor = None;
        self.done = false;
        Ok(())
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let next = match self.cursor {
                None => self.table.first_tuple(ctx.pool, ctx.forcer)?,
                Some(rid) => self.table.next_tuple(ctx.pool, ctx.forcer, rid)?,
            };
            let Some((rid, row)) = next else {
                self.done = true;
                return Ok(None);
            };
            self.cursor = Some(rid);
            match &self.predicate {
                None => return Ok(Some(row)),
                Some(pred) => {
                    let schema = &self.props.as_ref().expect("prepared").schema;
                    let env = Environment::single(&schema.qualified, &row);
                    if pred.evaluate_predicate(&env)? {
                        return Ok(Some(row));
                    }
                }
            }
        }
    }

    fn clean_up(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.cursor = None;
        self.done = false;
        Ok(())
    }
}
