//! Projection node: evaluates a select list over child tuples, expanding
//! wildcards against the child schema.

use crate::cost::PlanCost;
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema, SelectValue};
use catalog::Column;
use common::{DbError, DbResult, Row};
use expr::{Environment, Expr};
use types::SqlType;

enum OutputColumn {
    /// Straight copy of one child column.
    Passthrough(usize),
    /// Computed expression.
    Computed(Expr),
}

pub struct Project {
    child: Box<dyn PlanNode>,
    select: Vec<SelectValue>,
    outputs: Vec<OutputColumn>,
    props: Option<PlanProperties>,
}

impl Project {
    pub fn new(child: Box<dyn PlanNode>, select: Vec<SelectValue>) -> Self {
        Self {
            child,
            select,
            outputs: Vec::new(),
            props: None,
        }
    }
}

impl PlanNode for Project {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let child = self.child.prepare(ctx)?;
        let mut outputs = Vec::new();
        let mut qualified = Vec::new();
        let mut columns = Vec::new();

        for item in &self.select {
            match item {
                SelectValue::Wildcard => {
                    for (idx, name) in child.schema.qualified.iter().enumerate() {
                        outputs.push(OutputColumn::Passthrough(idx));
                        qualified.push(name.clone());
                        columns.push(child.schema.columns[idx].clone());
                    }
                }
                SelectValue::TableWildcard(table) => {
                    let prefix = format!("{}.", table.to_lowercase());
                    let before = outputs.len();
                    for (idx, name) in child.schema.qualified.iter().enumerate() {
                        if name.to_lowercase().starts_with(&prefix) {
                            outputs.push(OutputColumn::Passthrough(idx));
                            qualified.push(name.clone());
                            columns.push(child.schema.columns[idx].clone());
                        }
                    }
                    if outputs.len() == before {
                        return Err(DbError::Schema(format!(
                            "'{table}.*' matches no columns of the input"
                        )));
                    }
                }
                SelectValue::Expression { expr, alias } => {
                    let info = expr.get_column_info(&child.schema.qualified, &child.schema.columns)?;
                    let label = alias.clone().unwrap_or(info.name);
                    // A bare column reference passes through, keeping its
                    // table qualifier unless it was re-aliased.
                    if let (Expr::Column { table, name }, None) = (expr, alias) {
                        let idx = find_column(&child.schema.qualified, table.as_deref(), name)?;
                        outputs.push(OutputColumn::Passthrough(idx));
                        qualified.push(child.schema.qualified[idx].clone());
                        columns.push(child.schema.columns[idx].clone());
                    } else {
                        outputs.push(OutputColumn::Computed(expr.clone()));
                        qualified.push(label.clone());
                        columns.push(Column::new(label, info.ty.unwrap_or(SqlType::Varchar(u16::MAX))));
                    }
                }
            }
        }

        let schema = PlanSchema { qualified, columns };
        let tuple_size = heap::tuple::estimated_tuple_size(&schema.columns);
        let cost = PlanCost {
            num_tuples: child.cost.num_tuples,
            tuple_size,
            cpu_cost: child.cost.cpu_cost + child.cost.num_tuples,
            num_block_ios: child.cost.num_block_ios,
        };
        self.outputs = outputs;
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
        self.child.initialize(ctx)
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let Some(row) = self.child.get_next_tuple(ctx)? else {
            return Ok(None);
        };
        let child_schema = self.child.schema();
        let mut values = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            match output {
                OutputColumn::Passthrough(idx) => values.push(row.values[*idx].clone()),
                OutputColumn::Computed(expr) => {
                    let env = Environment::single(&child_schema.qualified, &row);
                    values.push(expr.evaluate(&env)?);
                }
            }
        }
        Ok(Some(Row::new(values)))
    }

    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.child.clean_up(ctx)
    }
}

fn find_column(schema: &[String], table: Option<&str>, name: &str) -> DbResult<usize> {
    let matches: Vec<usize> = match table {
        Some(qualifier) => {
            let full = format!("{qualifier}.{name}").to_lowercase();
            schema
                .iter()
                .enumerate()
                .filter(|(_, q)| q.to_lowercase() == full)
                .map(|(i, _)| i)
                .collect()
        }
        None => {
            let suffix = format!(".{}", name.to_lowercase());
            schema
                .iter()
                .enumerate()
                .filter(|(_, q)| {
                    q.eq_ignore_ascii_case(name) || q.to_lowercase().ends_with(&suffix)
                })
                .map(|(i, _)| i)
                .collect()
        }
    };
    match matches.len() {
        0 => Err(DbError::Schema(format!("unknown column '{name}'"))),
        1 => Ok(matches[0]),
        _ => Err(DbError::Schema(format!(
            "column reference '{name}' is ambiguous"
        ))),
    }
}
