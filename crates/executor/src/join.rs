//! Nested-loops join node, covering all four join types.

use crate::cost::{PlanCost, nested_loops_cost, selectivity};
use crate::{ExecutionContext, PlanNode, PlanProperties, PlanSchema};
use common::{DbResult, Row};
use expr::{Environment, Expr};
use types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    /// Whether unmatched left tuples are emitted padded with NULLs.
    fn preserves_left(self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::FullOuter)
    }

    /// Whether unmatched right tuples are emitted padded with NULLs.
    fn preserves_right(self) -> bool {
        matches!(self, JoinType::RightOuter | JoinType::FullOuter)
    }
}

enum Phase {
    /// Driving the left child, rescanning the right per left tuple.
    Loop,
    /// Final pass over the right child emitting its unmatched tuples.
    UnmatchedRight,
    Done,
}

/// For each left tuple the right child is re-initialized and scanned; the
/// concatenation is emitted wherever the predicate holds. Outer variants
/// track which side matched: an unmatched left tuple is emitted with NULL
/// right columns as the right scan ends, and unmatched right tuples are
/// emitted in one extra right scan after the left side is exhausted.
pub struct NestedLoopsJoin {
    left: Box<dyn PlanNode>,
    right: Box<dyn PlanNode>,
    join_type: JoinType,
    predicate: Option<Expr>,
    props: Option<PlanProperties>,

    phase: Phase,
    left_row: Option<Row>,
    left_matched: bool,
    right_pos: usize,
    right_matched: Vec<bool>,
}

impl NestedLoopsJoin {
    pub fn new(
        left: Box<dyn PlanNode>,
        right: Box<dyn PlanNode>,
        join_type: JoinType,
        predicate: Option<Expr>,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            predicate,
            props: None,
            phase: Phase::Done,
            left_row: None,
            left_matched: false,
            right_pos: 0,
            right_matched: Vec::new(),
        }
    }

    fn combined(&self, left: &Row, right: &Row) -> Row {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Row::new(values)
    }

    fn null_padded_left(&self, right: &Row) -> Row {
        let left_width = self.left.schema().width();
        let mut values = vec![Value::Null; left_width];
        values.extend(right.values.iter().cloned());
        Row::new(values)
    }

    fn null_padded_right(&self, left: &Row) -> Row {
        let right_width = self.right.schema().width();
        let mut values = left.values.clone();
        values.extend(std::iter::repeat_n(Value::Null, right_width));
        Row::new(values)
    }

    fn predicate_matches(&self, row: &Row) -> DbResult<bool> {
        match &self.predicate {
            None => Ok(true),
            Some(pred) => {
                let schema = &self.props.as_ref().expect("prepared").schema;
                let env = Environment::single(&schema.qualified, row);
                pred.evaluate_predicate(&env)
            }
        }
    }
}

impl PlanNode for NestedLoopsJoin {
    fn prepare(&mut self, ctx: &mut ExecutionContext) -> DbResult<PlanProperties> {
        let left = self.left.prepare(ctx)?;
        let right = self.right.prepare(ctx)?;
        let sel = self.predicate.as_ref().map(selectivity).unwrap_or(1.0);
        let cost = nested_loops_cost(&left.cost, &right.cost, sel);
        let props = PlanProperties {
            schema: left.schema.concat(&right.schema),
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
        self.left.initialize(ctx)?;
        self.right.initialize(ctx)?;
        self.phase = Phase::Loop;
        self.left_row = None;
        self.left_matched = false;
        self.right_pos = 0;
        self.right_matched.clear();
        Ok(())
    }

    fn get_next_tuple(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        loop {
            match self.phase {
                Phase::Done => return Ok(None),
                Phase::UnmatchedRight => {
                    while let Some(right_row) = self.right.get_next_tuple(ctx)? {
                        let pos = self.right_pos;
                        self.right_pos += 1;
                        if !self.right_matched.get(pos).copied().unwrap_or(false) {
                            return Ok(Some(self.null_padded_left(&right_row)));
                        }
                    }
                    self.phase = Phase::Done;
                    return Ok(None);
                }
                Phase::Loop => {
                    if self.left_row.is_none() {
                        match self.left.get_next_tuple(ctx)? {
                            Some(row) => {
                                self.left_row = Some(row);
                                self.left_matched = false;
                                self.right.initialize(ctx)?;
                                self.right_pos = 0;
                            }
                            None => {
                                if self.join_type.preserves_right() {
                                    self.right.initialize(ctx)?;
                                    self.right_pos = 0;
                                    self.phase = Phase::UnmatchedRight;
                                } else {
                                    self.phase = Phase::Done;
                                }
                                continue;
                            }
                        }
                    }

                    match self.right.get_next_tuple(ctx)? {
                        Some(right_row) => {
                            let pos = self.right_pos;
                            self.right_pos += 1;
                            if self.right_matched.len() <= pos {
                                self.right_matched.resize(pos + 1, false);
                            }
                            let left_row = self.left_row.as_ref().expect("left row is set");
                            let joined = self.combined(left_row, &right_row);
                            if self.predicate_matches(&joined)? {
                                self.left_matched = true;
                                self.right_matched[pos] = true;
                                return Ok(Some(joined));
                            }
                        }
                        None => {
                            let left_row = self.left_row.take().expect("left row is set");
                            if !self.left_matched && self.join_type.preserves_left() {
                                return Ok(Some(self.null_padded_right(&left_row)));
                            }
                        }
                    }
                }
            }
        }
    }

    fn clean_up(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.left.clean_up(ctx)?;
        self.right.clean_up(ctx)?;
        self.left_row = None;
        self.right_matched.clear();
        self.phase = Phase::Done;
        Ok(())
    }
}
