//! Cost-based query planner.
//!
//! Turns a parser-built [`SelectClause`] into a prepared plan-node tree:
//! the WHERE clause is AND-flattened into conjuncts, every conjunct is
//! pushed down to the deepest leaf whose schema resolves it, and inner
//! joins are ordered by dynamic programming over leaf subsets, comparing
//! candidates by estimated CPU cost. Outer joins are opaque leaves:
//! conjuncts may be pushed only into the side the join preserves nothing
//! of (left side of a LEFT OUTER, right side of a RIGHT OUTER, neither
//! side of a FULL OUTER), which keeps the rewritten plan equivalent to
//! filtering at the top.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult};
use executor::{
    CSProject, ExecutionContext, FileScan, JoinType, NestedLoopsJoin, PlanCost, PlanNode,
    PlanSchema, Project, Rename, SelectValue, SimpleFilter, Sort, SortKey,
    cost::{conjunction_selectivity, nested_loops_cost},
};
use expr::{BinaryOp, Expr};
use hashbrown::HashMap;

/// The abstract SELECT built by the (external) parser.
#[derive(Clone, Debug)]
pub struct SelectClause {
    pub from: FromClause,
    pub where_expr: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub select: Vec<SelectValue>,
    pub distinct: bool,
}

impl SelectClause {
    /// `SELECT * FROM table`, the smallest useful clause.
    pub fn scan(table: &str) -> Self {
        Self {
            from: FromClause::BaseTable {
                table: table.to_string(),
                alias: None,
            },
            where_expr: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            select: vec![SelectValue::Wildcard],
            distinct: false,
        }
    }

    pub fn with_where(mut self, predicate: Expr) -> Self {
        self.where_expr = Some(predicate);
        self
    }
}

#[derive(Clone, Debug)]
pub struct OrderBy {
    pub expr: Expr,
    pub ascending: bool,
}

/// One FROM-clause term.
#[derive(Clone, Debug)]
pub enum FromClause {
    BaseTable {
        table: String,
        alias: Option<String>,
    },
    /// A parenthesized subquery with a mandatory alias.
    Derived {
        query: Box<SelectClause>,
        alias: String,
    },
    Join {
        left: Box<FromClause>,
        right: Box<FromClause>,
        join_type: JoinType,
        on: Option<Expr>,
    },
}

impl FromClause {
    pub fn join(left: FromClause, right: FromClause, join_type: JoinType, on: Option<Expr>) -> Self {
        FromClause::Join {
            left: Box::new(left),
            right: Box::new(right),
            join_type,
            on,
        }
    }
}

/// Plans a SELECT, returning a prepared plan tree ready to initialize.
pub fn make_plan(clause: &SelectClause, ctx: &mut ExecutionContext) -> DbResult<Box<dyn PlanNode>> {
    if !clause.group_by.is_empty() || clause.having.is_some() {
        return Err(DbError::Execution(
            "GROUP BY / HAVING are not supported by this engine".into(),
        ));
    }
    if clause.distinct {
        return Err(DbError::Execution("SELECT DISTINCT is not supported".into()));
    }

    // A single column-store base table short-circuits join planning: the
    // whole base scan is one CSProject streaming the column files.
    let mut plan: Box<dyn PlanNode> = if let FromClause::BaseTable { table, alias } = &clause.from
        && table_kind(ctx, table)? == TableKind::ColumnStore
    {
        let mut plan: Box<dyn PlanNode> = Box::new(CSProject::open(ctx, table)?);
        if let Some(alias) = alias {
            plan = Box::new(Rename::new(plan, alias.clone()));
        }
        if let Some(pred) = &clause.where_expr {
            plan = Box::new(SimpleFilter::new(plan, pred.clone()));
        }
        plan
    } else {
        plan_joins(clause, ctx)?
    };

    if !SelectValue::is_trivial_projection(&clause.select) {
        plan = Box::new(Project::new(plan, clause.select.clone()));
    }
    if !clause.order_by.is_empty() {
        let keys = clause
            .order_by
            .iter()
            .map(|o| SortKey {
                expr: o.expr.clone(),
                ascending: o.ascending,
            })
            .collect();
        plan = Box::new(Sort::new(plan, keys));
    }

    plan.prepare(ctx)?;
    Ok(plan)
}

/// Plans the FROM/WHERE portion: pushdown, then DP join enumeration, then
/// a top-level filter for whatever conjuncts no subplan could absorb.
fn plan_joins(clause: &SelectClause, ctx: &mut ExecutionContext) -> DbResult<Box<dyn PlanNode>> {
    let mut conjuncts = Vec::new();
    if let Some(where_expr) = &clause.where_expr {
        collect_conjuncts(where_expr, &mut conjuncts);
    }
    collect_inner_join_conjuncts(&clause.from, &mut conjuncts);

    let mut leaf_clauses = Vec::new();
    collect_leaves(&clause.from, &mut leaf_clauses);
    if leaf_clauses.len() > 64 || conjuncts.len() > 64 {
        return Err(DbError::Execution(
            "FROM clauses with more than 64 leaves or 64 conjuncts are not supported".into(),
        ));
    }

    let mut used = vec![false; conjuncts.len()];
    let mut leaves = Vec::with_capacity(leaf_clauses.len());
    for leaf in &leaf_clauses {
        leaves.push(plan_leaf(leaf, ctx, &conjuncts, &mut used)?);
    }

    let mut plan = if leaves.len() == 1 {
        leaves.pop().expect("one leaf")
    } else {
        let infos: Vec<LeafInfo> = leaves
            .iter()
            .map(|l| LeafInfo {
                schema: l.schema().clone(),
                cost: l.cost(),
            })
            .collect();
        let free: Vec<usize> = (0..conjuncts.len()).filter(|&i| !used[i]).collect();
        let component = enumerate_join_order(&infos, &conjuncts, &free)?;
        for &c in &component.conjuncts_used {
            used[c] = true;
        }
        tracing::debug!(order = ?component.order, "join order chosen");
        build_join_tree(&component.order, &mut leaves, &conjuncts)?
    };

    let leftover: Vec<Expr> = conjuncts
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(c, _)| c.clone())
        .collect();
    if let Some(pred) = and_all(&leftover) {
        plan = Box::new(SimpleFilter::new(plan, pred));
    }
    Ok(plan)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TableKind {
    Heap,
    ColumnStore,
}

fn table_kind(ctx: &mut ExecutionContext, table: &str) -> DbResult<TableKind> {
    let file_name = heap::table_file_name(table);
    if !ctx.pool.is_open(&file_name) {
        ctx.pool.open_db_file(&file_name)?;
    }
    match ctx.pool.file_type(&file_name)? {
        storage::DbFileType::HeapData => Ok(TableKind::Heap),
        storage::DbFileType::ColStoreData => Ok(TableKind::ColumnStore),
        other => Err(DbError::Schema(format!(
            "'{table}' is not a table file (type {other:?})"
        ))),
    }
}

/// Builds one join leaf: a base-table scan, a derived subquery, or an
/// opaque outer join. Applicable unused conjuncts are pushed in and their
/// `used` flags set.
fn plan_leaf(
    leaf: &FromClause,
    ctx: &mut ExecutionContext,
    conjuncts: &[Expr],
    used: &mut [bool],
) -> DbResult<Box<dyn PlanNode>> {
    let mut plan = plan_from_term(leaf, ctx, conjuncts, used)?;
    plan.prepare(ctx)?;

    let applicable = take_applicable(plan.schema(), conjuncts, used);
    if let Some(pred) = and_all(&applicable) {
        plan = Box::new(SimpleFilter::new(plan, pred));
        plan.prepare(ctx)?;
    }
    Ok(plan)
}

/// Recursively plans a FROM term without consulting the DP table: base
/// tables become scans, subqueries recurse into `make_plan`, joins become
/// nested-loops nodes in the written order. Inner-join ON conjuncts were
/// already lifted into the global set; outer joins keep theirs and only
/// allow pushdown into the non-preserved side.
fn plan_from_term(
    from: &FromClause,
    ctx: &mut ExecutionContext,
    conjuncts: &[Expr],
    used: &mut [bool],
) -> DbResult<Box<dyn PlanNode>> {
    match from {
        FromClause::BaseTable { table, alias } => {
            let mut plan: Box<dyn PlanNode> = match table_kind(ctx, table)? {
                TableKind::Heap => Box::new(FileScan::open(ctx, table, None)?),
                TableKind::ColumnStore => Box::new(CSProject::open(ctx, table)?),
            };
            if let Some(alias) = alias {
                plan = Box::new(Rename::new(plan, alias.clone()));
            }
            Ok(plan)
        }
        FromClause::Derived { query, alias } => {
            let plan = make_plan(query, ctx)?;
            Ok(Box::new(Rename::new(plan, alias.clone())))
        }
        FromClause::Join {
            left,
            right,
            join_type,
            on,
        } => {
            let mut left_plan = plan_from_term(left, ctx, conjuncts, used)?;
            let mut right_plan = plan_from_term(right, ctx, conjuncts, used)?;
            left_plan.prepare(ctx)?;
            right_plan.prepare(ctx)?;

            // Outer-join pushdown restrictions preserve the padded side.
            let push_left = matches!(join_type, JoinType::Inner | JoinType::LeftOuter);
            let push_right = matches!(join_type, JoinType::Inner | JoinType::RightOuter);
            if push_left {
                let applicable = take_applicable(left_plan.schema(), conjuncts, used);
                if let Some(pred) = and_all(&applicable) {
                    left_plan = Box::new(SimpleFilter::new(left_plan, pred));
                    left_plan.prepare(ctx)?;
                }
            }
            if push_right {
                let applicable = take_applicable(right_plan.schema(), conjuncts, used);
                if let Some(pred) = and_all(&applicable) {
                    right_plan = Box::new(SimpleFilter::new(right_plan, pred));
                    right_plan.prepare(ctx)?;
                }
            }
            Ok(Box::new(NestedLoopsJoin::new(
                left_plan,
                right_plan,
                *join_type,
                on.clone(),
            )))
        }
    }
}

/// Marks and returns every unused conjunct whose column references all
/// resolve in `schema`.
fn take_applicable(schema: &PlanSchema, conjuncts: &[Expr], used: &mut [bool]) -> Vec<Expr> {
    let mut applicable = Vec::new();
    for (i, conjunct) in conjuncts.iter().enumerate() {
        if used[i] {
            continue;
        }
        let mut symbols = Vec::new();
        conjunct.get_all_symbols(&mut symbols);
        if schema.resolves_all(&symbols) {
            used[i] = true;
            applicable.push(conjunct.clone());
        }
    }
    applicable
}

/// AND-flattens an expression into `out`, skipping duplicates (structural
/// equality).
pub fn collect_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    if let Expr::Binary {
        left,
        op: BinaryOp::And,
        right,
    } = expr
    {
        collect_conjuncts(left, out);
        collect_conjuncts(right, out);
    } else if !out.contains(expr) {
        out.push(expr.clone());
    }
}

/// Lifts the ON conjuncts of every inner join reachable without crossing
/// an outer join into the shared conjunct set.
fn collect_inner_join_conjuncts(from: &FromClause, out: &mut Vec<Expr>) {
    if let FromClause::Join {
        left,
        right,
        join_type: JoinType::Inner,
        on,
    } = from
    {
        if let Some(on) = on {
            collect_conjuncts(on, out);
        }
        collect_inner_join_conjuncts(left, out);
        collect_inner_join_conjuncts(right, out);
    }
}

/// Collects the join leaves: base tables, derived tables, and outer joins
/// (opaque, because conjuncts cannot be pushed through them).
fn collect_leaves<'a>(from: &'a FromClause, out: &mut Vec<&'a FromClause>) {
    match from {
        FromClause::Join {
            left,
            right,
            join_type: JoinType::Inner,
            ..
        } => {
            collect_leaves(left, out);
            collect_leaves(right, out);
        }
        other => out.push(other),
    }
}

fn and_all(conjuncts: &[Expr]) -> Option<Expr> {
    let mut iter = conjuncts.iter().cloned();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| Expr::Binary {
        left: Box::new(acc),
        op: BinaryOp::And,
        right: Box::new(next),
    }))
}

/// Schema and cost of one join leaf, all the enumerator needs to know.
#[derive(Clone, Debug)]
pub struct LeafInfo {
    pub schema: PlanSchema,
    pub cost: PlanCost,
}

/// A left-deep join order: either a single leaf, or a join of a prefix
/// order with one more leaf under the listed conjunct indices.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinOrder {
    Leaf(usize),
    Join {
        left: Box<JoinOrder>,
        right: usize,
        conjuncts: Vec<usize>,
    },
}

/// Best plan found for one subset of leaves.
#[derive(Clone, Debug)]
pub struct JoinComponent {
    pub order: JoinOrder,
    pub cost: PlanCost,
    pub schema: PlanSchema,
    pub conjuncts_used: Vec<usize>,
    mask: u64,
    used_bits: u64,
}

/// Dynamic-programming join enumeration. Starting from singleton subsets,
/// every known component is extended by every absent leaf; the join
/// predicate for a candidate is the conjunction of the still-unused
/// conjuncts (drawn from `free`) that resolve in the combined schema. A
/// candidate replaces the table entry only when strictly cheaper by CPU
/// cost, so the first plan encountered wins ties — components are kept in
/// an insertion-ordered list (the mask map is lookup only), and components
/// and leaves are visited in a fixed order, so "first" is reproducible
/// across runs. Ends with exactly one component covering all leaves.
pub fn enumerate_join_order(
    leaves: &[LeafInfo],
    conjuncts: &[Expr],
    free: &[usize],
) -> DbResult<JoinComponent> {
    if leaves.is_empty() {
        return Err(DbError::InvalidArgument("no join leaves to enumerate".into()));
    }

    let mut current: Vec<JoinComponent> = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| JoinComponent {
            order: JoinOrder::Leaf(i),
            cost: leaf.cost,
            schema: leaf.schema.clone(),
            conjuncts_used: Vec::new(),
            mask: 1 << i,
            used_bits: 0,
        })
        .collect();

    for _level in 1..leaves.len() {
        let mut next: Vec<JoinComponent> = Vec::new();
        let mut by_mask: HashMap<u64, usize> = HashMap::new();
        for component in &current {
            for (i, leaf) in leaves.iter().enumerate() {
                if component.mask & (1 << i) != 0 {
                    continue;
                }
                let combined_schema = component.schema.concat(&leaf.schema);
                let mut join_conjuncts = Vec::new();
                let mut used_bits = component.used_bits;
                for &c in free {
                    if used_bits & (1 << c) != 0 {
                        continue;
                    }
                    let mut symbols = Vec::new();
                    conjuncts[c].get_all_symbols(&mut symbols);
                    if combined_schema.resolves_all(&symbols) {
                        join_conjuncts.push(c);
                        used_bits |= 1 << c;
                    }
                }
                let sel_exprs: Vec<Expr> =
                    join_conjuncts.iter().map(|&c| conjuncts[c].clone()).collect();
                let sel = conjunction_selectivity(&sel_exprs);
                let cost = nested_loops_cost(&component.cost, &leaf.cost, sel);

                let mask = component.mask | (1 << i);
                let slot = match by_mask.get(&mask) {
                    None => {
                        by_mask.insert(mask, next.len());
                        None
                    }
                    Some(&pos) if cost.cpu_cost < next[pos].cost.cpu_cost => Some(pos),
                    Some(_) => continue,
                };
                let mut conjuncts_used = component.conjuncts_used.clone();
                conjuncts_used.extend(&join_conjuncts);
                let candidate = JoinComponent {
                    order: JoinOrder::Join {
                        left: Box::new(component.order.clone()),
                        right: i,
                        conjuncts: join_conjuncts,
                    },
                    cost,
                    schema: combined_schema,
                    conjuncts_used,
                    mask,
                    used_bits,
                };
                match slot {
                    None => next.push(candidate),
                    Some(pos) => next[pos] = candidate,
                }
            }
        }
        current = next;
    }

    debug_assert_eq!(current.len(), 1, "DP must end with one full component");
    let full_mask = if leaves.len() == 64 {
        u64::MAX
    } else {
        (1u64 << leaves.len()) - 1
    };
    match current.pop() {
        Some(component) if component.mask == full_mask => Ok(component),
        _ => Err(DbError::Execution(
            "join enumeration failed to cover all leaves".into(),
        )),
    }
}

/// Instantiates the winning order over the actual leaf plans.
fn build_join_tree(
    order: &JoinOrder,
    leaves: &mut [Box<dyn PlanNode>],
    conjuncts: &[Expr],
) -> DbResult<Box<dyn PlanNode>> {
    // Leaves are moved out of the slice exactly once each.
    fn take(leaves: &mut [Box<dyn PlanNode>], i: usize) -> Box<dyn PlanNode> {
        std::mem::replace(&mut leaves[i], Box::new(TakenLeaf))
    }

    match order {
        JoinOrder::Leaf(i) => Ok(take(leaves, *i)),
        JoinOrder::Join {
            left,
            right,
            conjuncts: indices,
        } => {
            let left_plan = build_join_tree(left, leaves, conjuncts)?;
            let right_plan = take(leaves, *right);
            let exprs: Vec<Expr> = indices.iter().map(|&c| conjuncts[c].clone()).collect();
            Ok(Box::new(NestedLoopsJoin::new(
                left_plan,
                right_plan,
                JoinType::Inner,
                and_all(&exprs),
            )))
        }
    }
}

/// Placeholder left behind when a leaf plan is moved into the join tree;
/// reaching it means the enumerator produced an order that reuses a leaf.
struct TakenLeaf;

impl PlanNode for TakenLeaf {
    fn prepare(&mut self, _ctx: &mut ExecutionContext) -> DbResult<executor::PlanProperties> {
        Err(DbError::InvalidArgument("join leaf used twice".into()))
    }
    fn schema(&self) -> &PlanSchema {
        unreachable!("TakenLeaf is never prepared")
    }
    fn cost(&self) -> PlanCost {
        PlanCost::default()
    }
    fn initialize(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Err(DbError::InvalidArgument("join leaf used twice".into()))
    }
    fn get_next_tuple(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<common::Row>> {
        Err(DbError::InvalidArgument("join leaf used twice".into()))
    }
    fn clean_up(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }
}
