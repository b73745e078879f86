//! Compilation of SELECT statements.

use super::astutils;
use super::clauses;
use super::context::CompilerState;
use super::pathctx;
use super::relctx;
use crate::ir;
use crate::pgast::{Expr, PathAspect};
use crate::Result;

pub fn compile_select_stmt(
    cx: &mut CompilerState,
    _ir_set: &ir::Set,
    stmt: &ir::SelectStmt,
) -> Result<()> {
    let query = cx.rel();

    // Bindings evaluated once and reused.
    clauses::compile_materialized_exprs(cx, &stmt.materialized_sets)?;

    // FOR iterator: an inlined CTE for DML-containing bodies, a lateral
    // range otherwise.
    if let Some(iterator) = &stmt.iterator {
        let contains_dml = stmt.result.contains_dml();
        let iterator_rvar = clauses::compile_iterator_expr(cx, iterator, contains_dml)?;
        relctx::include_rvar(cx, query, iterator_rvar, &iterator.path_id)?;
        cx.frame_mut()
            .path_scope
            .insert(iterator.path_id.clone(), query);
    }

    // The result expression.
    clauses::compile_output(cx, &stmt.result)?;

    if let Some(where_clause) = &stmt.where_clause {
        let filter = clauses::compile_filter_clause(cx, where_clause)?;
        let rel = cx.store.rel_mut(query);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            filter,
            "AND",
        ));
    }

    if !stmt.orderby.is_empty() {
        let sort_clause = clauses::compile_orderby_clause(cx, &stmt.orderby)?;
        cx.store
            .rel_mut(query)
            .select_mut()
            .expect("select statements compile into selects")
            .sort_clause = sort_clause;
    }

    let limit_offset = clauses::compile_limit_offset_clause(cx, stmt.offset.as_ref())?;
    let limit_count = clauses::compile_limit_offset_clause(cx, stmt.limit.as_ref())?;
    {
        let sel = cx
            .store
            .rel_mut(query)
            .select_mut()
            .expect("select statements compile into selects");
        sel.limit_offset = limit_offset;
        sel.limit_count = limit_count;
    }

    Ok(())
}

/// Toplevel results that are both nullable and exposed must not leak the
/// padding rows produced by optional wrappers.
pub fn add_null_filter_if_needed(
    cx: &mut CompilerState,
    rel: crate::pgast::RelId,
    result: &ir::Set,
) -> Result<()> {
    if !cx.store.rel(rel).nullable {
        return Ok(());
    }
    let Some(var) = pathctx::maybe_get_path_var(cx, rel, &result.path_id, PathAspect::Value)?
    else {
        return Ok(());
    };
    if !cx.store.is_nullable(&var) {
        return Ok(());
    }
    let rel_data = cx.store.rel_mut(rel);
    rel_data.where_clause = Some(astutils::extend_binop(
        rel_data.where_clause.take(),
        Expr::NullTest {
            arg: Box::new(var),
            negated: true,
        },
        "AND",
    ));
    Ok(())
}
