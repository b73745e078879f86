//! Compilation of GROUP statements.

use indexmap::IndexMap;

use super::astutils;
use super::clauses;
use super::context::{CompilerState, VolatilityRef};
use super::dispatch;
use super::pathctx;
use super::relctx;
use super::relgen;
use crate::error::Error;
use crate::ir;
use crate::pgast::{
    CaseWhen, Expr, FuncCall, PathAspect, WindowDef,
};
use crate::Result;

/// GROUP compiles the subject as a lateral range, binds the `using`
/// expressions, sets GROUP BY to the compiled grouping elements, and
/// exposes the grouping-set membership as an array of binding names
/// decoded from the `grouping(...)` bitmask.
pub fn compile_group_stmt(
    cx: &mut CompilerState,
    _ir_set: &ir::Set,
    stmt: &ir::GroupStmt,
) -> Result<()> {
    let query = cx.rel();

    // Subject range.
    let subject_rvar = cx.newscope(|cx| {
        cx.frame_mut().expr_exposed = false;
        relgen::get_set_rvar(cx, &stmt.subject)
    })?;
    relctx::include_rvar(cx, query, subject_rvar, &stmt.subject.path_id)?;
    cx.frame_mut()
        .path_scope
        .insert(stmt.subject.path_id.clone(), query);
    // Per-aggregate subrels need not re-iterate the subject.
    cx.frame_mut()
        .skippable_sources
        .insert(stmt.subject.path_id.clone());

    // Bind the `using` expressions.
    let mut using_vals: IndexMap<String, Expr> = IndexMap::new();
    for (name, using_set) in &stmt.using {
        let val = cx.newscope(|cx| {
            cx.frame_mut().expr_exposed = false;
            dispatch::compile_set(cx, using_set)
        })?;
        pathctx::put_path_var_if_not_exists(
            cx,
            query,
            &using_set.path_id,
            val.clone(),
            PathAspect::Value,
        );
        using_vals.insert(name.clone(), val);
    }

    // GROUP BY the grouped bindings, in first-use order.
    let mut group_clause = Vec::new();
    let mut grouped_names: Vec<String> = Vec::new();
    for grouping_set in &stmt.by {
        for name in grouping_set {
            if !grouped_names.contains(name) {
                grouped_names.push(name.clone());
            }
        }
    }
    for name in &grouped_names {
        let val = using_vals
            .get(name)
            .ok_or_else(|| Error::new_reference(name, "grouping binding"))?;
        group_clause.push(val.clone());
    }
    cx.store
        .rel_mut(query)
        .select_mut()
        .expect("group lowers to a select")
        .group_clause = group_clause.clone();

    // The grouping binding: an array of the binding names participating
    // in the current grouping set, decoded from the grouping() bitmask.
    if !grouped_names.is_empty() {
        let grouping_call = Expr::FuncCall(Box::new(FuncCall::new_null_safe(
            &["grouping"],
            group_clause.clone(),
        )));
        let n = grouped_names.len();
        let mut elements = Vec::new();
        for (i, name) in grouped_names.iter().enumerate() {
            let bit = n - 1 - i;
            let mask = Expr::OpExpr {
                name: "&".to_string(),
                lexpr: Some(Box::new(Expr::OpExpr {
                    name: ">>".to_string(),
                    lexpr: Some(Box::new(grouping_call.clone())),
                    rexpr: Some(Box::new(Expr::NumericConstant {
                        val: bit.to_string(),
                    })),
                })),
                rexpr: Some(Box::new(Expr::NumericConstant { val: "1".into() })),
            };
            elements.push(Expr::CaseExpr {
                arg: None,
                args: vec![CaseWhen {
                    expr: astutils::new_binop(
                        mask,
                        Expr::NumericConstant { val: "0".into() },
                        "=",
                    ),
                    result: Expr::StringConstant { val: name.clone() },
                }],
                defresult: None,
            });
        }
        let grouping_binding = Expr::FuncCall(Box::new(FuncCall::new_null_safe(
            &["array_remove"],
            vec![Expr::ArrayExpr { elements }, Expr::NullConstant],
        )));
        pathctx::put_path_var_if_not_exists(
            cx,
            query,
            &stmt.group_binding,
            grouping_binding,
            PathAspect::Value,
        );
    }

    // Pack the group contents so consumers of the group's elements can
    // unpack them without re-joining the subject.
    if let Ok(subject_val) =
        pathctx::get_path_value_var(cx, query, &stmt.subject.path_id)
    {
        let packed = FuncCall::new_null_safe(
            &["array_agg"],
            vec![super::output::output_as_value(subject_val)],
        );
        pathctx::put_path_var_if_not_exists(
            cx,
            query,
            &stmt.subject.path_id,
            Expr::FuncCall(Box::new(packed)),
            PathAspect::Packed,
        );
    }

    // The result, with a row_number volatility ref so that volatile
    // calls stay correlated with the produced groups.
    cx.newscope(|cx| -> Result<()> {
        let mut row_number = FuncCall::new_null_safe(&["row_number"], vec![]);
        row_number.over = Some(WindowDef {
            partition_clause: vec![],
            order_clause: vec![],
        });
        cx.frame_mut()
            .volatility_refs
            .push(VolatilityRef::Expr(Expr::FuncCall(Box::new(row_number))));
        clauses::compile_output(cx, &stmt.result)
    })?;

    if let Some(where_clause) = &stmt.where_clause {
        let filter = clauses::compile_filter_clause(cx, where_clause)?;
        let sel = cx.store.rel_mut(query);
        // Post-grouping filters belong in HAVING.
        let having = sel
            .select_mut()
            .expect("group lowers to a select")
            .having
            .take();
        sel.select_mut().expect("group lowers to a select").having =
            Some(astutils::extend_binop(having, filter, "AND"));
    }

    if !stmt.orderby.is_empty() {
        let sort_clause = clauses::compile_orderby_clause(cx, &stmt.orderby)?;
        cx.store
            .rel_mut(query)
            .select_mut()
            .expect("group lowers to a select")
            .sort_clause = sort_clause;
    }

    Ok(())
}
