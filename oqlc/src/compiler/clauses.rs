//! Compilation of common statement clauses: iterators, filters,
//! ordering, limits, materialised bindings and toplevel finalisation.

use super::astutils;
use super::context::{CompClause, CompilerState, VolatilityRef};
use super::dispatch;
use super::output;
use super::pathctx;
use super::relctx;
use super::relgen;
use crate::error::Error;
use crate::ir;
use crate::pgast::{
    Alias, ColumnRef, CommonTableExpr, Expr, PathAspect, RelId, ResTarget, Rvar, RvarId,
    RvarKind, SortBy, SubLinkOp, UpdateTarget,
};
use crate::types;
use crate::Result;

/// Resolve the current volatility ref to an expression in `stmt`, adding
/// a `row_number() OVER ()` surrogate when the statement has no identity
/// to correlate against.
pub fn get_volatility_ref(cx: &mut CompilerState, stmt: RelId) -> Result<Option<Expr>> {
    let refs = cx.frame().volatility_refs.clone();
    for vref in refs {
        match vref {
            VolatilityRef::Path(path_id) => {
                if let Some(expr) =
                    pathctx::maybe_get_path_var(cx, stmt, &path_id, PathAspect::Identity)?
                {
                    return Ok(Some(expr));
                }
            }
            VolatilityRef::Expr(expr) => return Ok(Some(expr)),
        }
    }
    Ok(None)
}

/// Iterator sets provide the identity all volatile calls in the body
/// correlate with.
pub fn setup_iterator_volatility(cx: &mut CompilerState, iterator: &ir::Set) {
    cx.frame_mut()
        .volatility_refs
        .push(VolatilityRef::Path(iterator.path_id.clone()));
}

/// Compile the FOR iterator of a statement. DML-containing bodies wrap
/// the iterator in a CTE whose identity is transient so that equal
/// iteration values do not collapse into one DML per row.
pub fn compile_iterator_expr(
    cx: &mut CompilerState,
    iterator: &ir::Set,
    contains_dml: bool,
) -> Result<RvarId> {
    let rvar = cx.newscope(|cx| {
        cx.frame_mut().clause = CompClause::Iterator;
        cx.frame_mut().expr_exposed = false;
        relgen::get_set_rvar(cx, iterator)
    })?;

    // Object iterators carry inherent identity; everything else gets a
    // transient one so equal iteration values stay distinct for DML.
    if contains_dml && !iterator.path_id.is_objtype_path() {
        if let Some(iter_rel) = cx.store.rvar_rel(rvar) {
            if !cx.store.rel(iter_rel).is_terminal() {
                relctx::ensure_transient_identity_for_path(
                    cx,
                    &iterator.path_id,
                    iter_rel,
                    true,
                )?;
                let out = pathctx::get_path_output(
                    cx,
                    iter_rel,
                    &iterator.path_id,
                    PathAspect::Identity,
                )?;
                pathctx::put_rvar_path_output(
                    cx,
                    rvar,
                    &iterator.path_id,
                    PathAspect::Iterator,
                    out,
                );
            }
        }
    }

    setup_iterator_volatility(cx, iterator);
    Ok(rvar)
}

/// Materialised bindings: each set is compiled once; multi sets are
/// collapsed into arrays and packed under the `packed` aspect for later
/// unpacking.
pub fn compile_materialized_exprs(
    cx: &mut CompilerState,
    materialized_sets: &[ir::Set],
) -> Result<()> {
    for mat_set in materialized_sets {
        if cx
            .env
            .external_rvars
            .contains_key(&(mat_set.path_id.clone(), PathAspect::Packed))
        {
            continue;
        }

        let query = cx.newscope(|cx| {
            cx.frame_mut().materializing = true;
            cx.frame_mut().expr_exposed = false;
            let subquery = relgen::set_as_subquery(cx, mat_set, false)?;
            relgen::set_to_array(cx, mat_set, subquery)
        })?;

        let name = cx
            .env
            .aliases
            .get(&format!("mat_{}", mat_set.path_id.alias_hint()));
        let cte = cx.store.add_cte(CommonTableExpr {
            name,
            query,
            recursive: false,
            // Keep the planner from inlining the binding into each use
            // site.
            materialized: Some(true),
            aliascolnames: vec!["v".to_string()],
        });
        cx.store
            .rel_mut(cx.toplevel_stmt)
            .ctes
            .push(cte);

        let alias = cx.env.aliases.get("mat");
        let packed_rvar = cx
            .store
            .add_rvar(Rvar::new(RvarKind::Cte(cte), Alias::new(alias)));
        cx.store.rvar_mut(packed_rvar).path_outputs.insert(
            (mat_set.path_id.clone(), PathAspect::Packed),
            crate::pgast::OutputVar::ColumnRef(ColumnRef::new(vec!["v".to_string()])),
        );
        cx.env
            .external_rvars
            .insert((mat_set.path_id.clone(), PathAspect::Packed), packed_rvar);
    }
    Ok(())
}

/// FILTER compiles in the statement's own scope without exposure; a
/// non-singleton filter set becomes an EXISTS guard.
pub fn compile_filter_clause(
    cx: &mut CompilerState,
    where_clause: &ir::Set,
) -> Result<Expr> {
    cx.newscope(|cx| {
        cx.frame_mut().expr_exposed = false;
        cx.frame_mut().clause = CompClause::Where;

        if where_clause.typeref.is_scalar() && !where_clause.contains_dml() {
            dispatch::compile_set(cx, where_clause)
        } else {
            let wrapper = cx.subrel(|cx| -> Result<RelId> {
                let wrapper = cx.rel();
                let val = dispatch::compile_set(cx, where_clause)?;
                let rel = cx.store.rel_mut(wrapper);
                rel.where_clause = Some(astutils::extend_binop(
                    rel.where_clause.take(),
                    val,
                    "AND",
                ));
                rel.target_list.push(ResTarget::new(
                    None,
                    Expr::NumericConstant { val: "1".into() },
                ));
                Ok(wrapper)
            })?;
            Ok(Expr::SubLink {
                op: SubLinkOp::Exists,
                test_expr: None,
                operator: None,
                rel: wrapper,
            })
        }
    })
}

/// Sort keys run through [astutils::collapse_query] so single-column
/// subqueries stay inline and PostgreSQL can use indexes on them.
pub fn compile_orderby_clause(
    cx: &mut CompilerState,
    orderby: &[ir::SortElement],
) -> Result<Vec<SortBy>> {
    let mut sort_clause = Vec::new();
    for sort_expr in orderby {
        let sortexpr = cx.newscope(|cx| {
            cx.frame_mut().expr_exposed = false;
            cx.frame_mut().clause = CompClause::OrderBy;
            let subquery = relgen::set_as_subquery(cx, &sort_expr.expr, true)?;
            Ok::<_, Error>(astutils::collapse_query(&cx.store, subquery))
        })?;
        sort_clause.push(SortBy {
            node: sortexpr,
            dir: Some(sort_expr.direction),
            nulls: sort_expr.nulls,
        });
    }
    Ok(sort_clause)
}

pub fn compile_limit_offset_clause(
    cx: &mut CompilerState,
    expr: Option<&ir::Set>,
) -> Result<Option<Expr>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let result = cx.newscope(|cx| {
        cx.frame_mut().expr_exposed = false;
        cx.frame_mut().clause = CompClause::LimitOffset;
        let subquery = relgen::set_as_subquery(cx, expr, true)?;
        Ok::<_, Error>(astutils::collapse_query(&cx.store, subquery))
    })?;
    Ok(Some(result))
}

/// Compile the result column of a statement.
pub fn compile_output(cx: &mut CompilerState, result: &ir::Set) -> Result<()> {
    dispatch::visit_set(cx, result)?;
    let rel = cx.rel();
    if output::in_serialization_ctx(cx) {
        pathctx::get_path_serialized_output(cx, rel, &result.path_id)?;
    } else {
        pathctx::get_path_value_output(cx, rel, &result.path_id)?;
    }
    Ok(())
}

/// Constraint checks that PostgreSQL cannot enforce are kept alive by a
/// dummy UPDATE the planner cannot prune.
pub fn scan_check_ctes(cx: &mut CompilerState) -> Result<()> {
    if cx.check_ctes.is_empty() {
        return Ok(());
    }

    // Build the dummy scan:
    //     UPDATE edgedb._dml_dummy SET id = id
    //     WHERE id = <dml-count> + (SELECT count(*) FROM check_1) + ...
    let mut val: Expr = Expr::NumericConstant {
        val: cx.dml_counter.to_string(),
    };
    for cte in cx.check_ctes.clone() {
        let count_sel = cx.store.new_select();
        let alias = cx.env.aliases.get("c");
        let rvar = cx
            .store
            .add_rvar(Rvar::new(RvarKind::Cte(cte), Alias::new(alias)));
        {
            let sel = cx
                .store
                .rel_mut(count_sel)
                .select_mut()
                .expect("fresh select");
            sel.from_clause.push(rvar);
        }
        let mut count = crate::pgast::FuncCall::new_null_safe(&["count"], vec![]);
        count.agg_star = true;
        cx.store
            .rel_mut(count_sel)
            .target_list
            .push(ResTarget::new(None, Expr::FuncCall(Box::new(count))));
        val = astutils::new_binop(val, Expr::Subquery(count_sel), "+");
    }

    let dummy_rel = cx.store.add_rel(crate::pgast::Rel::new(
        crate::pgast::RelKind::Table(crate::pgast::BaseTable {
            schemaname: Some(types::HELPER_SCHEMA.to_string()),
            relname: "_dml_dummy".to_string(),
        }),
    ));
    let dummy_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Relation {
            rel: dummy_rel,
            include_inherited: true,
        },
        Alias::default(),
    ));

    let scan = cx.store.add_rel(crate::pgast::Rel::new(
        crate::pgast::RelKind::Update(crate::pgast::UpdateStmt {
            relation: dummy_rvar,
            targets: vec![UpdateTarget {
                name: "id".to_string(),
                val: Expr::ColumnRef(ColumnRef::new(vec!["id".to_string()])),
            }],
            from_clause: vec![],
        }),
    ));
    cx.store.rel_mut(scan).where_clause = Some(astutils::new_binop(
        Expr::ColumnRef(ColumnRef::new(vec!["id".to_string()])),
        val,
        "=",
    ));

    let name = cx.env.aliases.get("check_scan");
    let cte = cx.store.add_cte(CommonTableExpr {
        name,
        query: scan,
        recursive: false,
        materialized: None,
        aliascolnames: vec![],
    });
    cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);
    Ok(())
}

/// Finalise the toplevel statement: type-rewrite CTEs go first, then the
/// CTEs in append order, and the check scans last.
pub fn fini_toplevel(cx: &mut CompilerState) -> Result<()> {
    log::debug!(
        "finalising toplevel: {} ctes, {} check ctes",
        cx.store.rel(cx.toplevel_stmt).ctes.len(),
        cx.check_ctes.len()
    );

    scan_check_ctes(cx)?;

    let type_ctes: Vec<_> = cx.type_ctes.values().copied().collect();
    if !type_ctes.is_empty() {
        let rel = cx.store.rel_mut(cx.toplevel_stmt);
        let mut ctes = type_ctes;
        ctes.extend(rel.ctes.drain(..));
        rel.ctes = ctes;
    }
    Ok(())
}

/// Build the argument map: logical param name → physical placement.
pub fn populate_argmap(cx: &mut CompilerState, params: &[ir::Param]) {
    for (i, param) in params.iter().enumerate() {
        cx.env.params.insert(param.name.clone(), param.clone());
        cx.env.argmap.insert(
            param.name.clone(),
            super::context::ParamMapping {
                physical_index: i + 1,
                logical_index: i + 1,
                required: param.required,
            },
        );
    }
}
