//! Compilation of IR sets into relations and range vars.
//!
//! Each set compiles to a subquery exposing the set's path under the
//! aspects it can provide; enclosing queries join these ranges over
//! shared path bonds.

use itertools::Itertools;

use super::astutils;
use super::context::CompilerState;
use super::dispatch;
use super::dml;
use super::group;
use super::output;
use super::pathctx;
use super::relctx;
use super::stmt as stmtcomp;
use crate::error::Error;
use crate::ir::{self, PathId};
use crate::pgast::{
    Alias, CaseWhen, ColumnDef, ColumnRef, Expr, FuncCall, OutputVar, PathAspect, RelId,
    ResTarget, Rvar, RvarId, RvarKind, SetOp, SubLinkOp, TupleElement, TupleVar, TypeName,
    WindowDef,
};
use crate::types;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SetRVar {
    pub rvar: RvarId,
    pub path_id: PathId,
    pub aspects: Vec<PathAspect>,
}

#[derive(Debug, Clone)]
pub struct SetRVars {
    pub main: SetRVar,
    pub new: Vec<SetRVar>,
}

fn new_simple_set_rvar(ir_set: &ir::Set, rvar: RvarId, aspects: &[PathAspect]) -> SetRVars {
    let main = SetRVar {
        rvar,
        path_id: ir_set.path_id.clone(),
        aspects: aspects.to_vec(),
    };
    SetRVars {
        new: vec![main.clone()],
        main,
    }
}

fn new_source_set_rvar(ir_set: &ir::Set, rvar: RvarId) -> SetRVars {
    let aspects: &[PathAspect] = if ir_set.path_id.is_objtype_path() {
        &[PathAspect::Source, PathAspect::Value]
    } else {
        &[PathAspect::Value]
    };
    new_simple_set_rvar(ir_set, rvar, aspects)
}

/// Return a range var for a given IR set, compiling the set if no
/// matching range exists in scope yet.
pub fn get_set_rvar(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<RvarId> {
    let path_id = &ir_set.path_id;

    let cur_rel = cx.rel();
    if let Some(rvar) = relctx::find_rvar(cx, cur_rel, path_id) {
        return Ok(rvar);
    }
    if let Some(rvar) = relctx::external_rel_rvar(cx, path_id)? {
        return Ok(rvar);
    }

    // A materialised binding: unpack the packed array back into a set
    // range instead of recompiling the set.
    let packed = cx
        .env
        .external_rvars
        .get(&(path_id.clone(), PathAspect::Packed))
        .copied();
    if let Some(packed_rvar) = packed {
        let packed_cte = match &cx.store.rvar(packed_rvar).kind {
            RvarKind::Cte(cte) => Some(*cte),
            _ => None,
        };
        if let Some(cte) = packed_cte {
            let packed_sel = cx.store.new_select();
            let alias = cx.env.aliases.get("mat");
            let mat_rvar = cx
                .store
                .add_rvar(Rvar::new(RvarKind::Cte(cte), Alias::new(alias.clone())));
            {
                let sel = cx
                    .store
                    .rel_mut(packed_sel)
                    .select_mut()
                    .expect("fresh select");
                sel.from_clause.push(mat_rvar);
            }
            cx.store.rel_mut(packed_sel).target_list.push(ResTarget::new(
                None,
                Expr::ColumnRef(ColumnRef::new(vec![alias, "v".to_string()])),
            ));
            let rvar = relctx::unpack_rvar(cx, Expr::Subquery(packed_sel), path_id)?;
            relctx::include_rvar(cx, cur_rel, rvar, path_id)?;
            return Ok(rvar);
        }
    }

    let scope_stmt = cx.maybe_get_scope_stmt(path_id);

    let rvars = cx.newscope(|cx| {
        let scope_stmt = match scope_stmt {
            Some(scope_stmt) => {
                cx.frame_mut().rel = scope_stmt;
                scope_stmt
            }
            None => cx.rel(),
        };

        cx.subrel(|cx| -> Result<SetRVars> {
            let stmt = cx.rel();

            let is_empty_set = matches!(ir_set.expr.as_deref(), Some(ir::SetExpr::Empty));
            let is_optional = cx.is_optional(path_id);
            let optional_wrapping = is_optional && !is_empty_set;

            let optrel = if optional_wrapping {
                let optrel = prepare_optional_rel(cx, ir_set, stmt)?;
                cx.frame_mut().rel = optrel.target_rel;
                Some(optrel)
            } else {
                None
            };

            if let Some(scope) = cx.scope_for_set(ir_set) {
                if cx.scope_tree.is_visible(scope, path_id) {
                    cx.frame_mut().path_scope.insert(path_id.clone(), scope_stmt);
                }
                let rel = cx.rel();
                relctx::update_scope(cx, ir_set, rel);
            }

            let mut rvars = get_set_rvar_impl(cx, ir_set)?;

            if let Some(optrel) = optrel {
                rvars = finalize_optional_rel(cx, ir_set, optrel, rvars)?;
            } else if !is_optional && is_empty_set {
                if let Some(null_rel) = cx.store.rvar_rel(rvars.main.rvar) {
                    cx.store.rel_mut(null_rel).where_clause =
                        Some(Expr::BooleanConstant { val: false });
                }
            }

            for set_rvar in &rvars.new {
                relctx::include_specific_rvar(
                    cx,
                    scope_stmt,
                    set_rvar.rvar,
                    &set_rvar.path_id,
                    &set_rvar.aspects,
                )?;
            }

            Ok(rvars)
        })
    })?;

    for aspect in &rvars.main.aspects {
        pathctx::put_path_rvar_if_not_exists(cx, cur_rel, path_id, rvars.main.rvar, *aspect);
    }

    Ok(rvars.main.rvar)
}

/// Entry point for the root IR set of a compilation: populates the
/// toplevel statement in place.
pub fn process_toplevel_query(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<RvarId> {
    let rvars = get_set_rvar_impl(cx, ir_set)?;
    let stmt = cx.rel();
    for set_rvar in &rvars.new {
        // Statement-shaped sets compile directly into the toplevel and
        // hand back a range var over it; such a range must not be
        // included into itself.
        if cx.store.rvar_rel(set_rvar.rvar) == Some(stmt) {
            continue;
        }
        relctx::include_specific_rvar(
            cx,
            stmt,
            set_rvar.rvar,
            &set_rvar.path_id,
            &set_rvar.aspects,
        )?;
    }
    Ok(rvars.main.rvar)
}

fn get_set_rvar_impl(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    use ir::SetExpr::*;

    match ir_set.expr.as_deref() {
        Some(Select(_)) | Some(Group(_)) | Some(Insert(_)) | Some(Update(_))
        | Some(Delete(_)) => process_set_as_subquery(cx, ir_set),

        Some(Membership { .. }) => process_set_as_membership_expr(cx, ir_set),
        Some(Empty) => process_set_as_empty(cx, ir_set),
        Some(Union { .. }) => process_set_as_setop(cx, ir_set),
        Some(Distinct(_)) => process_set_as_distinct(cx, ir_set),
        Some(IfElse { .. }) => process_set_as_ifelse(cx, ir_set),
        Some(Coalesce { .. }) => process_set_as_coalesce(cx, ir_set),
        Some(Tuple { .. }) => process_set_as_tuple(cx, ir_set),
        Some(TupleIndirection { .. }) => process_set_as_tuple_indirection(cx, ir_set),
        Some(FunctionCall(call)) => {
            if call.name == "std::enumerate" {
                process_set_as_enumerate(cx, ir_set, call)
            } else if call.is_aggregate() {
                process_set_as_agg_expr(cx, ir_set, call)
            } else if call.is_set_returning() {
                process_set_as_set_func_expr(cx, ir_set, call)
            } else {
                process_set_as_expr(cx, ir_set)
            }
        }
        Some(Exists(_)) => process_set_as_exists_expr(cx, ir_set),
        Some(Array(_)) => process_set_as_array_expr(cx, ir_set),
        Some(TypeCast { .. }) => process_set_as_type_cast(cx, ir_set),
        Some(TypeIntrospection { .. }) => process_set_as_type_introspection(cx, ir_set),
        Some(ConstantSet(_)) => process_set_as_const_set(cx, ir_set),
        Some(_) => process_set_as_expr(cx, ir_set),
        None if ir_set.rptr.is_some() => process_set_as_path(cx, ir_set),
        None => process_set_as_root(cx, ir_set),
    }
}

// ---- optional wrapper --------------------------------------------------

struct OptionalRel {
    scope_rel: RelId,
    target_rel: RelId,
    emptyrel: RelId,
    unionrel: RelId,
    wrapper: RelId,
    container: RelId,
    marker: String,
}

/// For OPTIONAL sets we compute a UNION of the set and an empty
/// relation, annotate each side with a marker, and select only rows that
/// match the marker of the first row:
///
///     SELECT q.* FROM
///         (SELECT marker = first_value(marker) OVER () AS marker, ...
///          FROM (SELECT 1 AS marker, * FROM target
///                UNION ALL
///                SELECT 2 AS marker, * FROM empty) AS u) AS q
///     WHERE marker
///
/// This encodes "if empty, yield one null row" without collapsing
/// cardinality.
fn prepare_optional_rel(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    stmt: RelId,
) -> Result<OptionalRel> {
    let wrapper = cx.store.new_select();
    let unionrel = cx.store.new_select();
    let scope_rel = cx.store.new_select();
    let target_rel = cx.store.new_select();
    let emptyrel = cx.store.new_select();

    cx.rel_hierarchy.insert(wrapper, stmt);
    cx.rel_hierarchy.insert(unionrel, wrapper);
    cx.rel_hierarchy.insert(scope_rel, unionrel);
    cx.rel_hierarchy.insert(target_rel, scope_rel);
    cx.rel_hierarchy.insert(emptyrel, unionrel);

    let empty_set = ir::Set {
        path_id: ir_set.path_id.clone(),
        typeref: ir_set.typeref.clone(),
        rptr: None,
        expr: Some(Box::new(ir::SetExpr::Empty)),
        shape: vec![],
        scope_id: None,
    };
    let emptyrvar = relctx::new_empty_rvar(cx, &empty_set);
    cx.switch(super::context::ContextSwitchMode::Transparent, |cx| {
        cx.frame_mut().rel = emptyrel;
        relctx::include_rvar(cx, emptyrel, emptyrvar, &ir_set.path_id)
    })?;

    let marker = cx.env.aliases.get("m");

    {
        let sel = cx.store.rel_mut(unionrel).select_mut().expect("fresh select");
        sel.op = Some(SetOp::Union);
        sel.all = true;
        sel.larg = Some(scope_rel);
        sel.rarg = Some(emptyrel);
    }

    Ok(OptionalRel {
        scope_rel,
        target_rel,
        emptyrel,
        unionrel,
        wrapper,
        container: stmt,
        marker,
    })
}

fn finalize_optional_rel(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    optrel: OptionalRel,
    rvars: SetRVars,
) -> Result<SetRVars> {
    let marker = optrel.marker.clone();

    cx.switch(super::context::ContextSwitchMode::Transparent, |cx| {
        cx.frame_mut().rel = optrel.scope_rel;
        for set_rvar in &rvars.new {
            relctx::include_specific_rvar(
                cx,
                optrel.scope_rel,
                set_rvar.rvar,
                &set_rvar.path_id,
                &set_rvar.aspects,
            )?;
        }
        for aspect in &rvars.main.aspects {
            pathctx::put_path_rvar_if_not_exists(
                cx,
                optrel.scope_rel,
                &ir_set.path_id,
                rvars.main.rvar,
                *aspect,
            );
        }

        let lvar = pathctx::get_path_value_var(cx, optrel.scope_rel, &ir_set.path_id)?;
        if cx.store.is_nullable(&lvar) {
            // The left var may still be nullable for non-required
            // singleton scalar links. Filter out NULLs.
            let rel = cx.store.rel_mut(optrel.scope_rel);
            rel.where_clause = Some(astutils::extend_binop(
                rel.where_clause.take(),
                Expr::NullTest {
                    arg: Box::new(lvar),
                    negated: true,
                },
                "AND",
            ));
        }
        Ok::<_, Error>(())
    })?;

    // Marker columns on both sides of the union.
    cx.store.rel_mut(optrel.scope_rel).target_list.insert(
        0,
        ResTarget::new(
            Some(marker.clone()),
            Expr::NumericConstant { val: "1".into() },
        ),
    );
    cx.store.rel_mut(optrel.emptyrel).target_list.insert(
        0,
        ResTarget::new(
            Some(marker.clone()),
            Expr::NumericConstant { val: "2".into() },
        ),
    );

    let union_rvar = relctx::rvar_for_rel(cx, optrel.unionrel, true, "u");
    cx.switch(super::context::ContextSwitchMode::Transparent, |cx| {
        cx.frame_mut().rel = optrel.wrapper;
        relctx::include_rvar(cx, optrel.wrapper, union_rvar, &ir_set.path_id)
    })?;

    let lagged_marker = {
        let mut call = FuncCall::new_null_safe(
            &["first_value"],
            vec![Expr::ColumnRef(ColumnRef::new(vec![marker.clone()]))],
        );
        call.over = Some(WindowDef {
            partition_clause: vec![],
            order_clause: vec![],
        });
        Expr::FuncCall(Box::new(call))
    };
    let marker_ok = astutils::new_binop(
        Expr::ColumnRef(ColumnRef::new(vec![marker.clone()])),
        lagged_marker,
        "=",
    );
    cx.store
        .rel_mut(optrel.wrapper)
        .target_list
        .push(ResTarget::new(Some(marker.clone()), marker_ok));

    let wrapper_rvar = relctx::rvar_for_rel(cx, optrel.wrapper, true, "q");
    cx.switch(super::context::ContextSwitchMode::Transparent, |cx| {
        cx.frame_mut().rel = optrel.container;
        relctx::include_rvar(cx, optrel.container, wrapper_rvar, &ir_set.path_id)
    })?;

    let wrapper_alias = cx.store.rvar(wrapper_rvar).alias.aliasname.clone();
    {
        let rel = cx.store.rel_mut(optrel.container);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            Expr::ColumnRef(ColumnRef::new(vec![wrapper_alias, marker])),
            "AND",
        ));
        rel.nullable = true;
    }

    let sub_rvar = SetRVar {
        rvar: relctx::new_rel_rvar(cx, ir_set, optrel.container),
        path_id: ir_set.path_id.clone(),
        aspects: rvars.main.aspects,
    };

    Ok(SetRVars {
        main: sub_rvar.clone(),
        new: vec![sub_rvar],
    })
}

// ---- simple sources ----------------------------------------------------

fn process_set_as_root(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let rvar = relctx::new_root_rvar(cx, ir_set)?;
    Ok(new_source_set_rvar(ir_set, rvar))
}

fn process_set_as_empty(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let rvar = relctx::new_empty_rvar(cx, ir_set);
    Ok(new_source_set_rvar(ir_set, rvar))
}

// ---- path steps --------------------------------------------------------

fn process_set_as_path(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let rptr = ir_set.rptr.as_ref().expect("path step has a pointer");
    let ptrref = &rptr.ptrref;
    let ir_source = &rptr.source;
    let source_is_visible = cx.is_visible(&ir_source.path_id);

    if ir_set.path_id.is_type_intersection_path() {
        return process_set_as_type_intersection(cx, ir_set);
    }

    let ptr_info = types::ptr_storage_info(ptrref, false)?;
    let is_linkprop = ptrref.is_link_property();
    let is_inline_ref = ptr_info.table_type == types::TableType::ObjectType;
    let is_primitive_ref = !ptrref.target.is_object();
    let is_inline_primitive_ref = is_inline_ref && is_primitive_ref;

    let do_semi_join = !source_is_visible
        && !cx.frame().disable_semi_join.contains(&ir_source.path_id)
        && !(is_linkprop || is_primitive_ref);

    let mut rvars: Vec<SetRVar> = Vec::new();
    let mut src_rvar = None;

    if do_semi_join {
        let set_rvar = cx.subrel(|cx| -> Result<RvarId> {
            cx.frame_mut().expr_exposed = false;
            let src = get_set_rvar(cx, ir_source)?;
            relctx::semi_join(cx, stmt, ir_set, src)
        })?;
        rvars.push(SetRVar {
            rvar: set_rvar,
            path_id: ir_set.path_id.clone(),
            aspects: vec![PathAspect::Value, PathAspect::Source],
        });
    } else if !source_is_visible {
        let src_rel = cx.subrel(|cx| -> Result<RelId> {
            if is_linkprop {
                cx.frame_mut()
                    .disable_semi_join
                    .insert(ir_source.path_id.clone());
                cx.frame_mut().unique_paths.insert(ir_source.path_id.clone());
            }
            get_set_rvar(cx, ir_source)?;

            if is_inline_primitive_ref {
                // Semi-join variant for inline scalar links: just filter
                // out NULLs.
                let rel = cx.rel();
                relctx::ensure_source_rvar(cx, ir_source, rel)?;
                let var = pathctx::get_path_value_var(cx, rel, &ir_set.path_id)?;
                if cx.store.is_nullable(&var) {
                    let rel_data = cx.store.rel_mut(rel);
                    rel_data.where_clause = Some(astutils::extend_binop(
                        rel_data.where_clause.take(),
                        Expr::NullTest {
                            arg: Box::new(var),
                            negated: true,
                        },
                        "AND",
                    ));
                }
            }
            Ok(cx.rel())
        })?;

        let rvar = relctx::rvar_for_rel(cx, src_rel, true, &ir_source.path_id.alias_hint());
        relctx::include_rvar(cx, stmt, rvar, &ir_source.path_id)?;
        cx.store
            .rel_mut(stmt)
            .path_id_mask
            .insert(ir_source.path_id.clone());
        src_rvar = Some(rvar);
    } else {
        src_rvar = Some(get_set_rvar(cx, ir_source)?);
    }

    let main_rvar;

    if is_linkprop {
        let srvars = process_set_as_link_property_ref(cx, ir_set)?;
        main_rvar = srvars.main;
        rvars.extend(srvars.new);
    } else if is_inline_primitive_ref {
        main_rvar = SetRVar {
            rvar: relctx::ensure_source_rvar(cx, ir_source, stmt)?,
            path_id: ir_set.path_id.clone(),
            aspects: vec![PathAspect::Value],
        };
    } else if !do_semi_join {
        // Link range.
        if src_rvar.is_none() {
            src_rvar = Some(get_set_rvar(cx, ir_source)?);
        }

        if !is_inline_ref {
            let map_rvar = SetRVar {
                rvar: relctx::new_mapped_pointer_rvar(cx, rptr, &ir_set.path_id)?,
                path_id: ir_set.path_id.ptr_path(),
                aspects: vec![PathAspect::Value, PathAspect::Source],
            };
            rvars.push(map_rvar);
        }

        if ir_set.typeref.is_object() {
            // Target set range.
            let target_rvar = relctx::new_root_rvar(cx, ir_set)?;
            let mr = SetRVar {
                rvar: target_rvar,
                path_id: ir_set.path_id.clone(),
                aspects: vec![PathAspect::Value, PathAspect::Source],
            };
            rvars.push(mr.clone());
            main_rvar = mr;
        } else {
            // A multi property: the map rvar provides the value.
            let mr = rvars
                .last()
                .cloned()
                .ok_or_else(|| Error::new_internal("pointer range missing map rvar"))?;
            main_rvar = SetRVar {
                rvar: mr.rvar,
                path_id: ir_set.path_id.clone(),
                aspects: vec![PathAspect::Value],
            };
        }
    } else {
        main_rvar = rvars
            .last()
            .cloned()
            .ok_or_else(|| Error::new_internal("semi-join produced no range"))?;
    }

    if !source_is_visible {
        // No other paths share this path prefix in this scope, so the
        // path is represented by a subquery rather than a set of ranges.
        for set_rvar in &rvars {
            relctx::include_specific_rvar(
                cx,
                stmt,
                set_rvar.rvar,
                &set_rvar.path_id,
                &set_rvar.aspects,
            )?;
        }

        let aspects = if is_primitive_ref {
            vec![PathAspect::Value]
        } else {
            vec![PathAspect::Value, PathAspect::Source]
        };

        let main = SetRVar {
            rvar: relctx::new_rel_rvar(cx, ir_set, stmt),
            path_id: ir_set.path_id.clone(),
            aspects,
        };
        return Ok(SetRVars {
            main: main.clone(),
            new: vec![main],
        });
    }

    Ok(SetRVars {
        main: main_rvar,
        new: rvars,
    })
}

fn process_set_as_type_intersection(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
) -> Result<SetRVars> {
    let stmt = cx.rel();
    let rptr = ir_set.rptr.as_ref().expect("type intersection has a source");
    let ir_source = &rptr.source;

    let source_rvar = get_set_rvar(cx, ir_source)?;
    cx.store
        .rel_mut(stmt)
        .view_path_id_map
        .insert(ir_set.path_id.clone(), ir_source.path_id.clone());
    relctx::include_rvar(cx, stmt, source_rvar, &ir_set.path_id)?;

    if !ir_set.path_id.intersection_is_ancestral() {
        // Restrict the set to rows present in the target type's range: a
        // non-ancestral indirection filters by actual type.
        let target_rvar =
            relctx::range_for_material_objtype(cx, &ir_set.typeref, &ir_set.path_id, true)?;
        let tgt_id = pathctx::get_rvar_path_identity_var(cx, target_rvar, &ir_set.path_id)?;
        let src_id = pathctx::get_path_identity_var(cx, stmt, &ir_set.path_id)?;
        relctx::include_specific_rvar(
            cx,
            stmt,
            target_rvar,
            &ir_set.path_id,
            &[PathAspect::Source],
        )?;
        let rel = cx.store.rel_mut(stmt);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            astutils::new_binop(src_id, tgt_id, "="),
            "AND",
        ));
    }

    let sub_rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(
        ir_set,
        sub_rvar,
        &[PathAspect::Value, PathAspect::Source],
    ))
}

fn process_set_as_link_property_ref(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
) -> Result<SetRVars> {
    let rptr = ir_set.rptr.as_ref().expect("link property has a pointer");
    let ir_source = &rptr.source;
    let src_rvar = get_set_rvar(cx, ir_source)?;
    let lpropref = &rptr.ptrref;
    let ptr_info = types::ptr_storage_info(lpropref, false)?;

    if ptr_info.table_type == types::TableType::ObjectType || lpropref.shortname == "target" {
        // A singleton link property stored in the source rel, e.g.
        // @target.
        let val = pathctx::get_rvar_path_var(
            cx,
            src_rvar,
            &ir_source.path_id,
            PathAspect::Value,
        )?;
        let out = match val {
            Expr::ColumnRef(c) => OutputVar::ColumnRef(c),
            Expr::TupleVar(t) => OutputVar::TupleVar(t),
            other => {
                return Err(Error::new_internal(format!(
                    "unexpected link property value var: {other:?}"
                )))
            }
        };
        pathctx::put_rvar_path_output(cx, src_rvar, &ir_set.path_id, PathAspect::Value, out);
        return Ok(SetRVars {
            main: SetRVar {
                rvar: src_rvar,
                path_id: ir_set.path_id.clone(),
                aspects: vec![PathAspect::Value],
            },
            new: vec![],
        });
    }

    let mut rvars = Vec::new();
    let link_path_id = ir_source.path_id.ptr_path();
    let source_scope_stmt = relctx::get_scope_stmt(cx, &ir_source.path_id)
        .unwrap_or_else(|_| cx.rel());

    let link_rvar = match pathctx::maybe_get_path_rvar(
        cx,
        source_scope_stmt,
        &link_path_id,
        PathAspect::Source,
    ) {
        Some(rvar) => rvar,
        None => {
            let source_rptr = ir_source
                .rptr
                .as_ref()
                .ok_or_else(|| Error::new_internal("link property without a link"))?;
            relctx::new_mapped_pointer_rvar(cx, source_rptr, &ir_source.path_id)?
        }
    };

    // The link table also stores the property columns.
    pathctx::put_rvar_path_output(
        cx,
        link_rvar,
        &ir_set.path_id,
        PathAspect::Value,
        OutputVar::ColumnRef(ColumnRef {
            name: vec![ptr_info.column_name.clone()],
            nullable: !lpropref.required,
            optional: false,
            ser_safe: false,
        }),
    );

    rvars.push(SetRVar {
        rvar: link_rvar,
        path_id: link_path_id,
        aspects: vec![PathAspect::Value, PathAspect::Source],
    });

    Ok(SetRVars {
        main: SetRVar {
            rvar: link_rvar,
            path_id: ir_set.path_id.clone(),
            aspects: vec![PathAspect::Value],
        },
        new: rvars,
    })
}

// ---- subqueries --------------------------------------------------------

fn process_set_as_subquery(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let expr = ir_set.expr.as_deref().expect("subquery set has an expr");

    if let Some(rptr) = &ir_set.rptr {
        // A computable pointer; make sure the source range is available
        // when it is visible in the outer scope.
        let source_is_visible = cx.is_visible(&rptr.source.path_id);
        if source_is_visible || ir_set.path_id.is_scalar_path() {
            get_set_rvar(cx, &rptr.source)?;
        }
    }

    let inner_result = match expr {
        ir::SetExpr::Select(s) => Some(&s.result),
        ir::SetExpr::Group(g) => Some(&g.result),
        _ => None,
    };

    if let Some(inner) = inner_result {
        if inner.path_id != ir_set.path_id {
            cx.store
                .rel_mut(stmt)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), inner.path_id.clone());
        }
    }

    cx.newscope(|cx| -> Result<()> {
        if let Some(rptr) = &ir_set.rptr {
            if ir_set.path_id.is_scalar_path() && cx.frame().volatility_refs.is_empty() {
                // A computable pointer: volatile functions in the pointer
                // expression must be called the necessary number of
                // times, correlated with the identity of the pointer
                // source.
                cx.frame_mut()
                    .volatility_refs
                    .push(super::context::VolatilityRef::Path(
                        rptr.source.path_id.clone(),
                    ));
            }
        }

        match expr {
            ir::SetExpr::Select(s) => stmtcomp::compile_select_stmt(cx, ir_set, s),
            ir::SetExpr::Group(g) => group::compile_group_stmt(cx, ir_set, g),
            ir::SetExpr::Insert(i) => dml::compile_insert_stmt(cx, ir_set, i),
            ir::SetExpr::Update(u) => dml::compile_update_stmt(cx, ir_set, u),
            ir::SetExpr::Delete(d) => dml::compile_delete_stmt(cx, ir_set, d),
            _ => Err(Error::new_internal("not a subquery set")),
        }
    })?;

    let sub_rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(
        ir_set,
        sub_rvar,
        &[PathAspect::Value, PathAspect::Source],
    ))
}

// ---- set operators -----------------------------------------------------

fn process_set_as_membership_expr(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (negated, needle, haystack) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Membership {
            negated,
            needle,
            haystack,
        }) => (*negated, needle, haystack),
        _ => unreachable!("checked by dispatch"),
    };

    let left_expr = cx.newscope(|cx| {
        cx.frame_mut().expr_exposed = false;
        dispatch::compile_set(cx, needle)
    })?;

    // An array operand is rewritten to ANY/ALL over the array directly,
    // which has a higher chance of using the indexes.
    if haystack.typeref.is_array() {
        let right_expr = cx.newscope(|cx| {
            cx.frame_mut().expr_exposed = false;
            dispatch::compile_set(cx, haystack)
        })?;
        let (op, func) = if negated {
            ("!=", "all")
        } else {
            ("=", "any")
        };
        let set_expr = astutils::new_binop(
            left_expr,
            Expr::FuncCall(Box::new(FuncCall::new_null_safe(&[func], vec![right_expr]))),
            op,
        );
        pathctx::put_path_var_if_not_exists(
            cx,
            stmt,
            &ir_set.path_id,
            set_expr,
            PathAspect::Value,
        );
        let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
        return Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]));
    }

    let right_rel = cx.subrel(|cx| -> Result<RelId> {
        cx.newscope(|cx| {
            cx.frame_mut().expr_exposed = false;
            dispatch::compile_set(cx, haystack)?;
            let rel = cx.rel();
            pathctx::get_path_value_output(cx, rel, &haystack.path_id)?;
            Ok(rel)
        })
    })?;

    let (op, sublink) = if negated {
        ("!=", SubLinkOp::All)
    } else {
        ("=", SubLinkOp::Any)
    };

    let set_expr = Expr::SubLink {
        op: sublink,
        test_expr: Some(Box::new(left_expr)),
        operator: Some(op.to_string()),
        rel: right_rel,
    };

    pathctx::put_path_var_if_not_exists(
        cx,
        stmt,
        &ir_set.path_id,
        set_expr,
        PathAspect::Value,
    );

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_setop(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (left, right) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Union { larg, rarg }) => (larg, rarg),
        _ => unreachable!("checked by dispatch"),
    };

    let larg = cx.subrel(|cx| {
        cx.newscope(|cx| -> Result<RelId> {
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), left.path_id.clone());
            dispatch::visit_set(cx, left)?;
            Ok(rel)
        })
    })?;

    let rarg = cx.subrel(|cx| {
        cx.newscope(|cx| -> Result<RelId> {
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), right.path_id.clone());
            dispatch::visit_set(cx, right)?;
            Ok(rel)
        })
    })?;

    cx.subrel(|cx| -> Result<()> {
        let subqry = cx.rel();
        {
            let sel = cx.store.rel_mut(subqry).select_mut().expect("fresh select");
            sel.op = Some(SetOp::Union);
            sel.all = true;
            sel.larg = Some(larg);
            sel.rarg = Some(rarg);
        }
        let union_rvar = relctx::rvar_for_rel(cx, subqry, true, "u");
        relctx::include_rvar(cx, stmt, union_rvar, &ir_set.path_id)
    })?;

    let rvar = relctx::rvar_for_rel(cx, stmt, true, &ir_set.path_id.alias_hint());
    Ok(new_source_set_rvar(ir_set, rvar))
}

fn process_set_as_distinct(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let arg = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Distinct(arg)) => arg,
        _ => unreachable!("checked by dispatch"),
    };

    let subrvar = cx.subrel(|cx| -> Result<RvarId> {
        let subqry = cx.rel();
        cx.store
            .rel_mut(subqry)
            .view_path_id_map
            .insert(ir_set.path_id.clone(), arg.path_id.clone());
        dispatch::visit_set(cx, arg)?;
        Ok(relctx::rvar_for_rel(cx, subqry, true, "d"))
    })?;

    relctx::include_rvar(cx, stmt, subrvar, &ir_set.path_id)?;

    let value_var =
        pathctx::get_rvar_path_var(cx, subrvar, &ir_set.path_id, PathAspect::Value)?;
    let cols = match value_var {
        Expr::TupleVar(tuple) => tuple.elements.into_iter().map(|el| *el.val).collect(),
        other => vec![other],
    };
    cx.store
        .rel_mut(stmt)
        .select_mut()
        .expect("distinct lowers to a select")
        .distinct_clause = Some(cols);

    let rvar = relctx::rvar_for_rel(cx, stmt, true, &ir_set.path_id.alias_hint());
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_ifelse(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    // A IF Cond ELSE B is transformed into:
    // SELECT A WHERE Cond UNION ALL SELECT B WHERE NOT Cond
    let stmt = cx.rel();
    let (condition, if_expr, else_expr) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::IfElse {
            condition,
            if_true,
            if_false,
        }) => (condition, if_true, if_false),
        _ => unreachable!("checked by dispatch"),
    };

    let condref = cx.newscope(|cx| -> Result<Expr> {
        cx.frame_mut().expr_exposed = false;
        dispatch::visit_set(cx, condition)?;
        pathctx::get_path_value_var(cx, stmt, &condition.path_id)
    })?;

    let branches_singleton = singleton_scalar(if_expr) && singleton_scalar(else_expr);

    if branches_singleton {
        // For singleton scalars on both ends of IF use a CASE WHEN
        // construct; values still need to be encased in subqueries to
        // guard against empty sets.
        let (if_val, else_val) = cx.newscope(|cx| -> Result<(Expr, Expr)> {
            cx.frame_mut().expr_exposed = false;
            let if_val = set_as_subquery(cx, if_expr, true)?;
            let else_val = set_as_subquery(cx, else_expr, true)?;
            Ok((Expr::Subquery(if_val), Expr::Subquery(else_val)))
        })?;

        let set_expr = Expr::CaseExpr {
            arg: None,
            args: vec![CaseWhen {
                expr: condref,
                result: if_val,
            }],
            defresult: Some(Box::new(else_val)),
        };
        pathctx::put_path_var_if_not_exists(
            cx,
            stmt,
            &ir_set.path_id,
            set_expr,
            PathAspect::Value,
        );
    } else {
        let larg = cx.subrel(|cx| {
            cx.newscope(|cx| -> Result<RelId> {
                let rel = cx.rel();
                cx.store
                    .rel_mut(rel)
                    .view_path_id_map
                    .insert(ir_set.path_id.clone(), if_expr.path_id.clone());
                dispatch::visit_set(cx, if_expr)?;
                let rel_data = cx.store.rel_mut(rel);
                rel_data.where_clause = Some(astutils::extend_binop(
                    rel_data.where_clause.take(),
                    condref.clone(),
                    "AND",
                ));
                Ok(rel)
            })
        })?;

        let rarg = cx.subrel(|cx| {
            cx.newscope(|cx| -> Result<RelId> {
                let rel = cx.rel();
                cx.store
                    .rel_mut(rel)
                    .view_path_id_map
                    .insert(ir_set.path_id.clone(), else_expr.path_id.clone());
                dispatch::visit_set(cx, else_expr)?;
                let rel_data = cx.store.rel_mut(rel);
                rel_data.where_clause = Some(astutils::extend_binop(
                    rel_data.where_clause.take(),
                    astutils::new_unop("NOT", condref.clone()),
                    "AND",
                ));
                Ok(rel)
            })
        })?;

        cx.subrel(|cx| -> Result<()> {
            let subqry = cx.rel();
            {
                let sel = cx.store.rel_mut(subqry).select_mut().expect("fresh select");
                sel.op = Some(SetOp::Union);
                sel.all = true;
                sel.larg = Some(larg);
                sel.rarg = Some(rarg);
            }
            let union_rvar = relctx::rvar_for_rel(cx, subqry, true, "u");
            relctx::include_rvar(cx, stmt, union_rvar, &ir_set.path_id)
        })?;
    }

    let rvar = relctx::rvar_for_rel(cx, stmt, true, &ir_set.path_id.alias_hint());
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn singleton_scalar(ir_set: &ir::Set) -> bool {
    ir_set.typeref.is_scalar()
        && !matches!(
            ir_set.expr.as_deref(),
            Some(ir::SetExpr::Select(_))
                | Some(ir::SetExpr::Union { .. })
                | Some(ir::SetExpr::ConstantSet(_))
        )
}

fn process_set_as_coalesce(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (left_ir, right_ir) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Coalesce { larg, rarg }) => (larg, rarg),
        _ => unreachable!("checked by dispatch"),
    };

    if singleton_scalar(right_ir) {
        // Singleton RHS, simply use scalar COALESCE.
        let set_expr = cx.newscope(|cx| -> Result<Expr> {
            cx.frame_mut().expr_exposed = false;
            let left = dispatch::compile_set(cx, left_ir)?;
            let right = cx.newscope(|cx| {
                cx.frame_mut()
                    .force_optional
                    .insert(right_ir.path_id.clone());
                dispatch::compile_set(cx, right_ir)
            })?;
            Ok(Expr::CoalesceExpr {
                args: vec![left, right],
            })
        })?;
        pathctx::put_path_var_if_not_exists(
            cx,
            stmt,
            &ir_set.path_id,
            set_expr,
            PathAspect::Value,
        );
    } else {
        // A non-singleton RHS cannot use a scalar COALESCE over a JOIN,
        // as that would blow up the result cardinality; use the
        // UNION-with-marker arrangement instead.
        let larg = cx.subrel(|cx| -> Result<RelId> {
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), left_ir.path_id.clone());
            dispatch::visit_set(cx, left_ir)?;
            let lvar = pathctx::get_path_value_var(cx, rel, &left_ir.path_id)?;
            if cx.store.is_nullable(&lvar) {
                let rel_data = cx.store.rel_mut(rel);
                rel_data.where_clause = Some(astutils::extend_binop(
                    rel_data.where_clause.take(),
                    Expr::NullTest {
                        arg: Box::new(lvar),
                        negated: true,
                    },
                    "AND",
                ));
            }
            Ok(rel)
        })?;

        let rarg = cx.subrel(|cx| -> Result<RelId> {
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), right_ir.path_id.clone());
            dispatch::visit_set(cx, right_ir)?;
            Ok(rel)
        })?;

        let marker = cx.env.aliases.get("m");
        cx.store.rel_mut(larg).target_list.insert(
            0,
            ResTarget::new(
                Some(marker.clone()),
                Expr::NumericConstant { val: "1".into() },
            ),
        );
        cx.store.rel_mut(rarg).target_list.insert(
            0,
            ResTarget::new(
                Some(marker.clone()),
                Expr::NumericConstant { val: "2".into() },
            ),
        );

        let subqry = cx.subrel(|cx| -> Result<RelId> {
            let unionqry = cx.subrel(|cx| -> Result<RelId> {
                let unionqry = cx.rel();
                let sel = cx
                    .store
                    .rel_mut(unionqry)
                    .select_mut()
                    .expect("fresh select");
                sel.op = Some(SetOp::Union);
                sel.all = true;
                sel.larg = Some(larg);
                sel.rarg = Some(rarg);
                Ok(unionqry)
            })?;

            let subqry = cx.rel();
            let union_rvar = relctx::rvar_for_rel(cx, unionqry, true, "u");
            relctx::include_rvar(cx, subqry, union_rvar, &ir_set.path_id)?;

            let lagged_marker = {
                let mut call = FuncCall::new_null_safe(
                    &["first_value"],
                    vec![Expr::ColumnRef(ColumnRef::new(vec![marker.clone()]))],
                );
                call.over = Some(WindowDef {
                    partition_clause: vec![],
                    order_clause: vec![],
                });
                Expr::FuncCall(Box::new(call))
            };
            let marker_ok = astutils::new_binop(
                Expr::ColumnRef(ColumnRef::new(vec![marker.clone()])),
                lagged_marker,
                "=",
            );
            cx.store
                .rel_mut(subqry)
                .target_list
                .push(ResTarget::new(Some(marker.clone()), marker_ok));
            Ok(subqry)
        })?;

        let subrvar = relctx::rvar_for_rel(cx, subqry, true, "q");
        relctx::include_rvar(cx, stmt, subrvar, &ir_set.path_id)?;

        let sub_alias = cx.store.rvar(subrvar).alias.aliasname.clone();
        let rel = cx.store.rel_mut(stmt);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            Expr::ColumnRef(ColumnRef::new(vec![sub_alias, marker])),
            "AND",
        ));
    }

    let rvar = relctx::rvar_for_rel(cx, stmt, true, &ir_set.path_id.alias_hint());
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

// ---- tuples ------------------------------------------------------------

fn process_set_as_tuple(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (named, elements) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Tuple { named, elements }) => (*named, elements),
        _ => unreachable!("checked by dispatch"),
    };

    let mut tuple_elements = Vec::new();
    cx.newscope(|cx| -> Result<()> {
        for (i, element) in elements.iter().enumerate() {
            let el_name = element
                .name
                .clone()
                .unwrap_or_else(|| i.to_string());
            let path_id = ir_set
                .path_id
                .tuple_element(&el_name, element.val.typeref.clone());
            if path_id != element.val.path_id {
                cx.store
                    .rel_mut(stmt)
                    .view_path_id_map
                    .insert(path_id.clone(), element.val.path_id.clone());
            }

            dispatch::visit_set(cx, &element.val)?;
            let val = pathctx::get_path_value_var(cx, stmt, &element.val.path_id)?;
            tuple_elements.push(TupleElement {
                path_id: path_id.clone(),
                name: element.name.clone(),
                val: Box::new(val),
            });

            // Remember per-element serialized vars for shape reuse.
            if let Some(var) =
                pathctx::maybe_get_path_serialized_var(cx, stmt, &element.val.path_id)?
            {
                pathctx::put_path_var_if_not_exists(
                    cx,
                    stmt,
                    &path_id,
                    var,
                    PathAspect::Serialized,
                );
            }
        }
        Ok(())
    })?;

    let set_expr = Expr::TupleVar(TupleVar {
        elements: tuple_elements,
        named,
        nullable: false,
    });

    relctx::ensure_bond_for_expr(cx, ir_set, stmt)?;
    pathctx::put_path_value_var(cx, stmt, &ir_set.path_id, set_expr, false)?;

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(
        ir_set,
        rvar,
        &[PathAspect::Value, PathAspect::Source],
    ))
}

fn process_set_as_tuple_indirection(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (tuple_set, name) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::TupleIndirection { expr, name }) => (expr, name),
        _ => unreachable!("checked by dispatch"),
    };

    let rvar = cx.newscope(|cx| -> Result<RvarId> {
        cx.frame_mut().expr_exposed = false;
        let mut rvar = get_set_rvar(cx, tuple_set)?;

        if !ir_set.path_id.starts_with(&tuple_set.path_id) {
            // The indirection is fenced; wrap the reference in a subquery
            // so the path id remapping applies.
            cx.store
                .rel_mut(stmt)
                .view_path_id_map
                .insert(ir_set.path_id.clone(), tuple_set.path_id.clone());
            rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
        }

        let source_rvar = pathctx::maybe_get_path_rvar(
            cx,
            stmt,
            &tuple_set.path_id,
            PathAspect::Source,
        );

        if source_rvar.is_none() {
            // Indirection over an opaque tuple, e.g. `[(1,)][0].0`; use
            // an explicit row attribute dereference.
            let tuple_val = pathctx::get_path_value_var(cx, stmt, &tuple_set.path_id)?;
            let set_expr = astutils::tuple_getattr_by_num(
                tuple_val,
                &tuple_set.typeref,
                name,
                &ir_set.typeref,
            )?;
            pathctx::put_path_var_if_not_exists(
                cx,
                stmt,
                &ir_set.path_id,
                set_expr,
                PathAspect::Value,
            );
            rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
        }

        Ok(rvar)
    })?;

    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

// ---- casts and introspection -------------------------------------------

fn process_set_as_type_cast(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let (inner_set, to) = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::TypeCast { expr, to, .. }) => (expr, to),
        _ => unreachable!("checked by dispatch"),
    };

    let is_json_cast = to.id == ir::wellknown::STD_JSON;
    let implicit_cast = is_json_cast
        && (inner_set.typeref.is_collection() || inner_set.typeref.is_object());

    let set_expr = if implicit_cast {
        // In JSON-serialisation contexts for collection and object inner
        // sets, switch the output format and reuse the serialized var.
        let orig_format = cx.env.output_format;
        cx.env.output_format = super::context::OutputFormat::Jsonb;
        let result = cx.newscope(|cx| -> Result<Expr> {
            cx.frame_mut().expr_exposed = true;
            let set_expr = dispatch::compile_set(cx, inner_set)?;

            if let Some(serialized) =
                pathctx::maybe_get_path_serialized_var(cx, stmt, &inner_set.path_id)?
            {
                let serialized = if inner_set.typeref.is_collection() {
                    output::serialize_expr_to_json(cx, serialized, &inner_set.path_id)?
                } else {
                    serialized
                };
                pathctx::put_path_value_var(
                    cx,
                    stmt,
                    &inner_set.path_id,
                    serialized.clone(),
                    true,
                )?;
                pathctx::put_path_serialized_var(
                    cx,
                    stmt,
                    &inner_set.path_id,
                    serialized,
                    true,
                )?;
            }
            Ok(set_expr)
        });
        cx.env.output_format = orig_format;
        cx.store
            .rel_mut(stmt)
            .view_path_id_map
            .insert(ir_set.path_id.clone(), inner_set.path_id.clone());
        result?
    } else {
        let expr = ir_set.expr.as_deref().expect("cast set has an expr");
        dispatch::compile_expr(cx, ir_set, expr)?
    };

    pathctx::put_path_var_if_not_exists(
        cx,
        stmt,
        &ir_set.path_id,
        set_expr,
        PathAspect::Value,
    );

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_type_introspection(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
) -> Result<SetRVars> {
    let of_typeref = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::TypeIntrospection { of }) => of.clone(),
        _ => unreachable!("checked by dispatch"),
    };

    // Range over the schema type table filtered by id.
    let substmt = cx.store.new_select();
    let type_rvar =
        relctx::range_for_material_objtype(cx, &ir_set.typeref, &ir_set.path_id, false)?;
    pathctx::put_rvar_path_bond(cx, type_rvar, &ir_set.path_id);
    relctx::include_rvar(cx, substmt, type_rvar, &ir_set.path_id)?;

    let nameref = pathctx::get_rvar_path_identity_var(cx, type_rvar, &ir_set.path_id)?;
    let clsname = Expr::TypeCast {
        arg: Box::new(Expr::StringConstant {
            val: of_typeref.id.to_string(),
        }),
        type_name: TypeName::unqualified("uuid"),
    };
    let condition = astutils::new_binop(nameref, clsname, "=");
    {
        let rel = cx.store.rel_mut(substmt);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            condition,
            "AND",
        ));
    }

    let set_rvar = relctx::new_rel_rvar(cx, ir_set, substmt);
    Ok(new_simple_set_rvar(
        ir_set,
        set_rvar,
        &[PathAspect::Value, PathAspect::Source],
    ))
}

fn process_set_as_const_set(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let values = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::ConstantSet(values)) => values,
        _ => unreachable!("checked by dispatch"),
    };

    let vals_rel = cx.subrel(|cx| -> Result<RelId> {
        let rel = cx.rel();
        let rows = values
            .iter()
            .map(|v| Expr::ImplicitRowExpr {
                args: vec![super::expr::const_type_cast(
                    super::expr::const_value_expr(v),
                    &ir_set.typeref,
                )],
            })
            .collect_vec();
        {
            let sel = cx.store.rel_mut(rel).select_mut().expect("fresh select");
            sel.values = rows;
        }
        Ok(rel)
    })?;

    let vals_rvar = {
        let alias_name = cx.env.aliases.get(&ir_set.path_id.alias_hint());
        let mut alias = Alias::new(alias_name);
        alias.colnames = vec!["v".to_string()];
        cx.store.add_rvar(Rvar::new(
            RvarKind::Subselect {
                lateral: true,
                rel: vals_rel,
            },
            alias,
        ))
    };
    cx.store.rvar_mut(vals_rvar).path_outputs.insert(
        (ir_set.path_id.clone(), PathAspect::Value),
        OutputVar::ColumnRef(ColumnRef::new(vec!["v".to_string()])),
    );
    relctx::include_rvar(cx, stmt, vals_rvar, &ir_set.path_id)?;

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

// ---- generic expressions -----------------------------------------------

fn process_set_as_expr(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let set_expr = cx.newscope(|cx| {
        cx.frame_mut().expr_exposed = false;
        let expr = ir_set.expr.as_deref().expect("expression set");
        dispatch::compile_expr(cx, ir_set, expr)
    })?;

    pathctx::put_path_var_if_not_exists(
        cx,
        stmt,
        &ir_set.path_id,
        set_expr,
        PathAspect::Value,
    );

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_exists_expr(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let ir_expr = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Exists(inner)) => inner,
        _ => unreachable!("checked by dispatch"),
    };

    let wrapper = cx.subrel(|cx| -> Result<RelId> {
        let wrapper = cx.rel();
        cx.frame_mut().expr_exposed = false;
        let set_ref = dispatch::compile_set(cx, ir_expr)?;

        pathctx::put_path_value_var(cx, wrapper, &ir_set.path_id, set_ref.clone(), false)?;
        pathctx::get_path_value_output(cx, wrapper, &ir_set.path_id)?;

        let rel = cx.store.rel_mut(wrapper);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            Expr::NullTest {
                arg: Box::new(set_ref),
                negated: true,
            },
            "AND",
        ));
        Ok(wrapper)
    })?;

    let set_expr = Expr::SubLink {
        op: SubLinkOp::Exists,
        test_expr: None,
        operator: None,
        rel: wrapper,
    };

    pathctx::put_path_value_var(cx, stmt, &ir_set.path_id, set_expr, false)?;
    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_array_expr(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<SetRVars> {
    let stmt = cx.rel();
    let ir_elements = match ir_set.expr.as_deref() {
        Some(ir::SetExpr::Array(elements)) => elements,
        _ => unreachable!("checked by dispatch"),
    };

    let serializing = output::in_serialization_ctx(cx);
    let mut elements = Vec::new();
    let mut s_elements = Vec::new();

    for ir_element in ir_elements {
        let element = dispatch::compile_set(cx, ir_element)?;
        elements.push(element);

        if serializing {
            let s_var =
                match pathctx::maybe_get_path_serialized_var(cx, stmt, &ir_element.path_id)? {
                    Some(Expr::TupleVar(tuple)) => {
                        output::serialize_expr(cx, Expr::TupleVar(tuple), &ir_element.path_id)?
                    }
                    Some(s_var) => s_var,
                    None => {
                        let v_var =
                            pathctx::get_path_value_var(cx, stmt, &ir_element.path_id)?;
                        output::serialize_expr(cx, v_var, &ir_element.path_id)?
                    }
                };
            s_elements.push(s_var);
        }
    }

    let set_expr = if elements.is_empty() {
        Expr::TypeCast {
            arg: Box::new(Expr::ArrayExpr { elements: vec![] }),
            type_name: TypeName::new(types::pg_type_from_ir_typeref(
                &ir_set.typeref,
                false,
                false,
            )),
        }
    } else {
        astutils::safe_array_expr(elements)
    };

    pathctx::put_path_var_if_not_exists(
        cx,
        stmt,
        &ir_set.path_id,
        set_expr,
        PathAspect::Value,
    );

    if serializing {
        let s_set_expr = if s_elements.is_empty() {
            Expr::TypeCast {
                arg: Box::new(Expr::ArrayExpr { elements: vec![] }),
                type_name: TypeName::new(types::pg_type_from_ir_typeref(
                    &ir_set.typeref,
                    false,
                    false,
                )),
            }
        } else {
            astutils::safe_array_expr(s_elements)
        };
        pathctx::put_path_serialized_var(cx, stmt, &ir_set.path_id, s_set_expr, false)?;
    }

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

// ---- functions and aggregates ------------------------------------------

/// Compile `ir_set` into a subquery:
///
///     (SELECT <set_rel>.v FROM <set_rel>)
pub fn set_as_subquery(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    as_value: bool,
) -> Result<RelId> {
    cx.subrel(|cx| -> Result<RelId> {
        let wrapper = cx.rel();
        dispatch::visit_set(cx, ir_set)?;

        if as_value {
            if output::in_serialization_ctx(cx) {
                pathctx::get_path_serialized_output(cx, wrapper, &ir_set.path_id)?;
            } else {
                pathctx::get_path_value_output(cx, wrapper, &ir_set.path_id)?;
                let var = pathctx::get_path_value_var(cx, wrapper, &ir_set.path_id)?;
                let value = output::output_as_value(var);
                cx.store.rel_mut(wrapper).target_list = vec![ResTarget::new(None, value)];
            }
        } else {
            pathctx::get_path_value_output(cx, wrapper, &ir_set.path_id)?;
        }
        Ok(wrapper)
    })
}

/// Collapse a set into an array.
pub fn set_to_array(cx: &mut CompilerState, ir_set: &ir::Set, query: RelId) -> Result<RelId> {
    let subrvar = relctx::rvar_for_rel(cx, query, false, "aggw");

    let result = cx.store.new_select();
    relctx::include_rvar(cx, result, subrvar, &ir_set.path_id)?;

    let val = match pathctx::maybe_get_path_serialized_var(cx, result, &ir_set.path_id)? {
        Some(val) => val,
        None => {
            let value_var = pathctx::get_path_value_var(cx, result, &ir_set.path_id)?;
            let val = output::serialize_expr(cx, value_var, &ir_set.path_id)?;
            pathctx::put_path_serialized_var(cx, result, &ir_set.path_id, val.clone(), true)?;
            val
        }
    };

    let orig_val = val.clone();
    let mut pg_type = types::pg_type_from_ir_typeref(&ir_set.typeref, false, false);
    let mut val = val;

    if ir_set.path_id.is_array_path()
        && cx.env.output_format == super::context::OutputFormat::Native
    {
        // Arrays of different lengths cannot be aggregated directly, so
        // each element is encased into a record.
        val = Expr::RowExpr { args: vec![val] };
        pg_type = vec!["record".to_string()];
    }

    let mut array_agg = FuncCall::new_null_safe(&["array_agg"], vec![val]);
    if cx.store.is_nullable(&orig_val) {
        array_agg.agg_filter = Some(Box::new(Expr::OpExpr {
            name: "IS DISTINCT FROM".to_string(),
            lexpr: Some(Box::new(orig_val)),
            rexpr: Some(Box::new(Expr::NullConstant)),
        }));
    }

    if let Some(last) = pg_type.last_mut() {
        last.push_str("[]");
    }
    let agg_expr = Expr::CoalesceExpr {
        args: vec![
            Expr::FuncCall(Box::new(array_agg)),
            Expr::TypeCast {
                arg: Box::new(Expr::ArrayExpr { elements: vec![] }),
                type_name: TypeName::new(pg_type),
            },
        ],
    };

    cx.store.rel_mut(result).target_list = vec![ResTarget {
        name: None,
        val: agg_expr,
        ser_safe: true,
    }];

    Ok(result)
}

fn process_set_as_enumerate(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    call: &ir::Call,
) -> Result<SetRVars> {
    let stmt = cx.rel();
    let ir_arg = &call
        .args
        .first()
        .ok_or_else(|| Error::new_internal("enumerate without an argument"))?
        .expr;

    let inner_is_srf = matches!(
        ir_arg.expr.as_deref(),
        Some(ir::SetExpr::FunctionCall(inner)) if inner.is_set_returning()
    );

    let (num_path, val_path) = enumerate_tuple_paths(ir_set);

    let newrel = cx.subrel(|cx| -> Result<RelId> {
        cx.frame_mut().expr_exposed = false;
        let rel = cx.rel();

        let (num_expr, arg_val) = if inner_is_srf {
            // Enumeration of a set-returning function uses WITH
            // ORDINALITY so the ordinal reflects the function's own
            // output order.
            let inner_call = match ir_arg.expr.as_deref() {
                Some(ir::SetExpr::FunctionCall(inner)) => inner,
                _ => unreachable!("checked above"),
            };
            let mut args = Vec::new();
            for arg in &inner_call.args {
                args.push(dispatch::compile_set(cx, &arg.expr)?);
            }
            let name_owned: Vec<String> = match &inner_call.sql_function {
                Some(f) => f.split('.').map(|s| s.to_string()).collect(),
                None => super::expr::get_func_call_backend_name(cx, inner_call),
            };
            let name: Vec<&str> = name_owned.iter().map(|s| s.as_str()).collect();
            let func = FuncCall::new(&name, args);

            let colname = cx.env.aliases.get("v");
            let ord = cx.env.aliases.get("i");
            let mut alias = Alias::new(cx.env.aliases.get("f"));
            alias.colnames = vec![colname.clone(), ord.clone()];
            let func_rvar = cx.store.add_rvar(Rvar::new(
                RvarKind::Function {
                    lateral: true,
                    with_ordinality: true,
                    is_rowsfrom: true,
                    functions: vec![func],
                },
                alias,
            ));
            let func_alias = cx.store.rvar(func_rvar).alias.aliasname.clone();
            {
                let sel = cx.store.rel_mut(rel).select_mut().expect("fresh select");
                sel.from_clause.push(func_rvar);
            }
            let num = Expr::OpExpr {
                name: "-".to_string(),
                lexpr: Some(Box::new(Expr::ColumnRef(ColumnRef::new(vec![
                    func_alias.clone(),
                    ord,
                ])))),
                rexpr: Some(Box::new(Expr::NumericConstant { val: "1".into() })),
            };
            let val = Expr::ColumnRef(ColumnRef::new(vec![func_alias, colname]));
            (num, val)
        } else {
            let arg_ref = dispatch::compile_set(cx, ir_arg)?;
            let arg_val = output::output_as_value(arg_ref);
            let num = {
                let mut call = FuncCall::new_null_safe(&["row_number"], vec![]);
                call.over = Some(WindowDef {
                    partition_clause: vec![],
                    order_clause: vec![],
                });
                Expr::OpExpr {
                    name: "-".to_string(),
                    lexpr: Some(Box::new(Expr::FuncCall(Box::new(call)))),
                    rexpr: Some(Box::new(Expr::NumericConstant { val: "1".into() })),
                }
            };
            (num, arg_val)
        };

        let set_expr = Expr::TupleVar(TupleVar {
            elements: vec![
                TupleElement {
                    path_id: num_path.clone(),
                    name: Some("0".to_string()),
                    val: Box::new(num_expr),
                },
                TupleElement {
                    path_id: val_path.clone(),
                    name: Some("1".to_string()),
                    val: Box::new(arg_val),
                },
            ],
            named: false,
            nullable: false,
        });

        if let Expr::TupleVar(tuple) = &set_expr {
            for element in &tuple.elements {
                pathctx::put_path_value_var(
                    cx,
                    rel,
                    &element.path_id.clone(),
                    (*element.val).clone(),
                    false,
                )?;
            }
        }

        pathctx::put_path_var_if_not_exists(
            cx,
            rel,
            &ir_set.path_id,
            set_expr,
            PathAspect::Value,
        );
        Ok(rel)
    })?;

    let func_rvar = relctx::new_rel_rvar(cx, ir_set, newrel);
    relctx::include_specific_rvar(
        cx,
        stmt,
        func_rvar,
        &ir_set.path_id,
        &[PathAspect::Value],
    )?;

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn enumerate_tuple_paths(ir_set: &ir::Set) -> (PathId, PathId) {
    let (num_type, val_type) = match &ir_set.typeref.kind {
        ir::TypeRefKind::Tuple { elements, .. } if elements.len() == 2 => (
            elements[0].typeref.clone(),
            elements[1].typeref.clone(),
        ),
        _ => (ir_set.typeref.clone(), ir_set.typeref.clone()),
    };
    (
        ir_set.path_id.tuple_element("0", num_type),
        ir_set.path_id.tuple_element("1", val_type),
    )
}

fn process_set_as_set_func_expr(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    call: &ir::Call,
) -> Result<SetRVars> {
    let stmt = cx.rel();

    let newrel = cx.subrel(|cx| -> Result<RelId> {
        cx.frame_mut().expr_exposed = false;
        let rel = cx.rel();

        let mut args = Vec::new();
        for arg in &call.args {
            args.push(dispatch::compile_set(cx, &arg.expr)?);
        }

        let name_owned: Vec<String> = match &call.sql_function {
            Some(f) => f.split('.').map(|s| s.to_string()).collect(),
            None => super::expr::get_func_call_backend_name(cx, call),
        };
        let name: Vec<&str> = name_owned.iter().map(|s| s.as_str()).collect();
        let mut func = FuncCall::new(&name, args);

        // Functions returning tuples need a column definition list.
        let colname = cx.env.aliases.get("v");
        let mut colnames = vec![colname.clone()];
        if let ir::TypeRefKind::Tuple { elements, .. } = &ir_set.typeref.kind {
            colnames = Vec::new();
            for (i, el) in elements.iter().enumerate() {
                let elname = if el.name.is_empty() {
                    i.to_string()
                } else {
                    el.name.clone()
                };
                func.coldeflist.push(ColumnDef {
                    name: elname.clone(),
                    typename: TypeName::new(types::pg_type_from_ir_typeref(
                        &el.typeref,
                        false,
                        true,
                    )),
                });
                colnames.push(elname);
            }
        }

        let mut alias = Alias::new(cx.env.aliases.get("f"));
        alias.colnames = colnames.clone();
        let func_rvar = cx.store.add_rvar(Rvar::new(
            RvarKind::Function {
                lateral: true,
                with_ordinality: false,
                is_rowsfrom: false,
                functions: vec![func],
            },
            alias,
        ));
        let func_alias = cx.store.rvar(func_rvar).alias.aliasname.clone();
        {
            let sel = cx.store.rel_mut(rel).select_mut().expect("fresh select");
            sel.from_clause.push(func_rvar);
        }

        if call.is_volatile() {
            // A volatile set-returning call must stay correlated with a
            // stable identity so it is not called more times than the
            // logical multiplicity demands.
            relctx::apply_volatility_ref(cx, rel)?;
        }

        let set_expr = if colnames.len() == 1 {
            Expr::ColumnRef(ColumnRef::new(vec![func_alias, colnames[0].clone()]))
        } else {
            let elements = colnames
                .iter()
                .map(|n| TupleElement {
                    path_id: ir_set.path_id.tuple_element(n, ir_set.typeref.clone()),
                    name: Some(n.clone()),
                    val: Box::new(Expr::ColumnRef(ColumnRef::new(vec![
                        func_alias.clone(),
                        n.clone(),
                    ]))),
                })
                .collect();
            Expr::TupleVar(TupleVar {
                elements,
                named: true,
                nullable: false,
            })
        };

        pathctx::put_path_var_if_not_exists(
            cx,
            rel,
            &ir_set.path_id,
            set_expr,
            PathAspect::Value,
        );
        Ok(rel)
    })?;

    let func_rvar = relctx::new_rel_rvar(cx, ir_set, newrel);
    relctx::include_specific_rvar(
        cx,
        stmt,
        func_rvar,
        &ir_set.path_id,
        &[PathAspect::Value],
    )?;

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}

fn process_set_as_agg_expr(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    call: &ir::Call,
) -> Result<SetRVars> {
    let mut stmt = cx.rel();

    let set_expr = cx.newscope(|cx| -> Result<Expr> {
        let mut agg_sort = Vec::new();

        // Polymorphic aggregates (e.g. array_agg) operate on the
        // serialized form of the input when exposed.
        let serialization_safe =
            output::in_serialization_ctx(cx) && call.name == "std::array_agg";

        let mut args = Vec::new();
        for (i, ir_call_arg) in call.args.iter().enumerate() {
            let ir_arg = &ir_call_arg.expr;

            let arg_ref = cx.newscope(|cx| -> Result<Expr> {
                if !serialization_safe {
                    cx.frame_mut().expr_exposed = false;
                }
                dispatch::visit_set(cx, ir_arg)?;

                let arg_ref = if serialization_safe {
                    let var =
                        pathctx::get_path_serialized_or_value_var(cx, stmt, &ir_arg.path_id)?;
                    match var {
                        Expr::TupleVar(tuple) => {
                            output::serialize_expr(cx, Expr::TupleVar(tuple), &ir_arg.path_id)?
                        }
                        other => other,
                    }
                } else {
                    let var = pathctx::get_path_value_var(cx, stmt, &ir_arg.path_id)?;
                    output::output_as_value(var)
                };
                Ok(arg_ref)
            })?;

            let mut arg_ref = arg_ref;

            // An argument visible above us means we are aggregating a
            // singleton set, potentially on the same query level as the
            // source set. Postgres doesn't like aggregates on the same
            // query level, so wrap the arg ref into a VALUES range.
            let arg_is_visible = cx.is_visible(&ir_arg.path_id);
            if arg_is_visible {
                let wrapper = cx.store.new_select();
                {
                    let sel = cx
                        .store
                        .rel_mut(wrapper)
                        .select_mut()
                        .expect("fresh select");
                    sel.values = vec![Expr::ImplicitRowExpr {
                        args: vec![arg_ref.clone()],
                    }];
                }
                let colname = cx.env.aliases.get("a");
                let mut alias = Alias::new(cx.env.aliases.get("w"));
                alias.colnames = vec![colname.clone()];
                let wrapper_rvar = cx.store.add_rvar(Rvar::new(
                    RvarKind::Subselect {
                        lateral: true,
                        rel: wrapper,
                    },
                    alias,
                ));
                cx.store.rvar_mut(wrapper_rvar).path_outputs.insert(
                    (ir_arg.path_id.clone(), PathAspect::Value),
                    OutputVar::ColumnRef(ColumnRef::new(vec![colname.clone()])),
                );
                relctx::include_rvar(cx, stmt, wrapper_rvar, &ir_arg.path_id)?;
                let wrapper_alias = cx.store.rvar(wrapper_rvar).alias.aliasname.clone();
                arg_ref = Expr::ColumnRef(ColumnRef::new(vec![wrapper_alias, colname]));
            }

            // If the first argument of the aggregate is a SELECT with an
            // ORDER BY clause, move the ordering conditions into the
            // aggregate call.
            if i == 0 {
                if let Some(ir::SetExpr::Select(substmt)) = ir_arg.expr.as_deref() {
                    if !substmt.orderby.is_empty() {
                        if let Some(qrvar) = pathctx::maybe_get_path_rvar(
                            cx,
                            stmt,
                            &ir_arg.path_id,
                            PathAspect::Value,
                        ) {
                            if let Some(query) = cx.store.rvar_rel(qrvar) {
                                let sort_clause = cx
                                    .store
                                    .rel(query)
                                    .select()
                                    .map(|s| s.sort_clause.clone())
                                    .unwrap_or_default();
                                let qalias =
                                    cx.store.rvar(qrvar).alias.aliasname.clone();
                                for (si, sortref) in sort_clause.iter().enumerate() {
                                    let alias = cx.env.aliases.get(&format!("s{si}"));
                                    cx.store.rel_mut(query).target_list.push(
                                        ResTarget::new(
                                            Some(alias.clone()),
                                            sortref.node.clone(),
                                        ),
                                    );
                                    agg_sort.push(crate::pgast::SortBy {
                                        node: Expr::ColumnRef(ColumnRef::new(vec![
                                            qalias.clone(),
                                            alias,
                                        ])),
                                        dir: sortref.dir,
                                        nulls: sortref.nulls,
                                    });
                                }
                                if let Some(sel) =
                                    cx.store.rel_mut(query).select_mut()
                                {
                                    sel.sort_clause = Vec::new();
                                }
                            }
                        }
                    }
                }
            }

            args.push(arg_ref);
        }

        if call.is_volatile() {
            relctx::apply_volatility_ref(cx, stmt)?;
        }

        let name_owned: Vec<String> = match &call.sql_function {
            Some(f) => f.split('.').map(|s| s.to_string()).collect(),
            None => super::expr::get_func_call_backend_name(cx, call),
        };
        let name: Vec<&str> = name_owned.iter().map(|s| s.as_str()).collect();
        let mut func = FuncCall::new(&name, args);
        func.agg_order = agg_sort;

        Ok(Expr::FuncCall(Box::new(func)))
    })?;

    let mut set_expr = set_expr;

    if let Some(initial_value) = &call.initial_value {
        // If the aggregate has a seed, the whole aggregate becomes
        // COALESCE(agg_subquery, initial_value).
        pathctx::put_path_value_var(cx, stmt, &ir_set.path_id, set_expr, false)?;
        pathctx::get_path_value_output(cx, stmt, &ir_set.path_id)?;

        let iv = super::expr::const_type_cast(
            super::expr::const_value_expr(initial_value),
            &ir_set.typeref,
        );

        let wrapper = cx.subrel(|cx| -> Result<RelId> {
            let wrapper = cx.rel();
            let coalesced = Expr::CoalesceExpr {
                args: vec![Expr::Subquery(stmt), iv],
            };
            pathctx::put_path_value_var(cx, wrapper, &ir_set.path_id, coalesced, false)?;
            Ok(wrapper)
        })?;
        stmt = wrapper;
        set_expr = pathctx::get_path_value_var(cx, stmt, &ir_set.path_id)?;
    }

    pathctx::put_path_var_if_not_exists(
        cx,
        stmt,
        &ir_set.path_id,
        set_expr,
        PathAspect::Value,
    );

    let rvar = relctx::new_rel_rvar(cx, ir_set, stmt);
    Ok(new_simple_set_rvar(ir_set, rvar, &[PathAspect::Value]))
}
