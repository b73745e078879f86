//! Compiler routines managing relation ranges.
//!
//! Everything that creates a range var, includes it into a query, or
//! alters the visible range of a type or pointer (overlays) lives here.

use uuid::Uuid;

use super::astutils;
use super::context::{
    CompilerState, Overlay, OverlayOp, OverlayTarget, VolatilityRef,
};
use super::pathctx;
use crate::error::Error;
use crate::ir::{self, PathId, PtrDir, TypeRefKind};
use crate::pgast::{
    Alias, BaseTable, ColumnRef, Expr, FuncCall, JoinType, PathAspect, Rel, RelId, RelKind,
    Rvar, RvarId, RvarKind, SelectStmt, SetOp, SubLinkOp, TypeName,
};
use crate::types;
use crate::Result;

/// Looks up an existing range var for `path_id` in the current scope
/// chain and makes it available in `stmt`.
pub fn find_rvar(cx: &mut CompilerState, stmt: RelId, path_id: &PathId) -> Option<RvarId> {
    let source_stmt = cx.maybe_get_scope_stmt(path_id).unwrap_or(stmt);

    let rvar = pathctx::maybe_get_path_rvar(cx, source_stmt, path_id, PathAspect::Value)?;
    pathctx::put_path_rvar_if_not_exists(cx, stmt, path_id, rvar, PathAspect::Value);

    if let Some(src_rvar) =
        pathctx::maybe_get_path_rvar(cx, source_stmt, path_id, PathAspect::Source)
    {
        pathctx::put_path_rvar_if_not_exists(cx, stmt, path_id, src_rvar, PathAspect::Source);
    }

    Some(rvar)
}

/// Pulls the path bonds exposed by `rvar` into `stmt`'s namespace, so
/// that later sets can join against them.
pub fn pull_path_namespace(cx: &mut CompilerState, stmt: RelId, rvar: RvarId) -> Result<()> {
    let Some(source_rel) = cx.store.rvar_rel(rvar) else {
        return Ok(());
    };

    let paths: Vec<PathId> = cx
        .store
        .rel(source_rel)
        .path_scope
        .iter()
        .filter(|p| !cx.store.rel(source_rel).path_id_mask.contains(*p))
        .cloned()
        .collect();

    for path_id in paths {
        pathctx::put_path_bond(cx, stmt, &path_id);
        pathctx::put_path_rvar_if_not_exists(cx, stmt, &path_id, rvar, PathAspect::Value);
        if path_id.is_objtype_path() {
            pathctx::put_path_rvar_if_not_exists(cx, stmt, &path_id, rvar, PathAspect::Source);
        }
    }
    Ok(())
}

/// Whether `stmt` already ranges over `rvar`.
pub fn has_rvar(cx: &CompilerState, stmt: RelId, rvar: RvarId) -> bool {
    cx.store
        .rel(stmt)
        .path_rvar_map
        .values()
        .any(|rv| *rv == rvar)
}

/// Adds `rvar` to `stmt`'s FROM clause, joining on common path bonds.
pub fn rel_join(cx: &mut CompilerState, stmt: RelId, rvar: RvarId) -> Result<()> {
    let Some(right_rel) = cx.store.rvar_rel(rvar) else {
        // Function rvars join laterally with no bond condition.
        cx.store
            .rel_mut(stmt)
            .select_mut()
            .expect("joins happen in select statements")
            .from_clause
            .push(rvar);
        return Ok(());
    };

    // Build the join condition over the bond paths the new range shares
    // with the statement.
    let bond_paths: Vec<PathId> = cx
        .store
        .rel(right_rel)
        .path_scope
        .iter()
        .cloned()
        .collect();

    let mut condition: Option<Expr> = None;
    for path_id in &bond_paths {
        let lref = match pathctx::maybe_get_path_var(
            cx,
            stmt,
            path_id,
            PathAspect::Identity,
        )? {
            Some(Expr::ColumnRef(c)) => c,
            _ => continue,
        };
        let rref = match pathctx::maybe_get_rvar_path_var(
            cx,
            rvar,
            path_id,
            PathAspect::Identity,
        )? {
            Some(Expr::ColumnRef(c)) => c,
            _ => continue,
        };
        condition = Some(astutils::extend_binop(
            condition,
            astutils::join_condition(lref, rref),
            "AND",
        ));
    }

    let stmt_sel = cx
        .store
        .rel(stmt)
        .select()
        .expect("joins happen in select statements")
        .clone();

    match (stmt_sel.from_clause.last().copied(), condition) {
        (Some(larg), Some(quals)) => {
            let join = cx.store.add_rvar(Rvar::new(
                RvarKind::Join {
                    join_type: JoinType::Inner,
                    larg,
                    rarg: rvar,
                    quals: Some(quals),
                },
                Alias::default(),
            ));
            let sel = cx.store.rel_mut(stmt).select_mut().expect("select");
            *sel.from_clause.last_mut().expect("non-empty") = join;
        }
        (_, maybe_quals) => {
            let sel = cx.store.rel_mut(stmt).select_mut().expect("select");
            sel.from_clause.push(rvar);
            if let Some(quals) = maybe_quals {
                let rel = cx.store.rel_mut(stmt);
                rel.where_clause = Some(astutils::extend_binop(
                    rel.where_clause.take(),
                    quals,
                    "AND",
                ));
            }
        }
    }
    Ok(())
}

/// Includes `rvar` into `stmt` as the provider of `path_id` under the
/// natural aspects for the path.
pub fn include_rvar(
    cx: &mut CompilerState,
    stmt: RelId,
    rvar: RvarId,
    path_id: &PathId,
) -> Result<()> {
    let aspects: &[PathAspect] = if path_id.is_objtype_path() {
        &[PathAspect::Source, PathAspect::Value]
    } else {
        &[PathAspect::Value]
    };
    include_specific_rvar(cx, stmt, rvar, path_id, aspects)
}

pub fn include_specific_rvar(
    cx: &mut CompilerState,
    stmt: RelId,
    rvar: RvarId,
    path_id: &PathId,
    aspects: &[PathAspect],
) -> Result<()> {
    if !has_rvar(cx, stmt, rvar) {
        rel_join(cx, stmt, rvar)?;
    }
    for aspect in aspects {
        pathctx::put_path_rvar(cx, stmt, path_id, rvar, *aspect);
    }
    pull_path_namespace(cx, stmt, rvar)
}

/// A subselect range var over `rel`.
pub fn rvar_for_rel(
    cx: &mut CompilerState,
    rel: RelId,
    lateral: bool,
    alias_hint: &str,
) -> RvarId {
    let alias = cx.env.aliases.get(alias_hint);
    if cx.store.rel(rel).is_terminal() {
        cx.store.add_rvar(Rvar::new(
            RvarKind::Relation {
                rel,
                include_inherited: true,
            },
            Alias::new(alias),
        ))
    } else {
        cx.store.add_rvar(Rvar::new(
            RvarKind::Subselect { lateral, rel },
            Alias::new(alias),
        ))
    }
}

pub fn new_rel_rvar(cx: &mut CompilerState, ir_set: &ir::Set, rel: RelId) -> RvarId {
    let hint = ir_set.path_id.alias_hint();
    rvar_for_rel(cx, rel, true, &hint)
}

/// An empty range: one row of nothing.
pub fn new_empty_rvar(cx: &mut CompilerState, ir_set: &ir::Set) -> RvarId {
    let mut rel = Rel::new(RelKind::NullRelation);
    rel.path_id = Some(ir_set.path_id.clone());
    let rel = cx.store.add_rel(rel);
    rvar_for_rel(cx, rel, false, "e")
}

/// Base table of an object type.
pub fn table_from_typeref(
    cx: &mut CompilerState,
    typeref: &ir::TypeRef,
    path_id: &PathId,
) -> RelId {
    let (schemaname, relname) = types::get_objtype_backend_name(typeref);
    let mut rel = Rel::new(RelKind::Table(BaseTable {
        schemaname: Some(schemaname),
        relname,
    }));
    rel.path_id = Some(path_id.clone());
    rel.path_scope.insert(path_id.clone());
    let rel = cx.store.add_rel(rel);
    cx.env.root_rels.insert(rel);
    rel
}

/// Base table of a pointer's link table.
pub fn table_from_ptrref(cx: &mut CompilerState, ptrref: &ir::PointerRef) -> RelId {
    let (schemaname, relname) = types::get_pointer_backend_name(ptrref);
    let rel = Rel::new(RelKind::Table(BaseTable {
        schemaname: Some(schemaname),
        relname,
    }));
    cx.store.add_rel(rel)
}

/// Range over a material object type, including overlays and type
/// rewrites when present.
pub fn range_for_material_objtype(
    cx: &mut CompilerState,
    typeref: &ir::TypeRef,
    path_id: &PathId,
    include_overlays: bool,
) -> Result<RvarId> {
    if let TypeRefKind::Object { is_free: true, .. } = &typeref.kind {
        return new_free_object_rvar(cx, typeref, path_id);
    }

    let overlays = if include_overlays {
        get_type_rel_overlays(cx, typeref.id)
    } else {
        Vec::new()
    };

    let rewrite = cx.env.type_rewrites.get(&typeref.id).copied();

    let base_rel = match rewrite {
        Some(rewrite_rel) => {
            let cte = type_rewrite_cte(cx, typeref, rewrite_rel)?;
            let qry = overlay_query(cx, OverlayTarget::Cte(cte), path_id, path_id)?;
            qry
        }
        None => table_from_typeref(cx, typeref, path_id),
    };

    if overlays.is_empty() {
        let hint = typeref.short_name().to_lowercase();
        let mut rvar = Rvar::new(
            match cx.store.rel(base_rel).is_terminal() {
                true => RvarKind::Relation {
                    rel: base_rel,
                    include_inherited: true,
                },
                false => RvarKind::Subselect {
                    lateral: false,
                    rel: base_rel,
                },
            },
            Alias::new(cx.env.aliases.get(&hint)),
        );
        rvar.typeref = Some(typeref.clone());
        rvar.schema_object_id = Some(typeref.id);
        return Ok(cx.store.add_rvar(rvar));
    }

    // The overlaid range: the base relation wrapped in a select, with
    // each overlay either unioned in, anti-joined out, replacing, or
    // filtering the set.
    let base_qry = wrap_rel_in_query(cx, base_rel, path_id, path_id)?;
    let mut queries: Vec<(SetOp, RelId)> = vec![(SetOp::Union, base_qry)];

    for overlay in overlays {
        match overlay.op {
            OverlayOp::Union => {
                let qry = overlay_query(cx, overlay.target, path_id, &overlay.path_id)?;
                queries.push((SetOp::Union, qry));
            }
            OverlayOp::Replace => {
                let qry = overlay_query(cx, overlay.target, path_id, &overlay.path_id)?;
                queries = vec![(SetOp::Union, qry)];
            }
            OverlayOp::Except => {
                for (_, qry) in &queries {
                    anti_join(cx, *qry, overlay.target, path_id, &overlay.path_id)?;
                }
            }
            OverlayOp::Filter => {
                for (_, qry) in &queries {
                    filter_join(cx, *qry, overlay.target, path_id, &overlay.path_id)?;
                }
            }
        }
    }

    let hint = typeref.short_name().to_lowercase();
    let rvar = range_from_queryset(cx, queries, &hint, path_id)?;
    cx.store.rvar_mut(rvar).typeref = Some(typeref.clone());
    cx.store.rvar_mut(rvar).schema_object_id = Some(typeref.id);
    Ok(rvar)
}

fn type_rewrite_cte(
    cx: &mut CompilerState,
    typeref: &ir::TypeRef,
    rewrite_rel: RelId,
) -> Result<crate::pgast::CteId> {
    if let Some(existing) = cx.type_ctes.get(&typeref.id) {
        return Ok(*existing);
    }
    let name = cx
        .env
        .aliases
        .get(&format!("{}_rw", typeref.short_name().to_lowercase()));
    let cte = cx.store.add_cte(crate::pgast::CommonTableExpr {
        name,
        query: rewrite_rel,
        recursive: false,
        materialized: None,
        aliascolnames: Vec::new(),
    });
    cx.type_ctes.insert(typeref.id, cte);
    Ok(cte)
}

/// Free objects have no backing table; the range is a single synthesised
/// row with a generated id.
fn new_free_object_rvar(
    cx: &mut CompilerState,
    typeref: &ir::TypeRef,
    path_id: &PathId,
) -> Result<RvarId> {
    let qry = cx.store.new_select();
    let id_alias = cx.env.aliases.get("id");
    let id_val = Expr::FuncCall(Box::new(FuncCall::new(
        &[types::HELPER_SCHEMA, "uuid_generate_v4"],
        vec![],
    )));
    cx.store
        .rel_mut(qry)
        .target_list
        .push(crate::pgast::ResTarget::new(Some(id_alias.clone()), id_val));
    let out = crate::pgast::OutputVar::ColumnRef(ColumnRef::new(vec![id_alias]));
    cx.store
        .rel_mut(qry)
        .path_outputs
        .insert((path_id.clone(), PathAspect::Value), out.clone());
    cx.store
        .rel_mut(qry)
        .path_outputs
        .insert((path_id.clone(), PathAspect::Identity), out);
    cx.store.rel_mut(qry).path_id = Some(path_id.clone());
    cx.store.rel_mut(qry).path_scope.insert(path_id.clone());

    let hint = typeref.short_name().to_lowercase();
    Ok(rvar_for_rel(cx, qry, false, &hint))
}

/// Wrap a terminal relation in a select that exposes `path_id`.
fn wrap_rel_in_query(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    inner_path_id: &PathId,
) -> Result<RelId> {
    let qry = cx.store.new_select();
    let rvar = rvar_for_rel(cx, rel, false, &path_id.alias_hint().to_lowercase());
    if path_id != inner_path_id {
        cx.store
            .rel_mut(qry)
            .view_path_id_map
            .insert(path_id.clone(), inner_path_id.clone());
    }
    cx.store
        .rel_mut(qry)
        .select_mut()
        .expect("fresh select")
        .from_clause
        .push(rvar);
    pathctx::put_path_rvar(cx, qry, inner_path_id, rvar, PathAspect::Value);
    if inner_path_id.is_objtype_path() {
        pathctx::put_path_rvar(cx, qry, inner_path_id, rvar, PathAspect::Source);
    }
    pathctx::put_path_bond(cx, qry, inner_path_id);
    cx.store.rel_mut(qry).path_id = Some(path_id.clone());
    Ok(qry)
}

/// A query over an overlay target (a DML CTE or a plain relation),
/// exposing `path_id` by remapping it onto the overlay's own path.
fn overlay_query(
    cx: &mut CompilerState,
    target: OverlayTarget,
    path_id: &PathId,
    overlay_path_id: &PathId,
) -> Result<RelId> {
    let qry = cx.store.new_select();
    let rvar = match target {
        OverlayTarget::Cte(cte) => {
            let alias = cx.env.aliases.get("overlay");
            cx.store
                .add_rvar(Rvar::new(RvarKind::Cte(cte), Alias::new(alias)))
        }
        OverlayTarget::Rel(rel) => rvar_for_rel(cx, rel, false, "overlay"),
    };
    if path_id != overlay_path_id {
        cx.store
            .rel_mut(qry)
            .view_path_id_map
            .insert(path_id.clone(), overlay_path_id.clone());
    }
    cx.store
        .rel_mut(qry)
        .select_mut()
        .expect("fresh select")
        .from_clause
        .push(rvar);
    pathctx::put_path_rvar(cx, qry, overlay_path_id, rvar, PathAspect::Value);
    if overlay_path_id.is_objtype_path() {
        pathctx::put_path_rvar(cx, qry, overlay_path_id, rvar, PathAspect::Source);
    }
    pathctx::put_path_bond(cx, qry, overlay_path_id);
    cx.store.rel_mut(qry).path_id = Some(path_id.clone());
    Ok(qry)
}

/// `stmt.where &= NOT EXISTS (SELECT FROM target t WHERE t.id = stmt.id)`
fn anti_join(
    cx: &mut CompilerState,
    stmt: RelId,
    target: OverlayTarget,
    path_id: &PathId,
    overlay_path_id: &PathId,
) -> Result<()> {
    let sub = overlay_query(cx, target, path_id, overlay_path_id)?;
    let sub_id = pathctx::get_path_identity_var(cx, sub, path_id)?;
    let stmt_id = pathctx::get_path_identity_var(cx, stmt, path_id)?;
    {
        let rel = cx.store.rel_mut(sub);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            astutils::new_binop(sub_id, stmt_id, "="),
            "AND",
        ));
    }
    let rel = cx.store.rel_mut(stmt);
    rel.where_clause = Some(astutils::extend_binop(
        rel.where_clause.take(),
        Expr::SubLink {
            op: SubLinkOp::NotExists,
            test_expr: None,
            operator: None,
            rel: sub,
        },
        "AND",
    ));
    Ok(())
}

fn filter_join(
    cx: &mut CompilerState,
    stmt: RelId,
    target: OverlayTarget,
    path_id: &PathId,
    overlay_path_id: &PathId,
) -> Result<()> {
    let sub = overlay_query(cx, target, path_id, overlay_path_id)?;
    let sub_id = pathctx::get_path_identity_var(cx, sub, path_id)?;
    let stmt_id = pathctx::get_path_identity_var(cx, stmt, path_id)?;
    {
        let rel = cx.store.rel_mut(sub);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            astutils::new_binop(sub_id, stmt_id, "="),
            "AND",
        ));
    }
    let rel = cx.store.rel_mut(stmt);
    rel.where_clause = Some(astutils::extend_binop(
        rel.where_clause.take(),
        Expr::SubLink {
            op: SubLinkOp::Exists,
            test_expr: None,
            operator: None,
            rel: sub,
        },
        "AND",
    ));
    Ok(())
}

/// Folds a list of queries into a set-op tree and wraps it in a range
/// var. A single query becomes a plain subselect range.
pub fn range_from_queryset(
    cx: &mut CompilerState,
    mut queries: Vec<(SetOp, RelId)>,
    alias_hint: &str,
    path_id: &PathId,
) -> Result<RvarId> {
    if queries.is_empty() {
        return Err(Error::new_internal("empty query set for range"));
    }
    let rel = if queries.len() == 1 {
        queries.remove(0).1
    } else {
        let mut acc = queries.remove(0).1;
        for (op, rhs) in queries {
            let mut union = Rel::new(RelKind::Select(SelectStmt {
                op: Some(op),
                all: true,
                larg: Some(acc),
                rarg: Some(rhs),
                ..SelectStmt::default()
            }));
            union.path_id = Some(path_id.clone());
            union.path_scope.insert(path_id.clone());
            acc = cx.store.add_rel(union);
        }
        acc
    };
    Ok(rvar_for_rel(cx, rel, false, alias_hint))
}

/// Range over an object type for a path root.
pub fn new_root_rvar(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<RvarId> {
    if !ir_set.path_id.is_objtype_path() {
        return Err(Error::new_internal(format!(
            "cannot create root rvar for non-object path {}",
            ir_set.path_id
        )));
    }
    range_for_material_objtype(cx, &ir_set.typeref, &ir_set.path_id, true)
}

/// Range over a pointer's link table (or inline storage with link bias),
/// with the `source`/`target` columns wired as identity vars.
pub fn new_mapped_pointer_rvar(
    cx: &mut CompilerState,
    ir_ptr: &ir::SetPointer,
    path_id: &PathId,
) -> Result<RvarId> {
    let ptrref = &ir_ptr.ptrref;
    let overlays = get_ptr_rel_overlays(cx, ptrref);

    let base = table_from_ptrref(cx, ptrref);
    let base_qry = link_table_query(cx, base, ptrref, ir_ptr.direction, path_id)?;

    let mut queries: Vec<(SetOp, RelId)> = vec![(SetOp::Union, base_qry)];
    for overlay in overlays {
        match overlay.op {
            OverlayOp::Union => {
                let qry =
                    link_overlay_query(cx, overlay.target, ir_ptr.direction, path_id)?;
                queries.push((SetOp::Union, qry));
            }
            OverlayOp::Replace => {
                let qry =
                    link_overlay_query(cx, overlay.target, ir_ptr.direction, path_id)?;
                queries = vec![(SetOp::Union, qry)];
            }
            OverlayOp::Except | OverlayOp::Filter => {
                // Link-range exclusion rides on the link table delete CTE
                // and does not alter the read range shape.
            }
        }
    }

    let hint = format!("{}_t", ptrref.shortname);
    range_from_queryset(cx, queries, &hint, path_id)
}

/// The select over a link table exposing source/target identity for the
/// pointer path.
fn link_table_query(
    cx: &mut CompilerState,
    table: RelId,
    ptrref: &ir::PointerRef,
    direction: PtrDir,
    path_id: &PathId,
) -> Result<RelId> {
    let qry = cx.store.new_select();
    let rvar = rvar_for_rel(cx, table, false, &format!("{}_t", ptrref.shortname));

    let (near_col, far_col) = match direction {
        PtrDir::Outbound => ("source", "target"),
        PtrDir::Inbound => ("target", "source"),
    };

    let src_path_id = path_id
        .src_path()
        .ok_or_else(|| Error::new_internal(format!("pointer path {path_id} has no source")))?;

    let alias = cx.store.rvar(rvar).alias.aliasname.clone();
    let near_ref = Expr::ColumnRef(ColumnRef::new(vec![alias.clone(), near_col.to_string()]));
    let far_ref = Expr::ColumnRef(ColumnRef::new(vec![alias, far_col.to_string()]));

    {
        let sel = cx.store.rel_mut(qry).select_mut().expect("fresh select");
        sel.from_clause.push(rvar);
    }

    pathctx::put_path_identity_var(cx, qry, &src_path_id, near_ref.clone(), false)?;
    pathctx::put_path_value_var(cx, qry, &src_path_id, near_ref, false)?;
    pathctx::put_path_identity_var(cx, qry, path_id, far_ref.clone(), false)?;
    pathctx::put_path_value_var(cx, qry, path_id, far_ref, false)?;

    pathctx::put_path_bond(cx, qry, &src_path_id);
    pathctx::put_path_bond(cx, qry, path_id);
    cx.store.rel_mut(qry).path_id = Some(path_id.clone());
    Ok(qry)
}

/// Overlay query for a pointer range: the DML link CTE exposes the same
/// source/target columns as the link table.
fn link_overlay_query(
    cx: &mut CompilerState,
    target: OverlayTarget,
    direction: PtrDir,
    path_id: &PathId,
) -> Result<RelId> {
    let rel = match target {
        OverlayTarget::Rel(rel) => rel,
        OverlayTarget::Cte(cte) => {
            let qry = cx.store.new_select();
            let alias = cx.env.aliases.get("overlay");
            let rvar = cx
                .store
                .add_rvar(Rvar::new(RvarKind::Cte(cte), Alias::new(alias.clone())));

            let (near_col, far_col) = match direction {
                PtrDir::Outbound => ("source", "target"),
                PtrDir::Inbound => ("target", "source"),
            };
            let src_path_id = path_id.src_path().ok_or_else(|| {
                Error::new_internal(format!("pointer path {path_id} has no source"))
            })?;
            let near_ref =
                Expr::ColumnRef(ColumnRef::new(vec![alias.clone(), near_col.to_string()]));
            let far_ref = Expr::ColumnRef(ColumnRef::new(vec![alias, far_col.to_string()]));
            {
                let sel = cx.store.rel_mut(qry).select_mut().expect("fresh select");
                sel.from_clause.push(rvar);
            }
            pathctx::put_path_identity_var(cx, qry, &src_path_id, near_ref.clone(), false)?;
            pathctx::put_path_value_var(cx, qry, &src_path_id, near_ref, false)?;
            pathctx::put_path_identity_var(cx, qry, path_id, far_ref.clone(), false)?;
            pathctx::put_path_value_var(cx, qry, path_id, far_ref, false)?;
            pathctx::put_path_bond(cx, qry, &src_path_id);
            pathctx::put_path_bond(cx, qry, path_id);
            cx.store.rel_mut(qry).path_id = Some(path_id.clone());
            qry
        }
    };
    Ok(rel)
}

/// Join an IR set using semi-join.
///
/// Called with the context inside the subrel that compiled the source
/// range; that subrel becomes the correlated `IN` subquery: the target
/// range stays in the enclosing statement and is filtered by
/// `target.id IN (SELECT ... FROM source [JOIN link map])`, which omits
/// duplicate target rows per source and does not cross-multiply against
/// the source.
pub fn semi_join(
    cx: &mut CompilerState,
    stmt: RelId,
    ir_set: &ir::Set,
    _src_rvar: RvarId,
) -> Result<RvarId> {
    let rptr = ir_set
        .rptr
        .as_ref()
        .expect("semi-join requires a pointer step");

    // Target set range.
    let set_rvar = new_root_rvar(cx, ir_set)?;

    let ptr_info = types::get_ptrref_storage_info(&rptr.ptrref, false, true)?;
    let inline = matches!(
        &ptr_info,
        Some(info) if info.table_type == types::TableType::ObjectType
    );

    let far_pid = if inline {
        if rptr.direction == PtrDir::Inbound {
            ir_set
                .path_id
                .src_path()
                .ok_or_else(|| Error::new_internal("inbound step without a source"))?
        } else {
            ir_set.path_id.clone()
        }
    } else {
        // Link range.
        let map_rvar = new_mapped_pointer_rvar(cx, rptr, &ir_set.path_id)?;
        let cur = cx.rel();
        include_specific_rvar(
            cx,
            cur,
            map_rvar,
            &ir_set.path_id.ptr_path(),
            &[PathAspect::Value, PathAspect::Source],
        )?;
        ir_set.path_id.clone()
    };

    let tgt_ref = pathctx::get_rvar_path_identity_var(cx, set_rvar, &far_pid)?;

    let cur = cx.rel();
    pathctx::get_path_output(cx, cur, &far_pid, PathAspect::Identity)?;

    let cond = Expr::OpExpr {
        name: "IN".to_string(),
        lexpr: Some(Box::new(tgt_ref)),
        rexpr: Some(Box::new(Expr::Subquery(cur))),
    };
    let stmt_rel = cx.store.rel_mut(stmt);
    stmt_rel.where_clause = Some(astutils::extend_binop(
        stmt_rel.where_clause.take(),
        cond,
        "AND",
    ));

    Ok(set_rvar)
}

/// Makes sure `stmt` ranges over the source of a pointer step, creating
/// a fresh root range when none is bound yet.
pub fn ensure_source_rvar(
    cx: &mut CompilerState,
    ir_source: &ir::Set,
    stmt: RelId,
) -> Result<RvarId> {
    if let Some(rvar) =
        pathctx::maybe_get_path_rvar(cx, stmt, &ir_source.path_id, PathAspect::Source)
    {
        return Ok(rvar);
    }
    if let Some(rvar) =
        pathctx::maybe_get_path_rvar(cx, stmt, &ir_source.path_id, PathAspect::Value)
    {
        return Ok(rvar);
    }
    let rvar = new_root_rvar(cx, ir_source)?;
    include_rvar(cx, stmt, rvar, &ir_source.path_id)?;
    Ok(rvar)
}

/// Non-object sets have no natural identity; synthesise one so the set
/// can participate in path bonds and volatility correlation.
pub fn ensure_bond_for_expr(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    rel: RelId,
) -> Result<()> {
    if ir_set.path_id.is_objtype_path() {
        // ObjectTypes have inherent identity.
        return Ok(());
    }
    ensure_transient_identity_for_path(cx, &ir_set.path_id, rel, false)
}

pub fn ensure_transient_identity_for_path(
    cx: &mut CompilerState,
    path_id: &PathId,
    rel: RelId,
    for_dml: bool,
) -> Result<()> {
    let id_expr = if for_dml {
        // Iterator identity for DML must be unique per row even for
        // duplicate iterator values.
        Expr::FuncCall(Box::new(FuncCall::new(
            &[types::HELPER_SCHEMA, "uuid_generate_v4"],
            vec![],
        )))
    } else {
        let mut call = FuncCall::new_null_safe(&["row_number"], vec![]);
        call.over = Some(crate::pgast::WindowDef {
            partition_clause: vec![],
            order_clause: vec![],
        });
        Expr::FuncCall(Box::new(call))
    };

    pathctx::put_path_identity_var(cx, rel, path_id, id_expr, true)?;
    pathctx::put_path_bond(cx, rel, path_id);
    Ok(())
}

/// Attach the frame's volatility refs as a WHERE guard so the planner
/// cannot hoist a volatile call above its logical multiplicity.
pub fn apply_volatility_ref(cx: &mut CompilerState, stmt: RelId) -> Result<()> {
    let refs = cx.frame().volatility_refs.clone();
    for vref in refs {
        let expr = match vref {
            VolatilityRef::Path(path_id) => {
                match pathctx::maybe_get_path_var(
                    cx,
                    stmt,
                    &path_id,
                    PathAspect::Identity,
                )? {
                    Some(expr) => expr,
                    None => continue,
                }
            }
            VolatilityRef::Expr(expr) => expr,
        };
        let rel = cx.store.rel_mut(stmt);
        rel.where_clause = Some(astutils::extend_binop(
            rel.where_clause.take(),
            Expr::NullTest {
                arg: Box::new(expr),
                negated: true,
            },
            "AND",
        ));
    }
    Ok(())
}

/// Updates the context to the scope node attached to `ir_set`, binding
/// the node's child paths to `stmt` and masking its descendants in
/// `rel`.
pub fn update_scope(cx: &mut CompilerState, ir_set: &ir::Set, stmt: RelId) {
    let Some(scope) = cx.scope_for_set(ir_set) else {
        return;
    };
    cx.frame_mut().scope_id = Some(scope);

    let children = cx.scope_tree.path_children(scope);
    for child in children {
        if let ir::ScopeNodeKind::Path(path_id) = &cx.scope_tree.node(child).kind {
            let path_id = path_id.clone();
            cx.frame_mut().path_scope.insert(path_id, stmt);
        }
    }

    // Mask everything bound below this node: those paths are visible
    // inside the subtree but must not leak out of this rel.
    let mut stack = cx.scope_tree.node(scope).children.clone();
    let mut masked = Vec::new();
    while let Some(node) = stack.pop() {
        let node = cx.scope_tree.node(node);
        if let ir::ScopeNodeKind::Path(path_id) = &node.kind {
            masked.push(path_id.clone());
        }
        stack.extend(node.children.iter().copied());
    }
    for path_id in masked {
        cx.store.rel_mut(stmt).path_id_mask.insert(path_id);
    }
}

pub fn get_scope_stmt(cx: &CompilerState, path_id: &PathId) -> Result<RelId> {
    cx.maybe_get_scope_stmt(path_id).ok_or_else(|| {
        Error::new_internal(format!("node {path_id} is not in the scope"))
    })
}

/// Unpacks a materialised binding (an array column) back into a set
/// range via `unnest`.
pub fn unpack_rvar(
    cx: &mut CompilerState,
    packed: Expr,
    path_id: &PathId,
) -> Result<RvarId> {
    let alias = cx.env.aliases.get(&path_id.alias_hint());
    let colname = "unpacked".to_string();
    let mut func = FuncCall::new_null_safe(&["unnest"], vec![packed]);
    func.coldeflist = vec![crate::pgast::ColumnDef {
        name: colname.clone(),
        typename: TypeName::new(types::pg_type_from_ir_typeref(
            path_id.target(),
            false,
            true,
        )),
    }];
    let rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Function {
            lateral: true,
            with_ordinality: false,
            is_rowsfrom: false,
            functions: vec![func],
        },
        Alias::new(alias.clone()),
    ));
    let out = crate::pgast::OutputVar::ColumnRef(ColumnRef::new(vec![colname]));
    cx.store
        .rvar_mut(rvar)
        .path_outputs
        .insert((path_id.clone(), PathAspect::Value), out);
    Ok(rvar)
}

// ---- relation overlays -------------------------------------------------

pub fn add_type_rel_overlay(
    cx: &mut CompilerState,
    type_id: Uuid,
    op: OverlayOp,
    target: OverlayTarget,
    path_id: &PathId,
) {
    log::debug!("overlay {op:?} registered for type {type_id}");
    cx.rel_overlays
        .types
        .entry(type_id)
        .or_default()
        .push(Overlay {
            op,
            target,
            path_id: path_id.clone(),
        });
}

pub fn get_type_rel_overlays(cx: &CompilerState, type_id: Uuid) -> Vec<Overlay> {
    cx.rel_overlays
        .types
        .get(&type_id)
        .cloned()
        .unwrap_or_default()
}

pub fn add_ptr_rel_overlay(
    cx: &mut CompilerState,
    ptrref: &ir::PointerRef,
    op: OverlayOp,
    target: OverlayTarget,
    path_id: &PathId,
) {
    let source_id = ptrref
        .source
        .as_deref()
        .map(|s| s.id)
        .unwrap_or_else(Uuid::nil);
    cx.rel_overlays
        .pointers
        .entry((source_id, ptrref.shortname.clone()))
        .or_default()
        .push(Overlay {
            op,
            target,
            path_id: path_id.clone(),
        });
}

pub fn get_ptr_rel_overlays(cx: &CompilerState, ptrref: &ir::PointerRef) -> Vec<Overlay> {
    let source_id = ptrref
        .source
        .as_deref()
        .map(|s| s.id)
        .unwrap_or_else(Uuid::nil);
    cx.rel_overlays
        .pointers
        .get(&(source_id, ptrref.shortname.clone()))
        .cloned()
        .unwrap_or_default()
}

/// Record external relation bodies supplied by the environment as the
/// range for their paths.
pub fn external_rel_rvar(
    cx: &mut CompilerState,
    path_id: &PathId,
) -> Result<Option<RvarId>> {
    let Some((rel, aspects)) = cx.env.external_rels.get(path_id).cloned() else {
        return Ok(None);
    };
    let rvar = rvar_for_rel(cx, rel, false, &path_id.alias_hint());
    for aspect in aspects {
        let stmt = cx.rel();
        pathctx::put_path_rvar(cx, stmt, path_id, rvar, aspect);
    }
    Ok(Some(rvar))
}

