//! Helpers to manage statement path contexts.
//!
//! A path can be realised in a relation under several *aspects*: its
//! identity (object id), its value, its source row, or its serialized
//! form. Lookups fall back from a more specific aspect to the less
//! specific one at the same relation; installing a more specific aspect
//! for an object path also installs the less specific one.

use super::context::CompilerState;
use super::output;
use crate::error::Error;
use crate::ir::{PathId, PtrDir};
use crate::pgast::{
    ColumnRef, Expr, OutputVar, PathAspect, RelId, ResTarget, RvarId, RvarKind, TupleElement,
    TupleVar, TypeName,
};
use crate::types::{self, PointerStorageInfo, TableType};
use crate::Result;

use super::astutils;

/// A mapping of more specific aspect → less specific aspect.
pub fn get_less_specific_aspect(path_id: &PathId, aspect: PathAspect) -> Option<PathAspect> {
    if path_id.is_objtype_path() {
        match aspect {
            PathAspect::Identity => Some(PathAspect::Value),
            PathAspect::Value => Some(PathAspect::Source),
            PathAspect::Serialized => Some(PathAspect::Source),
            _ => None,
        }
    } else {
        match aspect {
            PathAspect::Serialized => Some(PathAspect::Value),
            _ => None,
        }
    }
}

pub fn map_path_id(
    path_id: &PathId,
    path_id_map: &indexmap::IndexMap<PathId, PathId>,
) -> PathId {
    for (outer_id, inner_id) in path_id_map {
        let new_path_id = path_id.replace_prefix(outer_id, inner_id);
        if &new_path_id != path_id {
            return new_path_id;
        }
    }
    path_id.clone()
}

pub fn reverse_map_path_id(
    path_id: &PathId,
    path_id_map: &indexmap::IndexMap<PathId, PathId>,
) -> PathId {
    for (outer_id, inner_id) in path_id_map {
        let new_path_id = path_id.replace_prefix(inner_id, outer_id);
        if &new_path_id != path_id {
            return new_path_id;
        }
    }
    path_id.clone()
}

fn lookup_error(path_id: &PathId, aspect: PathAspect, rel: RelId) -> Error {
    Error::new_internal(format!(
        "there is no range var for {path_id} {} in rel {rel}",
        aspect.as_ref()
    ))
}

/// Return an expression for a given `path_id` in a given `rel`.
pub fn get_path_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<Expr> {
    maybe_get_path_var(cx, rel, path_id, aspect)?
        .ok_or_else(|| lookup_error(path_id, aspect, rel))
}

/// The fallible twin of [get_path_var], used for fallbacks between aspect
/// specificities.
pub fn maybe_get_path_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<Option<Expr>> {
    // Check if we already have a var before remapping the path id; tuple
    // serialized vars are recorded under the original path id.
    if let Some(var) = cx
        .store
        .rel(rel)
        .path_namespace
        .get(&(path_id.clone(), aspect))
    {
        return Ok(Some(var.clone()));
    }

    let view_map = cx.store.rel(rel).view_path_id_map.clone();
    let path_id = map_path_id(path_id, &view_map);

    if let Some(var) = cx
        .store
        .rel(rel)
        .path_namespace
        .get(&(path_id.clone(), aspect))
    {
        return Ok(Some(var.clone()));
    }

    let ptrref = path_id.rptr().cloned();
    let is_type_intersection = path_id.is_type_intersection_path();

    let mut ptr_info: Option<PointerStorageInfo> = None;
    let mut src_path_id: Option<PathId> = None;
    let mut is_inbound = false;

    if let Some(ptr) = &ptrref {
        if !is_type_intersection {
            ptr_info = Some(types::ptr_storage_info(ptr, false)?);
            is_inbound = path_id.rptr_dir() == Some(PtrDir::Inbound);
            if is_inbound {
                src_path_id = Some(path_id.clone());
            } else {
                src_path_id = path_id.src_path();
                if ptr.is_id() {
                    // A reference to the id property of an object linked
                    // to by an inline link routes to the inline column,
                    // e.g. Foo.__type__.id resolves to the Foo.__type__
                    // column.
                    let mut pid = src_path_id.clone();
                    while pid.as_ref().is_some_and(|p| p.is_type_intersection_path()) {
                        pid = pid.and_then(|p| p.src_path());
                    }
                    if let Some(src_rptr) = pid.as_ref().and_then(|p| p.rptr().cloned()) {
                        let src_ptr_info = types::ptr_storage_info(&src_rptr, false)?;
                        if src_ptr_info.table_type == TableType::ObjectType {
                            src_path_id = src_path_id.and_then(|p| p.src_path());
                            ptr_info = Some(src_ptr_info);
                        }
                    }
                }
            }
        }
    }

    if astutils::is_set_op_query(&cx.store, rel) {
        let (larg, rarg) = {
            let s = cx.store.rel(rel).select().expect("set op is a select");
            (s.larg, s.rarg)
        };
        let mut outputs = Vec::new();
        for part in [larg, rarg].into_iter().flatten() {
            collect_set_op_outputs(cx, part, &path_id, aspect, &mut outputs)?;
        }

        let mut first: Option<OutputVar> = None;
        let mut optional = false;
        let mut all_null = true;
        let mut nullable = false;

        for (colref, is_null) in &outputs {
            if colref.is_nullable() {
                nullable = true;
            }
            if first.is_none() {
                first = Some(colref.clone());
            }
            if *is_null {
                optional = true;
            } else {
                all_null = false;
            }
        }

        if all_null {
            return Ok(None);
        }

        // Path vars produced by UNION expressions can be "optional", i.e
        // the record is accepted as-is when such var is NULL. This is
        // necessary to correctly join heterogeneous UNIONs.
        let var = strip_output_var(
            first.expect("set-op outputs cannot be empty"),
            optional,
            optional || nullable,
        );
        let var = var.into_expr();
        put_path_var_force(cx, rel, &path_id, var.clone(), aspect);
        return Ok(Some(var));
    }

    if ptrref.is_none() {
        if path_id.len() == 1 {
            // This is a scalar set derived from an expression.
            src_path_id = Some(path_id.clone());
        }
    } else if ptrref.as_ref().is_some_and(|p| p.is_link_property()) {
        let table_type = ptr_info.as_ref().map(|i| i.table_type);
        if table_type != Some(TableType::Link) && !is_inbound {
            // A link prop that is stored in the source rel; step back to
            // the link source rvar.
            src_path_id = path_id.src_path().and_then(|p| p.src_path());
        }
    } else if is_type_intersection
        || (ptr_info.as_ref().map(|i| i.table_type) != Some(TableType::ObjectType)
            && !is_inbound)
    {
        // Ref is in the mapping rvar.
        src_path_id = Some(path_id.ptr_path());
    }

    let mut rel_rvar = maybe_get_path_rvar(cx, rel, &path_id, aspect);
    let mut alt_aspect = None;

    if rel_rvar.is_none() {
        alt_aspect = get_less_specific_aspect(&path_id, aspect);
        if let Some(alt) = alt_aspect {
            rel_rvar = maybe_get_path_rvar(cx, rel, &path_id, alt);
        }
    }

    if rel_rvar.is_none() {
        let src_path_id = match &src_path_id {
            Some(p) => p.clone(),
            None => return Ok(None),
        };

        let src_aspect = if src_path_id.is_objtype_path() {
            if aspect == PathAspect::Identity {
                PathAspect::Value
            } else {
                PathAspect::Source
            }
        } else {
            aspect
        };

        if src_path_id.is_tuple_path() {
            rel_rvar = maybe_get_path_rvar(cx, rel, &src_path_id, src_aspect);
            if rel_rvar.is_none() {
                if let Some(src_src) = src_path_id.src_path() {
                    rel_rvar = maybe_get_path_rvar(cx, rel, &src_src, src_aspect);
                }
            }
        } else {
            rel_rvar = maybe_get_path_rvar(cx, rel, &src_path_id, src_aspect);
        }

        if rel_rvar.is_none() && src_aspect != PathAspect::Source && path_id != src_path_id {
            rel_rvar = maybe_get_path_rvar(cx, rel, &src_path_id, PathAspect::Source);
        }
    }

    if rel_rvar.is_none() {
        if let Some(alt) = alt_aspect {
            // There is no source range var for the requested aspect;
            // check if there is a cached var with less specificity.
            let cached = cx
                .store
                .rel(rel)
                .path_namespace
                .get(&(path_id.clone(), alt))
                .cloned();
            if let Some(var) = cached {
                put_path_var_force(cx, rel, &path_id, var.clone(), aspect);
                return Ok(Some(var));
            }
        }
    }

    let rel_rvar = match rel_rvar {
        Some(rvar) => rvar,
        None => return Ok(None),
    };

    // Function and join rvars expose their outputs directly.
    if cx.store.rvar_rel(rel_rvar).is_none() {
        let cached = cx
            .store
            .rvar(rel_rvar)
            .path_outputs
            .get(&(path_id.clone(), aspect))
            .cloned();
        let outvar = match cached {
            Some(outvar) => outvar,
            None => return Ok(None),
        };
        let var = get_rvar_var(cx, rel_rvar, outvar);
        put_path_var_force(cx, rel, &path_id, var.clone(), aspect);
        return Ok(Some(var));
    }

    let source_rel = cx.store.rvar_rel(rel_rvar).expect("checked above");

    let mut drilldown_path_id = map_path_id(&path_id, &view_map);

    if cx.env.root_rels.contains(&source_rel)
        && cx.store.rel(source_rel).path_scope.len() == 1
    {
        let outer_path_id = if !drilldown_path_id.is_objtype_path() && ptrref.is_some() {
            drilldown_path_id
                .src_path()
                .unwrap_or_else(|| drilldown_path_id.clone())
        } else {
            drilldown_path_id.clone()
        };

        let inner = cx
            .store
            .rel(source_rel)
            .path_scope
            .first()
            .expect("single-bond root rel")
            .clone();
        let mut map = indexmap::IndexMap::new();
        map.insert(outer_path_id, inner);
        drilldown_path_id = map_path_id(&drilldown_path_id, &map);
    }

    let outvar = match get_path_output_ex(
        cx,
        source_rel,
        &drilldown_path_id,
        aspect,
        true,
        ptr_info.as_ref(),
    )? {
        Some(outvar) => outvar,
        None => return Ok(None),
    };

    let var = get_rvar_var(cx, rel_rvar, outvar);
    put_path_var_force(cx, rel, &path_id, var.clone(), aspect);

    if let Expr::TupleVar(tuple) = &var {
        for element in &tuple.elements {
            let _ = put_path_var(
                cx,
                rel,
                &element.path_id.clone(),
                (*element.val).clone(),
                aspect,
                false,
            );
        }
    }

    Ok(Some(var))
}

fn collect_set_op_outputs(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
    outputs: &mut Vec<(OutputVar, bool)>,
) -> Result<()> {
    if astutils::is_set_op_query(&cx.store, rel) {
        let (larg, rarg) = {
            let s = cx.store.rel(rel).select().expect("set op is a select");
            (s.larg, s.rarg)
        };
        for part in [larg, rarg].into_iter().flatten() {
            collect_set_op_outputs(cx, part, path_id, aspect, outputs)?;
        }
    } else {
        outputs.push(get_path_output_or_null(cx, rel, path_id, aspect)?);
    }
    Ok(())
}

pub fn get_path_identity_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<Expr> {
    get_path_var(cx, rel, path_id, PathAspect::Identity)
}

pub fn get_path_value_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<Expr> {
    get_path_var(cx, rel, path_id, PathAspect::Value)
}

pub fn maybe_get_path_value_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<Option<Expr>> {
    maybe_get_path_var(cx, rel, path_id, PathAspect::Value)
}

pub fn maybe_get_path_serialized_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<Option<Expr>> {
    maybe_get_path_var(cx, rel, path_id, PathAspect::Serialized)
}

/// Install `var` for `(path_id, aspect)` in `rel`'s namespace. Fails when
/// a var is already present and `force` is not set.
pub fn put_path_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    aspect: PathAspect,
    force: bool,
) -> Result<()> {
    let rel_data = cx.store.rel_mut(rel);
    let key = (path_id.clone(), aspect);
    if rel_data.path_namespace.contains_key(&key) && !force {
        return Err(Error::new_internal(format!(
            "{} of {path_id} is already present in rel {rel}",
            aspect.as_ref()
        )));
    }
    rel_data.path_namespace.insert(key, var);
    Ok(())
}

fn put_path_var_force(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    aspect: PathAspect,
) {
    put_path_var(cx, rel, path_id, var, aspect, true).expect("force insert cannot fail");
}

pub fn put_path_var_if_not_exists(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    aspect: PathAspect,
) {
    let _ = put_path_var(cx, rel, path_id, var, aspect, false);
}

pub fn put_path_value_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    force: bool,
) -> Result<()> {
    put_path_var(cx, rel, path_id, var, PathAspect::Value, force)
}

pub fn put_path_identity_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    force: bool,
) -> Result<()> {
    put_path_var(cx, rel, path_id, var, PathAspect::Identity, force)
}

pub fn put_path_serialized_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    var: Expr,
    force: bool,
) -> Result<()> {
    put_path_var(cx, rel, path_id, var, PathAspect::Serialized, force)
}

/// Mark `path_id` as joinable at `stmt`.
pub fn put_path_bond(cx: &mut CompilerState, stmt: RelId, path_id: &PathId) {
    cx.store.rel_mut(stmt).path_scope.insert(path_id.clone());
}

pub fn put_rvar_path_bond(cx: &mut CompilerState, rvar: RvarId, path_id: &PathId) {
    if let Some(rel) = cx.store.rvar_rel(rvar) {
        put_path_bond(cx, rel, path_id);
    }
}

pub fn get_path_output_alias(
    cx: &mut CompilerState,
    path_id: &PathId,
    aspect: PathAspect,
) -> String {
    let base = path_id.alias_hint();
    cx.env.aliases.get(&format!("{base}_{}", aspect.as_ref()))
}

/// Return the qualified expression for `path_id` provided by `rvar`.
pub fn get_rvar_path_var(
    cx: &mut CompilerState,
    rvar: RvarId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<Expr> {
    maybe_get_rvar_path_var(cx, rvar, path_id, aspect)?
        .ok_or_else(|| Error::new_internal(format!(
            "range var has no output for {path_id} {}",
            aspect.as_ref()
        )))
}

pub fn maybe_get_rvar_path_var(
    cx: &mut CompilerState,
    rvar: RvarId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<Option<Expr>> {
    let cached = cx
        .store
        .rvar(rvar)
        .path_outputs
        .get(&(path_id.clone(), aspect))
        .cloned();

    let outvar = if let Some(outvar) = cached {
        Some(outvar)
    } else if let Some(rel) = cx.store.rvar_rel(rvar) {
        if cx.store.rel(rel).is_terminal() {
            get_rel_path_output(cx, rel, path_id, aspect, None)?
        } else {
            get_path_output_ex(cx, rel, path_id, aspect, true, None)?
        }
    } else {
        None
    };

    Ok(outvar.map(|outvar| get_rvar_var(cx, rvar, outvar)))
}

pub fn get_rvar_path_identity_var(
    cx: &mut CompilerState,
    rvar: RvarId,
    path_id: &PathId,
) -> Result<Expr> {
    get_rvar_path_var(cx, rvar, path_id, PathAspect::Identity)
}

pub fn maybe_get_rvar_path_identity_var(
    cx: &mut CompilerState,
    rvar: RvarId,
    path_id: &PathId,
) -> Result<Option<Expr>> {
    maybe_get_rvar_path_var(cx, rvar, path_id, PathAspect::Identity)
}

pub fn put_rvar_path_output(
    cx: &mut CompilerState,
    rvar: RvarId,
    path_id: &PathId,
    aspect: PathAspect,
    var: OutputVar,
) {
    cx.store
        .rvar_mut(rvar)
        .path_outputs
        .insert((path_id.clone(), aspect), var);
}

/// Record `rvar` as the provider of `path_id` in `stmt`.
pub fn put_path_rvar(
    cx: &mut CompilerState,
    stmt: RelId,
    path_id: &PathId,
    rvar: RvarId,
    aspect: PathAspect,
) {
    cx.store
        .rel_mut(stmt)
        .path_rvar_map
        .insert((path_id.clone(), aspect), rvar);

    // Masked paths are not exposed in a query namespace. However, when
    // the masked path is the main path of a set, it must still be
    // exposed, but no further than the immediate parent query.
    if let Some(rel) = cx.store.rvar_rel(rvar) {
        if cx.store.rel(rel).path_id_mask.contains(path_id) {
            cx.store.rel_mut(stmt).path_id_mask.insert(path_id.clone());
        }
    }
}

pub fn put_path_rvar_if_not_exists(
    cx: &mut CompilerState,
    stmt: RelId,
    path_id: &PathId,
    rvar: RvarId,
    aspect: PathAspect,
) {
    if !cx
        .store
        .rel(stmt)
        .path_rvar_map
        .contains_key(&(path_id.clone(), aspect))
    {
        put_path_rvar(cx, stmt, path_id, rvar, aspect);
    }
}

pub fn get_path_rvar(
    cx: &CompilerState,
    stmt: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<RvarId> {
    maybe_get_path_rvar(cx, stmt, path_id, aspect)
        .ok_or_else(|| lookup_error(path_id, aspect, stmt))
}

pub fn maybe_get_path_rvar(
    cx: &CompilerState,
    stmt: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Option<RvarId> {
    let map = &cx.store.rel(stmt).path_rvar_map;
    if let Some(rvar) = map.get(&(path_id.clone(), aspect)) {
        return Some(*rvar);
    }
    if aspect == PathAspect::Identity {
        if let Some(rvar) = map.get(&(path_id.clone(), PathAspect::Value)) {
            return Some(*rvar);
        }
    }
    // External embeddings may pre-bind paths to existing ranges.
    cx.env
        .external_rvars
        .get(&(path_id.clone(), aspect))
        .copied()
}

fn same_expr(expr1: &Expr, expr2: &Expr) -> bool {
    match (expr1, expr2) {
        (Expr::ColumnRef(a), Expr::ColumnRef(b)) => a.name == b.name,
        _ => expr1 == expr2,
    }
}

fn find_path_output(cx: &CompilerState, rel: RelId, ref_expr: &Expr) -> Option<OutputVar> {
    if matches!(ref_expr, Expr::TupleVar(_)) {
        return None;
    }
    let rel_data = cx.store.rel(rel);
    for (key, other_ref) in &rel_data.path_namespace {
        if same_expr(other_ref, ref_expr) {
            if let Some(output) = rel_data.path_outputs.get(key) {
                return Some(output.clone());
            }
        }
    }
    None
}

fn put_path_output_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
    var: OutputVar,
) {
    cx.store
        .rel_mut(rel)
        .path_outputs
        .insert((path_id.clone(), aspect), var);
}

fn get_rel_object_id_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> OutputVar {
    if let Some(var) = cx
        .store
        .rel(rel)
        .path_outputs
        .get(&(path_id.clone(), aspect))
    {
        return var.clone();
    }

    let result = if matches!(cx.store.rel(rel).kind, crate::pgast::RelKind::NullRelation) {
        let name = cx.env.aliases.get("id");
        let val = Expr::TypeCast {
            arg: Box::new(Expr::NullConstant),
            type_name: TypeName::unqualified("uuid"),
        };
        cx.store
            .rel_mut(rel)
            .target_list
            .push(ResTarget::new(Some(name.clone()), val));
        OutputVar::ColumnRef(ColumnRef::new(vec![name]).nullable(true))
    } else {
        OutputVar::ColumnRef(ColumnRef::new(vec!["id".to_string()]))
    };

    put_path_output_var(cx, rel, path_id, aspect, result.clone());
    result
}

/// Output of a path from a terminal relation (a base table or a
/// null-relation).
fn get_rel_path_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
    ptr_info: Option<&PointerStorageInfo>,
) -> Result<Option<OutputVar>> {
    let mut aspect = aspect;
    if path_id.is_objtype_path() {
        if aspect == PathAspect::Identity {
            aspect = PathAspect::Value;
        }
        if aspect != PathAspect::Value {
            return Ok(None);
        }
        let rel_path_id = cx.store.rel(rel).path_id.clone();
        if let Some(rel_path_id) = rel_path_id {
            let matches_rel = *path_id == rel_path_id
                || (rel_path_id.is_type_intersection_path()
                    && rel_path_id.src_path().as_ref() == Some(path_id));
            if matches_rel {
                return Ok(Some(get_rel_object_id_output(cx, rel, path_id, aspect)));
            }
        }
    } else {
        if aspect == PathAspect::Identity {
            return Ok(None);
        }
        if aspect == PathAspect::Serialized {
            aspect = PathAspect::Value;
        }
    }

    if let Some(var) = cx
        .store
        .rel(rel)
        .path_outputs
        .get(&(path_id.clone(), aspect))
    {
        return Ok(Some(var.clone()));
    }

    let ptrref = path_id.rptr().cloned();
    let rptr_dir = path_id.rptr_dir();

    if rptr_dir.is_some() && rptr_dir != Some(PtrDir::Outbound) {
        // An inbound pointer cannot be resolved on a base relation.
        return Ok(None);
    }

    let result = if matches!(cx.store.rel(rel).kind, crate::pgast::RelKind::NullRelation) {
        let target = match &ptrref {
            Some(ptr) => (*ptr.target).clone(),
            None => path_id.target().clone(),
        };
        let pg_type = types::pg_type_from_ir_typeref(&target, false, false);
        let name = match ptr_info {
            Some(info) => cx.env.aliases.get(&info.column_name),
            None => cx.env.aliases.get("v"),
        };
        let val = Expr::TypeCast {
            arg: Box::new(Expr::NullConstant),
            type_name: TypeName::new(pg_type),
        };
        cx.store
            .rel_mut(rel)
            .target_list
            .push(ResTarget::new(Some(name.clone()), val));
        OutputVar::ColumnRef(ColumnRef::new(vec![name]).nullable(true))
    } else {
        let ptrref = match ptrref {
            Some(ptrref) => ptrref,
            None => {
                return Err(Error::new_internal(format!(
                    "could not resolve trailing pointer class for {path_id}"
                )))
            }
        };
        let resolved;
        let info = match ptr_info {
            Some(info) => info,
            None => {
                resolved = types::ptr_storage_info(&ptrref, false)?;
                &resolved
            }
        };
        OutputVar::ColumnRef(
            ColumnRef::new(vec![info.column_name.clone()]).nullable(!ptrref.required),
        )
    };

    put_path_output_var(cx, rel, path_id, aspect, result.clone());
    Ok(Some(result))
}

pub fn get_path_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<OutputVar> {
    get_path_output_ex(cx, rel, path_id, aspect, true, None)?
        .ok_or_else(|| lookup_error(path_id, aspect, rel))
}

pub fn maybe_get_path_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<Option<OutputVar>> {
    get_path_output_ex(cx, rel, path_id, aspect, true, None)
}

pub fn get_path_output_ex(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
    allow_nullable: bool,
    ptr_info: Option<&PointerStorageInfo>,
) -> Result<Option<OutputVar>> {
    let view_map = cx.store.rel(rel).view_path_id_map.clone();
    let path_id = map_path_id(path_id, &view_map);
    get_path_output_inner(cx, rel, &path_id, aspect, allow_nullable, ptr_info)
}

fn get_path_output_inner(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
    allow_nullable: bool,
    ptr_info: Option<&PointerStorageInfo>,
) -> Result<Option<OutputVar>> {
    if let Some(result) = cx
        .store
        .rel(rel)
        .path_outputs
        .get(&(path_id.clone(), aspect))
    {
        return Ok(Some(result.clone()));
    }

    if let Some(rptr) = path_id.rptr() {
        if rptr.is_id() {
            // A value reference to Object.id is the same as a value
            // reference to the Object itself.
            if let Some(src_path_id) = path_id.src_path() {
                let id_output = cx
                    .store
                    .rel(rel)
                    .path_outputs
                    .get(&(src_path_id, PathAspect::Value))
                    .cloned();
                if let Some(id_output) = id_output {
                    put_path_output_var(cx, rel, path_id, aspect, id_output.clone());
                    return Ok(Some(id_output));
                }
            }
        }
    }

    if cx.store.rel(rel).is_terminal() {
        return get_rel_path_output(cx, rel, path_id, aspect, ptr_info);
    }

    let ref_expr = match maybe_get_path_var(cx, rel, path_id, aspect)? {
        Some(expr) => expr,
        None => return Ok(None),
    };

    if let Some(other_output) = find_path_output(cx, rel, &ref_expr) {
        put_path_output_var(cx, rel, path_id, aspect, other_output.clone());
        return Ok(Some(other_output));
    }

    let result = if let Expr::TupleVar(tuple) = &ref_expr {
        let view_map = cx.store.rel(rel).view_path_id_map.clone();
        let mut elements = Vec::new();
        for el in &tuple.elements {
            let el_path_id = reverse_map_path_id(&el.path_id, &view_map);
            let element =
                match get_path_output_inner(cx, rel, &el_path_id, aspect, false, None)? {
                    Some(out) => out,
                    None => get_path_output_ex(cx, rel, &el_path_id, aspect, false, None)?
                        .ok_or_else(|| lookup_error(&el_path_id, aspect, rel))?,
                };
            let name = match &element {
                OutputVar::ColumnRef(c) => c.name.last().cloned(),
                OutputVar::TupleVar(_) => None,
            };
            elements.push(TupleElement {
                path_id: el_path_id,
                name,
                val: Box::new(element.into_expr()),
            });
        }
        OutputVar::TupleVar(TupleVar {
            elements,
            named: tuple.named,
            nullable: tuple.nullable,
        })
    } else if astutils::is_set_op_query(&cx.store, rel) {
        match ref_expr {
            Expr::ColumnRef(c) => strip_output_var(OutputVar::ColumnRef(c), false, false),
            other => {
                return Err(Error::new_internal(format!(
                    "unexpected path var in set-op query: {other:?}"
                )))
            }
        }
    } else {
        let alias = get_path_output_alias(cx, path_id, aspect);
        let ser_safe = matches!(&ref_expr, Expr::ColumnRef(c) if c.ser_safe);
        cx.store.rel_mut(rel).target_list.push(ResTarget {
            name: Some(alias.clone()),
            val: ref_expr.clone(),
            ser_safe,
        });

        let mut nullable = cx.store.is_nullable(&ref_expr);
        let optional = matches!(&ref_expr, Expr::ColumnRef(c) if c.optional);

        if nullable && !allow_nullable {
            let var = get_path_var(cx, rel, path_id, aspect)?;
            let rel_data = cx.store.rel_mut(rel);
            rel_data.where_clause = Some(astutils::extend_binop(
                rel_data.where_clause.take(),
                Expr::NullTest {
                    arg: Box::new(var),
                    negated: true,
                },
                "AND",
            ));
            nullable = false;
        }

        OutputVar::ColumnRef(ColumnRef {
            name: vec![alias],
            nullable,
            optional,
            ser_safe,
        })
    };

    put_path_output_var(cx, rel, path_id, aspect, result.clone());
    if aspect == PathAspect::Identity && path_id.is_objtype_path() {
        let key = (path_id.clone(), PathAspect::Value);
        if !cx.store.rel(rel).path_outputs.contains_key(&key) {
            put_path_output_var(cx, rel, path_id, PathAspect::Value, result.clone());
        }
    }

    Ok(Some(result))
}

pub fn get_path_identity_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<OutputVar> {
    get_path_output(cx, rel, path_id, PathAspect::Identity)
}

pub fn get_path_value_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<OutputVar> {
    get_path_output(cx, rel, path_id, PathAspect::Value)
}

pub fn get_path_serialized_or_value_var(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<Expr> {
    match maybe_get_path_serialized_var(cx, rel, path_id)? {
        Some(expr) => Ok(expr),
        None => get_path_value_var(cx, rel, path_id),
    }
}

/// Serialized output is a special case: the serialization must not be
/// applied recursively, so it is kept outside of the generic
/// [get_path_output].
pub fn get_path_serialized_output(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
) -> Result<OutputVar> {
    let aspect = PathAspect::Serialized;
    if let Some(result) = cx
        .store
        .rel(rel)
        .path_outputs
        .get(&(path_id.clone(), aspect))
    {
        return Ok(result.clone());
    }

    let ref_expr = get_path_serialized_or_value_var(cx, rel, path_id)?;
    let ref_expr = output::serialize_expr(cx, ref_expr, path_id)?;
    let alias = get_path_output_alias(cx, path_id, aspect);

    let nullable = cx.store.is_nullable(&ref_expr);
    cx.store.rel_mut(rel).target_list.push(ResTarget {
        name: Some(alias.clone()),
        val: ref_expr,
        ser_safe: true,
    });

    let result = OutputVar::ColumnRef(ColumnRef {
        name: vec![alias],
        nullable,
        optional: false,
        ser_safe: true,
    });
    put_path_output_var(cx, rel, path_id, aspect, result.clone());
    Ok(result)
}

/// Like [get_path_output], but falls back to a NULL column when the rel
/// does not provide the path; returns whether the fallback was taken.
pub fn get_path_output_or_null(
    cx: &mut CompilerState,
    rel: RelId,
    path_id: &PathId,
    aspect: PathAspect,
) -> Result<(OutputVar, bool)> {
    let view_map = cx.store.rel(rel).view_path_id_map.clone();
    let path_id = map_path_id(path_id, &view_map);

    if let Some(ref_var) = get_path_output_ex(cx, rel, &path_id, aspect, true, None)? {
        return Ok((ref_var, false));
    }

    if let Some(alt_aspect) = get_less_specific_aspect(&path_id, aspect) {
        if let Some(ref_var) = get_path_output_ex(cx, rel, &path_id, alt_aspect, true, None)? {
            put_path_output_var(cx, rel, &path_id, aspect, ref_var.clone());
            return Ok((ref_var, false));
        }
    }

    let alias = cx.env.aliases.get("null");
    cx.store
        .rel_mut(rel)
        .target_list
        .push(ResTarget::new(Some(alias.clone()), Expr::NullConstant));

    let ref_var = OutputVar::ColumnRef(ColumnRef::new(vec![alias]).nullable(true));
    put_path_output_var(cx, rel, &path_id, aspect, ref_var.clone());
    Ok((ref_var, true))
}

/// Qualify an output var with the alias of the range var providing it.
pub fn get_rvar_var(cx: &CompilerState, rvar: RvarId, outvar: OutputVar) -> Expr {
    let rvar_data = cx.store.rvar(rvar);
    match outvar {
        OutputVar::TupleVar(tuple) => {
            let elements = tuple
                .elements
                .into_iter()
                .map(|el| {
                    let val = match &el.name {
                        Some(name) => Expr::ColumnRef(ColumnRef {
                            name: vec![rvar_data.alias.aliasname.clone(), name.clone()],
                            nullable: el.val.is_nullable_shallow(),
                            optional: false,
                            ser_safe: false,
                        }),
                        None => (*el.val).clone(),
                    };
                    TupleElement {
                        val: Box::new(val),
                        ..el
                    }
                })
                .collect();
            Expr::TupleVar(TupleVar {
                elements,
                named: tuple.named,
                nullable: tuple.nullable,
            })
        }
        OutputVar::ColumnRef(col) => {
            let name = col
                .name
                .last()
                .cloned()
                .expect("column ref cannot be empty");
            Expr::ColumnRef(ColumnRef {
                name: vec![rvar_data.alias.aliasname.clone(), name],
                nullable: col.nullable || rvar_is_nullable(cx, rvar),
                optional: col.optional,
                ser_safe: col.ser_safe,
            })
        }
    }
}

fn rvar_is_nullable(cx: &CompilerState, rvar: RvarId) -> bool {
    match &cx.store.rvar(rvar).kind {
        RvarKind::Join { join_type, .. } => {
            matches!(join_type, crate::pgast::JoinType::Left | crate::pgast::JoinType::Full)
        }
        _ => false,
    }
}

/// Drop the rvar qualification from an output var.
pub fn strip_output_var(outvar: OutputVar, optional: bool, nullable: bool) -> OutputVar {
    match outvar {
        OutputVar::ColumnRef(col) => {
            let name = col
                .name
                .last()
                .cloned()
                .expect("column ref cannot be empty");
            OutputVar::ColumnRef(ColumnRef {
                name: vec![name],
                nullable: nullable || col.nullable,
                optional: optional || col.optional,
                ser_safe: col.ser_safe,
            })
        }
        OutputVar::TupleVar(tuple) => OutputVar::TupleVar(tuple),
    }
}
