//! Compilation of INSERT/UPDATE/DELETE statements.
//!
//! DML flattens to a sequence of CTEs on the toplevel statement: an
//! optional range CTE (UPDATE/DELETE), the main DML CTE, one link-table
//! CTE per multi pointer or link-with-properties, and check CTEs for
//! constraints PostgreSQL cannot enforce. After the main CTE is
//! compiled, overlays are recorded so later reads inside the same
//! statement observe the effects.

use uuid::Uuid;

use super::astutils;
use super::clauses;
use super::context::{CompilerState, OverlayOp, OverlayTarget};
use super::dispatch;
use super::pathctx;
use super::relctx;
use crate::error::Error;
use crate::ir::{self, ShapeOp};
use crate::pgast::{
    Alias, ColumnRef, CommonTableExpr, CteId, Expr, FuncCall, InferClause, InsertStmt,
    MultiAssignTarget, OnConflictAction, OnConflictClause, OutputVar, PathAspect, Rel, RelId,
    RelKind, ResTarget, Rvar, RvarId, RvarKind, TypeName, UpdateStmt, UpdateTarget,
};
use crate::types::{self, TableType};
use crate::Result;

struct DmlParts {
    dml_cte: CteId,
    dml_rvar: RvarId,
}

fn uuid_const(id: Uuid) -> Expr {
    Expr::TypeCast {
        arg: Box::new(Expr::StringConstant { val: id.to_string() }),
        type_name: TypeName::unqualified("uuid"),
    }
}

/// A value set for a shape element: the element's computed expression
/// detached from its pointer step, so it compiles as a plain set.
fn shape_value_set(el: &ir::ShapeElement) -> Result<ir::Set> {
    let expr = el
        .set
        .expr
        .clone()
        .ok_or_else(|| Error::new_internal("DML shape element carries no value"))?;
    Ok(ir::Set {
        path_id: el.set.path_id.clone(),
        typeref: el.set.typeref.clone(),
        rptr: None,
        expr: Some(expr),
        shape: vec![],
        scope_id: el.set.scope_id,
    })
}

fn is_link_table_element(el: &ir::ShapeElement) -> Result<bool> {
    let rptr = el
        .set
        .rptr
        .as_ref()
        .ok_or_else(|| Error::new_internal("DML shape element has no pointer"))?;
    let info = types::ptr_storage_info(&rptr.ptrref, false)?;
    Ok(info.table_type == TableType::Link)
}

fn expose_subject_outputs(rel: &mut Rel, path_id: &ir::PathId) {
    let id_col = OutputVar::ColumnRef(ColumnRef::new(vec!["id".to_string()]));
    rel.path_outputs
        .insert((path_id.clone(), PathAspect::Identity), id_col.clone());
    rel.path_outputs
        .insert((path_id.clone(), PathAspect::Value), id_col);
    rel.path_id = Some(path_id.clone());
    rel.path_scope.insert(path_id.clone());
}

/// Compile the range CTE of an UPDATE/DELETE: the subject's WHERE with
/// identity columns materialised.
fn get_dml_range(
    cx: &mut CompilerState,
    subject: &ir::Set,
    where_clause: Option<&ir::Set>,
) -> Result<CteId> {
    let range_rel = cx.subrel(|cx| -> Result<RelId> {
        let range_rel = cx.rel();
        relctx::update_scope(cx, subject, range_rel);
        cx.frame_mut()
            .path_scope
            .insert(subject.path_id.clone(), range_rel);
        let rvar = super::relgen::get_set_rvar(cx, subject)?;
        relctx::include_rvar(cx, range_rel, rvar, &subject.path_id)?;

        if let Some(where_clause) = where_clause {
            let filter = clauses::compile_filter_clause(cx, where_clause)?;
            let rel = cx.store.rel_mut(range_rel);
            rel.where_clause = Some(astutils::extend_binop(
                rel.where_clause.take(),
                filter,
                "AND",
            ));
        }

        pathctx::get_path_output(cx, range_rel, &subject.path_id, PathAspect::Identity)?;
        Ok(range_rel)
    })?;

    let name = cx.env.aliases.get(&format!(
        "{}_range",
        subject.typeref.short_name().to_lowercase()
    ));
    let cte = cx.store.add_cte(CommonTableExpr {
        name,
        query: range_rel,
        recursive: false,
        materialized: None,
        aliascolnames: vec![],
    });
    cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);
    Ok(cte)
}

fn wrap_dml_cte(
    cx: &mut CompilerState,
    dml_rel: RelId,
    subject: &ir::Set,
    kind: &str,
) -> Result<DmlParts> {
    let name = cx.env.aliases.get(&format!(
        "{kind}_{}",
        subject.typeref.short_name().to_lowercase()
    ));
    let dml_cte = cx.store.add_cte(CommonTableExpr {
        name,
        query: dml_rel,
        recursive: false,
        materialized: None,
        aliascolnames: vec![],
    });
    cx.store.rel_mut(cx.toplevel_stmt).ctes.push(dml_cte);

    let alias = cx.env.aliases.get(kind);
    let dml_rvar = cx
        .store
        .add_rvar(Rvar::new(RvarKind::Cte(dml_cte), Alias::new(alias)));

    Ok(DmlParts { dml_cte, dml_rvar })
}

/// Finalise a DML statement: recompile trigger bodies with the overlays
/// of the owning statement active, compile the residual constraint
/// checks, and hand the DML range to the enclosing statement.
fn fini_dml_stmt(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    subject: &ir::Set,
    parts: &DmlParts,
    triggers: &[ir::Trigger],
    checks: &[ir::Set],
) -> Result<()> {
    compile_trigger_ctes(cx, triggers)?;
    compile_checks(cx, checks)?;

    let path_id = &subject.path_id;
    let stmt_rel = cx.rel();
    relctx::include_rvar(cx, stmt_rel, parts.dml_rvar, path_id)?;
    if &ir_set.path_id != path_id {
        cx.store
            .rel_mut(stmt_rel)
            .view_path_id_map
            .insert(ir_set.path_id.clone(), path_id.clone());
    }
    Ok(())
}

/// Trigger bodies run against the owning statement's overlays, so any
/// range over the subject type or its pointers already includes the
/// statement's effects. Their work is emitted as further CTEs appended
/// to the toplevel; DML inside a body appends its own CTE sequence the
/// usual way.
fn compile_trigger_ctes(cx: &mut CompilerState, triggers: &[ir::Trigger]) -> Result<()> {
    for trigger in triggers {
        log::debug!("compiling trigger {}", trigger.name);
        let trig_rel = cx.subrel(|cx| -> Result<RelId> {
            cx.frame_mut().expr_exposed = false;
            let val = dispatch::compile_set(cx, &trigger.body)?;
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .target_list
                .push(ResTarget::new(None, val));
            Ok(rel)
        })?;
        let name = cx.env.aliases.get(&format!("trig_{}", trigger.name));
        let cte = cx.store.add_cte(CommonTableExpr {
            name,
            query: trig_rel,
            recursive: false,
            materialized: None,
            aliascolnames: vec![],
        });
        cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);
    }
    Ok(())
}

fn compile_checks(cx: &mut CompilerState, checks: &[ir::Set]) -> Result<()> {
    for check in checks {
        let check_rel = cx.subrel(|cx| -> Result<RelId> {
            cx.frame_mut().expr_exposed = false;
            let val = dispatch::compile_set(cx, check)?;
            let rel = cx.rel();
            cx.store
                .rel_mut(rel)
                .target_list
                .push(ResTarget::new(None, val));
            Ok(rel)
        })?;
        let name = cx.env.aliases.get("check");
        let cte = cx.store.add_cte(CommonTableExpr {
            name,
            query: check_rel,
            recursive: false,
            materialized: None,
            aliascolnames: vec![],
        });
        cx.check_ctes.push(cte);
    }
    Ok(())
}

// ---- INSERT ------------------------------------------------------------

pub fn compile_insert_stmt(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    stmt: &ir::InsertStmt,
) -> Result<()> {
    cx.dml_counter += 1;
    let subject = &stmt.subject;
    let typeref = &subject.typeref;
    let path_id = &subject.path_id;

    let table_rel = relctx::table_from_typeref(cx, typeref, path_id);
    let relation_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Relation {
            rel: table_rel,
            include_inherited: true,
        },
        Alias::default(),
    ));

    // The contents select: one row of inline column values.
    let mut cols: Vec<String> = Vec::new();
    let mut link_elements: Vec<&ir::ShapeElement> = Vec::new();

    let select_rel = cx.subrel(|cx| -> Result<RelId> {
        let select_rel = cx.rel();
        cx.frame_mut().expr_exposed = false;

        let mut have_id = false;
        let mut values: Vec<(String, Expr)> = Vec::new();

        for el in &subject.shape {
            if el.op == ShapeOp::Subtract {
                return Err(Error::new_simple(
                    "cannot subtract from a pointer in INSERT",
                ));
            }
            let rptr = el
                .set
                .rptr
                .as_ref()
                .ok_or_else(|| Error::new_internal("INSERT shape element has no pointer"))?;
            if is_link_table_element(el)? {
                link_elements.push(el);
                continue;
            }
            let info = types::ptr_storage_info(&rptr.ptrref, false)?;
            if info.column_name == "id" {
                have_id = true;
            }
            let value_set = shape_value_set(el)?;
            let value = dispatch::compile_set(cx, &value_set)?;
            values.push((info.column_name.clone(), value));
        }

        if !have_id {
            values.insert(
                0,
                (
                    "id".to_string(),
                    Expr::FuncCall(Box::new(FuncCall::new(
                        &[types::HELPER_SCHEMA, "uuid_generate_v4"],
                        vec![],
                    ))),
                ),
            );
        }
        values.insert(1, ("__type__".to_string(), uuid_const(typeref.id)));

        for (col, val) in values {
            cols.push(col.clone());
            cx.store
                .rel_mut(select_rel)
                .target_list
                .push(ResTarget::new(Some(col), val));
        }

        Ok(select_rel)
    })?;

    let mut insert_rel = Rel::new(RelKind::Insert(InsertStmt {
        relation: relation_rvar,
        cols,
        select_stmt: Some(select_rel),
        on_conflict: None,
    }));
    insert_rel
        .target_list
        .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
            "id".to_string(),
        ]))));
    expose_subject_outputs(&mut insert_rel, path_id);
    let insert_rel = cx.store.add_rel(insert_rel);

    let parts = wrap_dml_cte(cx, insert_rel, subject, "ins")?;

    for el in link_elements {
        let link_cte = process_link_update(cx, path_id, parts.dml_cte, el, false)?;
        let rptr = el.set.rptr.as_ref().expect("checked above");
        relctx::add_ptr_rel_overlay(
            cx,
            &rptr.ptrref,
            OverlayOp::Union,
            OverlayTarget::Cte(link_cte),
            &el.set.path_id,
        );
    }

    // Subsequent reads of the subject type within this statement observe
    // the inserted rows.
    relctx::add_type_rel_overlay(
        cx,
        typeref.id,
        OverlayOp::Union,
        OverlayTarget::Cte(parts.dml_cte),
        path_id,
    );

    fini_dml_stmt(cx, ir_set, subject, &parts, &stmt.triggers, &stmt.checks)
}

// ---- UPDATE ------------------------------------------------------------

pub fn compile_update_stmt(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    stmt: &ir::UpdateStmt,
) -> Result<()> {
    cx.dml_counter += 1;
    let subject = &stmt.subject;
    let typeref = &subject.typeref;
    let path_id = &subject.path_id;

    let range_cte = get_dml_range(cx, subject, stmt.where_clause.as_ref())?;
    let range_alias = cx.env.aliases.get("range");
    let range_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Cte(range_cte),
        Alias::new(range_alias.clone()),
    ));

    let table_rel = relctx::table_from_typeref(cx, typeref, path_id);
    let table_alias = cx
        .env
        .aliases
        .get(&typeref.short_name().to_lowercase());
    let relation_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Relation {
            rel: table_rel,
            include_inherited: true,
        },
        Alias::new(table_alias.clone()),
    ));

    let mut targets: Vec<UpdateTarget> = Vec::new();
    let mut link_elements: Vec<(&ir::ShapeElement, ShapeOp)> = Vec::new();

    let mut update_rel = Rel::new(RelKind::Update(UpdateStmt {
        relation: relation_rvar,
        targets: vec![],
        from_clause: vec![range_rvar],
    }));

    // Identity of the target row is wired via the range CTE.
    let range_id = Expr::ColumnRef(ColumnRef::new(vec![
        range_alias.clone(),
        "id".to_string(),
    ]));
    let table_id = Expr::ColumnRef(ColumnRef::new(vec![table_alias, "id".to_string()]));
    update_rel.where_clause = Some(astutils::new_binop(table_id, range_id, "="));

    update_rel
        .target_list
        .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
            "id".to_string(),
        ]))));
    expose_subject_outputs(&mut update_rel, path_id);
    let update_rel_id = cx.store.add_rel(update_rel);

    // Compile the SET values; they may refer to the updated object
    // through the range CTE.
    cx.switch(super::context::ContextSwitchMode::Transparent, |cx| {
        cx.frame_mut().expr_exposed = false;
        for el in &subject.shape {
            let rptr = el
                .set
                .rptr
                .as_ref()
                .ok_or_else(|| Error::new_internal("UPDATE shape element has no pointer"))?;
            if is_link_table_element(el)? {
                link_elements.push((el, el.op));
                continue;
            }
            let info = types::ptr_storage_info(&rptr.ptrref, false)?;
            let value_set = shape_value_set(el)?;
            let value = dispatch::compile_set(cx, &value_set)?;
            targets.push(UpdateTarget {
                name: info.column_name.clone(),
                val: value,
            });
        }
        Ok::<_, Error>(())
    })?;

    cx.store
        .rel_mut(update_rel_id)
        .kind
        .as_update_mut()
        .expect("update rel")
        .targets = targets;

    let parts = wrap_dml_cte(cx, update_rel_id, subject, "upd")?;

    for (el, op) in link_elements {
        let rptr = el.set.rptr.as_ref().expect("checked above");
        let subtract = op == ShapeOp::Subtract;
        let link_cte = process_link_update(cx, path_id, parts.dml_cte, el, subtract)?;
        let overlay_op = match op {
            ShapeOp::Assign => OverlayOp::Replace,
            ShapeOp::Append => OverlayOp::Union,
            ShapeOp::Subtract => OverlayOp::Except,
            ShapeOp::Get => continue,
        };
        relctx::add_ptr_rel_overlay(
            cx,
            &rptr.ptrref,
            overlay_op,
            OverlayTarget::Cte(link_cte),
            &el.set.path_id,
        );
    }

    fini_dml_stmt(cx, ir_set, subject, &parts, &stmt.triggers, &stmt.checks)
}

// ---- DELETE ------------------------------------------------------------

pub fn compile_delete_stmt(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    stmt: &ir::DeleteStmt,
) -> Result<()> {
    cx.dml_counter += 1;
    let subject = &stmt.subject;
    let typeref = &subject.typeref;
    let path_id = &subject.path_id;

    let range_cte = get_dml_range(cx, subject, stmt.where_clause.as_ref())?;
    let range_alias = cx.env.aliases.get("range");
    let range_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Cte(range_cte),
        Alias::new(range_alias.clone()),
    ));

    let table_rel = relctx::table_from_typeref(cx, typeref, path_id);
    let table_alias = cx
        .env
        .aliases
        .get(&typeref.short_name().to_lowercase());
    let relation_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Relation {
            rel: table_rel,
            include_inherited: true,
        },
        Alias::new(table_alias.clone()),
    ));

    let mut delete_rel = Rel::new(RelKind::Delete(crate::pgast::DeleteStmt {
        relation: relation_rvar,
        using_clause: vec![range_rvar],
    }));
    let range_id = Expr::ColumnRef(ColumnRef::new(vec![range_alias, "id".to_string()]));
    let table_id = Expr::ColumnRef(ColumnRef::new(vec![table_alias, "id".to_string()]));
    delete_rel.where_clause = Some(astutils::new_binop(table_id, range_id, "="));
    delete_rel
        .target_list
        .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
            "id".to_string(),
        ]))));
    expose_subject_outputs(&mut delete_rel, path_id);
    let delete_rel_id = cx.store.add_rel(delete_rel);

    let parts = wrap_dml_cte(cx, delete_rel_id, subject, "del")?;

    // Subsequent reads of the subject type within this statement do not
    // observe the deleted rows.
    relctx::add_type_rel_overlay(
        cx,
        typeref.id,
        OverlayOp::Except,
        OverlayTarget::Cte(parts.dml_cte),
        path_id,
    );

    fini_dml_stmt(cx, ir_set, subject, &parts, &stmt.triggers, &[])
}

// ---- link tables -------------------------------------------------------

/// Compile a link-table update for one shape element.
///
/// UPDATE first deletes the existing rows whose source is being updated,
/// then inserts the new `(source, target, props...)` rows computed from a
/// lateral subquery. Collisions against the not-yet-visible DELETE are
/// resolved with `ON CONFLICT ... DO UPDATE`.
fn process_link_update(
    cx: &mut CompilerState,
    _subject_path: &ir::PathId,
    dml_cte: CteId,
    el: &ir::ShapeElement,
    subtract: bool,
) -> Result<CteId> {
    let rptr = el.set.rptr.as_ref().expect("link element has a pointer");
    let ptrref = &rptr.ptrref;
    let (schemaname, relname) = types::get_pointer_backend_name(ptrref);

    let table_rel = cx.store.add_rel(Rel::new(RelKind::Table(
        crate::pgast::BaseTable {
            schemaname: Some(schemaname.clone()),
            relname: relname.clone(),
        },
    )));

    let dml_alias = cx.env.aliases.get("d");
    let dml_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Cte(dml_cte),
        Alias::new(dml_alias.clone()),
    ));

    if subtract {
        // A `-=` update deletes the matching link rows instead of
        // replacing the set.
        let link_alias = cx.env.aliases.get("l");
        let link_rvar = cx.store.add_rvar(Rvar::new(
            RvarKind::Relation {
                rel: table_rel,
                include_inherited: true,
            },
            Alias::new(link_alias.clone()),
        ));

        let mut del_rel = Rel::new(RelKind::Delete(crate::pgast::DeleteStmt {
            relation: link_rvar,
            using_clause: vec![dml_rvar],
        }));

        let tgt_sel = cx.subrel(|cx| -> Result<RelId> {
            let rel = cx.rel();
            cx.frame_mut().expr_exposed = false;
            let value_set = shape_value_set(el)?;
            let value = dispatch::compile_set(cx, &value_set)?;
            cx.store
                .rel_mut(rel)
                .target_list
                .push(ResTarget::new(None, value));
            Ok(rel)
        })?;

        del_rel.where_clause = Some(astutils::extend_binop(
            Some(astutils::new_binop(
                Expr::ColumnRef(ColumnRef::new(vec![
                    link_alias.clone(),
                    "source".to_string(),
                ])),
                Expr::ColumnRef(ColumnRef::new(vec![dml_alias, "id".to_string()])),
                "=",
            )),
            Expr::SubLink {
                op: crate::pgast::SubLinkOp::Any,
                test_expr: Some(Box::new(Expr::ColumnRef(ColumnRef::new(vec![
                    link_alias,
                    "target".to_string(),
                ])))),
                operator: Some("=".to_string()),
                rel: tgt_sel,
            },
            "AND",
        ));
        del_rel
            .target_list
            .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
                "source".to_string(),
            ]))));
        del_rel
            .target_list
            .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
                "target".to_string(),
            ]))));
        let del_rel = cx.store.add_rel(del_rel);

        let name = cx.env.aliases.get(&format!("unlink_{}", ptrref.shortname));
        let cte = cx.store.add_cte(CommonTableExpr {
            name,
            query: del_rel,
            recursive: false,
            materialized: None,
            aliascolnames: vec![],
        });
        cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);
        return Ok(cte);
    }

    if el.op == ShapeOp::Assign {
        // Replace semantics: delete the existing rows first. The delete
        // is not visible to the insert below, hence the ON CONFLICT
        // resolution there.
        let link_alias = cx.env.aliases.get("l");
        let link_rvar = cx.store.add_rvar(Rvar::new(
            RvarKind::Relation {
                rel: table_rel,
                include_inherited: true,
            },
            Alias::new(link_alias.clone()),
        ));
        let del_dml_alias = cx.env.aliases.get("d");
        let del_dml_rvar = cx.store.add_rvar(Rvar::new(
            RvarKind::Cte(dml_cte),
            Alias::new(del_dml_alias.clone()),
        ));

        let mut del_rel = Rel::new(RelKind::Delete(crate::pgast::DeleteStmt {
            relation: link_rvar,
            using_clause: vec![del_dml_rvar],
        }));
        del_rel.where_clause = Some(astutils::new_binop(
            Expr::ColumnRef(ColumnRef::new(vec![link_alias, "source".to_string()])),
            Expr::ColumnRef(ColumnRef::new(vec![del_dml_alias, "id".to_string()])),
            "=",
        ));
        let del_rel = cx.store.add_rel(del_rel);

        let name = cx
            .env
            .aliases
            .get(&format!("clear_{}", ptrref.shortname));
        let cte = cx.store.add_cte(CommonTableExpr {
            name,
            query: del_rel,
            recursive: false,
            materialized: None,
            aliascolnames: vec![],
        });
        cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);
    }

    // The rows to insert, computed from a lateral subquery over the new
    // target set.
    let link_table_rel = cx.store.add_rel(Rel::new(RelKind::Table(
        crate::pgast::BaseTable {
            schemaname: Some(schemaname),
            relname,
        },
    )));
    let ins_relation_rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Relation {
            rel: link_table_rel,
            include_inherited: true,
        },
        Alias::default(),
    ));

    // Link property columns come from the value shape.
    let mut prop_cols: Vec<String> = Vec::new();
    for prop_el in &el.set.shape {
        if let Some(prop_ptr) = &prop_el.set.rptr {
            if prop_ptr.ptrref.is_link_property()
                && prop_ptr.ptrref.shortname != "source"
                && prop_ptr.ptrref.shortname != "target"
            {
                prop_cols.push(prop_ptr.ptrref.shortname.clone());
            }
        }
    }

    let select_rel = cx.subrel(|cx| -> Result<RelId> {
        let select_rel = cx.rel();
        cx.frame_mut().expr_exposed = false;

        let value_set = shape_value_set(el)?;
        let target_val = dispatch::compile_set(cx, &value_set)?;

        {
            let sel = cx
                .store
                .rel_mut(select_rel)
                .select_mut()
                .expect("fresh select");
            sel.from_clause.insert(0, dml_rvar);
        }

        cx.store.rel_mut(select_rel).target_list.push(ResTarget::new(
            Some("source".to_string()),
            Expr::ColumnRef(ColumnRef::new(vec![dml_alias.clone(), "id".to_string()])),
        ));
        cx.store.rel_mut(select_rel).target_list.push(ResTarget::new(
            Some("target".to_string()),
            target_val,
        ));
        cx.store.rel_mut(select_rel).target_list.push(ResTarget::new(
            Some("ptr_item_id".to_string()),
            uuid_const(ptrref.id),
        ));

        for prop_el in &el.set.shape {
            let Some(prop_ptr) = &prop_el.set.rptr else {
                continue;
            };
            if !prop_ptr.ptrref.is_link_property()
                || prop_ptr.ptrref.shortname == "source"
                || prop_ptr.ptrref.shortname == "target"
            {
                continue;
            }
            let prop_set = shape_value_set(prop_el)?;
            let prop_val = dispatch::compile_set(cx, &prop_set)?;
            cx.store.rel_mut(select_rel).target_list.push(ResTarget::new(
                Some(prop_ptr.ptrref.shortname.clone()),
                prop_val,
            ));
        }

        Ok(select_rel)
    })?;

    let mut cols = vec![
        "source".to_string(),
        "target".to_string(),
        "ptr_item_id".to_string(),
    ];
    cols.extend(prop_cols.iter().cloned());

    let conflict_cols = vec![
        ColumnRef::new(vec!["source".to_string()]),
        ColumnRef::new(vec!["target".to_string()]),
        ColumnRef::new(vec!["ptr_item_id".to_string()]),
    ];

    let on_conflict = if prop_cols.is_empty() {
        OnConflictClause {
            action: OnConflictAction::DoNothing,
            infer: Some(InferClause {
                index_elems: conflict_cols,
                conname: None,
            }),
            multi_assign: None,
            target_list: vec![],
        }
    } else {
        let excluded = prop_cols
            .iter()
            .map(|c| {
                Expr::ColumnRef(ColumnRef::new(vec!["excluded".to_string(), c.clone()]))
            })
            .collect();
        OnConflictClause {
            action: OnConflictAction::DoUpdate,
            infer: Some(InferClause {
                index_elems: conflict_cols,
                conname: None,
            }),
            multi_assign: Some(MultiAssignTarget {
                columns: prop_cols.clone(),
                source: Expr::ImplicitRowExpr { args: excluded },
            }),
            target_list: vec![],
        }
    };

    let mut ins_rel = Rel::new(RelKind::Insert(InsertStmt {
        relation: ins_relation_rvar,
        cols,
        select_stmt: Some(select_rel),
        on_conflict: Some(on_conflict),
    }));
    ins_rel
        .target_list
        .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
            "source".to_string(),
        ]))));
    ins_rel
        .target_list
        .push(ResTarget::new(None, Expr::ColumnRef(ColumnRef::new(vec![
            "target".to_string(),
        ]))));
    let ins_rel = cx.store.add_rel(ins_rel);

    let name = cx.env.aliases.get(&format!("link_{}", ptrref.shortname));
    let cte = cx.store.add_cte(CommonTableExpr {
        name,
        query: ins_rel,
        recursive: false,
        materialized: None,
        aliascolnames: vec![],
    });
    cx.store.rel_mut(cx.toplevel_stmt).ctes.push(cte);

    Ok(cte)
}
