//! DML compilation tests: CTE sequences, link tables, overlays.

use oqlc::ir::{self, SetExpr, ShapeElement, ShapeOp};

use crate::fixtures::*;

fn select_of(result: ir::Set) -> ir::SetExpr {
    SetExpr::Select(ir::SelectStmt {
        result,
        where_clause: None,
        orderby: vec![],
        offset: None,
        limit: None,
        iterator: None,
        materialized_sets: vec![],
    })
}

fn shape_el(subject: &ir::Set, ptr: ir::PointerRef, value: SetExpr, op: ShapeOp) -> ShapeElement {
    let mut el = step(subject.clone(), ptr);
    el.expr = Some(Box::new(value));
    ShapeElement { set: el, op }
}

fn insert_movie() -> ir::Statement {
    let mut subject = root_set(movie_type());
    subject.shape = vec![
        shape_el(
            &subject,
            title_ptr(),
            SetExpr::Constant(ir::ConstValue::String("x".to_string())),
            ShapeOp::Assign,
        ),
        shape_el(
            &subject,
            actors_ptr(),
            select_of(root_set(person_type())),
            ShapeOp::Assign,
        ),
    ];
    let path_id = subject.path_id.clone();
    let typeref = subject.typeref.clone();
    let mut set = expr_set(
        SetExpr::Insert(ir::InsertStmt {
            subject,
            checks: vec![],
            triggers: vec![],
        }),
        typeref,
    );
    set.path_id = path_id;
    statement(set)
}

#[test]
fn insert_compiles_to_cte_sequence() {
    let sql = compile(&insert_movie());

    assert!(sql.contains("WITH"), "got: {sql}");
    assert!(sql.contains("INSERT INTO"), "got: {sql}");
    assert!(
        sql.contains(r#"edgedbpub."default::Movie""#),
        "got: {sql}"
    );
    // The multi link gets its own link-table CTE with conflict
    // resolution against the not-yet-visible delete.
    assert!(
        sql.contains(r#"edgedbpub."default::Movie.actors""#),
        "got: {sql}"
    );
    assert!(
        sql.contains("ON CONFLICT (source, target, ptr_item_id)"),
        "got: {sql}"
    );
    // The object id is generated in the contents select.
    assert!(sql.contains("uuid_generate_v4"), "got: {sql}");
}

#[test]
fn insert_overlay_is_visible_to_later_reads() {
    // A read of the subject type compiled after the INSERT within the
    // same statement observes the inserted rows through a UNION overlay.
    let insert_stmt = insert_movie();
    let mut union_set = expr_set(
        SetExpr::Union {
            larg: insert_stmt.expr.clone(),
            rarg: root_set(movie_type()),
        },
        movie_type(),
    );
    union_set.path_id = root_set(movie_type()).path_id;
    let sql = compile(&statement(union_set));

    let cte_mentions = sql.matches("ins_movie").count();
    assert!(
        cte_mentions >= 2,
        "expected the insert CTE to be read back via an overlay, got: {sql}"
    );
    assert!(sql.contains("UNION"), "got: {sql}");
}

#[test]
fn trigger_bodies_compile_against_the_statement_overlays() {
    // A trigger on the INSERT reads the subject type; its CTE must see
    // the inserted rows through the statement's overlay.
    let mut subject = root_set(movie_type());
    subject.shape = vec![shape_el(
        &subject,
        title_ptr(),
        SetExpr::Constant(ir::ConstValue::String("x".to_string())),
        ShapeOp::Assign,
    )];
    let path_id = subject.path_id.clone();
    let typeref = subject.typeref.clone();
    let mut set = expr_set(
        SetExpr::Insert(ir::InsertStmt {
            subject,
            checks: vec![],
            triggers: vec![ir::Trigger {
                name: "log_insert".to_string(),
                body: expr_set(
                    SetExpr::Exists(root_set(movie_type())),
                    t_bool(),
                ),
            }],
        }),
        typeref,
    );
    set.path_id = path_id;
    let sql = compile(&statement(set));

    assert!(sql.contains("trig_log_insert"), "got: {sql}");
    // The overlay reads the insert CTE back inside the trigger body.
    let cte_mentions = sql.matches("ins_movie").count();
    assert!(
        cte_mentions >= 2,
        "expected the trigger body to observe the insert overlay, got: {sql}"
    );
}

#[test]
fn update_compiles_range_cte_and_set_list() {
    let mut subject = root_set(movie_type());
    subject.shape = vec![shape_el(
        &subject,
        release_year_ptr(),
        SetExpr::Constant(ir::ConstValue::Int(2024)),
        ShapeOp::Assign,
    )];
    let where_clause = binop(
        "=",
        step(root_set(movie_type()), title_ptr()),
        str_const("x"),
        t_bool(),
    );
    let path_id = subject.path_id.clone();
    let typeref = subject.typeref.clone();
    let mut set = expr_set(
        SetExpr::Update(ir::UpdateStmt {
            subject,
            where_clause: Some(where_clause),
            checks: vec![],
            triggers: vec![],
        }),
        typeref,
    );
    set.path_id = path_id.clone();
    let stmt = statement_with_scope(set, &[path_id]);
    let sql = compile(&stmt);

    assert!(sql.contains("movie_range"), "got: {sql}");
    assert!(sql.contains("UPDATE"), "got: {sql}");
    assert!(sql.contains("release_year = "), "got: {sql}");
    assert!(sql.contains("RETURNING"), "got: {sql}");
    assert!(sql.contains("(2024)::int8"), "got: {sql}");
}

#[test]
fn delete_compiles_to_delete_using_range() {
    let subject = root_set(movie_type());
    let path_id = subject.path_id.clone();
    let typeref = subject.typeref.clone();
    let mut set = expr_set(
        SetExpr::Delete(ir::DeleteStmt {
            subject,
            where_clause: None,
            triggers: vec![],
        }),
        typeref,
    );
    set.path_id = path_id.clone();
    let sql = compile(&statement_with_scope(set, &[path_id]));

    assert!(sql.contains("DELETE FROM"), "got: {sql}");
    assert!(sql.contains("USING"), "got: {sql}");
    assert!(sql.contains("movie_range"), "got: {sql}");
    assert!(sql.contains("RETURNING"), "got: {sql}");
}
