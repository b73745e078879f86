//! Simple tests for "this IR creates this SQL" go here.

use oqlc::ir::{self, SetExpr};
use oqlc::pgast::PathAspect;

use crate::fixtures::*;

#[test]
fn select_scalar_constant() {
    let stmt = statement(int_const(1));
    let sql = compile(&stmt);
    assert!(sql.starts_with("SELECT"), "got: {sql}");
    assert!(sql.contains("(1)::int8"), "got: {sql}");
}

#[rstest::rstest]
#[case::int(ir::ConstValue::Int(42), "(42)::int8")]
#[case::bool(ir::ConstValue::Bool(true), "(TRUE)::bool")]
#[case::string(ir::ConstValue::String("s".to_string()), "('s')::text")]
fn constants_are_cast_to_their_declared_type(
    #[case] value: ir::ConstValue,
    #[case] expected: &str,
) {
    let typeref = match &value {
        ir::ConstValue::Int(_) => t_int64(),
        ir::ConstValue::Bool(_) => t_bool(),
        _ => t_str(),
    };
    let stmt = statement(const_set(value, typeref));
    let sql = compile(&stmt);
    assert!(sql.contains(expected), "got: {sql}");
}

#[test]
fn select_path_step() {
    // SELECT Movie.title with no visible prefix compiles the source into
    // a lateral subquery over the movie table.
    let stmt = statement(step(root_set(movie_type()), title_ptr()));
    let sql = compile(&stmt);
    assert!(sql.contains(r#"edgedbpub."default::Movie""#), "got: {sql}");
    assert!(sql.contains("title"), "got: {sql}");
    assert!(sql.contains("LATERAL"), "got: {sql}");
}

#[test]
fn alias_determinism() {
    // Two compilations of the same IR under fresh environments yield
    // identical SQL text, byte for byte.
    let stmt = statement(step(root_set(movie_type()), title_ptr()));
    let first = compile(&stmt);
    let second = compile(&stmt);
    similar_asserts::assert_eq!(first, second);
}

#[test]
fn filtered_comparison() {
    let cmp = binop(
        "=",
        step(root_set(movie_type()), title_ptr()),
        str_const("x"),
        t_bool(),
    );
    let stmt = statement_with_scope(cmp, &[root_set(movie_type()).path_id]);
    let sql = compile(&stmt);
    assert!(sql.contains("="), "got: {sql}");
    assert!(sql.contains("'x'"), "got: {sql}");
}

#[test]
fn if_else_singleton_scalars_lower_to_case() {
    let cond = binop(
        "=",
        step(root_set(movie_type()), title_ptr()),
        str_const("x"),
        t_bool(),
    );
    let set = expr_set(
        SetExpr::IfElse {
            condition: cond,
            if_true: int_const(1),
            if_false: int_const(2),
        },
        t_int64(),
    );
    let stmt = statement_with_scope(set, &[root_set(movie_type()).path_id]);
    let sql = compile(&stmt);
    assert!(sql.contains("CASE WHEN"), "got: {sql}");
    assert!(sql.contains("ELSE"), "got: {sql}");
}

#[test]
fn coalesce_with_optional_rhs_uses_scalar_coalesce() {
    let set = expr_set(
        SetExpr::Coalesce {
            larg: step(root_set(movie_type()), release_year_ptr()),
            rarg: int_const(0),
        },
        t_int64(),
    );
    let stmt = statement_with_scope(set, &[root_set(movie_type()).path_id]);
    let sql = compile(&stmt);
    assert!(sql.contains("COALESCE("), "got: {sql}");
}

#[test]
fn union_compiles_to_union_all() {
    let set = {
        let mut s = expr_set(
            SetExpr::Union {
                larg: int_const(1),
                rarg: int_const(2),
            },
            t_int64(),
        );
        s.path_id = int_const(1).path_id;
        s
    };
    let stmt = statement(set);
    let sql = compile(&stmt);
    assert!(sql.contains("UNION ALL"), "got: {sql}");
}

#[test]
fn exists_lowers_to_sublink() {
    let set = expr_set(
        SetExpr::Exists(step(root_set(movie_type()), title_ptr())),
        t_bool(),
    );
    let stmt = statement(set);
    let sql = compile(&stmt);
    assert!(sql.contains("EXISTS"), "got: {sql}");
}

#[test]
fn json_output_aggregates_the_result() {
    let stmt = statement(int_const(1));
    let (sql, _) = oqlc::compile_ir_to_sql(
        &stmt,
        &oqlc::CompileOptions::default().with_output_format(oqlc::OutputFormat::Jsonb),
    )
    .unwrap();
    assert!(sql.contains("jsonb_agg"), "got: {sql}");
    assert!(sql.contains("COALESCE("), "got: {sql}");
}

#[test]
fn non_visible_multi_pointer_semi_joins() {
    // SELECT Movie.actors with the source not visible: the target range
    // is filtered via IN over the link map, not cross-joined.
    let stmt = statement(step(root_set(movie_type()), actors_ptr()));
    let sql = compile(&stmt);
    assert!(sql.contains(r#"edgedbpub."default::Person""#), "got: {sql}");
    assert!(sql.contains(r#"edgedbpub."default::Movie.actors""#), "got: {sql}");
    assert!(sql.contains(" IN "), "got: {sql}");
}

#[test]
fn identity_output_mirrors_value_for_object_paths() {
    // Property 4: if a value output exists for an object path in a rel,
    // an identity output exists and matches it.
    let stmt = statement(root_set(movie_type()));
    let result =
        oqlc::compile_ir_to_sql_tree(&stmt, &oqlc::CompileOptions::default()).unwrap();
    let root = result.tree.store.rel(result.tree.root);
    let path = root_set(movie_type()).path_id;
    let value = root.path_outputs.get(&(path.clone(), PathAspect::Value));
    let identity = root.path_outputs.get(&(path, PathAspect::Identity));
    if let (Some(value), Some(identity)) = (value, identity) {
        assert_eq!(value, identity);
    }
}

#[test]
fn singleton_mode_rejects_set_returning_calls() {
    let call = ir::Call {
        name: "std::array_unpack".to_string(),
        sql_function: Some("unnest".to_string()),
        sql_operator: None,
        args: vec![],
        return_typemod: ir::TypeMod::SetOf,
        volatility: ir::Volatility::Immutable,
        null_safe: false,
        impl_is_strict: true,
        initial_value: None,
        variadic_param_type: None,
    };
    let set = expr_set(SetExpr::FunctionCall(call), t_str());
    let stmt = statement(set);
    let err = oqlc::compile_ir_to_sql(
        &stmt,
        &oqlc::CompileOptions::default().with_singleton_mode(true),
    )
    .unwrap_err();
    assert_eq!(err.kind, oqlc::ErrorKind::Query);
}

#[test]
fn params_map_to_placeholders() {
    let set = expr_set(
        SetExpr::Parameter {
            name: "x".to_string(),
        },
        t_int64(),
    );
    let stmt = ir::Statement {
        expr: set,
        scope_tree: ir::ScopeTree::new(),
        params: vec![ir::Param {
            name: "x".to_string(),
            required: true,
            typeref: t_int64(),
        }],
    };
    let (sql, argmap) =
        oqlc::compile_ir_to_sql(&stmt, &oqlc::CompileOptions::default()).unwrap();
    assert!(sql.contains("$1"), "got: {sql}");
    assert_eq!(argmap.get("x").unwrap().physical_index, 1);
}
