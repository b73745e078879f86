//! IR fixtures: a small movie schema and helpers to assemble sets the
//! way the front-end would.

use oqlc::ir::*;
use uuid::Uuid;

pub fn t_str() -> TypeRef {
    TypeRef {
        id: wellknown::STD_STR,
        name_hint: "std::str".to_string(),
        kind: TypeRefKind::Scalar {
            base_id: None,
            is_abstract: false,
            custom_sql_serialization: None,
        },
    }
}

pub fn t_int64() -> TypeRef {
    TypeRef {
        id: wellknown::STD_INT64,
        name_hint: "std::int64".to_string(),
        kind: TypeRefKind::Scalar {
            base_id: None,
            is_abstract: false,
            custom_sql_serialization: None,
        },
    }
}

pub fn t_bool() -> TypeRef {
    TypeRef {
        id: wellknown::STD_BOOL,
        name_hint: "std::bool".to_string(),
        kind: TypeRefKind::Scalar {
            base_id: None,
            is_abstract: false,
            custom_sql_serialization: None,
        },
    }
}

pub fn object_type(name: &str, id: u128) -> TypeRef {
    TypeRef {
        id: Uuid::from_u128(id),
        name_hint: format!("default::{name}"),
        kind: TypeRefKind::Object {
            is_free: false,
            union_of: vec![],
        },
    }
}

pub fn movie_type() -> TypeRef {
    object_type("Movie", 0x4001)
}

pub fn person_type() -> TypeRef {
    object_type("Person", 0x4002)
}

pub fn property(
    name: &str,
    id: u128,
    source: &TypeRef,
    target: TypeRef,
    required: bool,
) -> PointerRef {
    PointerRef {
        id: Uuid::from_u128(id),
        name: format!("default::{name}"),
        shortname: name.to_string(),
        source: Some(Box::new(source.clone())),
        target: Box::new(target),
        out_cardinality: Cardinality::One,
        required,
        parent_ptr: None,
        has_properties: false,
    }
}

pub fn multi_link(name: &str, id: u128, source: &TypeRef, target: TypeRef) -> PointerRef {
    PointerRef {
        id: Uuid::from_u128(id),
        name: format!("default::{name}"),
        shortname: name.to_string(),
        source: Some(Box::new(source.clone())),
        target: Box::new(target),
        out_cardinality: Cardinality::Many,
        required: false,
        parent_ptr: None,
        has_properties: false,
    }
}

pub fn title_ptr() -> PointerRef {
    property("title", 0x5001, &movie_type(), t_str(), true)
}

pub fn release_year_ptr() -> PointerRef {
    property("release_year", 0x5002, &movie_type(), t_int64(), false)
}

pub fn first_name_ptr() -> PointerRef {
    property("first_name", 0x5003, &person_type(), t_str(), true)
}

pub fn actors_ptr() -> PointerRef {
    multi_link("actors", 0x5004, &movie_type(), person_type())
}

/// A plain root set over an object type.
pub fn root_set(typeref: TypeRef) -> Set {
    Set {
        path_id: PathId::from_typeref(typeref.clone()),
        typeref,
        rptr: None,
        expr: None,
        shape: vec![],
        scope_id: None,
    }
}

/// A pointer step off `source`.
pub fn step(source: Set, ptrref: PointerRef) -> Set {
    let path_id = source.path_id.extend(ptrref.clone(), PtrDir::Outbound);
    Set {
        path_id,
        typeref: (*ptrref.target).clone(),
        rptr: Some(SetPointer {
            source: Box::new(source),
            ptrref,
            direction: PtrDir::Outbound,
        }),
        expr: None,
        shape: vec![],
        scope_id: None,
    }
}

pub fn const_set(value: ConstValue, typeref: TypeRef) -> Set {
    Set {
        path_id: PathId::from_typeref(typeref.clone()),
        typeref,
        rptr: None,
        expr: Some(Box::new(SetExpr::Constant(value))),
        shape: vec![],
        scope_id: None,
    }
}

pub fn int_const(value: i64) -> Set {
    const_set(ConstValue::Int(value), t_int64())
}

pub fn str_const(value: &str) -> Set {
    const_set(ConstValue::String(value.to_string()), t_str())
}

/// An operator call known to map to a plain SQL operator.
pub fn binop(sql_operator: &str, larg: Set, rarg: Set, ret: TypeRef) -> Set {
    let call = Call {
        name: format!("std::{sql_operator}"),
        sql_function: None,
        sql_operator: Some(sql_operator.to_string()),
        args: vec![
            CallArg {
                expr: larg,
                typemod: TypeMod::Singleton,
                cardinality: Cardinality::One,
                sql_cast: None,
            },
            CallArg {
                expr: rarg,
                typemod: TypeMod::Singleton,
                cardinality: Cardinality::One,
                sql_cast: None,
            },
        ],
        return_typemod: TypeMod::Singleton,
        volatility: Volatility::Immutable,
        null_safe: true,
        impl_is_strict: true,
        initial_value: None,
        variadic_param_type: None,
    };
    Set {
        path_id: PathId::from_typeref(ret.clone()),
        typeref: ret,
        rptr: None,
        expr: Some(Box::new(SetExpr::OperatorCall(call))),
        shape: vec![],
        scope_id: None,
    }
}

/// Wraps a set expression kind into a set node of the given type.
pub fn expr_set(expr: SetExpr, typeref: TypeRef) -> Set {
    Set {
        path_id: PathId::from_typeref(typeref.clone()),
        typeref,
        rptr: None,
        expr: Some(Box::new(expr)),
        shape: vec![],
        scope_id: None,
    }
}

pub fn statement(expr: Set) -> Statement {
    Statement {
        expr,
        scope_tree: ScopeTree::new(),
        params: vec![],
    }
}

/// A statement whose scope tree makes the given paths visible at the
/// root.
pub fn statement_with_scope(expr: Set, visible: &[PathId]) -> Statement {
    let mut scope_tree = ScopeTree::new();
    let root = scope_tree.root();
    for (i, path_id) in visible.iter().enumerate() {
        scope_tree.add_child(
            root,
            i + 1,
            ScopeNodeKind::Path(path_id.clone()),
            false,
            false,
        );
    }
    Statement {
        expr,
        scope_tree,
        params: vec![],
    }
}

pub fn compile(stmt: &Statement) -> String {
    let (sql, _argmap) =
        oqlc::compile_ir_to_sql(stmt, &oqlc::CompileOptions::default()).unwrap();
    sql
}
