//! Small SQL AST construction helpers.

use crate::ir;
use crate::pgast::{
    ColumnRef, Expr, FuncCall, RelId, RelKind, RelStore, TypeName,
};
use crate::types;
use crate::Result;

pub fn new_binop(lexpr: Expr, rexpr: Expr, op: &str) -> Expr {
    Expr::OpExpr {
        name: op.to_string(),
        lexpr: Some(Box::new(lexpr)),
        rexpr: Some(Box::new(rexpr)),
    }
}

pub fn new_unop(op: &str, expr: Expr) -> Expr {
    Expr::OpExpr {
        name: op.to_string(),
        lexpr: None,
        rexpr: Some(Box::new(expr)),
    }
}

/// Extend `binop` with `expr`, joining with `op` (usually `AND`).
pub fn extend_binop(binop: Option<Expr>, expr: Expr, op: &str) -> Expr {
    match binop {
        None => expr,
        Some(binop) => new_binop(binop, expr, op),
    }
}

/// Equality that treats two NULLs as equal; used to join optional path
/// bonds.
pub fn join_condition(lref: ColumnRef, rref: ColumnRef) -> Expr {
    let optional = lref.optional || rref.optional;
    let lexpr = Expr::ColumnRef(lref);
    let rexpr = Expr::ColumnRef(rref);
    if optional {
        Expr::OpExpr {
            name: "IS NOT DISTINCT FROM".to_string(),
            lexpr: Some(Box::new(lexpr)),
            rexpr: Some(Box::new(rexpr)),
        }
    } else {
        new_binop(lexpr, rexpr, "=")
    }
}

pub fn is_set_op_query(store: &RelStore, rel: RelId) -> bool {
    store.rel(rel).is_set_op_query()
}

/// `ARRAY[...]` that filters out NULL elements, mirroring set semantics
/// of element sets.
pub fn safe_array_expr(elements: Vec<Expr>) -> Expr {
    let any_nullable = elements.iter().any(|e| e.is_nullable_shallow());
    let array = Expr::ArrayExpr { elements };
    if any_nullable {
        Expr::FuncCall(Box::new(FuncCall::new_null_safe(
            &[types::HELPER_SCHEMA, "_nullif_array_nulls"],
            vec![array],
        )))
    } else {
        array
    }
}

/// Number of a tuple attribute in its physical record layout.
pub fn tuple_attr_num(tuple_typeref: &ir::TypeRef, attr: &str) -> Option<usize> {
    match &tuple_typeref.kind {
        ir::TypeRefKind::Tuple { elements, .. } => elements
            .iter()
            .position(|el| el.name == attr)
            .map(|i| i + 1),
        _ => None,
    }
}

/// Extracts a tuple attribute from an opaque record value via
/// `edgedb.row_getattr_by_num`; used when the tuple's columns are not
/// individually addressable.
pub fn tuple_getattr_by_num(
    tuple_val: Expr,
    tuple_typeref: &ir::TypeRef,
    attr: &str,
    attr_typeref: &ir::TypeRef,
) -> Result<Expr> {
    let num = tuple_attr_num(tuple_typeref, attr).ok_or_else(|| {
        crate::error::Error::new_reference(attr, "tuple attribute")
    })?;
    let pg_type = types::pg_type_from_ir_typeref(attr_typeref, false, false);
    let call = FuncCall::new(
        &[types::HELPER_SCHEMA, "row_getattr_by_num"],
        vec![
            tuple_val,
            Expr::NumericConstant {
                val: num.to_string(),
            },
        ],
    );
    Ok(Expr::TypeCast {
        arg: Box::new(Expr::FuncCall(Box::new(call))),
        type_name: TypeName::new(pg_type),
    })
}

/// A `count(*)` over nothing: selects the expr with an `IS NOT NULL`
/// filter, used to collapse single-column subqueries so that sort keys
/// stay index-friendly.
pub fn collapse_query(store: &RelStore, rel: RelId) -> Expr {
    let rel_data = store.rel(rel);
    match (&rel_data.kind, rel_data.target_list.as_slice()) {
        (RelKind::Select(s), [target])
            if s.from_clause.is_empty()
                && s.op.is_none()
                && rel_data.where_clause.is_none()
                && s.group_clause.is_empty()
                && s.sort_clause.is_empty()
                && s.limit_offset.is_none()
                && s.limit_count.is_none()
                && s.values.is_empty() =>
        {
            target.val.clone()
        }
        _ => Expr::Subquery(rel),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extend_binop_chains_with_and() {
        let a = Expr::BooleanConstant { val: true };
        let b = Expr::BooleanConstant { val: false };
        let e = extend_binop(Some(a), b, "AND");
        match e {
            Expr::OpExpr { name, .. } => assert_eq!(name, "AND"),
            _ => panic!("expected OpExpr"),
        }
    }
}
