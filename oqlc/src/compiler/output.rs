//! Compilation of output serialization.

use super::context::{CompilerState, OutputFormat};
use crate::error::Error;
use crate::ir::{PathId, TypeRefKind};
use crate::pgast::{
    Alias, Expr, FuncCall, Rel, RelId, RelKind, ResTarget, Rvar, RvarKind, SelectStmt, TupleVar,
};
use crate::Result;

fn json_func(cx: &CompilerState, name: &str) -> Vec<String> {
    let prefix = match cx.env.output_format {
        OutputFormat::Json => "json",
        _ => "jsonb",
    };
    vec![format!("{prefix}_{name}")]
}

fn to_json_func(cx: &CompilerState) -> Vec<String> {
    match cx.env.output_format {
        OutputFormat::Json => vec!["to_json".to_string()],
        _ => vec!["to_jsonb".to_string()],
    }
}

/// Whether expressions compiled in the current context must be serialised
/// for output.
pub fn in_serialization_ctx(cx: &CompilerState) -> bool {
    cx.frame().expr_exposed
        && matches!(
            cx.env.output_format,
            OutputFormat::Json | OutputFormat::Jsonb
        )
}

/// A value view of an expression: tuple vars become ROW expressions.
pub fn output_as_value(expr: Expr) -> Expr {
    match expr {
        Expr::TupleVar(tuple) => Expr::RowExpr {
            args: tuple.elements.into_iter().map(|el| *el.val).collect(),
        },
        other => other,
    }
}

fn tuple_var_as_json_object(cx: &mut CompilerState, tuple: TupleVar) -> Result<Expr> {
    if tuple.named {
        let mut args = Vec::new();
        for el in tuple.elements {
            let key = el
                .name
                .clone()
                .or_else(|| el.path_id.rptr().map(|p| p.shortname.clone()))
                .ok_or_else(|| {
                    Error::new_internal(format!(
                        "unnamed element in named tuple for {}",
                        el.path_id
                    ))
                })?;
            args.push(Expr::StringConstant { val: key });
            args.push(serialize_expr(cx, *el.val, &el.path_id)?);
        }
        Ok(Expr::FuncCall(Box::new(FuncCall::new_null_safe(
            &[json_func(cx, "build_object")[0].as_str()],
            args,
        ))))
    } else {
        let mut args = Vec::new();
        for el in tuple.elements {
            args.push(serialize_expr(cx, *el.val, &el.path_id)?);
        }
        Ok(Expr::FuncCall(Box::new(FuncCall::new_null_safe(
            &[json_func(cx, "build_array")[0].as_str()],
            args,
        ))))
    }
}

/// Serialize an expression to the environment's output format.
pub fn serialize_expr(cx: &mut CompilerState, expr: Expr, path_id: &PathId) -> Result<Expr> {
    match cx.env.output_format {
        OutputFormat::Json | OutputFormat::Jsonb => serialize_expr_to_json(cx, expr, path_id),
        OutputFormat::Native | OutputFormat::NativeInternal => Ok(output_as_value(expr)),
    }
}

pub fn serialize_expr_to_json(
    cx: &mut CompilerState,
    expr: Expr,
    path_id: &PathId,
) -> Result<Expr> {
    let _ = path_id;
    if matches!(&expr, Expr::ColumnRef(col) if col.ser_safe) {
        return Ok(expr);
    }
    match expr {
        Expr::TupleVar(tuple) => tuple_var_as_json_object(cx, tuple),
        other => {
            let name = to_json_func(cx);
            let name_refs: Vec<&str> = name.iter().map(|s| s.as_str()).collect();
            Ok(Expr::FuncCall(Box::new(FuncCall::new_null_safe(
                &name_refs,
                vec![output_as_value(other)],
            ))))
        }
    }
}

/// Serialize only when the context requires it.
pub fn serialize_expr_if_needed(
    cx: &mut CompilerState,
    expr: Expr,
    path_id: &PathId,
) -> Result<Expr> {
    if in_serialization_ctx(cx) {
        serialize_expr(cx, expr, path_id)
    } else {
        Ok(expr)
    }
}

/// Wrap the toplevel statement according to the output format: JSON
/// formats aggregate the result set into a single array unless the
/// expected cardinality is one.
pub fn top_output_as_value(cx: &mut CompilerState, rel: RelId) -> Result<RelId> {
    match cx.env.output_format {
        OutputFormat::Json | OutputFormat::Jsonb => {
            if cx.env.expected_cardinality_one {
                return Ok(rel);
            }

            let subj_alias = cx.env.aliases.get("aggw");
            let out_name = {
                let rel_data = cx.store.rel_mut(rel);
                let target = rel_data.target_list.last_mut().ok_or_else(|| {
                    Error::new_internal("toplevel statement has no output".to_string())
                })?;
                if target.name.is_none() {
                    target.name = Some(cx.env.aliases.get("v"));
                }
                target.name.clone().expect("just set")
            };

            let sub_rvar = cx.store.add_rvar(Rvar::new(
                RvarKind::Subselect { lateral: false, rel },
                Alias::new(subj_alias.clone()),
            ));

            let agg = FuncCall::new_null_safe(
                &[json_func(cx, "agg")[0].as_str()],
                vec![Expr::ColumnRef(crate::pgast::ColumnRef::new(vec![
                    subj_alias, out_name,
                ]))],
            );

            let empty = match cx.env.output_format {
                OutputFormat::Json => Expr::StringConstant {
                    val: "[]".to_string(),
                },
                _ => Expr::TypeCast {
                    arg: Box::new(Expr::StringConstant {
                        val: "[]".to_string(),
                    }),
                    type_name: crate::pgast::TypeName::unqualified("jsonb"),
                },
            };

            let result = Expr::CoalesceExpr {
                args: vec![Expr::FuncCall(Box::new(agg)), empty],
            };

            let mut wrapper = Rel::new(RelKind::Select(SelectStmt {
                from_clause: vec![sub_rvar],
                ..SelectStmt::default()
            }));
            wrapper.target_list.push(ResTarget {
                name: None,
                val: result,
                ser_safe: true,
            });
            // Toplevel CTEs stay on the outermost statement.
            wrapper.ctes = std::mem::take(&mut cx.store.rel_mut(rel).ctes);
            Ok(cx.store.add_rel(wrapper))
        }
        OutputFormat::Native | OutputFormat::NativeInternal => Ok(rel),
    }
}

/// Whether a type needs aggregate-style JSON serialization of its
/// collection elements.
pub fn is_json_collection(path_id: &PathId) -> bool {
    matches!(
        path_id.target().kind,
        TypeRefKind::Array { .. } | TypeRefKind::Tuple { .. }
    )
}
