//! Compilation of scalar expressions: constants, parameters, operators,
//! casts, tuples, arrays and function calls.

use itertools::Itertools;

use super::context::CompilerState;
use super::output;
use super::pathctx;
use super::relgen;
use crate::error::Error;
use crate::ir::{self, CastImpl, ConstValue};
use crate::pgast::{
    CaseWhen, ColumnRef, Expr, FuncCall, IndirectionOp, TupleElement, TupleVar, TypeName,
};
use crate::types;
use crate::Result;

/// Compile a set, returning the expression for its value in the current
/// relation.
pub fn compile_set(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<Expr> {
    if cx.env.singleton_mode {
        return compile_set_singleton(cx, ir_set);
    }
    compile_set_impl(cx, ir_set)
}

pub fn visit_set(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<()> {
    if cx.env.singleton_mode {
        compile_set_singleton(cx, ir_set)?;
        return Ok(());
    }
    relgen::get_set_rvar(cx, ir_set)?;
    Ok(())
}

fn compile_set_impl(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<Expr> {
    relgen::get_set_rvar(cx, ir_set)?;

    let rel = cx.rel();
    if output::in_serialization_ctx(cx) {
        pathctx::get_path_serialized_or_value_var(cx, rel, &ir_set.path_id)
    } else {
        pathctx::get_path_value_var(cx, rel, &ir_set.path_id)
    }
}

/// Singleton mode compiles the underlying expression directly, forbidding
/// set-returning constructs.
fn compile_set_singleton(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<Expr> {
    if let Some(expr) = ir_set.expr.as_deref() {
        return compile_expr_kind(cx, ir_set, expr);
    }
    // A plain path reference: resolve against the current relation.
    let rel = cx.rel();
    pathctx::get_path_value_var(cx, rel, &ir_set.path_id)
}

/// Handlers for the inner expression kinds. Set-shaped control operators
/// (unions, distinct, aggregates over sets) are lowered in
/// [super::relgen]; reaching them here means a set expression appeared in
/// a scalar position.
pub fn compile_expr_kind(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    set_expr: &ir::SetExpr,
) -> Result<Expr> {
    match set_expr {
        ir::SetExpr::Empty => Ok(Expr::TypeCast {
            arg: Box::new(Expr::NullConstant),
            type_name: TypeName::new(types::pg_type_from_ir_typeref(
                &ir_set.typeref,
                false,
                false,
            )),
        }),

        ir::SetExpr::Parameter { name } => compile_parameter(cx, ir_set, name),

        ir::SetExpr::Constant(value) => Ok(const_type_cast(
            const_value_expr(value),
            &ir_set.typeref,
        )),

        ir::SetExpr::ConstantSet(_) => Err(set_in_singleton_error("a constant set")),

        ir::SetExpr::Array(elements) => compile_array(cx, ir_set, elements),

        ir::SetExpr::Tuple { named, elements } => {
            let mut out = Vec::new();
            for el in elements {
                let val = super::dispatch::compile_set(cx, &el.val)?;
                out.push(TupleElement {
                    path_id: el.val.path_id.clone(),
                    name: el.name.clone(),
                    val: Box::new(val),
                });
            }
            Ok(Expr::TupleVar(TupleVar {
                elements: out,
                named: *named,
                nullable: false,
            }))
        }

        ir::SetExpr::TupleIndirection { expr, name } => {
            let tuple_val = super::dispatch::compile_set(cx, expr)?;
            if let Expr::TupleVar(tuple) = &tuple_val {
                if let Some(el) = tuple
                    .elements
                    .iter()
                    .find(|el| el.name.as_deref() == Some(name.as_str()))
                {
                    return Ok((*el.val).clone());
                }
            }
            super::astutils::tuple_getattr_by_num(
                tuple_val,
                &expr.typeref,
                name,
                &ir_set.typeref,
            )
        }

        ir::SetExpr::TypeCast {
            expr,
            to,
            cast,
            required,
        } => compile_type_cast(cx, expr, to, cast, *required),

        ir::SetExpr::TypeIntrospection { .. } => {
            Err(set_in_singleton_error("type introspection"))
        }

        ir::SetExpr::TypeCheck {
            expr,
            against,
            negated,
        } => {
            let lexpr = super::dispatch::compile_set(cx, expr)?;
            let check = Expr::FuncCall(Box::new(FuncCall::new_null_safe(
                &[types::HELPER_SCHEMA, "issubclass"],
                vec![
                    lexpr,
                    Expr::TypeCast {
                        arg: Box::new(Expr::StringConstant {
                            val: against.id.to_string(),
                        }),
                        type_name: TypeName::unqualified("uuid"),
                    },
                ],
            )));
            Ok(if *negated {
                crate::compiler::astutils::new_unop("NOT", check)
            } else {
                check
            })
        }

        ir::SetExpr::Index { expr, index } => compile_index(cx, ir_set, expr, index),

        ir::SetExpr::Slice { expr, start, stop } => {
            compile_slice(cx, ir_set, expr, start.as_ref(), stop.as_ref())
        }

        ir::SetExpr::OperatorCall(call) => compile_operator_call(cx, ir_set, call),

        ir::SetExpr::FunctionCall(call) => compile_function_call(cx, ir_set, call),

        ir::SetExpr::IfElse {
            condition,
            if_true,
            if_false,
        } => {
            let cond = super::dispatch::compile_set(cx, condition)?;
            let then = super::dispatch::compile_set(cx, if_true)?;
            let other = super::dispatch::compile_set(cx, if_false)?;
            Ok(Expr::CaseExpr {
                arg: None,
                args: vec![CaseWhen {
                    expr: cond,
                    result: then,
                }],
                defresult: Some(Box::new(other)),
            })
        }

        ir::SetExpr::Coalesce { larg, rarg } => {
            let larg = super::dispatch::compile_set(cx, larg)?;
            let rarg = super::dispatch::compile_set(cx, rarg)?;
            Ok(Expr::CoalesceExpr {
                args: vec![larg, rarg],
            })
        }

        ir::SetExpr::Membership {
            negated,
            needle,
            haystack,
        } => {
            // An array operand is rewritten to `= ANY (array)` directly.
            if haystack.typeref.is_array() {
                let lexpr = super::dispatch::compile_set(cx, needle)?;
                let rexpr = super::dispatch::compile_set(cx, haystack)?;
                let any = Expr::FuncCall(Box::new(FuncCall::new_null_safe(
                    &["any"],
                    vec![rexpr],
                )));
                let op = if *negated { "!=" } else { "=" };
                return Ok(crate::compiler::astutils::new_binop(lexpr, any, op));
            }
            Err(set_in_singleton_error("a set membership test"))
        }

        ir::SetExpr::Union { .. } | ir::SetExpr::Distinct(_) | ir::SetExpr::Exists(_) => {
            Err(set_in_singleton_error("a set expression"))
        }

        ir::SetExpr::Select(_)
        | ir::SetExpr::Group(_)
        | ir::SetExpr::Insert(_)
        | ir::SetExpr::Update(_)
        | ir::SetExpr::Delete(_) => Err(set_in_singleton_error("a statement")),
    }
}

fn set_in_singleton_error(what: &str) -> Error {
    Error::new_simple(format!(
        "{what} cannot be used in a scalar expression context"
    ))
}

// ---- constants and parameters -----------------------------------------

pub fn const_value_expr(value: &ConstValue) -> Expr {
    match value {
        ConstValue::String(s) => Expr::StringConstant { val: s.clone() },
        ConstValue::Bytes(b) => Expr::ByteaConstant { val: b.clone() },
        ConstValue::Int(i) => Expr::NumericConstant { val: i.to_string() },
        ConstValue::Float(f) => Expr::NumericConstant { val: f.to_string() },
        ConstValue::Bool(b) => Expr::BooleanConstant { val: *b },
    }
}

/// Constants are always cast to their declared type so that the
/// PostgreSQL type inference cannot drift.
pub fn const_type_cast(expr: Expr, typeref: &ir::TypeRef) -> Expr {
    Expr::TypeCast {
        arg: Box::new(expr),
        type_name: TypeName::new(types::pg_type_from_ir_typeref(typeref, false, false)),
    }
}

fn compile_parameter(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    name: &str,
) -> Result<Expr> {
    let mapping = cx
        .env
        .argmap
        .get(name)
        .copied()
        .ok_or_else(|| Error::new_reference(name, "query parameter"))?;

    let param: Expr = match &cx.env.named_param_prefix {
        Some(prefix) => {
            let mut qualified = prefix.clone();
            qualified.push(name.to_string());
            Expr::NamedParamRef { name: qualified }
        }
        None => Expr::ParamRef {
            number: mapping.physical_index,
        },
    };

    // Cast to the declared target type. Arrays of custom-serialised
    // scalars cast each element through the custom SQL type.
    if let ir::TypeRefKind::Array { element } = &ir_set.typeref.kind {
        if let ir::TypeRefKind::Scalar {
            custom_sql_serialization: Some(custom),
            ..
        } = &element.kind
        {
            let cast_elem = Expr::TypeCast {
                arg: Box::new(Expr::ColumnRef(ColumnRef::new(vec!["x".to_string()]))),
                type_name: TypeName::unqualified(custom.clone()),
            };
            let unnest = FuncCall::new_null_safe(&["unnest"], vec![param]);
            let mut agg = FuncCall::new_null_safe(&["array_agg"], vec![cast_elem]);
            agg.agg_order = vec![];
            let sub = scalar_subquery_over_function(cx, unnest, "x", Expr::FuncCall(Box::new(agg)));
            return Ok(sub);
        }
    }

    Ok(const_type_cast(param, &ir_set.typeref))
}

/// `(SELECT agg FROM unnest(...) AS t (col))`, used to rewrite array
/// parameters element by element.
fn scalar_subquery_over_function(
    cx: &mut CompilerState,
    func: FuncCall,
    colname: &str,
    target: Expr,
) -> Expr {
    use crate::pgast::{Alias, ResTarget, Rvar, RvarKind};

    let rel = cx.store.new_select();
    let mut alias = Alias::new(cx.env.aliases.get("u"));
    alias.colnames = vec![colname.to_string()];
    let rvar = cx.store.add_rvar(Rvar::new(
        RvarKind::Function {
            lateral: false,
            with_ordinality: false,
            is_rowsfrom: false,
            functions: vec![func],
        },
        alias,
    ));
    {
        let sel = cx.store.rel_mut(rel).select_mut().expect("fresh select");
        sel.from_clause.push(rvar);
    }
    cx.store
        .rel_mut(rel)
        .target_list
        .push(ResTarget::new(None, target));
    Expr::Subquery(rel)
}

// ---- arrays, indexing, slicing ----------------------------------------

fn compile_array(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    elements: &[ir::Set],
) -> Result<Expr> {
    if elements.is_empty() {
        // Empty arrays are typed via the IR typeref to avoid `anyarray`.
        return Ok(Expr::TypeCast {
            arg: Box::new(Expr::ArrayExpr { elements: vec![] }),
            type_name: TypeName::new(types::pg_type_from_ir_typeref(
                &ir_set.typeref,
                false,
                false,
            )),
        });
    }
    let compiled: Vec<Expr> = elements
        .iter()
        .map(|el| super::dispatch::compile_set(cx, el))
        .try_collect()?;
    Ok(super::astutils::safe_array_expr(compiled))
}

fn error_context_arg(hint: &str) -> Expr {
    let ctx = serde_json::json!({ "hint": hint });
    Expr::StringConstant {
        val: ctx.to_string(),
    }
}

fn compile_index(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    expr: &ir::Set,
    index: &ir::Set,
) -> Result<Expr> {
    let subj = super::dispatch::compile_set(cx, expr)?;
    let idx = super::dispatch::compile_set(cx, index)?;

    // Out-of-range access is a deferred runtime error raised by the
    // helper with the original source context.
    let call = FuncCall::new(
        &[types::HELPER_SCHEMA, "_index"],
        vec![subj, idx, error_context_arg("index out of range")],
    );
    Ok(Expr::TypeCast {
        arg: Box::new(Expr::FuncCall(Box::new(call))),
        type_name: TypeName::new(types::pg_type_from_ir_typeref(
            &ir_set.typeref,
            false,
            false,
        )),
    })
}

fn compile_slice(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    expr: &ir::Set,
    start: Option<&ir::Set>,
    stop: Option<&ir::Set>,
) -> Result<Expr> {
    let subj = super::dispatch::compile_set(cx, expr)?;

    // Tuple-element arrays slice inline since the helper cannot return
    // anonymous records.
    let element_is_tuple = matches!(
        &expr.typeref.kind,
        ir::TypeRefKind::Array { element } if element.is_tuple()
    );
    if element_is_tuple {
        let lidx = start
            .map(|s| super::dispatch::compile_set(cx, s))
            .transpose()?;
        let ridx = stop
            .map(|s| super::dispatch::compile_set(cx, s))
            .transpose()?;
        return Ok(Expr::Indirection {
            arg: Box::new(subj),
            ops: vec![IndirectionOp::Slice { lidx, ridx }],
        });
    }

    let lidx = match start {
        Some(s) => super::dispatch::compile_set(cx, s)?,
        None => Expr::NullConstant,
    };
    let ridx = match stop {
        Some(s) => super::dispatch::compile_set(cx, s)?,
        None => Expr::NullConstant,
    };
    let call = FuncCall::new(
        &[types::HELPER_SCHEMA, "_slice"],
        vec![subj, lidx, ridx],
    );
    Ok(Expr::TypeCast {
        arg: Box::new(Expr::FuncCall(Box::new(call))),
        type_name: TypeName::new(types::pg_type_from_ir_typeref(
            &ir_set.typeref,
            false,
            false,
        )),
    })
}

// ---- casts -------------------------------------------------------------

fn compile_type_cast(
    cx: &mut CompilerState,
    expr: &ir::Set,
    to: &ir::TypeRef,
    cast: &CastImpl,
    required: bool,
) -> Result<Expr> {
    let arg = super::dispatch::compile_set(cx, expr)?;
    let pg_type = types::pg_type_from_ir_typeref(to, false, false);

    let result = match cast {
        CastImpl::SqlCast => Expr::TypeCast {
            arg: Box::new(arg),
            type_name: TypeName::new(pg_type),
        },
        CastImpl::SqlCastVia(intermediate) => Expr::TypeCast {
            arg: Box::new(Expr::TypeCast {
                arg: Box::new(arg),
                type_name: TypeName::unqualified(intermediate.clone()),
            }),
            type_name: TypeName::new(pg_type),
        },
        CastImpl::SqlFunction(func) => {
            let name: Vec<&str> = func.split('.').collect();
            Expr::FuncCall(Box::new(FuncCall::new(&name, vec![arg])))
        }
    };

    if required {
        // A cast with a required cardinality modifier raises on NULL at
        // runtime.
        Ok(Expr::FuncCall(Box::new(FuncCall::new(
            &[types::HELPER_SCHEMA, "raise_on_null"],
            vec![result, error_context_arg("invalid null value in cast")],
        ))))
    } else {
        Ok(result)
    }
}

// ---- calls -------------------------------------------------------------

struct CompiledArgs {
    exprs: Vec<Expr>,
    have_nullable: bool,
}

fn compile_call_args(cx: &mut CompilerState, call: &ir::Call) -> Result<CompiledArgs> {
    let mut exprs = Vec::new();
    let mut have_nullable = false;
    for arg in &call.args {
        let mut compiled = super::dispatch::compile_set(cx, &arg.expr)?;
        if let Some(sql_cast) = &arg.sql_cast {
            // Declared operand types from `FROM SQL OPERATOR`/`FROM SQL
            // FUNCTION` aliases.
            compiled = Expr::TypeCast {
                arg: Box::new(compiled),
                type_name: TypeName::unqualified(sql_cast.clone()),
            };
        }
        if cx.store.is_nullable(&compiled) {
            have_nullable = true;
        }
        exprs.push(compiled);
    }
    Ok(CompiledArgs {
        exprs,
        have_nullable,
    })
}

fn compile_operator_call(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    call: &ir::Call,
) -> Result<Expr> {
    if call.is_set_returning() || call.is_aggregate() {
        return Err(Error::new_simple(format!(
            "set-returning operator `{}` cannot be used in a scalar \
             expression context",
            call.name
        )));
    }

    // Object operands compile to their identity vars, so object equality
    // is already a comparison on ids here.
    let args = compile_call_args(cx, call)?;

    if let Some(sql_operator) = &call.sql_operator {
        let op = sql_operator.clone();
        let expr = match args.exprs.as_slice() {
            [lexpr, rexpr] => Expr::OpExpr {
                name: op,
                lexpr: Some(Box::new(lexpr.clone())),
                rexpr: Some(Box::new(rexpr.clone())),
            },
            [rexpr] => Expr::OpExpr {
                name: op,
                lexpr: None,
                rexpr: Some(Box::new(rexpr.clone())),
            },
            _ => {
                return Err(Error::new_internal(format!(
                    "unexpected operand count for operator {}",
                    call.name
                )))
            }
        };
        return Ok(expr);
    }

    if let Some(sql_function) = &call.sql_function {
        let name: Vec<&str> = sql_function.split('.').collect();
        let mut func = FuncCall::new(&name, args.exprs);
        func.nullable = !call.null_safe || args.have_nullable;
        return Ok(Expr::FuncCall(Box::new(func)));
    }

    use crate::error::WithErrorInfo;
    Err(Error::new_reference(&call.name, "operator implementation")
        .push_hint(format!("while compiling {}", ir_set.path_id)))
}

/// Backend name of a function with no explicit SQL mapping: stdlib
/// functions live in a (possibly version-qualified) helper schema.
pub fn get_func_call_backend_name(cx: &CompilerState, call: &ir::Call) -> Vec<String> {
    let mangled = call.name.replace("::", "_");
    let schema = if cx.env.versioned_stdlib {
        "edgedbstd_v1".to_string()
    } else {
        "edgedbstd".to_string()
    };
    vec![schema, mangled]
}

pub fn compile_function_call(
    cx: &mut CompilerState,
    _ir_set: &ir::Set,
    call: &ir::Call,
) -> Result<Expr> {
    if call.is_set_returning() || call.is_aggregate() {
        return Err(Error::new_simple(format!(
            "set-returning function `{}` cannot be used in a scalar \
             expression context",
            call.name
        )));
    }

    let args = compile_call_args(cx, call)?;
    let mut arg_exprs = args.exprs;

    if let Some(variadic_type) = &call.variadic_param_type {
        let declared = call.args.len();
        if declared == 0 || arg_exprs.len() == declared {
            // Variadic parameter absence still requires an explicitly
            // typed empty array.
            arg_exprs.push(Expr::VariadicArgument {
                expr: Box::new(Expr::TypeCast {
                    arg: Box::new(Expr::ArrayExpr { elements: vec![] }),
                    type_name: TypeName::new(types::pg_type_from_ir_typeref(
                        variadic_type,
                        false,
                        false,
                    )),
                }),
            });
        }
    }

    let name_owned: Vec<String> = match &call.sql_function {
        Some(sql_function) => sql_function.split('.').map(|s| s.to_string()).collect(),
        None => get_func_call_backend_name(cx, call),
    };
    let name: Vec<&str> = name_owned.iter().map(|s| s.as_str()).collect();

    let mut func = FuncCall::new(&name, arg_exprs.clone());
    func.nullable = !call.null_safe || args.have_nullable;
    let result = Expr::FuncCall(Box::new(func));

    // A non-strict function with possibly-null arguments must not be
    // called on NULL input at all.
    if !call.impl_is_strict && args.have_nullable && !arg_exprs.is_empty() {
        let mut cond: Option<Expr> = None;
        for arg in &arg_exprs {
            if cx.store.is_nullable(arg) {
                cond = Some(super::astutils::extend_binop(
                    cond,
                    Expr::NullTest {
                        arg: Box::new(arg.clone()),
                        negated: true,
                    },
                    "AND",
                ));
            }
        }
        if let Some(cond) = cond {
            return Ok(Expr::CaseExpr {
                arg: None,
                args: vec![CaseWhen {
                    expr: cond,
                    result,
                }],
                defresult: None,
            });
        }
    }

    Ok(result)
}
