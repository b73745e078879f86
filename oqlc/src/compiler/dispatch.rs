//! Compiler dispatch.
//!
//! The IR is a closed sum, so dispatch is a match: [compile_set] returns a
//! value expression (implicitly populating path vars in the current
//! relation), [visit_set] compiles without pulling the value eagerly.
//! Inner expression nodes route through [compile_expr] to the handlers in
//! [super::expr]; a missing arm there is a compile-time error rather than
//! a runtime internal-error.

use super::context::CompilerState;
use super::expr;
use crate::ir;
use crate::pgast::Expr;
use crate::Result;

/// Compile an IR set, returning the SQL expression for its value.
pub fn compile_set(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<Expr> {
    expr::compile_set(cx, ir_set)
}

/// A compilation version that does not pull the value eagerly.
pub fn visit_set(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<()> {
    expr::visit_set(cx, ir_set)
}

/// Compile an inner expression node of a set.
pub fn compile_expr(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    set_expr: &ir::SetExpr,
) -> Result<Expr> {
    expr::compile_expr_kind(cx, ir_set, set_expr)
}
