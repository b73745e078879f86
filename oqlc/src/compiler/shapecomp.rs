//! Compilation of shapes: object projections materialising a chosen set
//! of pointers.

use super::context::CompilerState;
use super::dispatch;
use super::output;
use super::pathctx;
use crate::ir::{self, ShapeOp};
use crate::pgast::{Expr, TupleElement, TupleVar};
use crate::Result;

/// Compile a shape into a named tuple var of serialized elements.
pub fn compile_shape(
    cx: &mut CompilerState,
    ir_set: &ir::Set,
    shape: &[ir::ShapeElement],
) -> Result<TupleVar> {
    cx.newscope(|cx| {
        // The shape's own pointers must not trigger semi-joins against
        // the shape subject.
        cx.frame_mut()
            .disable_semi_join
            .insert(ir_set.path_id.clone());

        let mut elements = Vec::new();
        let mut seen = Vec::new();

        for el in shape {
            if el.op == ShapeOp::Subtract {
                continue;
            }
            let rptr = match &el.set.rptr {
                Some(rptr) => rptr,
                None => continue,
            };
            let name = rptr.ptrref.shortname.clone();
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());

            let value = cx.newscope(|cx| -> Result<Expr> {
                dispatch::visit_set(cx, &el.set)?;
                let rel = cx.rel();
                if output::in_serialization_ctx(cx) {
                    let var =
                        pathctx::get_path_serialized_or_value_var(cx, rel, &el.set.path_id)?;
                    output::serialize_expr(cx, var, &el.set.path_id)
                } else {
                    pathctx::get_path_value_var(cx, rel, &el.set.path_id)
                }
            })?;

            elements.push(TupleElement {
                path_id: el.set.path_id.clone(),
                name: Some(name),
                val: Box::new(value),
            });
        }

        Ok(TupleVar {
            elements,
            named: true,
            nullable: false,
        })
    })
}
