//! The IR-to-SQL compiler pipeline.
//!
//! The entry point is [compile_ir_to_sql_tree]: it constructs an
//! environment, pushes the root context level, routes the root IR
//! through dispatch, and finalises the toplevel CTEs.

pub mod aliases;
pub mod astutils;
pub mod clauses;
pub mod context;
pub mod dispatch;
pub mod dml;
pub mod expr;
pub mod group;
pub mod output;
pub mod pathctx;
pub mod relctx;
pub mod relgen;
pub mod shapecomp;
pub mod stmt;

use indexmap::IndexMap;

use self::aliases::AliasGenerator;
use self::context::{CompilerState, Environment, OutputFormat, ParamMapping};
use crate::error::WithErrorInfo;
use crate::ir;
use crate::pgast::{PathAspect, RvarId, SqlTree};
use crate::Result;

/// Compilation options for one unit.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub output_format: OutputFormat,
    pub ignore_shapes: bool,
    pub singleton_mode: bool,
    pub expected_cardinality_one: bool,
    pub external_rvars: IndexMap<(ir::PathId, PathAspect), RvarId>,
    pub external_rels: IndexMap<ir::PathId, (crate::pgast::RelId, Vec<PathAspect>)>,
    pub detach_params: bool,
    pub named_param_prefix: Option<Vec<String>>,
    pub versioned_stdlib: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            output_format: OutputFormat::Native,
            ignore_shapes: false,
            singleton_mode: false,
            expected_cardinality_one: false,
            external_rvars: IndexMap::new(),
            external_rels: IndexMap::new(),
            detach_params: false,
            named_param_prefix: None,
            versioned_stdlib: true,
        }
    }
}

impl CompileOptions {
    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn with_singleton_mode(mut self, singleton_mode: bool) -> Self {
        self.singleton_mode = singleton_mode;
        self
    }

    pub fn with_expected_cardinality_one(mut self, expected: bool) -> Self {
        self.expected_cardinality_one = expected;
        self
    }

    pub fn with_named_param_prefix(mut self, prefix: Vec<String>) -> Self {
        self.named_param_prefix = Some(prefix);
        self
    }

    /// `versioned_stdlib=false` is only legal in singleton mode; the
    /// normalisation below is kept exactly as specified.
    fn normalize(&mut self) {
        if self.singleton_mode && !self.versioned_stdlib {
            self.versioned_stdlib = false;
        }
    }
}

/// The result of a compilation.
#[derive(Debug)]
pub struct CompileResult {
    pub tree: SqlTree,
    /// Logical param name → physical placement.
    pub argmap: IndexMap<String, ParamMapping>,
    /// PG type name for each physical param, in physical-index order,
    /// when `detach_params` was requested.
    pub detached_params: Option<Vec<String>>,
}

/// Compile a root IR statement into a SQL tree.
pub fn compile_ir_to_sql_tree(
    ir_stmt: &ir::Statement,
    options: &CompileOptions,
) -> Result<CompileResult> {
    let mut options = options.clone();
    options.normalize();

    let env = Environment {
        output_format: options.output_format,
        singleton_mode: options.singleton_mode,
        ignore_shapes: options.ignore_shapes,
        expected_cardinality_one: options.expected_cardinality_one,
        explicit_top_cast: None,
        named_param_prefix: options.named_param_prefix.clone(),
        versioned_stdlib: options.versioned_stdlib,
        aliases: AliasGenerator::new(),
        params: IndexMap::new(),
        argmap: IndexMap::new(),
        root_rels: indexmap::IndexSet::new(),
        external_rvars: options.external_rvars.clone(),
        external_rels: options.external_rels.clone(),
        type_rewrites: IndexMap::new(),
    };

    let mut cx = CompilerState::new(env, &ir_stmt.scope_tree);
    clauses::populate_argmap(&mut cx, &ir_stmt.params);

    log::debug!("compiling IR root {}", ir_stmt.expr.path_id);

    compile_root(&mut cx, &ir_stmt.expr)?;

    clauses::fini_toplevel(&mut cx)?;

    let toplevel = cx.toplevel_stmt;
    let root = output::top_output_as_value(&mut cx, toplevel)?;

    let detached_params = if options.detach_params {
        Some(
            ir_stmt
                .params
                .iter()
                .map(|p| {
                    crate::types::pg_type_from_ir_typeref(&p.typeref, false, false).join(".")
                })
                .collect(),
        )
    } else {
        None
    };

    let argmap = cx.env.argmap.clone();
    let store = cx.store;

    Ok(CompileResult {
        tree: SqlTree { root, store },
        argmap,
        detached_params,
    })
}

fn compile_root(cx: &mut CompilerState, ir_set: &ir::Set) -> Result<()> {
    if cx.env.singleton_mode {
        let value = dispatch::compile_set(cx, ir_set)?;
        let toplevel = cx.toplevel_stmt;
        cx.store
            .rel_mut(toplevel)
            .target_list
            .push(crate::pgast::ResTarget::new(None, value));
        return Ok(());
    }

    let toplevel = cx.toplevel_stmt;
    relctx::update_scope(cx, ir_set, toplevel);

    // Paths bound at the root of the scope tree materialise in the
    // toplevel statement.
    let scope_tree = cx.scope_tree;
    for child in scope_tree.path_children(scope_tree.root()) {
        if let ir::ScopeNodeKind::Path(path_id) = &scope_tree.node(child).kind {
            cx.frame_mut()
                .path_scope
                .insert(path_id.clone(), toplevel);
        }
    }

    // Compile the shape when the root is an object and shapes are not
    // suppressed.
    let compile_shape_output = !cx.env.ignore_shapes
        && !ir_set.shape.is_empty()
        && matches!(
            cx.env.output_format,
            OutputFormat::Json | OutputFormat::Jsonb
        );

    relgen::process_toplevel_query(cx, ir_set)?;

    if compile_shape_output {
        let shape = shapecomp::compile_shape(cx, ir_set, &ir_set.shape)?;
        let serialized =
            output::serialize_expr(cx, crate::pgast::Expr::TupleVar(shape), &ir_set.path_id)?;
        pathctx::put_path_serialized_var(cx, toplevel, &ir_set.path_id, serialized, true)?;
    }

    if output::in_serialization_ctx(cx) {
        pathctx::get_path_serialized_output(cx, toplevel, &ir_set.path_id)?;
    } else {
        pathctx::get_path_value_output(cx, toplevel, &ir_set.path_id)?;
    }

    // Nullable exposed results must not leak optional padding rows.
    stmt::add_null_filter_if_needed(cx, toplevel, ir_set)?;

    Ok(())
}

/// Compile in singleton mode: a scalar expression with set-returning
/// calls forbidden.
pub fn compile_ir_expr_singleton(
    ir_stmt: &ir::Statement,
    options: &CompileOptions,
) -> Result<CompileResult> {
    let options = options.clone().with_singleton_mode(true);
    compile_ir_to_sql_tree(ir_stmt, &options)
        .push_hint("while compiling in singleton mode")
}
