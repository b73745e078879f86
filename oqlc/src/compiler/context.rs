//! Compiler context: the static environment of one compilation unit and
//! the per-level state stack threaded through recursive dispatch.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aliases::AliasGenerator;
use crate::ir::{self, PathId, ScopeId, ScopeTree};
use crate::pgast::{
    CteId, Expr, PathAspect, Rel, RelId, RelStore, RvarId,
};

/// How top-level results are wrapped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Native,
    /// Native, but tuples are kept as records for internal consumers.
    NativeInternal,
    Json,
    Jsonb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSwitchMode {
    Transparent,
    Subrel,
    Newrel,
    Substmt,
    Newscope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompClause {
    Toplevel,
    Result,
    Where,
    OrderBy,
    LimitOffset,
    Iterator,
}

/// What provides a stable identity to correlate volatile calls against.
#[derive(Debug, Clone)]
pub enum VolatilityRef {
    /// The identity of a path in the enclosing statement.
    Path(PathId),
    /// A precomputed surrogate, e.g. a `row_number() OVER ()` column.
    Expr(Expr),
}

/// Argument mapping entry: logical param name → physical placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMapping {
    pub physical_index: usize,
    pub logical_index: usize,
    pub required: bool,
}

/// An overlay alters the visible range of a type or pointer within a DML
/// statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOp {
    Union,
    Except,
    Replace,
    Filter,
}

#[derive(Debug, Clone, Copy)]
pub enum OverlayTarget {
    Cte(CteId),
    Rel(RelId),
}

#[derive(Debug, Clone)]
pub struct Overlay {
    pub op: OverlayOp,
    pub target: OverlayTarget,
    pub path_id: PathId,
}

/// Per-DML-statement overlay registry.
#[derive(Debug, Clone, Default)]
pub struct RelOverlays {
    /// type id → ordered overlays.
    pub types: IndexMap<Uuid, Vec<Overlay>>,
    /// (type id, pointer name) → ordered overlays.
    pub pointers: IndexMap<(Uuid, String), Vec<Overlay>>,
}

/// Static compilation environment.
#[derive(Debug)]
pub struct Environment {
    pub output_format: OutputFormat,
    pub singleton_mode: bool,
    pub ignore_shapes: bool,
    pub expected_cardinality_one: bool,
    pub explicit_top_cast: Option<ir::TypeRef>,
    pub named_param_prefix: Option<Vec<String>>,
    pub versioned_stdlib: bool,
    pub aliases: AliasGenerator,
    pub params: IndexMap<String, ir::Param>,
    pub argmap: IndexMap<String, ParamMapping>,
    /// Relations that represent plain type ranges; path drilldown through
    /// them can remap the path onto their single bond.
    pub root_rels: IndexSet<RelId>,
    /// Pre-bound ranges for embedding compilations.
    pub external_rvars: IndexMap<(PathId, PathAspect), RvarId>,
    /// Pre-built relation bodies for certain paths.
    pub external_rels: IndexMap<PathId, (RelId, Vec<PathAspect>)>,
    /// Per-type replacement relations, materialised as toplevel CTEs
    /// before any DML CTE.
    pub type_rewrites: IndexMap<Uuid, RelId>,
}

/// One level of the compiler context stack.
///
/// Levels are pushed with copy-on-enter semantics for the inherited
/// fields; the scoped `switch` on [CompilerState] restores the previous
/// level when the closure returns.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The relation currently being populated.
    pub rel: RelId,
    /// The closest enclosing statement.
    pub stmt: RelId,
    pub clause: CompClause,
    /// Whether the expression compiled here is exposed to the output
    /// (and must therefore be serialised when the format asks for it).
    pub expr_exposed: bool,
    pub volatility_refs: Vec<VolatilityRef>,
    pub disable_semi_join: IndexSet<PathId>,
    pub unique_paths: IndexSet<PathId>,
    pub force_optional: IndexSet<PathId>,
    /// Group-compilation hint: sources that need not be re-iterated
    /// inside per-aggregate subrels.
    pub skippable_sources: IndexSet<PathId>,
    /// Chain map of path id → the statement that will materialise it.
    pub path_scope: IndexMap<PathId, RelId>,
    /// Current scope-tree node.
    pub scope_id: Option<ScopeId>,
    pub materializing: bool,
}

/// The mutable state of one compilation: arena, environment, context
/// stack and the cross-cutting registries.
pub struct CompilerState<'ir> {
    pub env: Environment,
    pub store: RelStore,
    pub scope_tree: &'ir ScopeTree,
    pub toplevel_stmt: RelId,
    /// Child rel → parent rel, for walking up the rel tree.
    pub rel_hierarchy: IndexMap<RelId, RelId>,
    pub rel_overlays: RelOverlays,
    /// CTEs produced by explicit constraint checks, appended last.
    pub check_ctes: Vec<CteId>,
    /// Type-rewrite CTEs, prepended before DML CTEs.
    pub type_ctes: IndexMap<Uuid, CteId>,
    /// Monotonic id spent on DML statements, for dummy-scan offsets.
    pub dml_counter: usize,
    frames: Vec<Frame>,
}

impl<'ir> CompilerState<'ir> {
    pub fn new(env: Environment, scope_tree: &'ir ScopeTree) -> CompilerState<'ir> {
        let mut store = RelStore::new();
        let toplevel_stmt = store.add_rel(Rel::new_select());
        let root = Frame {
            rel: toplevel_stmt,
            stmt: toplevel_stmt,
            clause: CompClause::Toplevel,
            expr_exposed: true,
            volatility_refs: Vec::new(),
            disable_semi_join: IndexSet::new(),
            unique_paths: IndexSet::new(),
            force_optional: IndexSet::new(),
            skippable_sources: IndexSet::new(),
            path_scope: IndexMap::new(),
            scope_id: Some(scope_tree.root()),
            materializing: false,
        };
        CompilerState {
            env,
            store,
            scope_tree,
            toplevel_stmt,
            rel_hierarchy: IndexMap::new(),
            rel_overlays: RelOverlays::default(),
            check_ctes: Vec::new(),
            type_ctes: IndexMap::new(),
            dml_counter: 0,
            frames: vec![root],
        }
    }

    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("context stack cannot be empty")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("context stack cannot be empty")
    }

    /// The relation currently being populated.
    pub fn rel(&self) -> RelId {
        self.frame().rel
    }

    pub fn stmt(&self) -> RelId {
        self.frame().stmt
    }

    /// Enters a derived context level, runs `f`, restores the previous
    /// level.
    pub fn switch<R>(
        &mut self,
        mode: ContextSwitchMode,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let mut frame = self.frame().clone();

        match mode {
            ContextSwitchMode::Transparent | ContextSwitchMode::Newscope => {}
            ContextSwitchMode::Subrel | ContextSwitchMode::Newrel | ContextSwitchMode::Substmt => {
                let new_rel = self.store.new_select();
                if mode != ContextSwitchMode::Newrel {
                    self.rel_hierarchy.insert(new_rel, frame.rel);
                }
                frame.rel = new_rel;
                frame.clause = CompClause::Result;
                if mode == ContextSwitchMode::Substmt {
                    frame.stmt = frame.rel;
                }
            }
        }

        self.frames.push(frame);
        let result = f(self);
        self.frames.pop();
        result
    }

    pub fn subrel<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.switch(ContextSwitchMode::Subrel, f)
    }

    pub fn newrel<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.switch(ContextSwitchMode::Newrel, f)
    }

    pub fn substmt<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.switch(ContextSwitchMode::Substmt, f)
    }

    pub fn newscope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.switch(ContextSwitchMode::Newscope, f)
    }

    /// The statement that the scope chain says will materialise
    /// `path_id`, if any.
    pub fn maybe_get_scope_stmt(&self, path_id: &PathId) -> Option<RelId> {
        self.frame().path_scope.get(path_id).copied()
    }

    /// The scope-tree node attached to an IR set, if any; stays on the
    /// current node otherwise.
    pub fn scope_for_set(&self, set: &ir::Set) -> Option<ScopeId> {
        match set.scope_id {
            Some(unique_id) => self.scope_tree.find_by_unique_id(unique_id),
            None => None,
        }
    }

    pub fn is_visible(&self, path_id: &PathId) -> bool {
        match self.frame().scope_id {
            Some(scope) => self.scope_tree.is_visible(scope, path_id),
            None => false,
        }
    }

    pub fn is_optional(&self, path_id: &PathId) -> bool {
        let forced = self.frame().force_optional.contains(path_id);
        forced
            || match self.frame().scope_id {
                Some(scope) => self.scope_tree.is_optional(scope, path_id),
                None => false,
            }
    }

    /// Walk up the rel hierarchy from `rel`, inclusive.
    pub fn rel_ancestors(&self, rel: RelId) -> Vec<RelId> {
        let mut out = vec![rel];
        let mut cur = rel;
        while let Some(parent) = self.rel_hierarchy.get(&cur) {
            out.push(*parent);
            cur = *parent;
        }
        out
    }
}
