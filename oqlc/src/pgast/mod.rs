//! SQL abstract syntax tree.
//!
//! The node structure mostly follows Postgres' parsenodes.h and
//! primnodes.h, but only with fields that are relevant to code generation,
//! plus the compiler-specific path bookkeeping described in the module
//! docs of [crate::compiler::pathctx].
//!
//! Relations, range vars and CTEs live in a [RelStore] arena and are
//! addressed by [RelId]/[RvarId]/[CteId]; the path maps hold ids, never
//! owned subtrees, so queries can be mutated through any rvar that ranges
//! over them. Expressions are plain owned trees.

use enum_as_inner::EnumAsInner;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ir::{self, PathId};
use crate::utils::arena_id;

arena_id!(
    /// Arena id of a relation (base table, query or null-relation).
    RelId
);
arena_id!(
    /// Arena id of a range var.
    RvarId
);
arena_id!(
    /// Arena id of a common table expression.
    CteId
);

/// The projection kind of a path in a SQL relation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum PathAspect {
    Identity,
    Value,
    Source,
    Serialized,
    /// Transient identity of a DML FOR iterator; distinct from value
    /// identity so that equal iteration values do not collapse.
    Iterator,
    /// Materialised binding packed into an array column.
    Packed,
}

/// Alias for a range variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub aliasname: String,
    pub colnames: Vec<String>,
}

impl Alias {
    pub fn new(aliasname: impl Into<String>) -> Alias {
        Alias {
            aliasname: aliasname.into(),
            colnames: Vec::new(),
        }
    }
}

/// Specifies a reference to a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Column name list, possibly qualified by an rvar alias.
    pub name: Vec<String>,
    pub nullable: bool,
    /// Whether the col is an optional path bond (i.e accepted when NULL).
    pub optional: bool,
    pub ser_safe: bool,
}

impl ColumnRef {
    pub fn new(name: Vec<String>) -> ColumnRef {
        ColumnRef {
            name,
            nullable: false,
            optional: false,
            ser_safe: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> ColumnRef {
        self.nullable = nullable;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleElement {
    pub path_id: PathId,
    pub name: Option<String>,
    pub val: Box<Expr>,
}

/// A compile-time tuple value; never printed directly, always unpacked
/// into its elements or serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleVar {
    pub elements: Vec<TupleElement>,
    pub named: bool,
    pub nullable: bool,
}

/// An expression output address: how a path is exposed from a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum OutputVar {
    ColumnRef(ColumnRef),
    TupleVar(TupleVar),
}

impl OutputVar {
    pub fn is_nullable(&self) -> bool {
        match self {
            OutputVar::ColumnRef(c) => c.nullable,
            OutputVar::TupleVar(t) => t.nullable,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            OutputVar::ColumnRef(c) => c.optional,
            OutputVar::TupleVar(_) => false,
        }
    }

    pub fn into_expr(self) -> Expr {
        match self {
            OutputVar::ColumnRef(c) => Expr::ColumnRef(c),
            OutputVar::TupleVar(t) => Expr::TupleVar(t),
        }
    }
}

impl From<ColumnRef> for OutputVar {
    fn from(c: ColumnRef) -> OutputVar {
        OutputVar::ColumnRef(c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubLinkOp {
    Exists,
    NotExists,
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

impl SetOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SetOp::Union => "UNION",
            SetOp::Intersect => "INTERSECT",
            SetOp::Except => "EXCEPT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
        }
    }
}

/// Type in casts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeName {
    /// Possibly-qualified type name; the last component may carry a `[]`
    /// suffix.
    pub name: Vec<String>,
}

impl TypeName {
    pub fn new(name: Vec<String>) -> TypeName {
        TypeName { name }
    }

    pub fn unqualified(name: impl Into<String>) -> TypeName {
        TypeName {
            name: vec![name.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub typename: TypeName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDef {
    pub partition_clause: Vec<Expr>,
    pub order_clause: Vec<SortBy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub node: Expr,
    pub dir: Option<ir::SortDir>,
    pub nulls: Option<ir::NullsOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: Vec<String>,
    pub args: Vec<Expr>,
    pub agg_order: Vec<SortBy>,
    pub agg_filter: Option<Box<Expr>>,
    pub agg_star: bool,
    pub agg_distinct: bool,
    pub over: Option<WindowDef>,
    pub with_ordinality: bool,
    /// ColumnDef nodes describing the result of a function returning
    /// RECORD.
    pub coldeflist: Vec<ColumnDef>,
    /// Whether the result can be NULL. Function calls default to nullable
    /// unless constructed null-safe.
    pub nullable: bool,
}

impl FuncCall {
    pub fn new(name: &[&str], args: Vec<Expr>) -> FuncCall {
        FuncCall {
            name: name.iter().map(|s| s.to_string()).collect(),
            args,
            agg_order: Vec::new(),
            agg_filter: None,
            agg_star: false,
            agg_distinct: false,
            over: None,
            with_ordinality: false,
            coldeflist: Vec::new(),
            nullable: true,
        }
    }

    /// A call that is guaranteed to never return NULL on non-NULL input:
    /// the result is nullable only if an argument is.
    pub fn new_null_safe(name: &[&str], args: Vec<Expr>) -> FuncCall {
        let nullable = args.iter().any(|a| a.is_nullable_shallow());
        FuncCall {
            nullable,
            ..FuncCall::new(name, args)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseWhen {
    pub expr: Expr,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum IndirectionOp {
    Index(Expr),
    Slice {
        lidx: Option<Expr>,
        ridx: Option<Expr>,
    },
    Field(String),
}

/// Any non-statement expression node that returns a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Expr {
    ColumnRef(ColumnRef),
    TupleVar(TupleVar),
    /// Query parameter (`$1..$n`).
    ParamRef {
        number: usize,
    },
    /// Named query parameter, printed as a qualified column reference.
    NamedParamRef {
        name: Vec<String>,
    },
    StringConstant {
        val: String,
    },
    NumericConstant {
        val: String,
    },
    BooleanConstant {
        val: bool,
    },
    ByteaConstant {
        val: Vec<u8>,
    },
    NullConstant,
    /// A literal expression printed verbatim.
    LiteralExpr {
        expr: String,
    },
    /// Infix, prefix, and postfix operator expressions.
    OpExpr {
        name: String,
        lexpr: Option<Box<Expr>>,
        rexpr: Option<Box<Expr>>,
    },
    FuncCall(Box<FuncCall>),
    NamedFuncArg {
        name: String,
        val: Box<Expr>,
    },
    VariadicArgument {
        expr: Box<Expr>,
    },
    TypeCast {
        arg: Box<Expr>,
        type_name: TypeName,
    },
    CaseExpr {
        arg: Option<Box<Expr>>,
        args: Vec<CaseWhen>,
        defresult: Option<Box<Expr>>,
    },
    CoalesceExpr {
        args: Vec<Expr>,
    },
    NullTest {
        arg: Box<Expr>,
        negated: bool,
    },
    BooleanTest {
        arg: Box<Expr>,
        negated: bool,
        is_true: bool,
    },
    RowExpr {
        args: Vec<Expr>,
    },
    /// A `(a, b, c)` expression.
    ImplicitRowExpr {
        args: Vec<Expr>,
    },
    ArrayExpr {
        elements: Vec<Expr>,
    },
    Indirection {
        arg: Box<Expr>,
        ops: Vec<IndirectionOp>,
    },
    /// Subselect appearing in an expression position, printed
    /// parenthesised.
    Subquery(RelId),
    /// `EXISTS`/`ANY`/`ALL` sublink.
    SubLink {
        op: SubLinkOp,
        test_expr: Option<Box<Expr>>,
        operator: Option<String>,
        rel: RelId,
    },
}

impl Expr {
    /// Nullability that can be decided without consulting the arena;
    /// containers default to all-nullable, otherwise any-nullable.
    pub fn is_nullable_shallow(&self) -> bool {
        match self {
            Expr::ColumnRef(c) => c.nullable,
            Expr::TupleVar(t) => t.nullable,
            Expr::ParamRef { .. } | Expr::NamedParamRef { .. } => false,
            Expr::NullConstant => true,
            Expr::StringConstant { .. }
            | Expr::NumericConstant { .. }
            | Expr::BooleanConstant { .. }
            | Expr::ByteaConstant { .. }
            | Expr::LiteralExpr { .. } => false,
            Expr::OpExpr { lexpr, rexpr, .. } => {
                lexpr.as_ref().is_some_and(|e| e.is_nullable_shallow())
                    || rexpr.as_ref().is_some_and(|e| e.is_nullable_shallow())
            }
            Expr::FuncCall(call) => call.nullable,
            Expr::NamedFuncArg { val, .. } => val.is_nullable_shallow(),
            Expr::VariadicArgument { .. } => false,
            Expr::TypeCast { arg, .. } => arg.is_nullable_shallow(),
            Expr::CaseExpr {
                args, defresult, ..
            } => {
                defresult
                    .as_ref()
                    .map(|d| d.is_nullable_shallow())
                    .unwrap_or(true)
                    || args.iter().any(|w| w.result.is_nullable_shallow())
            }
            Expr::CoalesceExpr { args } => args.iter().all(|a| a.is_nullable_shallow()),
            Expr::NullTest { .. } | Expr::BooleanTest { .. } => false,
            Expr::RowExpr { .. } | Expr::ImplicitRowExpr { .. } => false,
            Expr::ArrayExpr { elements } => {
                !elements.is_empty() && elements.iter().all(|e| e.is_nullable_shallow())
            }
            Expr::Indirection { .. } => true,
            Expr::Subquery(_) | Expr::SubLink { .. } => false,
        }
    }

    pub fn is_null_const(&self) -> bool {
        match self {
            Expr::NullConstant => true,
            Expr::TypeCast { arg, .. } => arg.is_null_const(),
            _ => false,
        }
    }
}

/// Query result target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResTarget {
    pub name: Option<String>,
    pub val: Expr,
    /// Whether the value has been serialised to JSON-compatible form.
    pub ser_safe: bool,
}

impl ResTarget {
    pub fn new(name: Option<String>, val: Expr) -> ResTarget {
        ResTarget {
            name,
            val,
            ser_safe: false,
        }
    }
}

/// `UPDATE ... SET` target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTarget {
    pub name: String,
    pub val: Expr,
}

/// `UPDATE (a, b, c) = row-valued-expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiAssignTarget {
    pub columns: Vec<String>,
    pub source: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferClause {
    pub index_elems: Vec<ColumnRef>,
    pub conname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnConflictAction {
    DoNothing,
    DoUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnConflictClause {
    pub action: OnConflictAction,
    pub infer: Option<InferClause>,
    /// SET list for DO UPDATE; multi-assign targets allowed.
    pub multi_assign: Option<MultiAssignTarget>,
    pub target_list: Vec<UpdateTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonTableExpr {
    /// Query name (unqualified).
    pub name: String,
    pub query: RelId,
    pub recursive: bool,
    pub materialized: Option<bool>,
    pub aliascolnames: Vec<String>,
}

/// A regular relation (a base table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseTable {
    pub schemaname: Option<String>,
    pub relname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectStmt {
    /// `None`: no DISTINCT; `Some(vec![])`: plain DISTINCT; otherwise
    /// DISTINCT ON the given expressions.
    pub distinct_clause: Option<Vec<Expr>>,
    pub from_clause: Vec<RvarId>,
    pub group_clause: Vec<Expr>,
    pub having: Option<Expr>,
    pub sort_clause: Vec<SortBy>,
    pub limit_offset: Option<Expr>,
    pub limit_count: Option<Expr>,
    /// List of implicit-row expressions of a VALUES query.
    pub values: Vec<Expr>,
    /// Set operation; when present `larg`/`rarg` are set and the plain
    /// SELECT fields are unused.
    pub op: Option<SetOp>,
    pub all: bool,
    pub larg: Option<RelId>,
    pub rarg: Option<RelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertStmt {
    /// Target relation to perform the operation on.
    pub relation: RvarId,
    pub cols: Vec<String>,
    /// Source SELECT/VALUES, if any.
    pub select_stmt: Option<RelId>,
    pub on_conflict: Option<OnConflictClause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStmt {
    pub relation: RvarId,
    pub targets: Vec<UpdateTarget>,
    pub from_clause: Vec<RvarId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteStmt {
    pub relation: RvarId,
    pub using_clause: Vec<RvarId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum RelKind {
    /// A base table.
    Table(BaseTable),
    /// Special relation that produces nulls for all its attributes.
    NullRelation,
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

/// A relation node: a base table, a query, or a null-relation, together
/// with the path bookkeeping shared by all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rel {
    pub kind: RelKind,
    /// The path id represented by the node, if any.
    pub path_id: Option<PathId>,
    /// Whether the node represents a distinct set.
    pub is_distinct: bool,
    /// A subset of paths necessary to perform joining.
    pub path_scope: IndexSet<PathId>,
    /// Map of res target names corresponding to paths.
    pub path_outputs: IndexMap<(PathId, PathAspect), OutputVar>,
    /// Paths visible inside this query but not exported.
    pub path_id_mask: IndexSet<PathId>,
    /// Map of expressions usable inside this query, per path and aspect.
    pub path_namespace: IndexMap<(PathId, PathAspect), Expr>,
    /// Renaming of outer path ids to inner path ids across view
    /// boundaries.
    pub view_path_id_map: IndexMap<PathId, PathId>,
    /// Map of range vars providing each path.
    pub path_rvar_map: IndexMap<(PathId, PathAspect), RvarId>,
    /// Result targets (the RETURNING list for DML).
    pub target_list: Vec<ResTarget>,
    pub where_clause: Option<Expr>,
    pub ctes: Vec<CteId>,
    pub nullable: bool,
}

impl Rel {
    pub fn new(kind: RelKind) -> Rel {
        Rel {
            kind,
            path_id: None,
            is_distinct: true,
            path_scope: IndexSet::new(),
            path_outputs: IndexMap::new(),
            path_id_mask: IndexSet::new(),
            path_namespace: IndexMap::new(),
            view_path_id_map: IndexMap::new(),
            path_rvar_map: IndexMap::new(),
            target_list: Vec::new(),
            where_clause: None,
            ctes: Vec::new(),
            nullable: false,
        }
    }

    pub fn new_select() -> Rel {
        Rel::new(RelKind::Select(SelectStmt::default()))
    }

    pub fn is_set_op_query(&self) -> bool {
        matches!(&self.kind, RelKind::Select(s) if s.op.is_some())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, RelKind::Table(_) | RelKind::NullRelation)
    }

    pub fn is_dml(&self) -> bool {
        matches!(
            self.kind,
            RelKind::Insert(_) | RelKind::Update(_) | RelKind::Delete(_)
        )
    }

    pub fn select(&self) -> Option<&SelectStmt> {
        self.kind.as_select()
    }

    pub fn select_mut(&mut self) -> Option<&mut SelectStmt> {
        self.kind.as_select_mut()
    }

    /// A query is serialization-safe iff every target is.
    pub fn is_ser_safe(&self) -> bool {
        !self.target_list.is_empty() && self.target_list.iter().all(|t| t.ser_safe)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum RvarKind {
    /// Relation range var over a base table or a null-relation.
    Relation {
        rel: RelId,
        include_inherited: bool,
    },
    /// Range over a common table expression, by name.
    Cte(CteId),
    /// Subquery appearing in a FROM clause.
    Subselect {
        lateral: bool,
        rel: RelId,
    },
    Function {
        lateral: bool,
        with_ordinality: bool,
        is_rowsfrom: bool,
        functions: Vec<FuncCall>,
    },
    Join {
        join_type: JoinType,
        larg: RvarId,
        rarg: RvarId,
        quals: Option<Expr>,
    },
    /// A polymorphic range: several component rvars of a type
    /// intersection.
    Intersection {
        components: Vec<RvarId>,
    },
}

/// Range variable, used in FROM clauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rvar {
    pub kind: RvarKind,
    pub alias: Alias,
    /// The IR type this rvar represents, if any.
    pub typeref: Option<ir::TypeRef>,
    /// The id of the schema object this rvar represents.
    pub schema_object_id: Option<Uuid>,
    /// Outputs this rvar exposes per path and aspect.
    pub path_outputs: IndexMap<(PathId, PathAspect), OutputVar>,
}

impl Rvar {
    pub fn new(kind: RvarKind, alias: Alias) -> Rvar {
        Rvar {
            kind,
            alias,
            typeref: None,
            schema_object_id: None,
            path_outputs: IndexMap::new(),
        }
    }
}

/// The arena owning all relations, range vars and CTEs of one SQL tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelStore {
    rels: Vec<Rel>,
    rvars: Vec<Rvar>,
    ctes: Vec<CommonTableExpr>,
}

impl RelStore {
    pub fn new() -> RelStore {
        RelStore::default()
    }

    pub fn add_rel(&mut self, rel: Rel) -> RelId {
        self.rels.push(rel);
        RelId::from(self.rels.len() - 1)
    }

    pub fn new_select(&mut self) -> RelId {
        self.add_rel(Rel::new_select())
    }

    pub fn rel(&self, id: RelId) -> &Rel {
        &self.rels[id.get()]
    }

    pub fn rel_mut(&mut self, id: RelId) -> &mut Rel {
        &mut self.rels[id.get()]
    }

    pub fn add_rvar(&mut self, rvar: Rvar) -> RvarId {
        self.rvars.push(rvar);
        RvarId::from(self.rvars.len() - 1)
    }

    pub fn rvar(&self, id: RvarId) -> &Rvar {
        &self.rvars[id.get()]
    }

    pub fn rvar_mut(&mut self, id: RvarId) -> &mut Rvar {
        &mut self.rvars[id.get()]
    }

    pub fn add_cte(&mut self, cte: CommonTableExpr) -> CteId {
        self.ctes.push(cte);
        CteId::from(self.ctes.len() - 1)
    }

    pub fn cte(&self, id: CteId) -> &CommonTableExpr {
        &self.ctes[id.get()]
    }

    pub fn cte_mut(&mut self, id: CteId) -> &mut CommonTableExpr {
        &mut self.ctes[id.get()]
    }

    /// The query a range var ranges over, when it ranges over one.
    pub fn rvar_rel(&self, id: RvarId) -> Option<RelId> {
        match &self.rvar(id).kind {
            RvarKind::Relation { rel, .. } => Some(*rel),
            RvarKind::Cte(cte) => Some(self.cte(*cte).query),
            RvarKind::Subselect { rel, .. } => Some(*rel),
            RvarKind::Function { .. }
            | RvarKind::Join { .. }
            | RvarKind::Intersection { .. } => None,
        }
    }

    /// Nullability of an expression, chasing single-column subqueries
    /// through the arena.
    pub fn is_nullable(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Subquery(rel) => {
                let rel = self.rel(*rel);
                match rel.target_list.as_slice() {
                    [t] => self.is_nullable(&t.val),
                    _ => true,
                }
            }
            _ => expr.is_nullable_shallow(),
        }
    }
}

/// A finished compilation: the root statement plus the arena it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlTree {
    pub root: RelId,
    pub store: RelStore,
}
