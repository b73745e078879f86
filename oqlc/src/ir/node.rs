use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use super::path::PathId;
use super::scope::ScopeTree;
use super::typeref::{Cardinality, PointerRef, PtrDir, TypeRef};

/// A compilation unit: one root expression with its scope tree and
/// parameters, as produced by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub expr: Set,
    pub scope_tree: ScopeTree,
    pub params: Vec<Param>,
}

/// A query parameter declared by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub required: bool,
    pub typeref: TypeRef,
}

/// An IR set: a node denoting a (potentially empty, potentially multi)
/// collection of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Set {
    pub path_id: PathId,
    pub typeref: TypeRef,
    /// The pointer step that produced this set, if it is a path step.
    pub rptr: Option<SetPointer>,
    /// The computed expression, when the set is not a plain path step.
    pub expr: Option<Box<SetExpr>>,
    /// Shape to materialise when this set is serialised as an object.
    pub shape: Vec<ShapeElement>,
    /// Unique id of the scope-tree node this set attaches to, if any.
    pub scope_id: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPointer {
    pub source: Box<Set>,
    pub ptrref: PointerRef,
    pub direction: PtrDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeOp {
    Get,
    Assign,
    Append,
    Subtract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeElement {
    pub set: Set,
    pub op: ShapeOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum ConstValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeMod {
    Singleton,
    Optional,
    SetOf,
}

/// A resolved operator or function call. The schema lookup happened in the
/// front-end; this carries only what code generation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Fully-qualified OQL name, e.g. `std::len`.
    pub name: String,
    /// `FROM SQL FUNCTION` name, when the call maps to a SQL function.
    pub sql_function: Option<String>,
    /// `FROM SQL OPERATOR` name, when the call maps to a SQL operator.
    pub sql_operator: Option<String>,
    pub args: Vec<CallArg>,
    pub return_typemod: TypeMod,
    pub volatility: Volatility,
    /// Guaranteed to never return NULL on non-NULL input.
    pub null_safe: bool,
    /// Whether the underlying SQL function is declared STRICT.
    pub impl_is_strict: bool,
    /// Aggregate seed: when set, an empty input produces this value.
    pub initial_value: Option<ConstValue>,
    /// Declared type of the variadic parameter, if the function has one.
    pub variadic_param_type: Option<TypeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallArg {
    pub expr: Set,
    /// Typemod of the formal parameter; `SetOf` makes the call an
    /// aggregate over that argument.
    pub typemod: TypeMod,
    pub cardinality: Cardinality,
    /// Declared SQL operand type to cast through, from `FROM SQL
    /// OPERATOR`/`FROM SQL FUNCTION` aliases.
    pub sql_cast: Option<String>,
}

impl Call {
    pub fn is_aggregate(&self) -> bool {
        self.args.iter().any(|a| a.typemod == TypeMod::SetOf)
    }

    pub fn is_set_returning(&self) -> bool {
        self.return_typemod == TypeMod::SetOf
    }

    pub fn is_volatile(&self) -> bool {
        self.volatility == Volatility::Volatile
    }
}

/// How a cast is implemented in the backend.
#[derive(Debug, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum CastImpl {
    /// Plain `(expr)::type`.
    SqlCast,
    /// `(expr)::intermediate::type` through an intermediate SQL type.
    SqlCastVia(String),
    /// Call a SQL function with the value.
    SqlFunction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortElement {
    pub expr: Set,
    pub direction: SortDir,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleElementExpr {
    pub name: Option<String>,
    pub val: Set,
}

/// The computed-expression kinds a set can carry. Each variant corresponds
/// to one lowering in the compiler.
#[derive(Debug, Clone, Serialize, Deserialize, EnumAsInner)]
pub enum SetExpr {
    Empty,
    Parameter {
        name: String,
    },
    Constant(ConstValue),
    ConstantSet(Vec<ConstValue>),
    Array(Vec<Set>),
    Tuple {
        named: bool,
        elements: Vec<TupleElementExpr>,
    },
    /// Reference to a tuple element by name (or stringified position).
    TupleIndirection {
        expr: Set,
        name: String,
    },
    TypeCast {
        expr: Set,
        to: TypeRef,
        cast: CastImpl,
        /// `Required` cardinality modifier: NULL input raises at runtime.
        required: bool,
    },
    TypeIntrospection {
        of: TypeRef,
    },
    TypeCheck {
        expr: Set,
        against: TypeRef,
        negated: bool,
    },
    Index {
        expr: Set,
        index: Set,
    },
    Slice {
        expr: Set,
        start: Option<Set>,
        stop: Option<Set>,
    },
    OperatorCall(Call),
    FunctionCall(Call),
    Union {
        larg: Set,
        rarg: Set,
    },
    Distinct(Set),
    IfElse {
        condition: Set,
        if_true: Set,
        if_false: Set,
    },
    Coalesce {
        larg: Set,
        rarg: Set,
    },
    Exists(Set),
    Membership {
        negated: bool,
        needle: Set,
        haystack: Set,
    },
    Select(SelectStmt),
    Group(GroupStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectStmt {
    pub result: Set,
    pub where_clause: Option<Set>,
    pub orderby: Vec<SortElement>,
    pub offset: Option<Set>,
    pub limit: Option<Set>,
    /// FOR iterator binding, if the statement is a FOR loop body.
    pub iterator: Option<Set>,
    /// Sets evaluated once and reused; see materialised bindings.
    pub materialized_sets: Vec<Set>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStmt {
    pub subject: Set,
    /// `using` bindings: name → expression over the subject.
    pub using: Vec<(String, Set)>,
    /// Grouping sets, each a list of binding names.
    pub by: Vec<Vec<String>>,
    pub result: Set,
    /// Path id under which the group contents (`@elements`) are exposed.
    pub group_binding: PathId,
    pub where_clause: Option<Set>,
    pub orderby: Vec<SortElement>,
}

/// A trigger owned by a DML statement. The body is recompiled with the
/// owning statement's overlays active, so its reads observe the
/// statement's effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub body: Set,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertStmt {
    /// The inserted object; its shape carries the pointer values.
    pub subject: Set,
    /// Explicit constraint checks that PostgreSQL cannot enforce.
    pub checks: Vec<Set>,
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStmt {
    /// The updated range; its shape carries the new pointer values.
    pub subject: Set,
    pub where_clause: Option<Set>,
    pub checks: Vec<Set>,
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteStmt {
    pub subject: Set,
    pub where_clause: Option<Set>,
    pub triggers: Vec<Trigger>,
}

impl Set {
    /// Whether this set or anything under it performs DML.
    pub fn contains_dml(&self) -> bool {
        fn expr_contains_dml(expr: &SetExpr) -> bool {
            match expr {
                SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Delete(_) => true,
                SetExpr::Select(s) => {
                    s.result.contains_dml()
                        || s.iterator.as_ref().is_some_and(|i| i.contains_dml())
                }
                SetExpr::Union { larg, rarg } => larg.contains_dml() || rarg.contains_dml(),
                SetExpr::IfElse {
                    condition,
                    if_true,
                    if_false,
                } => {
                    condition.contains_dml()
                        || if_true.contains_dml()
                        || if_false.contains_dml()
                }
                SetExpr::Coalesce { larg, rarg } => larg.contains_dml() || rarg.contains_dml(),
                SetExpr::OperatorCall(call) | SetExpr::FunctionCall(call) => {
                    call.args.iter().any(|a| a.expr.contains_dml())
                }
                _ => false,
            }
        }

        self.expr.as_deref().is_some_and(expr_contains_dml)
            || self.shape.iter().any(|el| el.set.contains_dml())
    }

    /// A set is a plain path step when it has a pointer and no computed
    /// expression.
    pub fn is_path_step(&self) -> bool {
        self.rptr.is_some() && self.expr.is_none()
    }
}
