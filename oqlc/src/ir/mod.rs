//! Input IR of the compiler.
//!
//! The front-end resolves names, types and cardinality and hands the
//! backend a fully typed tree of [Set] nodes together with a [ScopeTree]
//! describing where each path is bound.

mod node;
mod path;
mod scope;
mod typeref;

pub use node::*;
pub use path::{PathId, PathStep};
pub use scope::{ScopeId, ScopeNode, ScopeNodeKind, ScopeTree};
pub use typeref::{
    wellknown, Cardinality, PointerRef, PseudoTypeVariant, PtrDir, TupleElementType, TypeRef,
    TypeRefKind,
};
