use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to a type known to the front-end schema.
///
/// Equality and hashing are by schema id: two refs to the same type always
/// compare equal regardless of how much of the type's structure they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: Uuid,
    /// Fully-qualified name, e.g. `default::Movie`.
    pub name_hint: String,
    pub kind: TypeRefKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum TypeRefKind {
    Scalar {
        /// Closest well-known ancestor, used for the base-type map.
        base_id: Option<Uuid>,
        is_abstract: bool,
        /// SQL type of the custom serialization cast, when the scalar has
        /// one (e.g. enums serialised through a domain type).
        custom_sql_serialization: Option<String>,
    },
    Object {
        /// Free objects have no backing table; a synthetic id column is
        /// generated for them.
        is_free: bool,
        union_of: Vec<TypeRef>,
    },
    Tuple {
        named: bool,
        elements: Vec<TupleElementType>,
        /// Name of the explicitly created composite type backing an
        /// in-schema persistent tuple, if any.
        persistent_name: Option<String>,
    },
    Array {
        element: Box<TypeRef>,
    },
    /// `anytype` / `anyscalar` and friends.
    Pseudo {
        variant: PseudoTypeVariant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PseudoTypeVariant {
    AnyType,
    AnyTuple,
    AnyScalar,
    AnyNonArray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleElementType {
    pub name: String,
    pub typeref: TypeRef,
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl TypeRef {
    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeRefKind::Object { .. })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeRefKind::Scalar { .. })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind, TypeRefKind::Tuple { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeRefKind::Array { .. })
    }

    pub fn is_collection(&self) -> bool {
        self.is_tuple() || self.is_array()
    }

    pub fn is_abstract_scalar(&self) -> bool {
        matches!(
            self.kind,
            TypeRefKind::Scalar {
                is_abstract: true,
                ..
            }
        )
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self.kind, TypeRefKind::Pseudo { .. })
    }

    /// The unqualified part of the name hint.
    pub fn short_name(&self) -> &str {
        match self.name_hint.rsplit_once("::") {
            Some((_, name)) => name,
            None => &self.name_hint,
        }
    }

    pub fn module_name(&self) -> &str {
        match self.name_hint.rsplit_once("::") {
            Some((module, _)) => module,
            None => "default",
        }
    }

    /// Name of the collection kind, used for alias hints on collection
    /// paths (`array`, `tuple`).
    pub fn collection_name(&self) -> Option<&'static str> {
        match self.kind {
            TypeRefKind::Tuple { .. } => Some("tuple"),
            TypeRefKind::Array { .. } => Some("array"),
            _ => None,
        }
    }
}

/// Direction of a pointer traversal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PtrDir {
    Outbound,
    Inbound,
}

/// Cardinality of a pointer or call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Reference to a schema pointer (link or property), resolved by the
/// front-end. Carries everything the backend needs to classify storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerRef {
    pub id: Uuid,
    /// Fully-qualified name, e.g. `default::title`.
    pub name: String,
    pub shortname: String,
    pub source: Option<Box<TypeRef>>,
    pub target: Box<TypeRef>,
    pub out_cardinality: Cardinality,
    pub required: bool,
    /// For link properties, the owning link.
    pub parent_ptr: Option<Box<PointerRef>>,
    /// Whether the pointer is a link carrying properties; such links are
    /// always backed by a link table.
    pub has_properties: bool,
}

impl PartialEq for PointerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PointerRef {}

impl Hash for PointerRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PointerRef {
    pub fn is_id(&self) -> bool {
        self.shortname == "id" && self.parent_ptr.is_none()
    }

    pub fn is_type_ptr(&self) -> bool {
        self.shortname == "__type__"
    }

    pub fn is_link_property(&self) -> bool {
        self.parent_ptr.is_some()
    }

    pub fn is_object_link(&self) -> bool {
        self.target.is_object()
    }

    pub fn is_multi(&self) -> bool {
        self.out_cardinality == Cardinality::Many
    }
}

/// Well-known scalar type ids, mirroring the front-end's stable ids for
/// standard library scalars. The base-type map in [crate::types] is keyed
/// by these.
pub mod wellknown {
    use uuid::Uuid;

    macro_rules! wellknown_id {
        ($name:ident, $n:literal) => {
            pub const $name: Uuid = Uuid::from_u128($n);
        };
    }

    wellknown_id!(STD_UUID, 0x100);
    wellknown_id!(STD_STR, 0x101);
    wellknown_id!(STD_BYTES, 0x102);
    wellknown_id!(STD_INT16, 0x103);
    wellknown_id!(STD_INT32, 0x104);
    wellknown_id!(STD_INT64, 0x105);
    wellknown_id!(STD_FLOAT32, 0x106);
    wellknown_id!(STD_FLOAT64, 0x107);
    wellknown_id!(STD_DECIMAL, 0x108);
    wellknown_id!(STD_BOOL, 0x109);
    wellknown_id!(STD_DATETIME, 0x10a);
    wellknown_id!(STD_DURATION, 0x10e);
    wellknown_id!(STD_JSON, 0x10f);
    wellknown_id!(STD_BIGINT, 0x110);
}
