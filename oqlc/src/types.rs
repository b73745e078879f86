//! IR typeref ↔ PostgreSQL type mapping and pointer storage layout.

use uuid::Uuid;

use crate::error::Error;
use crate::ir::{self, wellknown, PointerRef, TypeRef, TypeRefKind};
use crate::Result;

/// Schema that holds all generated object and link tables.
pub const DATA_SCHEMA: &str = "edgedbpub";

/// Schema that holds the runtime helper functions.
pub const HELPER_SCHEMA: &str = "edgedb";

/// Base type map keyed by well-known type ids.
const BASE_TYPE_NAME_MAP: &[(Uuid, &str)] = &[
    (wellknown::STD_UUID, "uuid"),
    (wellknown::STD_STR, "text"),
    (wellknown::STD_BYTES, "bytea"),
    (wellknown::STD_INT16, "int2"),
    (wellknown::STD_INT32, "int4"),
    (wellknown::STD_INT64, "int8"),
    (wellknown::STD_FLOAT32, "float4"),
    (wellknown::STD_FLOAT64, "float8"),
    (wellknown::STD_DECIMAL, "numeric"),
    (wellknown::STD_BOOL, "bool"),
    (wellknown::STD_DATETIME, "timestamptz"),
    (wellknown::STD_DURATION, "interval"),
    (wellknown::STD_JSON, "jsonb"),
    (wellknown::STD_BIGINT, "numeric"),
];

fn base_type_name(id: Uuid) -> Option<&'static str> {
    BASE_TYPE_NAME_MAP
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}

fn pg_type_array(mut tp: Vec<String>) -> Vec<String> {
    if let Some(last) = tp.last_mut() {
        last.push_str("[]");
    }
    tp
}

/// Total mapping of an IR typeref to a PostgreSQL type name tuple.
pub fn pg_type_from_ir_typeref(
    typeref: &TypeRef,
    serialized: bool,
    persistent_tuples: bool,
) -> Vec<String> {
    match &typeref.kind {
        TypeRefKind::Array { element } => {
            if element.is_polymorphic() || element.is_abstract_scalar() {
                vec!["anyarray".to_string()]
            } else {
                pg_type_array(pg_type_from_ir_typeref(
                    element,
                    serialized,
                    persistent_tuples,
                ))
            }
        }
        TypeRefKind::Tuple {
            persistent_name, ..
        } => match persistent_name {
            Some(name) if persistent_tuples => {
                vec![DATA_SCHEMA.to_string(), name.clone()]
            }
            _ => vec!["record".to_string()],
        },
        TypeRefKind::Object { .. } => {
            if serialized {
                vec!["record".to_string()]
            } else {
                vec!["uuid".to_string()]
            }
        }
        TypeRefKind::Pseudo { variant } => match variant {
            ir::PseudoTypeVariant::AnyTuple => vec!["record".to_string()],
            ir::PseudoTypeVariant::AnyNonArray | ir::PseudoTypeVariant::AnyScalar => {
                vec!["anynonarray".to_string()]
            }
            ir::PseudoTypeVariant::AnyType => vec!["anyelement".to_string()],
        },
        TypeRefKind::Scalar {
            base_id,
            is_abstract,
            ..
        } => {
            if *is_abstract {
                return vec!["anynonarray".to_string()];
            }
            let lookup = base_id.unwrap_or(typeref.id);
            match base_type_name(typeref.id).or_else(|| base_type_name(lookup)) {
                Some(name) => vec![name.to_string()],
                None => {
                    // User-defined scalar type: backend-name derived from
                    // the type's module and id.
                    vec![
                        DATA_SCHEMA.to_string(),
                        format!(
                            "{}_{}_t",
                            typeref.module_name(),
                            typeref.id.as_simple()
                        ),
                    ]
                }
            }
        }
    }
}

/// Which physical table realises a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    /// A column in the object-type table.
    ObjectType,
    /// A row in the pointer's link table.
    Link,
}

#[derive(Debug, Clone)]
pub struct PointerStorageInfo {
    /// (schema, table) of the backing table, when the pointer is stored.
    pub table_name: Option<(String, String)>,
    pub table_type: TableType,
    pub column_name: String,
    pub column_type: Vec<String>,
}

/// Backend table name of an object type.
pub fn get_objtype_backend_name(typeref: &TypeRef) -> (String, String) {
    (DATA_SCHEMA.to_string(), typeref.name_hint.clone())
}

/// Backend table name of a pointer's link table.
pub fn get_pointer_backend_name(ptrref: &PointerRef) -> (String, String) {
    let source = ptrref
        .source
        .as_deref()
        .map(|s| s.name_hint.as_str())
        .unwrap_or("std::BaseObject");
    (
        DATA_SCHEMA.to_string(),
        format!("{}.{}", source, ptrref.shortname),
    )
}

fn storable_in_source(ptrref: &PointerRef) -> bool {
    ptrref.out_cardinality == ir::Cardinality::One
}

fn storable_in_pointer(ptrref: &PointerRef) -> bool {
    ptrref.out_cardinality == ir::Cardinality::Many || ptrref.has_properties
}

/// Classifies a pointer into its storage: a column in the source row, a
/// link-table row, or a pseudo-pointer that has no storage of its own.
///
/// `link_bias` requests the link-table layout even for pointers that are
/// stored inline; used when traversing inbound or when the link carries
/// properties.
pub fn get_ptrref_storage_info(
    ptrref: &PointerRef,
    link_bias: bool,
    allow_missing: bool,
) -> Result<Option<PointerStorageInfo>> {
    if ptrref.is_link_property() {
        let parent = ptrref
            .parent_ptr
            .as_deref()
            .expect("link property without parent pointer");

        // link@target / link@source resolve to the canonical link-table
        // columns; other properties get their own column.
        let col_name = ptrref.shortname.clone();

        return Ok(Some(PointerStorageInfo {
            table_name: Some(get_pointer_backend_name(parent)),
            table_type: TableType::Link,
            column_name: col_name,
            column_type: resolve_column_type(ptrref),
        }));
    }

    let source = match ptrref.source.as_deref() {
        Some(s) => s,
        None => {
            return Err(Error::new_internal(format!(
                "cannot determine backend storage parameters for the \
                 {:?} pointer: no source type",
                ptrref.name
            )))
        }
    };

    if source.is_scalar() {
        // A pseudo-link on a scalar (__type__).
        return Ok(Some(PointerStorageInfo {
            table_name: None,
            table_type: TableType::ObjectType,
            column_name: ptrref.shortname.clone(),
            column_type: resolve_column_type(ptrref),
        }));
    }

    if storable_in_source(ptrref) && !link_bias {
        let col_name = ptrref.shortname.clone();
        return Ok(Some(PointerStorageInfo {
            table_name: Some(get_objtype_backend_name(source)),
            table_type: TableType::ObjectType,
            column_name: col_name,
            column_type: resolve_column_type(ptrref),
        }));
    }

    if storable_in_pointer(ptrref) {
        return Ok(Some(PointerStorageInfo {
            table_name: Some(get_pointer_backend_name(ptrref)),
            table_type: TableType::Link,
            column_name: "target".to_string(),
            column_type: resolve_column_type(ptrref),
        }));
    }

    if !link_bias && !allow_missing {
        return Err(Error::new_internal(format!(
            "cannot determine backend storage parameters for the \
             {:?} pointer: unexpected characteristics",
            ptrref.name
        )));
    }

    Ok(None)
}

/// Infallible variant used where the classification is known to exist.
pub fn ptr_storage_info(ptrref: &PointerRef, link_bias: bool) -> Result<PointerStorageInfo> {
    get_ptrref_storage_info(ptrref, link_bias, false).map(|info| {
        info.expect("storage info cannot be missing when allow_missing is unset")
    })
}

fn resolve_column_type(ptrref: &PointerRef) -> Vec<String> {
    if ptrref.target.is_object() {
        vec!["uuid".to_string()]
    } else {
        pg_type_from_ir_typeref(&ptrref.target, false, true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::Cardinality;

    fn scalar(name: &str, id: Uuid) -> TypeRef {
        TypeRef {
            id,
            name_hint: format!("std::{name}"),
            kind: TypeRefKind::Scalar {
                base_id: None,
                is_abstract: false,
                custom_sql_serialization: None,
            },
        }
    }

    fn object(name: &str, n: u128) -> TypeRef {
        TypeRef {
            id: Uuid::from_u128(n),
            name_hint: format!("default::{name}"),
            kind: TypeRefKind::Object {
                is_free: false,
                union_of: vec![],
            },
        }
    }

    #[test]
    fn base_types_map_to_pg_names() {
        let t = scalar("str", wellknown::STD_STR);
        assert_eq!(pg_type_from_ir_typeref(&t, false, false), vec!["text"]);

        let arr = TypeRef {
            id: Uuid::from_u128(0xa1),
            name_hint: "array<std::int64>".into(),
            kind: TypeRefKind::Array {
                element: Box::new(scalar("int64", wellknown::STD_INT64)),
            },
        };
        assert_eq!(pg_type_from_ir_typeref(&arr, false, false), vec!["int8[]"]);
    }

    #[test]
    fn objects_map_to_uuid_or_record() {
        let t = object("Movie", 7);
        assert_eq!(pg_type_from_ir_typeref(&t, false, false), vec!["uuid"]);
        assert_eq!(pg_type_from_ir_typeref(&t, true, false), vec!["record"]);
    }

    #[test]
    fn multi_pointer_is_link_table() {
        let ptr = PointerRef {
            id: Uuid::from_u128(0xb0),
            name: "default::actors".into(),
            shortname: "actors".into(),
            source: Some(Box::new(object("Movie", 7))),
            target: Box::new(object("Person", 8)),
            out_cardinality: Cardinality::Many,
            required: false,
            parent_ptr: None,
            has_properties: false,
        };
        let info = ptr_storage_info(&ptr, false).unwrap();
        assert_eq!(info.table_type, TableType::Link);
        assert_eq!(info.column_name, "target");
        assert_eq!(
            info.table_name,
            Some(("edgedbpub".to_string(), "default::Movie.actors".to_string()))
        );
    }

    #[test]
    fn single_property_is_inline() {
        let ptr = PointerRef {
            id: Uuid::from_u128(0xb1),
            name: "default::title".into(),
            shortname: "title".into(),
            source: Some(Box::new(object("Movie", 7))),
            target: Box::new(scalar("str", wellknown::STD_STR)),
            out_cardinality: Cardinality::One,
            required: true,
            parent_ptr: None,
            has_properties: false,
        };
        let info = ptr_storage_info(&ptr, false).unwrap();
        assert_eq!(info.table_type, TableType::ObjectType);
        assert_eq!(info.column_name, "title");
        assert_eq!(info.column_type, vec!["text"]);
    }
}
