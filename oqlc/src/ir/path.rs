use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::typeref::{PointerRef, PtrDir, TypeRef};

/// Structural identity of a referenced expression along a chain of pointer
/// steps.
///
/// A path id is a root type followed by pointer and type-intersection
/// steps. The `is_ptr` flag marks the *link variant* of a path: the path
/// denoting the link itself (source/target pair plus link properties)
/// rather than the link target.
///
/// Cloning is cheap; the step chain is shared.
#[derive(Clone, Serialize, Deserialize)]
pub struct PathId {
    steps: Arc<Vec<PathStep>>,
    is_ptr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    Root(TypeRef),
    Pointer {
        ptr: PointerRef,
        dir: PtrDir,
    },
    TypeIntersection {
        typeref: TypeRef,
        /// The intersected type is an ancestor of the source type, so the
        /// step does not restrict the set.
        ancestral: bool,
    },
}

impl PathId {
    pub fn from_typeref(typeref: TypeRef) -> PathId {
        PathId {
            steps: Arc::new(vec![PathStep::Root(typeref)]),
            is_ptr: false,
        }
    }

    pub fn extend(&self, ptr: PointerRef, dir: PtrDir) -> PathId {
        let mut steps = (*self.steps).clone();
        steps.push(PathStep::Pointer { ptr, dir });
        PathId {
            steps: Arc::new(steps),
            is_ptr: false,
        }
    }

    pub fn extend_type_intersection(&self, typeref: TypeRef, ancestral: bool) -> PathId {
        let mut steps = (*self.steps).clone();
        steps.push(PathStep::TypeIntersection { typeref, ancestral });
        PathId {
            steps: Arc::new(steps),
            is_ptr: false,
        }
    }

    /// Whether the final type-intersection step is ancestral.
    pub fn intersection_is_ancestral(&self) -> bool {
        matches!(
            self.steps.last(),
            Some(PathStep::TypeIntersection { ancestral: true, .. })
        )
    }

    /// A synthetic element path of a tuple-typed path, used for tuple
    /// expressions whose elements have no front-end path of their own
    /// (e.g. `enumerate`). Deterministic for a given (path, name) pair.
    pub fn tuple_element(&self, name: &str, typeref: TypeRef) -> PathId {
        let mut seed: u128 = 0xcbf2_9ce4_8422_2325;
        for b in name.bytes() {
            seed = (seed ^ b as u128).wrapping_mul(0x100_0000_01b3);
        }
        seed ^= self.target().id.as_u128();
        let ptr = PointerRef {
            id: uuid::Uuid::from_u128(seed),
            name: format!("__tuple__::{name}"),
            shortname: name.to_string(),
            source: None,
            target: Box::new(typeref),
            out_cardinality: crate::ir::Cardinality::One,
            required: true,
            parent_ptr: None,
            has_properties: false,
        };
        self.extend(ptr, PtrDir::Outbound)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// The last pointer step, if any.
    pub fn rptr(&self) -> Option<&PointerRef> {
        match self.steps.last() {
            Some(PathStep::Pointer { ptr, .. }) => Some(ptr),
            _ => None,
        }
    }

    pub fn rptr_dir(&self) -> Option<PtrDir> {
        match self.steps.last() {
            Some(PathStep::Pointer { dir, .. }) => Some(*dir),
            _ => None,
        }
    }

    /// The path with the last step removed. For a link-variant path this is
    /// the source of the link, not the target path.
    pub fn src_path(&self) -> Option<PathId> {
        if self.is_ptr {
            return Some(self.tgt_path().src_path().unwrap_or_else(|| self.tgt_path()));
        }
        if self.steps.len() <= 1 {
            return None;
        }
        Some(PathId {
            steps: Arc::new(self.steps[..self.steps.len() - 1].to_vec()),
            is_ptr: false,
        })
    }

    /// The link variant of this path.
    pub fn ptr_path(&self) -> PathId {
        PathId {
            steps: Arc::clone(&self.steps),
            is_ptr: true,
        }
    }

    /// The target variant of this path (inverse of [PathId::ptr_path]).
    pub fn tgt_path(&self) -> PathId {
        PathId {
            steps: Arc::clone(&self.steps),
            is_ptr: false,
        }
    }

    /// The type of the path target.
    pub fn target(&self) -> &TypeRef {
        match self.steps.last().expect("path id cannot be empty") {
            PathStep::Root(t) => t,
            PathStep::Pointer { ptr, dir } => match dir {
                PtrDir::Outbound => &ptr.target,
                PtrDir::Inbound => ptr
                    .source
                    .as_deref()
                    .expect("inbound pointer step without source type"),
            },
            PathStep::TypeIntersection { typeref, .. } => typeref,
        }
    }

    pub fn is_ptr_path(&self) -> bool {
        self.is_ptr
    }

    pub fn is_objtype_path(&self) -> bool {
        !self.is_ptr && self.target().is_object()
    }

    pub fn is_tuple_path(&self) -> bool {
        !self.is_ptr && self.target().is_tuple()
    }

    pub fn is_array_path(&self) -> bool {
        !self.is_ptr && self.target().is_array()
    }

    pub fn is_collection_path(&self) -> bool {
        !self.is_ptr && self.target().is_collection()
    }

    pub fn is_scalar_path(&self) -> bool {
        !self.is_ptr && self.target().is_scalar()
    }

    pub fn is_type_intersection_path(&self) -> bool {
        matches!(self.steps.last(), Some(PathStep::TypeIntersection { .. }))
    }

    pub fn starts_with(&self, prefix: &PathId) -> bool {
        self.steps.len() >= prefix.steps.len()
            && self.steps[..prefix.steps.len()] == prefix.steps[..]
    }

    /// Replaces the `old` prefix of this path with `new`. Returns the path
    /// unchanged when it does not start with `old`.
    pub fn replace_prefix(&self, old: &PathId, new: &PathId) -> PathId {
        if !self.starts_with(old) {
            return self.clone();
        }
        if self.steps.len() == old.steps.len() {
            // A full replacement preserves the link-variant flag.
            return PathId {
                steps: Arc::clone(&new.steps),
                is_ptr: self.is_ptr,
            };
        }
        let mut steps = (*new.steps).clone();
        steps.extend(self.steps[old.steps.len()..].iter().cloned());
        PathId {
            steps: Arc::new(steps),
            is_ptr: self.is_ptr,
        }
    }

    /// Iterates over this path and all its prefixes, longest first.
    pub fn prefixes(&self) -> impl Iterator<Item = PathId> + '_ {
        (1..=self.steps.len()).rev().map(move |n| PathId {
            steps: Arc::new(self.steps[..n].to_vec()),
            is_ptr: false,
        })
    }

    /// A hint for generated aliases: the last pointer's short name, the
    /// collection kind, or the root type's short name.
    pub fn alias_hint(&self) -> String {
        if let Some(rptr) = self.rptr() {
            rptr.shortname.clone()
        } else if let Some(coll) = self.target().collection_name() {
            coll.to_string()
        } else {
            self.target().short_name().to_string()
        }
    }
}

impl PartialEq for PathId {
    fn eq(&self, other: &Self) -> bool {
        self.is_ptr == other.is_ptr && self.steps == other.steps
    }
}

impl Eq for PathId {}

impl Hash for PathId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_ptr.hash(state);
        for step in self.steps.iter() {
            match step {
                PathStep::Root(t) => t.id.hash(state),
                PathStep::Pointer { ptr, dir } => {
                    ptr.id.hash(state);
                    dir.hash(state);
                }
                PathStep::TypeIntersection { typeref, .. } => typeref.id.hash(state),
            }
        }
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in self.steps.iter() {
            match step {
                PathStep::Root(t) => write!(f, "({})", t.name_hint)?,
                PathStep::Pointer { ptr, dir } => {
                    let arrow = match dir {
                        PtrDir::Outbound => ">",
                        PtrDir::Inbound => "<",
                    };
                    write!(f, ".{arrow}{}", ptr.shortname)?;
                }
                PathStep::TypeIntersection { typeref, .. } => {
                    write!(f, "[IS {}]", typeref.name_hint)?
                }
            }
        }
        if self.is_ptr {
            write!(f, "@")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathId({self})")
    }
}
