use serde::{Deserialize, Serialize};

use super::path::PathId;

/// Scope tree node index.
pub type ScopeId = usize;

/// The scope tree supplied with the IR. Immutable for the duration of a
/// compilation; the compiler only reads visibility and optionality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeNode {
    /// Front-end assigned unique id; IR sets refer to scope nodes by it.
    pub unique_id: usize,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub kind: ScopeNodeKind,
    /// Whether the path bound here is optional: an empty set yields a
    /// single all-NULL row instead of no rows.
    pub optional: bool,
    /// Fences stop visibility propagation into their subtree.
    pub fenced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScopeNodeKind {
    Branch,
    Path(PathId),
}

impl ScopeTree {
    pub fn new() -> ScopeTree {
        ScopeTree {
            nodes: vec![ScopeNode {
                unique_id: 0,
                parent: None,
                children: Vec::new(),
                kind: ScopeNodeKind::Branch,
                optional: false,
                fenced: false,
            }],
        }
    }

    pub fn root(&self) -> ScopeId {
        0
    }

    pub fn add_child(
        &mut self,
        parent: ScopeId,
        unique_id: usize,
        kind: ScopeNodeKind,
        optional: bool,
        fenced: bool,
    ) -> ScopeId {
        let id = self.nodes.len();
        self.nodes.push(ScopeNode {
            unique_id,
            parent: Some(parent),
            children: Vec::new(),
            kind,
            optional,
            fenced,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: ScopeId) -> &ScopeNode {
        &self.nodes[id]
    }

    pub fn find_by_unique_id(&self, unique_id: usize) -> Option<ScopeId> {
        self.nodes.iter().position(|n| n.unique_id == unique_id)
    }

    pub fn ancestors(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.nodes[n].parent)
    }

    /// Direct path children of a node: Path descendants reachable without
    /// crossing a fence.
    pub fn path_children(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut stack: Vec<ScopeId> = self.nodes[id].children.clone();
        while let Some(child) = stack.pop() {
            let node = &self.nodes[child];
            if node.fenced {
                continue;
            }
            match &node.kind {
                ScopeNodeKind::Path(_) => out.push(child),
                ScopeNodeKind::Branch => stack.extend(node.children.iter().copied()),
            }
        }
        out.sort_unstable();
        out
    }

    /// Finds a direct path child of `id` binding `path_id`.
    pub fn find_child(&self, id: ScopeId, path_id: &PathId) -> Option<ScopeId> {
        self.path_children(id)
            .into_iter()
            .find(|&c| matches!(&self.nodes[c].kind, ScopeNodeKind::Path(p) if p == path_id))
    }

    /// Finds a path node binding `path_id` anywhere in the subtree of `id`,
    /// including behind fences.
    pub fn find_descendant(&self, id: ScopeId, path_id: &PathId) -> Option<ScopeId> {
        let mut stack: Vec<ScopeId> = self.nodes[id].children.clone();
        while let Some(child) = stack.pop() {
            let node = &self.nodes[child];
            if matches!(&node.kind, ScopeNodeKind::Path(p) if p == path_id) {
                return Some(child);
            }
            stack.extend(node.children.iter().copied());
        }
        None
    }

    /// A path is visible from a node when the node or one of its ancestors
    /// has the path (or a prefix providing it) bound in its direct
    /// namespace.
    pub fn is_visible(&self, from: ScopeId, path_id: &PathId) -> bool {
        self.visible_node(from, path_id).is_some()
    }

    fn visible_node(&self, from: ScopeId, path_id: &PathId) -> Option<ScopeId> {
        for anc in self.ancestors(from) {
            if matches!(&self.nodes[anc].kind, ScopeNodeKind::Path(p) if p == path_id) {
                return Some(anc);
            }
            if let Some(found) = self.find_child(anc, path_id) {
                return Some(found);
            }
        }
        None
    }

    pub fn is_optional(&self, from: ScopeId, path_id: &PathId) -> bool {
        self.visible_node(from, path_id)
            .map(|n| self.nodes[n].optional)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::ir::typeref::{TypeRef, TypeRefKind};

    fn obj_type(name: &str, n: u128) -> TypeRef {
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
    fn visibility_stops_at_fences() {
        let movie = PathId::from_typeref(obj_type("Movie", 1));
        let person = PathId::from_typeref(obj_type("Person", 2));

        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.add_child(root, 1, ScopeNodeKind::Path(movie.clone()), false, false);
        let fence = tree.add_child(root, 2, ScopeNodeKind::Branch, false, true);
        let inner = tree.add_child(fence, 3, ScopeNodeKind::Path(person.clone()), false, false);

        assert!(tree.is_visible(root, &movie));
        assert!(!tree.is_visible(root, &person));
        // Inside the fence both are visible: Person directly, Movie
        // through the ancestor chain.
        assert!(tree.is_visible(inner, &person));
        assert!(tree.is_visible(inner, &movie));
    }

    #[test]
    fn optionality_is_per_binding() {
        let movie = PathId::from_typeref(obj_type("Movie", 1));
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.add_child(root, 1, ScopeNodeKind::Path(movie.clone()), true, false);
        assert!(tree.is_optional(root, &movie));
    }
}
