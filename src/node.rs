//! Nodes: the per-construct state and the tree that owns them.
//!
//! Every construct is backed by exactly one node. Nodes of one tree live
//! in a shared arena and refer to each other by index, so parent
//! back-references cost nothing and no reference cycles exist; a [`Node`]
//! is a cheap cloneable handle into that arena. The arena is kept alive by
//! whichever handles remain, and a child is retained by its parent for the
//! tree's lifetime.
//!
//! Mutation is single-threaded and synchronous: context lookups are
//! O(depth), traversals are O(n), and nothing suspends or blocks.

use crate::{
    addr,
    dependency::{Dependable, IntoDependable},
    error::Error,
    metadata::{self, MetadataEntry, MetadataOptions},
};
use serde_json::Value;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    rc::Rc,
};
use tracing::{debug, trace};

/// Separator between ids in a [`Node::path`].
pub const PATH_SEP: &str = "/";

/// What the separator is rewritten to when it appears inside an id.
const PATH_SEP_SUBSTITUTE: &str = "--";

/// Hook names from the retired synthesis engine; declaring one of these
/// fails validation.
const RESERVED_HOOKS: [&str; 5] =
    ["onValidate", "synthesize", "onSynthesize", "prepare", "onPrepare"];

/// Subtree iteration strategies for [`Node::find_all`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TraversalOrder {
    /// Each node before its children, children left to right.
    #[default]
    PreOrder,
    /// Children left to right, then the node itself.
    PostOrder,
}

/// Produces validation messages for the node it is registered on.
///
/// Implemented for plain closures returning message lists, so
/// `node.add_validation(|| vec![])` works.
pub trait Validate {
    /// Returns one message per violation; empty means valid.
    fn validate(&self) -> Vec<String>;
}

impl<F> Validate for F
where
    F: Fn() -> Vec<String>,
{
    fn validate(&self) -> Vec<String> {
        (self)()
    }
}

pub(crate) struct Tree {
    nodes: RefCell<Vec<NodeData>>,
}

struct NodeData {
    id: String,
    parent: Option<usize>,
    children: Vec<usize>,
    context: BTreeMap<String, Value>,
    metadata: Vec<MetadataEntry>,
    validations: Vec<Rc<dyn Validate>>,
    dependencies: Vec<Rc<dyn Dependable>>,
    hooks: Vec<String>,
    default_child: Option<usize>,
    locked: bool,
}

impl NodeData {
    fn new(id: String, parent: Option<usize>) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            context: BTreeMap::new(),
            metadata: Vec::new(),
            validations: Vec::new(),
            dependencies: Vec::new(),
            hooks: Vec::new(),
            default_child: None,
            locked: false,
        }
    }
}

fn ids_from_root(nodes: &[NodeData], index: usize) -> Vec<String> {
    let mut ids = Vec::new();
    let mut cursor = Some(index);
    while let Some(i) = cursor {
        ids.push(nodes[i].id.clone());
        cursor = nodes[i].parent;
    }
    ids.reverse();
    ids
}

fn path_from(nodes: &[NodeData], index: usize) -> String {
    let ids = ids_from_root(nodes, index);
    let segments: Vec<&str> =
        ids.iter().filter(|id| !id.is_empty()).map(String::as_str).collect();
    segments.join(PATH_SEP)
}

/// A handle to one position in a construct tree.
///
/// Handles are cheap to clone and compare by position: two handles are
/// equal iff they designate the same slot of the same tree.
#[derive(Clone)]
pub struct Node {
    tree: Rc<Tree>,
    index: usize,
}

impl Node {
    pub(crate) fn new_root() -> Node {
        let tree = Tree { nodes: RefCell::new(vec![NodeData::new(String::new(), None)]) };
        Node { tree: Rc::new(tree), index: 0 }
    }

    pub(crate) fn new_scoped(scope: &Node, id: &str) -> Result<Node, Error> {
        if id.is_empty() {
            return Err(Error::InvalidRootId);
        }
        let id = id.replace(PATH_SEP, PATH_SEP_SUBSTITUTE);

        if let Some(guard) = scope.locked_ancestor() {
            return Err(Error::SynthesisGuard { locked_path: guard.path() });
        }

        let index = {
            let mut nodes = scope.tree.nodes.borrow_mut();
            let duplicate =
                nodes[scope.index].children.iter().any(|&child| nodes[child].id == id);
            if duplicate {
                let path = path_from(&nodes, scope.index);
                let parent = if path.is_empty() { "App".to_string() } else { path };
                return Err(Error::DuplicateSibling { id, parent });
            }
            let index = nodes.len();
            nodes.push(NodeData::new(id, Some(scope.index)));
            nodes[scope.index].children.push(index);
            index
        };

        let node = Node { tree: scope.tree.clone(), index };
        trace!(path = %node.path(), "construct attached");
        Ok(node)
    }

    fn handle(&self, index: usize) -> Node {
        Node { tree: self.tree.clone(), index }
    }

    /// The id given at construction; `""` for the root.
    pub fn id(&self) -> String {
        self.tree.nodes.borrow()[self.index].id.clone()
    }

    /// Ids from the root (whose empty id is excluded) to this node, joined
    /// with [`PATH_SEP`]. The root's path is `""`.
    pub fn path(&self) -> String {
        let nodes = self.tree.nodes.borrow();
        path_from(&nodes, self.index)
    }

    /// The node's stable address: `c8` followed by 40 hex characters.
    ///
    /// Addresses are derived from the chain of ids from the root, with
    /// `Default` components excluded: wrapping a node under a
    /// conventional `Default` group does not change its address.
    pub fn addr(&self) -> String {
        let nodes = self.tree.nodes.borrow();
        addr::address_of(ids_from_root(&nodes, self.index))
    }

    /// The parent node; `None` for the root.
    pub fn scope(&self) -> Option<Node> {
        self.tree.nodes.borrow()[self.index].parent.map(|index| self.handle(index))
    }

    /// All scopes from the root down to and including this node.
    pub fn scopes(&self) -> Vec<Node> {
        let nodes = self.tree.nodes.borrow();
        let mut indices = Vec::new();
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            indices.push(index);
            cursor = nodes[index].parent;
        }
        indices.reverse();
        indices.into_iter().map(|index| self.handle(index)).collect()
    }

    /// The tree's root node; `self` if this node has no parent.
    pub fn root(&self) -> Node {
        let nodes = self.tree.nodes.borrow();
        let mut index = self.index;
        while let Some(parent) = nodes[index].parent {
            index = parent;
        }
        self.handle(index)
    }

    /// Direct children, in insertion order.
    pub fn children(&self) -> Vec<Node> {
        let nodes = self.tree.nodes.borrow();
        nodes[self.index].children.iter().map(|&index| self.handle(index)).collect()
    }

    /// Returns the direct child with the given id, if any.
    pub fn try_find_child(&self, id: &str) -> Option<Node> {
        let nodes = self.tree.nodes.borrow();
        nodes[self.index]
            .children
            .iter()
            .copied()
            .find(|&child| nodes[child].id == id)
            .map(|index| self.handle(index))
    }

    /// Returns the direct child with the given id.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ChildNotFound`] when there is none.
    pub fn find_child(&self, id: &str) -> Result<Node, Error> {
        self.try_find_child(id).ok_or_else(|| Error::ChildNotFound { id: id.to_string() })
    }

    /// Detaches the direct child with the given id, returning whether one
    /// was found.
    ///
    /// Handles into the detached subtree keep working, but the child no
    /// longer appears in any parent-side query and its id becomes
    /// available to new siblings.
    pub fn try_remove_child(&self, id: &str) -> bool {
        let mut nodes = self.tree.nodes.borrow_mut();
        let slot = nodes[self.index].children.iter().position(|&child| nodes[child].id == id);
        match slot {
            Some(slot) => {
                let removed = nodes[self.index].children.remove(slot);
                if nodes[self.index].default_child == Some(removed) {
                    nodes[self.index].default_child = None;
                }
                debug!(id, "child removed");
                true
            }
            None => false,
        }
    }

    /// Returns this node and all of its descendants in the given order.
    pub fn find_all(&self, order: TraversalOrder) -> Vec<Node> {
        fn visit(nodes: &[NodeData], index: usize, order: TraversalOrder, out: &mut Vec<usize>) {
            if order == TraversalOrder::PreOrder {
                out.push(index);
            }
            for &child in &nodes[index].children {
                visit(nodes, child, order, out);
            }
            if order == TraversalOrder::PostOrder {
                out.push(index);
            }
        }

        let nodes = self.tree.nodes.borrow();
        let mut indices = Vec::new();
        visit(&nodes, self.index, order, &mut indices);
        indices.into_iter().map(|index| self.handle(index)).collect()
    }

    /// Stores a context value on this node, visible to the whole subtree
    /// through [`Node::try_get_context`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ContextFrozen`] once any child is attached:
    /// descendants may already have read the old state.
    pub fn set_context(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        let mut nodes = self.tree.nodes.borrow_mut();
        if !nodes[self.index].children.is_empty() {
            let children: Vec<String> =
                nodes[self.index].children.iter().map(|&child| nodes[child].id.clone()).collect();
            return Err(Error::ContextFrozen { children: children.join(", ") });
        }
        let key = key.into();
        trace!(key = %key, "context value set");
        nodes[self.index].context.insert(key, value.into());
        Ok(())
    }

    /// Returns the value for `key` from the nearest scope (this node
    /// inclusive) that defines it, or `None` when no scope does.
    pub fn try_get_context(&self, key: &str) -> Option<Value> {
        let nodes = self.tree.nodes.borrow();
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            if let Some(value) = nodes[index].context.get(key) {
                return Some(value.clone());
            }
            cursor = nodes[index].parent;
        }
        None
    }

    /// Appends a metadata entry. Null payloads mean "nothing to record"
    /// and are silently dropped; `false`, `0` and `""` are recorded.
    pub fn add_metadata(
        &self,
        kind: impl Into<String>,
        data: impl Into<Value>,
        options: MetadataOptions,
    ) {
        let data = data.into();
        if data.is_null() {
            return;
        }
        let trace = if options.stack_trace { Some(metadata::capture_stack()) } else { None };
        let entry = MetadataEntry { kind: kind.into(), data, trace };
        self.tree.nodes.borrow_mut()[self.index].metadata.push(entry);
    }

    /// The metadata recorded so far, in append order.
    pub fn metadata(&self) -> Vec<MetadataEntry> {
        self.tree.nodes.borrow()[self.index].metadata.clone()
    }

    /// Registers a validator evaluated by [`Node::validate`].
    pub fn add_validation(&self, validation: impl Validate + 'static) {
        self.tree.nodes.borrow_mut()[self.index].validations.push(Rc::new(validation));
    }

    /// Records the name of a lifecycle hook installed by an extension
    /// type.
    ///
    /// Hook names that belonged to the retired synthesis engine
    /// (`synthesize`, `prepare` and their `on*` forms) make the next
    /// [`Node::validate`] call fail; anything else is carried verbatim.
    pub fn declare_hook(&self, name: impl Into<String>) {
        self.tree.nodes.borrow_mut()[self.index].hooks.push(name.into());
    }

    /// Evaluates this node's validators and concatenates their messages.
    ///
    /// Traversal is the caller's job: this never descends into children.
    /// An empty result means the node is valid (or has no validators).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LegacyHookForbidden`] when a reserved hook
    /// name was declared on this node.
    pub fn validate(&self) -> Result<Vec<String>, Error> {
        let (hooks, validations) = {
            let nodes = self.tree.nodes.borrow();
            (nodes[self.index].hooks.clone(), nodes[self.index].validations.clone())
        };
        if let Some(hook) = hooks.iter().find(|hook| RESERVED_HOOKS.contains(&hook.as_str())) {
            return Err(Error::LegacyHookForbidden { path: self.path(), hook: hook.clone() });
        }

        let mut messages = Vec::new();
        for validation in validations {
            messages.extend(validation.validate());
        }
        if !messages.is_empty() {
            debug!(path = %self.path(), count = messages.len(), "validation failed");
        }
        Ok(messages)
    }

    /// Declares that this node depends on the producers behind `dep`.
    ///
    /// Declarations are recorded by identity (declaring the same
    /// dependable twice stores it once) and resolved when
    /// [`Node::dependencies`] is read.
    pub fn add_dependency(&self, dep: impl IntoDependable) {
        let dep = dep.into_dependable();
        let mut nodes = self.tree.nodes.borrow_mut();
        let known = nodes[self.index].dependencies.iter().any(|existing| {
            Rc::as_ptr(existing) as *const () == Rc::as_ptr(&dep) as *const ()
        });
        if !known {
            trace!("dependency declared");
            nodes[self.index].dependencies.push(dep);
        }
    }

    /// Resolves every declared dependency to its producer nodes.
    ///
    /// Targets are expanded through [`Dependable::dependency_roots`] at
    /// read time, flattened, and deduplicated by node identity in
    /// first-seen order.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures, e.g. [`Error::NotDependable`] from
    /// a deferred target that was never registered.
    pub fn dependencies(&self) -> Result<Vec<Node>, Error> {
        let declared = self.tree.nodes.borrow()[self.index].dependencies.clone();
        let mut resolved = Vec::new();
        for dep in declared {
            for root in dep.dependency_roots()? {
                if !resolved.contains(&root) {
                    resolved.push(root);
                }
            }
        }
        Ok(resolved)
    }

    /// Returns whether this node or any of its ancestors is locked.
    pub fn locked(&self) -> bool {
        self.locked_ancestor().is_some()
    }

    /// Freezes this subtree: attaching children anywhere under this node
    /// fails until [`Node::unlock`].
    pub fn lock(&self) {
        debug!(path = %self.path(), "scope locked");
        self.tree.nodes.borrow_mut()[self.index].locked = true;
    }

    /// Clears this node's lock bit. Locks held by ancestors still apply.
    pub fn unlock(&self) {
        debug!(path = %self.path(), "scope unlocked");
        self.tree.nodes.borrow_mut()[self.index].locked = false;
    }

    fn locked_ancestor(&self) -> Option<Node> {
        let nodes = self.tree.nodes.borrow();
        let mut cursor = Some(self.index);
        while let Some(index) = cursor {
            if nodes[index].locked {
                return Some(self.handle(index));
            }
            cursor = nodes[index].parent;
        }
        None
    }

    /// Returns the conventional singleton child.
    ///
    /// The explicit override installed by [`Node::set_default_child`]
    /// wins when present. Otherwise this returns the child named
    /// `Default` or `Resource` when exactly one of the two exists, and
    /// `None` when neither does.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AmbiguousDefaultChild`] when both conventional
    /// children exist and no override was installed.
    pub fn default_child(&self) -> Result<Option<Node>, Error> {
        {
            let nodes = self.tree.nodes.borrow();
            if let Some(index) = nodes[self.index].default_child {
                return Ok(Some(self.handle(index)));
            }
        }
        let default = self.try_find_child("Default");
        let resource = self.try_find_child("Resource");
        match (default, resource) {
            (Some(_), Some(_)) => Err(Error::AmbiguousDefaultChild { path: self.path() }),
            (Some(node), None) | (None, Some(node)) => Ok(Some(node)),
            (None, None) => Ok(None),
        }
    }

    /// Installs (or with `None`, clears) the override returned by
    /// [`Node::default_child`]. The override must name a node of the same
    /// tree.
    pub fn set_default_child(&self, child: Option<&Node>) {
        if let Some(child) = child {
            debug_assert!(
                Rc::ptr_eq(&self.tree, &child.tree),
                "default child must belong to the same tree"
            );
        }
        self.tree.nodes.borrow_mut()[self.index].default_child = child.map(|node| node.index);
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.index == other.index
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        (Rc::as_ptr(&self.tree) as usize).hash(hasher);
        self.index.hash(hasher);
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Node").field("path", &self.path()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Node, TraversalOrder};
    use crate::Construct;

    fn child(scope: &Construct, id: &str) -> Construct {
        Construct::new(scope, id).unwrap()
    }

    #[test]
    fn handles_compare_by_position() {
        let root = Construct::root();
        let a = child(&root, "a");

        let through_query = root.node().find_child("a").unwrap();
        assert_eq!(a.node(), &through_query);

        let other_tree = Construct::root();
        assert_ne!(root.node(), other_tree.node());
    }

    #[test]
    fn scopes_run_root_to_self() {
        let root = Construct::root();
        let mid = child(&root, "mid");
        let leaf = child(&mid, "leaf");

        let scopes: Vec<Node> = leaf.node().scopes();
        assert_eq!(
            scopes,
            vec![root.node().clone(), mid.node().clone(), leaf.node().clone()]
        );
        assert_eq!(&leaf.node().root(), root.node());
        assert_eq!(root.node().scope(), None);
    }

    #[test]
    fn traversal_orders() {
        let root = Construct::root();
        let a = child(&root, "a");
        child(&a, "a1");
        child(&a, "a2");
        child(&root, "b");

        let pre: Vec<String> =
            root.node().find_all(TraversalOrder::PreOrder).iter().map(Node::path).collect();
        assert_eq!(pre, vec!["", "a", "a/a1", "a/a2", "b"]);

        let post: Vec<String> =
            root.node().find_all(TraversalOrder::PostOrder).iter().map(Node::path).collect();
        assert_eq!(post, vec!["a/a1", "a/a2", "a", "b", ""]);
    }

    #[test]
    fn removal_frees_the_id() {
        let root = Construct::root();
        child(&root, "volatile");

        assert!(root.node().try_remove_child("volatile"));
        assert!(!root.node().try_remove_child("volatile"));
        assert!(root.node().try_find_child("volatile").is_none());

        // the id can be used again
        child(&root, "volatile");
        assert_eq!(root.node().children().len(), 1);
    }

    #[test]
    fn removal_clears_a_matching_default_override() {
        let root = Construct::root();
        let special = child(&root, "special");
        root.node().set_default_child(Some(special.node()));
        assert_eq!(root.node().default_child().unwrap(), Some(special.node().clone()));

        root.node().try_remove_child("special");
        assert_eq!(root.node().default_child().unwrap(), None);
    }
}
