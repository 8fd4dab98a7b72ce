#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! `trellis` builds **construct trees**: hierarchical, declarative models
//! of a system, assembled in memory the way a scene graph is. Each
//! position in the tree, a *construct*, carries a stable identity,
//! configuration inherited down the tree, metadata, declarative
//! dependencies on other constructs, and validation hooks. Downstream
//! synthesizers walk the finished tree and turn it into whatever artifact
//! the domain calls for.
//!
//! A tree starts from [`Construct::root`] and grows by attaching children
//! to scopes:
//!
//! ```
//! use trellis::Construct;
//!
//! let root = Construct::root();
//! root.node().set_context("region", "eu-west-1")?;
//!
//! let networking = Construct::new(&root, "Networking")?;
//! let subnet = Construct::new(&networking, "Subnet")?;
//!
//! assert_eq!(subnet.node().path(), "Networking/Subnet");
//! assert_eq!(subnet.node().try_get_context("region"), Some("eu-west-1".into()));
//!
//! // the 42-character address is stable across `Default` wrapper nodes
//! assert!(subnet.node().addr().starts_with("c8"));
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! Identity is two-fold. The *path* is the `/`-joined chain of ids from
//! the root and moves when the tree is reorganized; the *address*
//! ([`Node::addr`]) hashes that chain while skipping conventional
//! `Default` group nodes, so it stays put across the reorganizations that
//! happen most in practice.
//!
//! The tree is single-threaded: construction, queries, and validation all
//! happen on one execution context, and every operation completes
//! synchronously. Once a synthesizer starts consuming the tree it can
//! [`Node::lock`] a subtree to reject late attachment.

mod addr;
pub mod dependency;
mod error;
mod metadata;
mod node;

pub use error::Error;
pub use metadata::{MetadataEntry, MetadataOptions};
pub use node::{Node, TraversalOrder, Validate, PATH_SEP};

use std::{
    any::Any,
    fmt::{self, Display, Formatter},
};

/// A position in a construct tree.
///
/// `Construct` is the public face of a [`Node`] and the anchor for
/// domain-specific types: embed one, delegate to [`Construct::node`], and
/// the embedding type participates in scoping, context, dependencies, and
/// validation like any other construct.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Construct {
    node: Node,
}

impl Construct {
    /// Creates the root of a new tree.
    ///
    /// The root is the only construct whose id is the empty string; its
    /// path is `""`.
    pub fn root() -> Self {
        Construct { node: Node::new_root() }
    }

    /// Attaches a new construct under `scope`.
    ///
    /// Ids are free-form (whitespace and unusual characters pass through
    /// verbatim) except that the path separator `/` is rewritten to
    /// `--`. Sibling ids must be unique within the scope.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidRootId`] for an empty id, with
    /// [`Error::SynthesisGuard`] when the scope sits inside a locked
    /// subtree, and with [`Error::DuplicateSibling`] when the scope
    /// already has a child with this id.
    pub fn new(scope: &Construct, id: impl AsRef<str>) -> Result<Self, Error> {
        Ok(Construct { node: Node::new_scoped(scope.node(), id.as_ref())? })
    }

    /// The node carrying this construct's tree state.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns whether `value` is a construct or node handle.
    pub fn is_construct(value: &dyn Any) -> bool {
        value.downcast_ref::<Construct>().is_some() || value.downcast_ref::<Node>().is_some()
    }
}

impl Display for Construct {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let path = self.node.path();
        if path.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&path)
        }
    }
}

impl From<Node> for Construct {
    fn from(node: Node) -> Self {
        Construct { node }
    }
}

#[cfg(test)]
mod tests {
    use super::{Construct, Node};
    use std::any::Any;

    #[test]
    fn display_is_path_or_root_sentinel() {
        let root = Construct::root();
        let api = Construct::new(&root, "Api").unwrap();
        let v1 = Construct::new(&api, "V1").unwrap();

        assert_eq!(root.to_string(), "<root>");
        assert_eq!(v1.to_string(), "Api/V1");
    }

    #[test]
    fn is_construct_sees_both_handle_types() {
        let root = Construct::root();
        let node: Node = root.node().clone();

        assert!(Construct::is_construct(&root as &dyn Any));
        assert!(Construct::is_construct(&node as &dyn Any));
        assert!(!Construct::is_construct(&"a string" as &dyn Any));
    }

    #[test]
    fn constructs_wrap_queried_nodes() {
        let root = Construct::root();
        Construct::new(&root, "existing").unwrap();

        let found = root.node().find_child("existing").unwrap();
        let wrapped = Construct::from(found);
        let grandchild = Construct::new(&wrapped, "below").unwrap();
        assert_eq!(grandchild.node().path(), "existing/below");
    }
}
