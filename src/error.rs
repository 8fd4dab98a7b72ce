//! Failures raised by construct-tree operations.

use thiserror::Error;

/// The ways a tree operation can fail.
///
/// Every fallible operation reports at the point of offense; the tree never
/// swallows or retries. Validators are not errors; they report through the
/// message sequence returned by [`crate::Node::validate`].
#[derive(Debug, Error)]
pub enum Error {
    /// A scoped construct was given the empty id, which only roots carry.
    #[error("only root constructs may have an empty id")]
    InvalidRootId,

    /// The scope already has a child with this id.
    #[error("There is already a Construct with name '{id}' in {parent}")]
    DuplicateSibling {
        /// Id of the rejected construct.
        id: String,
        /// Path of the scope, or `App` for the root.
        parent: String,
    },

    /// `set_context` was called after children were attached.
    #[error("Cannot set context after children have been added: {children}")]
    ContextFrozen {
        /// Ids of the already-attached children, in insertion order.
        children: String,
    },

    /// A child was attached somewhere inside a locked subtree.
    #[error("{}", locked_message(.locked_path))]
    SynthesisGuard {
        /// Path of the nearest locked ancestor; empty for the root.
        locked_path: String,
    },

    /// `find_child` found no child with the requested id.
    #[error("No child with id: '{id}'")]
    ChildNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Default-child lookup found both conventional candidates.
    #[error("Cannot determine default child for {path}. There is both a child with id 'Resource' and id 'Default'")]
    AmbiguousDefaultChild {
        /// Path of the node whose default child was requested.
        path: String,
    },

    /// A dependency target has no registered [`crate::dependency::Dependable`]
    /// implementation.
    #[error("target does not implement Dependable; register one with dependency::implement()")]
    NotDependable,

    /// An extension type declared a lifecycle hook from the retired
    /// synthesis engine.
    #[error("the construct '{path}' declares a '{hook}' hook which is no longer supported; use add_validation() instead")]
    LegacyHookForbidden {
        /// Path of the offending construct.
        path: String,
        /// The reserved hook name that was declared.
        hook: String,
    },
}

fn locked_message(locked_path: &str) -> String {
    if locked_path.is_empty() {
        "Cannot add children during synthesis".to_string()
    } else {
        format!("Cannot add children to \"{}\" during synthesis", locked_path)
    }
}
