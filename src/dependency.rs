//! Declaring and resolving dependencies between constructs.
//!
//! Consumers never record concrete producer nodes directly. They record
//! [`Dependable`] indirections which are resolved when the consumer's
//! dependency list is read, so a producer set can keep growing after it
//! has been attached:
//!
//! ```
//! use trellis::{dependency::DependencyGroup, Construct};
//!
//! let root = Construct::root();
//! let database = Construct::new(&root, "Database")?;
//! let cache = Construct::new(&root, "Cache")?;
//! let api = Construct::new(&root, "Api")?;
//!
//! let storage = DependencyGroup::new();
//! storage.add(&database);
//! api.node().add_dependency(&storage);
//!
//! // members added after attachment are observed on the next read
//! storage.add(&cache);
//! let resolved = api.node().dependencies()?;
//! assert_eq!(resolved, vec![database.node().clone(), cache.node().clone()]);
//! # Ok::<(), trellis::Error>(())
//! ```
//!
//! Objects the tree did not create participate through a side table:
//! register an implementation with [`implement`] and hand the consumer a
//! [`deferred`] wrapper. The table holds weak referents and never extends
//! a target's lifetime.

use crate::{error::Error, node::Node, Construct};
use std::{
    any::Any,
    cell::RefCell,
    fmt::{self, Debug, Formatter},
    rc::{Rc, Weak},
};

/// Resolves to the concrete tree nodes standing behind a value.
///
/// [`Node`] and [`Construct`] resolve to themselves, [`DependencyGroup`]
/// flattens its members, and foreign objects resolve through the side
/// table (see [`implement`] and [`deferred`]).
pub trait Dependable {
    /// The producer nodes this value represents, in first-visit order.
    ///
    /// # Errors
    ///
    /// Resolution through the side table fails with
    /// [`Error::NotDependable`] for targets that were never registered.
    fn dependency_roots(&self) -> Result<Vec<Node>, Error>;
}

impl Dependable for Node {
    fn dependency_roots(&self) -> Result<Vec<Node>, Error> {
        Ok(vec![self.clone()])
    }
}

impl Dependable for Construct {
    fn dependency_roots(&self) -> Result<Vec<Node>, Error> {
        Ok(vec![self.node().clone()])
    }
}

/// Conversion into the shared form stored on a node's dependency list.
pub trait IntoDependable {
    /// Wraps `self` for storage on a node.
    fn into_dependable(self) -> Rc<dyn Dependable>;
}

impl IntoDependable for Rc<dyn Dependable> {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        self
    }
}

impl<T: Dependable + 'static> IntoDependable for Rc<T> {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        self
    }
}

impl IntoDependable for &Construct {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        Rc::new(self.clone())
    }
}

impl IntoDependable for &Node {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        Rc::new(self.clone())
    }
}

impl IntoDependable for DependencyGroup {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        Rc::new(self)
    }
}

impl IntoDependable for &DependencyGroup {
    fn into_dependable(self) -> Rc<dyn Dependable> {
        Rc::new(self.clone())
    }
}

type Registration = (Weak<dyn Any>, Rc<dyn Dependable>);

thread_local! {
    /// Side table from object identity to dependable behavior. Referents
    /// are weak: the table never keeps a target alive.
    static IMPLEMENTATIONS: RefCell<Vec<Registration>> = RefCell::new(Vec::new());
}

fn data_ptr(target: &Rc<dyn Any>) -> *const () {
    Rc::as_ptr(target) as *const ()
}

fn is_registered_for(referent: &Weak<dyn Any>, target: &Rc<dyn Any>) -> bool {
    match referent.upgrade() {
        Some(live) => data_ptr(&live) == data_ptr(target),
        None => false,
    }
}

/// Registers `behavior` as the dependable implementation for `target`.
///
/// Re-registering a live target replaces its previous implementation.
/// Entries whose targets have been dropped are pruned on the way in.
pub fn implement(target: &Rc<dyn Any>, behavior: Rc<dyn Dependable>) {
    IMPLEMENTATIONS.with(|table| {
        let mut table = table.borrow_mut();
        table.retain(|(referent, _)| referent.upgrade().is_some());
        if let Some((_, existing)) =
            table.iter_mut().find(|(referent, _)| is_registered_for(referent, target))
        {
            *existing = behavior;
        } else {
            table.push((Rc::downgrade(target), behavior));
        }
    });
}

/// Looks up the dependable implementation registered for `target`.
///
/// # Errors
///
/// Fails with [`Error::NotDependable`] when no implementation was
/// registered (or the registration's target has since been dropped).
pub fn of(target: &Rc<dyn Any>) -> Result<Rc<dyn Dependable>, Error> {
    IMPLEMENTATIONS
        .with(|table| {
            table
                .borrow()
                .iter()
                .find(|(referent, _)| is_registered_for(referent, target))
                .map(|(_, behavior)| behavior.clone())
        })
        .ok_or(Error::NotDependable)
}

/// Wraps `target` so side-table resolution happens when dependencies are
/// queried, not when the dependency is declared.
pub fn deferred(target: &Rc<dyn Any>) -> Rc<dyn Dependable> {
    Rc::new(Deferred { target: target.clone() })
}

struct Deferred {
    target: Rc<dyn Any>,
}

impl Dependable for Deferred {
    fn dependency_roots(&self) -> Result<Vec<Node>, Error> {
        of(&self.target)?.dependency_roots()
    }
}

thread_local! {
    /// Groups currently being flattened, for cycle protection.
    static FLATTENING: RefCell<Vec<*const ()>> = RefCell::new(Vec::new());
}

/// A mutable composite of [`Dependable`]s.
///
/// Clones share one member list and flattening happens at query time, so
/// members added after the group was attached to a consumer are observed
/// on the consumer's next dependency read. Groups may contain other
/// groups; a group reached again while it is already being flattened
/// contributes nothing on the re-entrant visit.
#[derive(Clone, Default)]
pub struct DependencyGroup {
    members: Rc<RefCell<Vec<Rc<dyn Dependable>>>>,
}

impl DependencyGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a member. Members are stored as references, not snapshots.
    pub fn add(&self, member: impl IntoDependable) {
        self.members.borrow_mut().push(member.into_dependable());
    }
}

impl Dependable for DependencyGroup {
    fn dependency_roots(&self) -> Result<Vec<Node>, Error> {
        let key = Rc::as_ptr(&self.members) as *const ();
        let reentrant = FLATTENING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&key) {
                true
            } else {
                stack.push(key);
                false
            }
        });
        if reentrant {
            return Ok(Vec::new());
        }
        let _pop_when_done_please = scopeguard::guard((), |()| {
            FLATTENING.with(|stack| {
                stack.borrow_mut().pop();
            });
        });

        let members = self.members.borrow().clone();
        let mut roots = Vec::new();
        for member in members {
            for root in member.dependency_roots()? {
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
        }
        Ok(roots)
    }
}

impl Debug for DependencyGroup {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("DependencyGroup").field("members", &self.members.borrow().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{deferred, implement, of, Dependable, DependencyGroup};
    use crate::{Construct, Error};
    use std::{any::Any, rc::Rc};

    #[test]
    fn of_unregistered_target_fails() {
        let target: Rc<dyn Any> = Rc::new("artifact");
        assert!(matches!(of(&target), Err(Error::NotDependable)));
    }

    #[test]
    fn registrations_do_not_outlive_their_target() {
        let root = Construct::root();
        let target: Rc<dyn Any> = Rc::new(17u32);
        implement(&target, Rc::new(root.clone()));
        assert!(of(&target).is_ok());

        drop(target);
        // a fresh allocation must not inherit the dead registration
        let reused: Rc<dyn Any> = Rc::new(17u32);
        assert!(matches!(of(&reused), Err(Error::NotDependable)));
    }

    #[test]
    fn deferred_targets_resolve_late() {
        let root = Construct::root();
        let producer = Construct::new(&root, "Producer").unwrap();
        let target: Rc<dyn Any> = Rc::new("artifact");

        let dep = deferred(&target);
        assert!(matches!(dep.dependency_roots(), Err(Error::NotDependable)));

        implement(&target, Rc::new(producer.clone()));
        assert_eq!(dep.dependency_roots().unwrap(), vec![producer.node().clone()]);
    }

    #[test]
    fn nested_groups_flatten_in_first_visit_order() {
        let root = Construct::root();
        let a = Construct::new(&root, "a").unwrap();
        let b = Construct::new(&root, "b").unwrap();
        let c = Construct::new(&root, "c").unwrap();

        let inner = DependencyGroup::new();
        inner.add(&b);
        inner.add(&a);

        let outer = DependencyGroup::new();
        outer.add(&a);
        outer.add(inner);
        outer.add(&c);

        let roots = outer.dependency_roots().unwrap();
        assert_eq!(
            roots,
            vec![a.node().clone(), b.node().clone(), c.node().clone()],
            "duplicates keep their first position"
        );
    }

    #[test]
    fn self_referential_groups_terminate() {
        let root = Construct::root();
        let member = Construct::new(&root, "member").unwrap();

        let group = DependencyGroup::new();
        group.add(&member);
        group.add(&group);

        assert_eq!(group.dependency_roots().unwrap(), vec![member.node().clone()]);
    }
}
