//! Stable addresses derived from a node's chain of ids.
//!
//! An address is a compact identifier downstream tools can use to refer to
//! a node without carrying its full path. It is a pure function of the ids
//! from the root to the node, with one twist: components named `Default`
//! are excluded, so wrapping a node under a conventional `Default` group
//! (or unwrapping it again) leaves its address untouched.

use sha1::{Digest, Sha1};

/// Scheme marker; downstream tools match on it, so it is bit-exact.
const SCHEME: &str = "c8";

/// The component name excluded from address computation. Case-sensitive.
const ELIDED: &str = "Default";

/// Hashes the given id components into a 42-character address.
///
/// Each retained component is fed to the hash followed by a `\n`
/// terminator so that component boundaries stay visible to the digest.
pub(crate) fn address_of<I, S>(components: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha1::new();
    for component in components {
        let component = component.as_ref();
        if component == ELIDED {
            continue;
        }
        hasher.update(component.as_bytes());
        hasher.update(b"\n");
    }
    format!("{}{}", SCHEME, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::address_of;

    #[test]
    fn scheme_and_length() {
        let addr = address_of(vec![""]);
        assert!(addr.starts_with("c8"));
        assert_eq!(addr.len(), 42);
    }

    #[test]
    fn default_components_are_elided() {
        let bare = address_of(vec!["", "c1"]);
        let wrapped = address_of(vec!["", "Default", "c1"]);
        assert_eq!(bare, wrapped);
        assert_eq!(bare, "c86a34031367d11f4bef80afca42b7e7e5c6253b77");
    }

    #[test]
    fn elision_is_case_sensitive() {
        let wrapped = address_of(vec!["", "DeFAULt", "c1"]);
        assert_eq!(wrapped, "c8fa72abd28f794f6bacb100b26beb761d004572f5");
    }

    #[test]
    fn boundaries_are_significant() {
        // "ab"/"c" and "a"/"bc" must not collide
        assert_ne!(address_of(vec!["ab", "c"]), address_of(vec!["a", "bc"]));
    }
}
