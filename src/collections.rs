//! Hash map aliases that use gxhash when the `gxhash` feature is enabled and
//! fall back to the std collections on targets without AES-NI/SSE2.
//!
//! With gxhash, `new`/`with_capacity` come from the re-exported extension
//! traits. The std types have them inherently.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap as GxHashMap, HashMapExt, HashSet as GxHashSet, HashSetExt};

#[cfg(not(feature = "gxhash"))]
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

/// Map keyed by entity id or collection name
#[cfg(feature = "gxhash")]
pub type HashMap<K, V> = GxHashMap<K, V>;

/// Map keyed by entity id or collection name
#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = StdHashMap<K, V>;

/// Set of entity ids
#[cfg(feature = "gxhash")]
pub type HashSet<T> = GxHashSet<T>;

/// Set of entity ids
#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = StdHashSet<T>;

#[cfg(test)]
mod tests {
    use super::{HashMap, HashSet};
    #[cfg(feature = "gxhash")]
    use super::{HashMapExt, HashSetExt};

    #[test]
    fn test_constructors_with_and_without_gxhash() {
        let mut ids: HashMap<&str, usize> = HashMap::with_capacity(2);
        ids.insert("sword-1", 0);
        let mut seen: HashSet<&str> = HashSet::new();
        assert!(seen.insert("sword-1"));
        assert_eq!(ids.len(), seen.len());
    }
}
