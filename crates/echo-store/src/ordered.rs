// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Insertion-ordered, deduplicated identity sequence.

use rustc_hash::FxHashSet;

use crate::ident::Identity;

/// Ordered set of identities.
///
/// Inserting an identity that is already present is a no-op and never
/// reorders existing members. Membership checks are O(1); removal is O(n).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet {
    items: Vec<Identity>,
    index: FxHashSet<Identity>,
}

impl IdentitySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `identity` unless already present. Returns `true` if inserted.
    pub fn insert(&mut self, identity: Identity) -> bool {
        if !self.index.insert(identity) {
            return false;
        }
        self.items.push(identity);
        true
    }

    /// Inserts `identity` at `position` (clamped to the length) unless present.
    pub fn insert_at(&mut self, position: usize, identity: Identity) -> bool {
        if !self.index.insert(identity) {
            return false;
        }
        let at = position.min(self.items.len());
        self.items.insert(at, identity);
        true
    }

    /// Removes `identity`. Returns `true` if it was present.
    pub fn remove(&mut self, identity: Identity) -> bool {
        if !self.index.remove(&identity) {
            return false;
        }
        self.items.retain(|i| *i != identity);
        true
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.index.contains(&identity)
    }

    /// Members in order.
    #[must_use]
    pub fn as_slice(&self) -> &[Identity] {
        &self.items
    }

    /// Iterates members in order.
    pub fn iter(&self) -> impl Iterator<Item = Identity> + '_ {
        self.items.iter().copied()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }
}

impl FromIterator<Identity> for IdentitySet {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        let mut set = Self::new();
        for identity in iter {
            set.insert(identity);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> Identity {
        Identity::from_raw(n)
    }

    #[test]
    fn duplicate_insert_does_not_reorder() {
        let mut set: IdentitySet = [id(1), id(2), id(3)].into_iter().collect();
        assert!(!set.insert(id(1)));
        assert!(!set.insert_at(0, id(3)));
        assert_eq!(set.as_slice(), &[id(1), id(2), id(3)]);
    }

    #[test]
    fn insert_at_clamps_and_remove_keeps_order() {
        let mut set = IdentitySet::new();
        set.insert(id(1));
        set.insert_at(99, id(3));
        set.insert_at(1, id(2));
        assert_eq!(set.as_slice(), &[id(1), id(2), id(3)]);
        assert!(set.remove(id(2)));
        assert!(!set.remove(id(2)));
        assert_eq!(set.as_slice(), &[id(1), id(3)]);
        assert!(!set.contains(id(2)));
    }
}
