// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource identities and the registry that interns them.
//!
//! Every subsystem refers to resources through [`Identity`] handles. The
//! registry is the only place that maps `(type, id)` pairs and local ids to
//! handles, so handle equality is resource equality for the lifetime of a
//! store instance.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Interned resource type name (e.g. `"post"`).
pub type TypeName = Arc<str>;

/// Default prefix for generated local ids.
pub const DEFAULT_LID_PREFIX: &str = "@lid";

/// Stable handle for one resource within one store instance.
///
/// Handles are allocated from a monotonically increasing counter and are never
/// reused, even after [`IdentityRegistry::forget`]. A forgotten handle simply
/// stops resolving.
///
/// The `#[repr(transparent)]` attribute keeps the handle layout identical to
/// `u64` so bindings can pass it across FFI boundaries unchanged.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Identity(u64);

impl Identity {
    /// Constructs an `Identity` from a raw value.
    ///
    /// Raw handles only resolve inside the registry that issued them.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "identity#{}", self.0)
    }
}

/// What the registry knows about one [`Identity`].
///
/// `lid` is assigned at first reference and never changes. `id` starts out
/// `None` for locally created resources and is filled in exactly once by
/// [`IdentityRegistry::merge_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    type_name: TypeName,
    id: Option<Arc<str>>,
    lid: Arc<str>,
}

impl IdentityEntry {
    /// Resource type name.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Server-assigned id, if one is known.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Local id (always present).
    #[must_use]
    pub fn lid(&self) -> &str {
        &self.lid
    }
}

/// Errors raised by the identity registry.
///
/// Both variants indicate a broken caller (usually an adapter) and are never
/// recovered silently: continuing would split one logical resource into two
/// identities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Two distinct identities claim the same `(type, id)`.
    #[error("identity conflict: {type_name}:{id} already belongs to {existing}, not {requested}")]
    IdentityConflict {
        /// Resource type.
        type_name: String,
        /// Server id both identities claim.
        id: String,
        /// Identity that already owns the pair.
        existing: Identity,
        /// Identity that tried to claim it.
        requested: Identity,
    },
    /// A server id was assigned to an identity that already has one.
    #[error("duplicate identity assignment for {type_name} {lid}: already {existing_id}, refusing {new_id}")]
    DuplicateIdentityAssignment {
        /// Resource type.
        type_name: String,
        /// Local id of the identity.
        lid: String,
        /// Id already assigned.
        existing_id: String,
        /// Id the caller tried to assign.
        new_id: String,
    },
    /// A local id was reused for a different resource type.
    #[error("local id {lid} belongs to a {existing_type} resource, not {requested_type}")]
    LidTypeMismatch {
        /// The local id.
        lid: String,
        /// Type recorded for the local id.
        existing_type: String,
        /// Type the caller asked for.
        requested_type: String,
    },
    /// The handle does not resolve (never issued or already forgotten).
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
}

/// Interning registry for resource identities.
///
/// Invariants
/// - Each `(type, id)` pair maps to at most one identity.
/// - Each local id maps to exactly one identity.
/// - An identity's `id` transitions `None -> Some` at most once; the handle
///   itself never changes, so references held elsewhere stay valid.
#[derive(Debug)]
pub struct IdentityRegistry {
    lid_prefix: String,
    next: u64,
    entries: FxHashMap<Identity, IdentityEntry>,
    by_id: FxHashMap<TypeName, FxHashMap<Arc<str>, Identity>>,
    by_lid: FxHashMap<Arc<str>, Identity>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LID_PREFIX)
    }
}

impl IdentityRegistry {
    /// Creates an empty registry generating local ids as `"{prefix}:{type}-{n}"`.
    #[must_use]
    pub fn new(lid_prefix: &str) -> Self {
        Self {
            lid_prefix: lid_prefix.to_owned(),
            next: 0,
            entries: FxHashMap::default(),
            by_id: FxHashMap::default(),
            by_lid: FxHashMap::default(),
        }
    }

    /// Number of live identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for `identity`, if it still resolves.
    #[must_use]
    pub fn get(&self, identity: Identity) -> Option<&IdentityEntry> {
        self.entries.get(&identity)
    }

    /// Returns the entry for `identity` or [`IdentityError::UnknownIdentity`].
    ///
    /// # Errors
    /// Fails when the handle was never issued or has been forgotten.
    pub fn entry(&self, identity: Identity) -> Result<&IdentityEntry, IdentityError> {
        self.entries
            .get(&identity)
            .ok_or(IdentityError::UnknownIdentity(identity))
    }

    /// Returns the type name of `identity`.
    ///
    /// # Errors
    /// Fails when the handle does not resolve.
    pub fn type_of(&self, identity: Identity) -> Result<TypeName, IdentityError> {
        self.entry(identity).map(|e| Arc::clone(&e.type_name))
    }

    /// Looks up the identity for `(type_name, id)` without creating one.
    #[must_use]
    pub fn lookup(&self, type_name: &str, id: &str) -> Option<Identity> {
        self.by_id.get(type_name)?.get(id).copied()
    }

    /// Looks up the identity owning local id `lid`.
    #[must_use]
    pub fn lookup_lid(&self, lid: &str) -> Option<Identity> {
        self.by_lid.get(lid).copied()
    }

    /// Returns the identity for `(type_name, id)`, creating it if absent.
    pub fn identity_for(&mut self, type_name: &str, id: &str) -> Identity {
        if let Some(existing) = self.lookup(type_name, id) {
            return existing;
        }
        let type_name = self.intern_type(type_name);
        let lid = self.generate_lid(&type_name);
        let id: Arc<str> = Arc::from(id);
        let identity = self.allocate(Arc::clone(&type_name), Some(Arc::clone(&id)), lid);
        self.by_id.entry(type_name).or_default().insert(id, identity);
        identity
    }

    /// Allocates a fresh identity with no server id, for client-side creation.
    pub fn create_local_identity(&mut self, type_name: &str) -> Identity {
        let type_name = self.intern_type(type_name);
        let lid = self.generate_lid(&type_name);
        self.allocate(type_name, None, lid)
    }

    /// Resolves a payload reference carrying a local id and optionally a server id.
    ///
    /// - A known `lid` resolves to its identity; a server id not yet recorded
    ///   on it is merged in place.
    /// - An unknown `lid` whose `(type, id)` is already known is registered as
    ///   an alias of the existing identity.
    /// - Otherwise a new identity is created under the supplied `lid`.
    ///
    /// # Errors
    /// Returns [`IdentityError::LidTypeMismatch`] when the lid belongs to another
    /// type, and the errors of [`Self::merge_identity`] when the ids disagree.
    pub fn identity_for_lid(
        &mut self,
        type_name: &str,
        lid: &str,
        id: Option<&str>,
    ) -> Result<Identity, IdentityError> {
        if let Some(identity) = self.lookup_lid(lid) {
            let entry = self.entry(identity)?;
            if &*entry.type_name != type_name {
                return Err(IdentityError::LidTypeMismatch {
                    lid: lid.to_owned(),
                    existing_type: entry.type_name.to_string(),
                    requested_type: type_name.to_owned(),
                });
            }
            let existing_id = entry.id.clone();
            match (existing_id, id) {
                (None, Some(new_id)) => self.merge_identity(identity, new_id)?,
                (Some(existing), Some(new_id)) if &*existing != new_id => {
                    return Err(IdentityError::DuplicateIdentityAssignment {
                        type_name: type_name.to_owned(),
                        lid: lid.to_owned(),
                        existing_id: existing.to_string(),
                        new_id: new_id.to_owned(),
                    });
                }
                _ => {}
            }
            return Ok(identity);
        }
        if let Some(identity) = id.and_then(|id| self.lookup(type_name, id)) {
            self.by_lid.insert(Arc::from(lid), identity);
            return Ok(identity);
        }
        let type_name = self.intern_type(type_name);
        let identity = self.allocate(Arc::clone(&type_name), id.map(Arc::from), Arc::from(lid));
        if let Some(id) = id {
            self.by_id
                .entry(type_name)
                .or_default()
                .insert(Arc::from(id), identity);
        }
        Ok(identity)
    }

    /// Assigns the server id `new_id` to a locally created identity, in place.
    ///
    /// The handle is untouched, so every edge, collection, and request that
    /// references it keeps resolving to the same resource.
    ///
    /// # Errors
    /// - [`IdentityError::UnknownIdentity`] when the handle does not resolve.
    /// - [`IdentityError::DuplicateIdentityAssignment`] when the identity
    ///   already has an id.
    /// - [`IdentityError::IdentityConflict`] when another identity already owns
    ///   `(type, new_id)`.
    pub fn merge_identity(&mut self, identity: Identity, new_id: &str) -> Result<(), IdentityError> {
        let entry = self.entry(identity)?;
        if let Some(existing) = entry.id() {
            return Err(IdentityError::DuplicateIdentityAssignment {
                type_name: entry.type_name.to_string(),
                lid: entry.lid.to_string(),
                existing_id: existing.to_owned(),
                new_id: new_id.to_owned(),
            });
        }
        let type_name = Arc::clone(&entry.type_name);
        if let Some(existing) = self.lookup(&type_name, new_id) {
            return Err(IdentityError::IdentityConflict {
                type_name: type_name.to_string(),
                id: new_id.to_owned(),
                existing,
                requested: identity,
            });
        }
        let id: Arc<str> = Arc::from(new_id);
        self.by_id
            .entry(type_name)
            .or_default()
            .insert(Arc::clone(&id), identity);
        if let Some(entry) = self.entries.get_mut(&identity) {
            entry.id = Some(id);
        }
        Ok(())
    }

    /// Removes `identity` from every index.
    ///
    /// Returns `true` if the identity was registered. Callers only forget
    /// identities nothing references any more; forgetting is cleanup, not a
    /// correctness requirement.
    pub fn forget(&mut self, identity: Identity) -> bool {
        let Some(entry) = self.entries.remove(&identity) else {
            return false;
        };
        if let Some(id) = &entry.id {
            if let Some(ids) = self.by_id.get_mut(&entry.type_name) {
                ids.remove(id);
            }
        }
        self.by_lid.retain(|_, owner| *owner != identity);
        true
    }

    /// Iterates over all live identities (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (Identity, &IdentityEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Returns the shared `Arc<str>` for `type_name`, interning it on first use.
    pub(crate) fn intern_type(&mut self, type_name: &str) -> TypeName {
        if let Some((key, _)) = self.by_id.get_key_value(type_name) {
            return Arc::clone(key);
        }
        let key: TypeName = Arc::from(type_name);
        self.by_id.insert(Arc::clone(&key), FxHashMap::default());
        key
    }

    fn generate_lid(&self, type_name: &str) -> Arc<str> {
        // `next` is bumped by `allocate`, so the lid number matches the handle.
        Arc::from(format!("{}:{}-{}", self.lid_prefix, type_name, self.next + 1))
    }

    fn allocate(&mut self, type_name: TypeName, id: Option<Arc<str>>, lid: Arc<str>) -> Identity {
        self.next += 1;
        let identity = Identity(self.next);
        self.by_lid.insert(Arc::clone(&lid), identity);
        self.entries.insert(identity, IdentityEntry { type_name, id, lid });
        identity
    }
}
