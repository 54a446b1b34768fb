//! Resource/permission vocabulary.
//!
//! # Purpose
//! Holds the complete set of resources and the permissions meaningful on
//! each. Every grant must stay inside this vocabulary, and the administrator's
//! effective permission set is derived from it.
//!
//! # Key invariants
//! - Registration only grows a resource's vocabulary unless the caller
//!   explicitly redefines it with a smaller set, and a redefinition may not
//!   drop a permission that a grant still references.
//! - Template entries (`group.*`) contribute their permissions to every
//!   concrete kind of the group when expanding the administrator set.
//!
//! # Examples
//! ```rust
//! use std::collections::BTreeSet;
//! use warden_authz::{Catalog, Permission};
//!
//! let mut catalog = Catalog::default();
//! let none = BTreeSet::new();
//! catalog.register("content.*".parse().unwrap(), [Permission::new("view").unwrap()], &none).unwrap();
//! catalog.register("content.story".parse().unwrap(), [Permission::new("create").unwrap()], &none).unwrap();
//! let admin = catalog.expand("content", "story");
//! assert_eq!(admin.len(), 2);
//! ```
use crate::{AuthzError, AuthzResult, Permission, ResourceName};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of a [`Catalog::register`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The resource was not known before.
    Added,
    /// The resource gained permissions.
    Extended,
    /// Identical re-registration.
    Unchanged,
    /// The resource was redefined with a set that dropped unreferenced permissions.
    Redefined,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<ResourceName, BTreeSet<Permission>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a resource's vocabulary.
    ///
    /// `referenced` is the set of permissions on `resource` that existing
    /// grants still reference; it guards redefinitions that shrink the set.
    ///
    /// # Errors
    /// - [`AuthzError::SchemaConflict`] when the new set drops a referenced
    ///   permission. The catalog is left unchanged in that case.
    pub fn register(
        &mut self,
        resource: ResourceName,
        permissions: impl IntoIterator<Item = Permission>,
        referenced: &BTreeSet<Permission>,
    ) -> AuthzResult<Registration> {
        let incoming: BTreeSet<Permission> = permissions.into_iter().collect();
        let Some(existing) = self.entries.get_mut(&resource) else {
            self.entries.insert(resource, incoming);
            return Ok(Registration::Added);
        };
        if *existing == incoming {
            return Ok(Registration::Unchanged);
        }
        if incoming.is_superset(existing) {
            *existing = incoming;
            return Ok(Registration::Extended);
        }

        let removed: BTreeSet<Permission> = existing.difference(&incoming).cloned().collect();
        let conflicting: BTreeSet<Permission> =
            removed.intersection(referenced).cloned().collect();
        if !conflicting.is_empty() {
            return Err(AuthzError::SchemaConflict {
                resource,
                permissions: conflicting,
            });
        }
        *existing = incoming;
        Ok(Registration::Redefined)
    }

    /// Administrator permission set for `group.kind`: the group's template
    /// vocabulary unioned with the kind's own vocabulary.
    pub fn expand(&self, group: &str, kind: &str) -> BTreeSet<Permission> {
        let mut expanded = BTreeSet::new();
        if let Ok(template) = ResourceName::template_of(group) {
            if let Some(perms) = self.entries.get(&template) {
                expanded.extend(perms.iter().cloned());
            }
        }
        if let Ok(resource) = ResourceName::new(group, kind) {
            if let Some(perms) = self.entries.get(&resource) {
                expanded.extend(perms.iter().cloned());
            }
        }
        expanded
    }

    /// Vocabulary registered directly on `resource` (no template expansion).
    pub fn vocabulary(&self, resource: &ResourceName) -> Option<&BTreeSet<Permission>> {
        self.entries.get(resource)
    }

    pub fn contains(&self, resource: &ResourceName) -> bool {
        self.entries.contains_key(resource)
    }

    /// Whether `permission` is meaningful on `resource`, counting template
    /// vocabulary inherited from the resource's group.
    pub fn permits(&self, resource: &ResourceName, permission: &Permission) -> bool {
        self.entries
            .get(resource)
            .is_some_and(|perms| perms.contains(permission))
            || self
                .entries
                .get(&resource.template())
                .is_some_and(|perms| perms.contains(permission))
    }

    /// Verify that grants referencing `permissions` on `resource` fit the
    /// vocabulary.
    ///
    /// # Errors
    /// - [`AuthzError::SchemaConflict`] listing every permission that the
    ///   catalog no longer defines.
    pub fn check_referenced(
        &self,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> AuthzResult<()> {
        let missing: BTreeSet<Permission> = permissions
            .iter()
            .filter(|perm| !self.permits(resource, perm))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthzError::SchemaConflict {
                resource: resource.clone(),
                permissions: missing,
            })
        }
    }

    /// Concrete (non-template) resources in name order.
    pub fn concrete_resources(&self) -> impl Iterator<Item = &ResourceName> {
        self.entries.keys().filter(|resource| !resource.is_template())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceName, &BTreeSet<Permission>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
