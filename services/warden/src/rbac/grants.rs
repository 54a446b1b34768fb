//! Grant table edits and their validation against the catalog.
use super::{RbacError, RbacResult};
use crate::store::GrantCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use warden_authz::{Catalog, Permission, ResourceName, RoleName};

/// One requested cell replacement: after it is applied, `role` holds exactly
/// `permissions` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUpdate {
    pub role: RoleName,
    pub resource: ResourceName,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

impl GrantUpdate {
    pub fn new(
        role: RoleName,
        resource: ResourceName,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            role,
            resource,
            permissions: permissions.into_iter().collect(),
        }
    }
}

/// Updates that passed validation, one per `(role, resource)` pair.
#[derive(Debug, Default)]
pub struct StagedGrants {
    pub cells: Vec<GrantCell>,
    /// Administrator updates that were dropped.
    pub skipped: Vec<ResourceName>,
}

/// Validate `updates` and collapse them into one cell per pair.
///
/// Later updates for the same pair win. Administrator updates are skipped
/// because its grants derive from the catalog.
///
/// # Errors
/// - [`RbacError::TemplateGrant`] for a `group.*` target.
/// - [`RbacError::UnknownResource`] for a resource missing from the catalog.
/// - [`RbacError::UnknownPermission`] for a permission outside the resource's
///   vocabulary (template vocabulary included).
pub fn stage(catalog: &Catalog, updates: Vec<GrantUpdate>) -> RbacResult<StagedGrants> {
    let mut cells: BTreeMap<(RoleName, ResourceName), BTreeSet<Permission>> = BTreeMap::new();
    let mut skipped = Vec::new();
    for update in updates {
        if update.resource.is_template() {
            return Err(RbacError::TemplateGrant(update.resource));
        }
        if update.role.is_administrator() {
            skipped.push(update.resource);
            continue;
        }
        if !catalog.contains(&update.resource) {
            return Err(RbacError::UnknownResource(update.resource));
        }
        if let Some(permission) = update
            .permissions
            .iter()
            .find(|permission| !catalog.permits(&update.resource, permission))
        {
            return Err(RbacError::UnknownPermission {
                resource: update.resource.clone(),
                permission: permission.clone(),
            });
        }
        cells.insert((update.role, update.resource), update.permissions);
    }
    Ok(StagedGrants {
        cells: cells
            .into_iter()
            .map(|((role, resource), permissions)| GrantCell {
                role,
                resource,
                permissions,
            })
            .collect(),
        skipped,
    })
}

/// Keep only the permissions the catalog still defines; returns the dropped ones.
pub fn retain_known(catalog: &Catalog, cell: &mut GrantCell) -> Vec<Permission> {
    let mut dropped = Vec::new();
    cell.permissions.retain(|permission| {
        let known = !cell.resource.is_template() && catalog.permits(&cell.resource, permission);
        if !known {
            dropped.push(permission.clone());
        }
        known
    });
    dropped
}

/// Permissions on `resource` referenced by any grant in `cells`.
pub fn referenced_permissions(cells: &[GrantCell], resource: &ResourceName) -> BTreeSet<Permission> {
    cells
        .iter()
        .filter(|cell| &cell.resource == resource)
        .flat_map(|cell| cell.permissions.iter().cloned())
        .collect()
}
