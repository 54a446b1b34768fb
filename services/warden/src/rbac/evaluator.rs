//! Request-time authorization decisions.
//!
//! # Decision order
//! - `administrator` short-circuits to `true` before the index is consulted,
//!   for any resource and any permission, catalogued or not.
//! - Otherwise the requested permissions are OR-ed against the index.
//! - Instance checks try the blanket "any" permission first and only load the
//!   instance's creator when the principal holds the "own" permission.
//!
//! Store failures are returned as errors; a lookup that could not be
//! performed is neither a grant nor a denial.
use super::RbacResult;
use super::index::FastPathStore;
use crate::config::OwnershipVocabulary;
use crate::store::WardenStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_authz::{Catalog, Permission, PrincipalId, ResourceName};

pub struct Evaluator {
    store: Arc<dyn WardenStore>,
    index: Arc<dyn FastPathStore>,
    catalog: Arc<RwLock<Catalog>>,
    ownership: OwnershipVocabulary,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn WardenStore>,
        index: Arc<dyn FastPathStore>,
        catalog: Arc<RwLock<Catalog>>,
        ownership: OwnershipVocabulary,
    ) -> Self {
        Self {
            store,
            index,
            catalog,
            ownership,
        }
    }

    /// Whether `principal` holds at least one of `permissions` on `resource`.
    ///
    /// An empty permission list is denied unless the principal is an
    /// administrator.
    pub async fn allowed(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
        permissions: &[Permission],
    ) -> RbacResult<bool> {
        if self.is_administrator(principal).await? {
            metrics::counter!("warden_admin_bypass_total").increment(1);
            record_decision(true);
            return Ok(true);
        }
        for permission in permissions {
            if self.index.is_allowed(principal, resource, permission).await? {
                tracing::debug!(%principal, %resource, %permission, "allowed");
                record_decision(true);
                return Ok(true);
            }
        }
        tracing::debug!(%principal, %resource, ?permissions, "denied");
        record_decision(false);
        Ok(false)
    }

    /// Whether `principal` may perform `action` on one instance of `resource`.
    ///
    /// With the default vocabulary, `edit` on `content.story` is allowed by
    /// `edit any content`, or by `edit own content` when the principal
    /// created the instance. The anonymous principal never owns an instance.
    pub async fn allowed_on_instance(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
        instance_id: &str,
        action: &str,
    ) -> RbacResult<bool> {
        let any = Permission::new(self.ownership.any_permission(action, resource.group()))?;
        if self.allowed(principal, resource, &[any]).await? {
            return Ok(true);
        }
        let own = Permission::new(self.ownership.own_permission(action, resource.group()))?;
        if !self.allowed(principal, resource, &[own]).await? {
            return Ok(false);
        }
        if principal.is_anonymous() {
            return Ok(false);
        }

        metrics::counter!("warden_ownership_loads_total").increment(1);
        let owner = self.store.owner_of(resource, instance_id).await?;
        let owns = owner == Some(principal);
        tracing::debug!(%principal, %resource, instance_id, owns, "ownership check");
        Ok(owns)
    }

    /// The subset of the resource's vocabulary the principal holds.
    ///
    /// Administrators receive the full expanded vocabulary.
    pub async fn permitted(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
    ) -> RbacResult<BTreeSet<Permission>> {
        let vocabulary = {
            let catalog = self.catalog.read().await;
            catalog.expand(resource.group(), resource.kind())
        };
        if self.is_administrator(principal).await? {
            return Ok(vocabulary);
        }
        let mut held = BTreeSet::new();
        for permission in vocabulary {
            if self.index.is_allowed(principal, resource, &permission).await? {
                held.insert(permission);
            }
        }
        Ok(held)
    }

    async fn is_administrator(&self, principal: PrincipalId) -> RbacResult<bool> {
        let roles = self.store.principal_roles(principal).await?;
        Ok(roles.iter().any(|role| role.is_administrator()))
    }
}

fn record_decision(allowed: bool) {
    let outcome = if allowed { "allow" } else { "deny" };
    metrics::counter!("warden_decisions_total", "outcome" => outcome).increment(1);
}
