//! Fast-path authorization index.
//!
//! # Purpose
//! Answers "may principal P use permission X on resource R" without touching
//! durable storage. The index holds two kinds of facts:
//! - role grants: `(role, resource, permission)`
//! - principal links: `principal -> role`
//!
//! # Casbin mapping
//! [`CasbinIndex`] keeps an in-memory Casbin enforcer built from the embedded
//! model in `warden-authz`. Roles become `role:{name}` subjects on `p` rules
//! and principals become `p:{id}` subjects on `g` rules, so a lookup is a
//! single `enforce((principal, resource, permission))`.
//!
//! # Concurrency
//! The enforcer sits behind a `tokio::sync::RwLock`. Lookups share the read
//! lock; every mutation takes the write lock for the duration of the Casbin
//! call. `clear` swaps in a fresh enforcer under the write lock, so readers
//! observe either the old contents or an empty index.
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use warden_authz::{Permission, PrincipalId, ResourceName, RoleName, principal_subject, role_subject};

/// Deterministic dump of the index, used for diagnostics and rebuild checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// `(role subject, resource, permission)` triples.
    pub grants: BTreeSet<(String, String, String)>,
    /// `(principal subject, role subject)` links.
    pub links: BTreeSet<(String, String)>,
}

impl IndexSnapshot {
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.links.is_empty()
    }
}

#[async_trait]
pub trait FastPathStore: Send + Sync {
    /// Add `permissions` to the role's grants on `resource`.
    async fn grant(
        &self,
        role: &RoleName,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()>;
    /// Drop every grant the role holds on `resource`.
    async fn revoke_resource(&self, role: &RoleName, resource: &ResourceName) -> StoreResult<()>;
    /// Drop every grant and every principal link for the role.
    async fn remove_role(&self, role: &RoleName) -> StoreResult<()>;
    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()>;
    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()>;
    async fn is_allowed(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
        permission: &Permission,
    ) -> StoreResult<bool>;
    async fn clear(&self) -> StoreResult<()>;
    async fn snapshot(&self) -> StoreResult<IndexSnapshot>;
}

/// Casbin-backed [`FastPathStore`].
pub struct CasbinIndex {
    enforcer: RwLock<Enforcer>,
}

impl CasbinIndex {
    pub async fn new() -> StoreResult<Self> {
        Ok(Self {
            enforcer: RwLock::new(empty_enforcer().await?),
        })
    }
}

async fn empty_enforcer() -> StoreResult<Enforcer> {
    let model = warden_authz::casbin_model().await?;
    let adapter = MemoryAdapter::default();
    let mut enforcer = Enforcer::new(model, adapter).await?;
    enforcer.build_role_links()?;
    Ok(enforcer)
}

#[async_trait]
impl FastPathStore for CasbinIndex {
    async fn grant(
        &self,
        role: &RoleName,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()> {
        let subject = role_subject(role);
        let object = resource.to_string();
        let mut enforcer = self.enforcer.write().await;
        for permission in permissions {
            // `add_policy` reports `false` for rules that already exist.
            enforcer
                .add_policy(vec![
                    subject.clone(),
                    object.clone(),
                    permission.as_str().to_string(),
                ])
                .await?;
        }
        Ok(())
    }

    async fn revoke_resource(&self, role: &RoleName, resource: &ResourceName) -> StoreResult<()> {
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_policy(0, vec![role_subject(role), resource.to_string()])
            .await?;
        Ok(())
    }

    async fn remove_role(&self, role: &RoleName) -> StoreResult<()> {
        let subject = role_subject(role);
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_policy(0, vec![subject.clone()])
            .await?;
        enforcer
            .remove_filtered_grouping_policy(1, vec![subject])
            .await?;
        Ok(())
    }

    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let subject = principal_subject(principal);
        let mut enforcer = self.enforcer.write().await;
        for role in roles {
            enforcer
                .add_grouping_policy(vec![subject.clone(), role_subject(role)])
                .await?;
        }
        Ok(())
    }

    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let subject = principal_subject(principal);
        let mut enforcer = self.enforcer.write().await;
        for role in roles {
            enforcer
                .remove_grouping_policy(vec![subject.clone(), role_subject(role)])
                .await?;
        }
        Ok(())
    }

    async fn is_allowed(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
        permission: &Permission,
    ) -> StoreResult<bool> {
        let subject = principal_subject(principal);
        let object = resource.to_string();
        let enforcer = self.enforcer.read().await;
        enforcer
            .enforce((subject.as_str(), object.as_str(), permission.as_str()))
            .map_err(StoreError::from)
    }

    async fn clear(&self) -> StoreResult<()> {
        let fresh = empty_enforcer().await?;
        *self.enforcer.write().await = fresh;
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<IndexSnapshot> {
        let enforcer = self.enforcer.read().await;
        let grants = enforcer
            .get_policy()
            .into_iter()
            .filter_map(|rule| match rule.as_slice() {
                [sub, obj, act] => Some((sub.clone(), obj.clone(), act.clone())),
                _ => None,
            })
            .collect();
        let links = enforcer
            .get_grouping_policy()
            .into_iter()
            .filter_map(|rule| match rule.as_slice() {
                [user, role] => Some((user.clone(), role.clone())),
                _ => None,
            })
            .collect();
        Ok(IndexSnapshot { grants, links })
    }
}
