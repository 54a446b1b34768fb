//! In-memory implementation of the Warden stores.
//!
//! # Purpose
//! Implements [`GrantStore`] and [`PrincipalDirectory`] entirely in memory
//! using maps guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - embedding applications that keep principals elsewhere and only need a
//!   scratch grant table
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: write locks for mutations, read locks for
//!   reads. Each method touches one map at a time except role deletion, which
//!   takes the role and grant locks in a fixed order.
//!
//! # Principals
//! The persistence layer normally owns principal records. This store keeps a
//! minimal record per principal (durable role list + soft-delete flag) and an
//! ownership table for resource instances, populated through the inherent
//! helpers [`InMemoryStore::insert_principal`] and
//! [`InMemoryStore::insert_instance`].
use super::{GrantCell, GrantStore, PrincipalDirectory, RoleGrants, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_authz::{Permission, PrincipalId, ResourceName, RoleName};

#[derive(Debug, Clone, Default)]
struct PrincipalRecord {
    roles: BTreeSet<RoleName>,
    deleted: bool,
}

/// In-memory grant table and principal directory.
///
/// All maps are wrapped in `Arc<RwLock<...>>` so the store can be shared
/// across tasks while reads proceed concurrently.
#[derive(Clone)]
pub struct InMemoryStore {
    /// Known roles, including those with no grants yet.
    roles: Arc<RwLock<BTreeSet<RoleName>>>,
    /// Grant table: role -> resource -> permissions.
    grants: Arc<RwLock<BTreeMap<RoleName, RoleGrants>>>,
    /// Catalog extensions recorded at runtime.
    catalog: Arc<RwLock<BTreeMap<ResourceName, BTreeSet<Permission>>>>,
    /// Principal records keyed by id.
    principals: Arc<RwLock<BTreeMap<PrincipalId, PrincipalRecord>>>,
    /// Instance creators keyed by `(resource, instance_id)`.
    instances: Arc<RwLock<HashMap<(ResourceName, String), PrincipalId>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store holding only the anonymous principal.
    pub fn new() -> Self {
        let mut principals = BTreeMap::new();
        principals.insert(
            PrincipalId::ANONYMOUS,
            PrincipalRecord {
                roles: BTreeSet::from([RoleName::unauthenticated()]),
                deleted: false,
            },
        );
        Self {
            roles: Arc::new(RwLock::new(BTreeSet::new())),
            grants: Arc::new(RwLock::new(BTreeMap::new())),
            catalog: Arc::new(RwLock::new(BTreeMap::new())),
            principals: Arc::new(RwLock::new(principals)),
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create or replace a principal record with the given durable role list.
    pub async fn insert_principal(
        &self,
        principal: PrincipalId,
        roles: impl IntoIterator<Item = RoleName>,
    ) {
        self.principals.write().await.insert(
            principal,
            PrincipalRecord {
                roles: roles.into_iter().collect(),
                deleted: false,
            },
        );
    }

    /// Soft-delete a principal; it keeps its record but loses its roles and leaves the rebuild scan.
    pub async fn mark_deleted(&self, principal: PrincipalId) -> StoreResult<()> {
        let mut principals = self.principals.write().await;
        let record = principals
            .get_mut(&principal)
            .ok_or_else(|| StoreError::NotFound(format!("principal {principal}")))?;
        record.deleted = true;
        Ok(())
    }

    /// Record the creator of a resource instance.
    pub async fn insert_instance(
        &self,
        resource: ResourceName,
        instance_id: impl Into<String>,
        creator: PrincipalId,
    ) {
        self.instances
            .write()
            .await
            .insert((resource, instance_id.into()), creator);
    }
}

#[async_trait]
impl GrantStore for InMemoryStore {
    async fn list_roles(&self) -> StoreResult<Vec<RoleName>> {
        Ok(self.roles.read().await.iter().cloned().collect())
    }

    async fn role_exists(&self, role: &RoleName) -> StoreResult<bool> {
        Ok(self.roles.read().await.contains(role))
    }

    async fn create_role(&self, role: &RoleName) -> StoreResult<bool> {
        let mut roles = self.roles.write().await;
        let created = roles.insert(role.clone());
        metrics::gauge!("warden_roles_total").set(roles.len() as f64);
        Ok(created)
    }

    async fn delete_role(&self, role: &RoleName) -> StoreResult<()> {
        // Lock order: roles, then grants.
        let mut roles = self.roles.write().await;
        let mut grants = self.grants.write().await;
        roles.remove(role);
        grants.remove(role);
        metrics::gauge!("warden_roles_total").set(roles.len() as f64);
        Ok(())
    }

    async fn role_grants(&self, role: &RoleName) -> StoreResult<RoleGrants> {
        Ok(self
            .grants
            .read()
            .await
            .get(role)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_grant(&self, cell: &GrantCell) -> StoreResult<()> {
        let mut roles = self.roles.write().await;
        let mut grants = self.grants.write().await;
        roles.insert(cell.role.clone());
        let row = grants.entry(cell.role.clone()).or_default();
        if cell.permissions.is_empty() {
            row.remove(&cell.resource);
        } else {
            row.insert(cell.resource.clone(), cell.permissions.clone());
        }
        metrics::gauge!("warden_roles_total").set(roles.len() as f64);
        Ok(())
    }

    async fn list_grants(&self) -> StoreResult<Vec<GrantCell>> {
        let grants = self.grants.read().await;
        Ok(grants
            .iter()
            .flat_map(|(role, row)| {
                row.iter().map(move |(resource, permissions)| GrantCell {
                    role: role.clone(),
                    resource: resource.clone(),
                    permissions: permissions.clone(),
                })
            })
            .collect())
    }

    async fn catalog_entries(&self) -> StoreResult<Vec<(ResourceName, BTreeSet<Permission>)>> {
        Ok(self
            .catalog
            .read()
            .await
            .iter()
            .map(|(resource, perms)| (resource.clone(), perms.clone()))
            .collect())
    }

    async fn put_catalog_entry(
        &self,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()> {
        self.catalog
            .write()
            .await
            .insert(resource.clone(), permissions.clone());
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryStore {
    async fn principal_exists(&self, principal: PrincipalId) -> StoreResult<bool> {
        Ok(self
            .principals
            .read()
            .await
            .get(&principal)
            .is_some_and(|record| !record.deleted))
    }

    async fn principal_roles(&self, principal: PrincipalId) -> StoreResult<BTreeSet<RoleName>> {
        Ok(self
            .principals
            .read()
            .await
            .get(&principal)
            .filter(|record| !record.deleted)
            .map(|record| record.roles.clone())
            .unwrap_or_default())
    }

    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let mut principals = self.principals.write().await;
        let record = principals
            .get_mut(&principal)
            .ok_or_else(|| StoreError::NotFound(format!("principal {principal}")))?;
        record.roles.extend(roles.iter().cloned());
        Ok(())
    }

    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let mut principals = self.principals.write().await;
        let record = principals
            .get_mut(&principal)
            .ok_or_else(|| StoreError::NotFound(format!("principal {principal}")))?;
        for role in roles {
            record.roles.remove(role);
        }
        Ok(())
    }

    async fn owner_of(
        &self,
        resource: &ResourceName,
        instance_id: &str,
    ) -> StoreResult<Option<PrincipalId>> {
        Ok(self
            .instances
            .read()
            .await
            .get(&(resource.clone(), instance_id.to_string()))
            .copied())
    }

    async fn principal_page(
        &self,
        after: Option<PrincipalId>,
        limit: usize,
    ) -> StoreResult<Vec<PrincipalId>> {
        let principals = self.principals.read().await;
        let page = match after {
            Some(after) => principals
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .filter(|(_, record)| !record.deleted)
                .map(|(id, _)| *id)
                .take(limit)
                .collect(),
            None => principals
                .iter()
                .filter(|(_, record)| !record.deleted)
                .map(|(id, _)| *id)
                .take(limit)
                .collect(),
        };
        Ok(page)
    }
}
