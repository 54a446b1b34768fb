//! Shared fixtures for engine integration tests.
//!
//! [`FlakyIndex`] and [`FlakyStore`] wrap the real implementations and fail
//! selected calls on demand so tests can drive partial-failure paths.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use warden::AuthzEngine;
use warden::config::WardenConfig;
use warden::rbac::index::{CasbinIndex, FastPathStore, IndexSnapshot};
use warden::store::memory::InMemoryStore;
use warden::store::{
    GrantCell, GrantStore, PrincipalDirectory, RoleGrants, StoreError, StoreResult,
};
use warden_authz::{Permission, PrincipalId, ResourceName, RoleName};

pub fn res(name: &str) -> ResourceName {
    name.parse().expect("resource")
}

pub fn perm(name: &str) -> Permission {
    Permission::new(name).expect("perm")
}

pub fn role(name: &str) -> RoleName {
    RoleName::new(name).expect("role")
}

/// `content.*` contributes `view`; `content.story` and `content.recipe` add
/// their own vocabulary, including the ownership pair for `edit`.
pub fn catalog_seed() -> Vec<(ResourceName, Vec<Permission>)> {
    vec![
        (res("content.*"), vec![perm("view")]),
        (
            res("content.story"),
            vec![
                perm("create"),
                perm("delete"),
                perm("edit any content"),
                perm("edit own content"),
            ],
        ),
        (res("content.recipe"), vec![perm("create")]),
    ]
}

pub fn test_config() -> WardenConfig {
    WardenConfig {
        rebuild_batch_size: 2,
        ..WardenConfig::default()
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unexpected(anyhow::anyhow!("injected failure: {what}"))
}

#[derive(Default)]
pub struct Faults {
    pub grants: AtomicBool,
    pub lookups: AtomicBool,
    pub links: AtomicBool,
}

impl Faults {
    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(injected(what))
        } else {
            Ok(())
        }
    }
}

pub struct FlakyIndex {
    inner: CasbinIndex,
    pub faults: Faults,
}

impl FlakyIndex {
    pub async fn new() -> Self {
        Self {
            inner: CasbinIndex::new().await.expect("index"),
            faults: Faults::default(),
        }
    }
}

#[async_trait]
impl FastPathStore for FlakyIndex {
    async fn grant(
        &self,
        role: &RoleName,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()> {
        Faults::check(&self.faults.grants, "index grant")?;
        self.inner.grant(role, resource, permissions).await
    }

    async fn revoke_resource(&self, role: &RoleName, resource: &ResourceName) -> StoreResult<()> {
        self.inner.revoke_resource(role, resource).await
    }

    async fn remove_role(&self, role: &RoleName) -> StoreResult<()> {
        self.inner.remove_role(role).await
    }

    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        Faults::check(&self.faults.links, "index link")?;
        self.inner.add_principal_roles(principal, roles).await
    }

    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        Faults::check(&self.faults.links, "index unlink")?;
        self.inner.remove_principal_roles(principal, roles).await
    }

    async fn is_allowed(
        &self,
        principal: PrincipalId,
        resource: &ResourceName,
        permission: &Permission,
    ) -> StoreResult<bool> {
        Faults::check(&self.faults.lookups, "index lookup")?;
        self.inner.is_allowed(principal, resource, permission).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }

    async fn snapshot(&self) -> StoreResult<IndexSnapshot> {
        self.inner.snapshot().await
    }
}

/// In-memory store whose grant writes, role-list writes, and role-list reads
/// can be made to fail. Role removals can also be held until released.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_grant_writes: AtomicBool,
    pub fail_role_writes: AtomicBool,
    pub fail_role_reads: AtomicBool,
    pub hold_role_removals: AtomicBool,
    released: Notify,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_grant_writes: AtomicBool::new(false),
            fail_role_writes: AtomicBool::new(false),
            fail_role_reads: AtomicBool::new(false),
            hold_role_removals: AtomicBool::new(false),
            released: Notify::new(),
        }
    }

    /// Let a held role removal proceed and stop holding new ones.
    pub fn release_role_removals(&self) {
        self.hold_role_removals.store(false, Ordering::SeqCst);
        self.released.notify_one();
    }
}

#[async_trait]
impl GrantStore for FlakyStore {
    async fn list_roles(&self) -> StoreResult<Vec<RoleName>> {
        self.inner.list_roles().await
    }

    async fn role_exists(&self, role: &RoleName) -> StoreResult<bool> {
        self.inner.role_exists(role).await
    }

    async fn create_role(&self, role: &RoleName) -> StoreResult<bool> {
        self.inner.create_role(role).await
    }

    async fn delete_role(&self, role: &RoleName) -> StoreResult<()> {
        self.inner.delete_role(role).await
    }

    async fn role_grants(&self, role: &RoleName) -> StoreResult<RoleGrants> {
        self.inner.role_grants(role).await
    }

    async fn set_grant(&self, cell: &GrantCell) -> StoreResult<()> {
        Faults::check(&self.fail_grant_writes, "set grant")?;
        self.inner.set_grant(cell).await
    }

    async fn list_grants(&self) -> StoreResult<Vec<GrantCell>> {
        self.inner.list_grants().await
    }

    async fn catalog_entries(&self) -> StoreResult<Vec<(ResourceName, BTreeSet<Permission>)>> {
        self.inner.catalog_entries().await
    }

    async fn put_catalog_entry(
        &self,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()> {
        self.inner.put_catalog_entry(resource, permissions).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "flaky-memory"
    }
}

#[async_trait]
impl PrincipalDirectory for FlakyStore {
    async fn principal_exists(&self, principal: PrincipalId) -> StoreResult<bool> {
        self.inner.principal_exists(principal).await
    }

    async fn principal_roles(&self, principal: PrincipalId) -> StoreResult<BTreeSet<RoleName>> {
        Faults::check(&self.fail_role_reads, "principal roles")?;
        self.inner.principal_roles(principal).await
    }

    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        Faults::check(&self.fail_role_writes, "add principal roles")?;
        self.inner.add_principal_roles(principal, roles).await
    }

    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        Faults::check(&self.fail_role_writes, "remove principal roles")?;
        if self.hold_role_removals.load(Ordering::SeqCst) {
            self.released.notified().await;
        }
        self.inner.remove_principal_roles(principal, roles).await
    }

    async fn owner_of(
        &self,
        resource: &ResourceName,
        instance_id: &str,
    ) -> StoreResult<Option<PrincipalId>> {
        self.inner.owner_of(resource, instance_id).await
    }

    async fn principal_page(
        &self,
        after: Option<PrincipalId>,
        limit: usize,
    ) -> StoreResult<Vec<PrincipalId>> {
        self.inner.principal_page(after, limit).await
    }
}

pub struct Harness {
    pub engine: AuthzEngine,
    pub store: Arc<FlakyStore>,
    pub index: Arc<FlakyIndex>,
}

impl Harness {
    /// Engine over a fresh store seeded with [`catalog_seed`], rebuilt on start.
    pub async fn new() -> Self {
        Self::with_store(FlakyStore::new()).await
    }

    pub async fn with_store(store: FlakyStore) -> Self {
        let store = Arc::new(store);
        let index = Arc::new(FlakyIndex::new().await);
        let engine = AuthzEngine::bootstrap(
            store.clone(),
            index.clone(),
            &test_config(),
            catalog_seed(),
        )
        .await
        .expect("bootstrap");
        Self {
            engine,
            store,
            index,
        }
    }

    /// Create a principal holding `roles` in both stores.
    pub async fn principal(&self, id: u64, roles: &[&str]) -> PrincipalId {
        let principal = PrincipalId::new(id);
        self.store.inner.insert_principal(principal, []).await;
        self.engine
            .assign_roles(principal, roles)
            .await
            .expect("assign roles");
        principal
    }
}
