//! Administrative and request-time entry points.
//!
//! # Purpose
//! [`AuthzEngine`] owns the catalog, the durable store, and the fast-path
//! index, and exposes every operation callers use: grant reconciliation,
//! disaster recovery, role lifecycle, role assignment, catalog extension, and
//! authorization checks.
//!
//! # Startup
//! [`AuthzEngine::bootstrap`] builds the catalog from the configured seed and
//! the durable extensions, refuses to start when stored grants reference
//! permissions the catalog does not define, makes sure the built-in roles
//! exist, and optionally rebuilds the index.
//!
//! # Concurrency
//! Operations that write both stores hold the synchronizer's mutation gate,
//! so `rebuild_all` only runs between them. Authorization checks never wait
//! on it.
use crate::config::{CatalogFile, StorageBackend, WardenConfig};
use crate::rbac::assignments::AssignmentManager;
use crate::rbac::evaluator::Evaluator;
use crate::rbac::grants::{self, GrantUpdate};
use crate::rbac::index::{CasbinIndex, FastPathStore, IndexSnapshot};
use crate::rbac::roles::RoleManager;
use crate::rbac::sync::{RebuildReport, ReconcileReport, Synchronizer};
use crate::rbac::{RbacError, RbacResult};
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::{GrantCell, RoleGrants, WardenStore};
use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_authz::{Catalog, Permission, PrincipalId, Registration, ResourceName, RoleName};

pub struct AuthzEngine {
    store: Arc<dyn WardenStore>,
    index: Arc<dyn FastPathStore>,
    catalog: Arc<RwLock<Catalog>>,
    sync: Synchronizer,
    evaluator: Evaluator,
    assignments: AssignmentManager,
    roles: RoleManager,
}

impl AuthzEngine {
    /// Wire an engine around existing stores without any startup checks.
    pub fn new(
        store: Arc<dyn WardenStore>,
        index: Arc<dyn FastPathStore>,
        catalog: Catalog,
        config: &WardenConfig,
    ) -> Self {
        let catalog = Arc::new(RwLock::new(catalog));
        Self {
            sync: Synchronizer::new(
                store.clone(),
                index.clone(),
                catalog.clone(),
                config.rebuild_batch_size,
            ),
            evaluator: Evaluator::new(
                store.clone(),
                index.clone(),
                catalog.clone(),
                config.ownership.clone(),
            ),
            assignments: AssignmentManager::new(
                store.clone(),
                index.clone(),
                config.registration_roles.clone(),
            ),
            roles: RoleManager::new(store.clone(), index.clone()),
            store,
            index,
            catalog,
        }
    }

    /// Open the configured store, load the catalog file, and bootstrap.
    pub async fn from_config(config: &WardenConfig) -> anyhow::Result<Self> {
        let seed = match &config.catalog_path {
            Some(path) => CatalogFile::load(path)?.entries()?,
            None => Vec::new(),
        };
        let store: Arc<dyn WardenStore> = match config.storage {
            StorageBackend::Memory => {
                tracing::warn!("using in-memory store; grants are lost on restart");
                Arc::new(InMemoryStore::new())
            }
            StorageBackend::Postgres => {
                let pg = config
                    .postgres
                    .as_ref()
                    .context("postgres storage selected without postgres config")?;
                Arc::new(PostgresStore::connect(pg).await.context("connect postgres")?)
            }
        };
        let index: Arc<dyn FastPathStore> =
            Arc::new(CasbinIndex::new().await.context("build fast-path index")?);
        let engine = Self::bootstrap(store, index, config, seed)
            .await
            .context("bootstrap authorization engine")?;
        Ok(engine)
    }

    /// Build the catalog, validate stored grants, and prepare the index.
    ///
    /// # Errors
    /// - `SchemaConflict` when a durable extension shrinks a seeded entry that
    ///   grants reference, or when a stored grant names a permission the
    ///   catalog does not define. Startup must not continue.
    /// - `StoreUnavailable` when either store cannot be read.
    pub async fn bootstrap(
        store: Arc<dyn WardenStore>,
        index: Arc<dyn FastPathStore>,
        config: &WardenConfig,
        seed: Vec<(ResourceName, Vec<Permission>)>,
    ) -> RbacResult<Self> {
        let stored = store.list_grants().await?;
        let extensions = store.catalog_entries().await?;

        let mut catalog = Catalog::new();
        let entries = seed.into_iter().chain(
            extensions
                .into_iter()
                .map(|(resource, permissions)| (resource, permissions.into_iter().collect())),
        );
        for (resource, permissions) in entries {
            let referenced = referenced_on(&catalog, &stored, &resource);
            let registration = catalog.register(resource.clone(), permissions, &referenced)?;
            tracing::debug!(%resource, ?registration, "catalog entry loaded");
        }
        for cell in stored.iter().filter(|cell| !cell.role.is_administrator()) {
            catalog.check_referenced(&cell.resource, &cell.permissions)?;
        }

        for role in [
            RoleName::administrator(),
            RoleName::authenticated(),
            RoleName::unauthenticated(),
        ] {
            store.create_role(&role).await?;
        }

        let resources = catalog.len();
        let engine = Self::new(store, index, catalog, config);
        if config.rebuild_on_start {
            engine.rebuild_all().await?;
        }
        tracing::info!(
            backend = engine.store.backend_name(),
            resources,
            grants = stored.len(),
            "authorization engine ready"
        );
        Ok(engine)
    }

    #[tracing::instrument(skip(self, updates), fields(updates = updates.len()))]
    pub async fn reconcile(&self, updates: Vec<GrantUpdate>) -> RbacResult<ReconcileReport> {
        self.sync.reconcile(updates).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> RbacResult<RebuildReport> {
        self.sync.rebuild_all().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_role(&self, name: &str) -> RbacResult<RoleName> {
        let role = RoleName::new(name)?;
        self.roles.create_role(&role).await?;
        Ok(role)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_role(&self, name: &str) -> RbacResult<()> {
        let role = RoleName::new(name)?;
        let _gate = self.sync.mutation_gate().await;
        self.roles.delete_role(&role).await
    }

    pub async fn list_roles(&self) -> RbacResult<Vec<RoleName>> {
        self.roles.list_roles().await
    }

    pub async fn role_grants(&self, name: &str) -> RbacResult<RoleGrants> {
        let role = RoleName::new(name)?;
        self.roles.role_grants(&role).await
    }

    #[tracing::instrument(skip(self, roles))]
    pub async fn assign_roles<S: AsRef<str>>(
        &self,
        principal: PrincipalId,
        roles: &[S],
    ) -> RbacResult<()> {
        let roles = warden_authz::parse_roles(roles)?;
        let _gate = self.sync.mutation_gate().await;
        self.assignments.assign(principal, &roles).await
    }

    #[tracing::instrument(skip(self, roles))]
    pub async fn unassign_roles<S: AsRef<str>>(
        &self,
        principal: PrincipalId,
        roles: &[S],
    ) -> RbacResult<()> {
        let roles = warden_authz::parse_roles(roles)?;
        let _gate = self.sync.mutation_gate().await;
        self.assignments.unassign(principal, &roles).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn on_registered(&self, principal: PrincipalId) -> RbacResult<()> {
        let _gate = self.sync.mutation_gate().await;
        self.assignments.on_registered(principal).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn on_cancelled(&self, principal: PrincipalId) -> RbacResult<()> {
        let _gate = self.sync.mutation_gate().await;
        self.assignments.on_cancelled(principal).await
    }

    pub async fn allowed<S: AsRef<str>>(
        &self,
        principal: PrincipalId,
        resource: &str,
        permissions: &[S],
    ) -> RbacResult<bool> {
        let resource: ResourceName = resource.parse()?;
        let permissions = warden_authz::parse_permissions(permissions)?;
        self.evaluator.allowed(principal, &resource, &permissions).await
    }

    pub async fn allowed_on_instance(
        &self,
        principal: PrincipalId,
        resource: &str,
        instance_id: &str,
        action: &str,
    ) -> RbacResult<bool> {
        let resource: ResourceName = resource.parse()?;
        self.evaluator
            .allowed_on_instance(principal, &resource, instance_id, action)
            .await
    }

    pub async fn permitted(
        &self,
        principal: PrincipalId,
        resource: &str,
    ) -> RbacResult<BTreeSet<Permission>> {
        let resource: ResourceName = resource.parse()?;
        self.evaluator.permitted(principal, &resource).await
    }

    /// Add or extend a catalog entry at runtime.
    ///
    /// The entry is validated against current grants, recorded durably, and
    /// the administrator's expanded set is re-asserted on every affected
    /// concrete resource.
    #[tracing::instrument(skip(self, permissions))]
    pub async fn register_resource<S: AsRef<str>>(
        &self,
        resource: &str,
        permissions: &[S],
    ) -> RbacResult<Registration> {
        let resource: ResourceName = resource.parse()?;
        let permissions: BTreeSet<Permission> = warden_authz::parse_permissions(permissions)?
            .into_iter()
            .collect();
        let _gate = self.sync.mutation_gate().await;
        let stored = self.store.list_grants().await?;

        let mut catalog = self.catalog.write().await;
        let mut next = catalog.clone();
        let referenced = referenced_on(&next, &stored, &resource);
        let registration = next.register(resource.clone(), permissions, &referenced)?;
        if registration == Registration::Unchanged {
            return Ok(registration);
        }
        let recorded = next
            .vocabulary(&resource)
            .cloned()
            .unwrap_or_default();
        self.store.put_catalog_entry(&resource, &recorded).await?;
        *catalog = next;
        let affected: Vec<ResourceName> = if resource.is_template() {
            catalog
                .concrete_resources()
                .filter(|candidate| candidate.group() == resource.group())
                .cloned()
                .collect()
        } else {
            vec![resource.clone()]
        };
        drop(catalog);

        if registration == Registration::Redefined {
            let administrator = RoleName::administrator();
            for target in &affected {
                self.index.revoke_resource(&administrator, target).await?;
            }
        }
        self.sync.seed_administrator(&affected).await?;
        tracing::info!(%resource, ?registration, "catalog entry registered");
        Ok(registration)
    }

    pub async fn catalog(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    pub async fn index_snapshot(&self) -> RbacResult<IndexSnapshot> {
        Ok(self.index.snapshot().await?)
    }

    pub async fn health_check(&self) -> RbacResult<()> {
        self.store.health_check().await.map_err(RbacError::from)
    }

    pub fn store(&self) -> &Arc<dyn WardenStore> {
        &self.store
    }
}

/// Permissions on `resource` that stored grants rely on the entry to define.
///
/// For a concrete entry, permissions its group template still defines are
/// excluded. For a template entry these are the grant permissions on the
/// group's concrete resources that their own vocabulary does not cover.
fn referenced_on(
    catalog: &Catalog,
    stored: &[GrantCell],
    resource: &ResourceName,
) -> BTreeSet<Permission> {
    if !resource.is_template() {
        let mut referenced = grants::referenced_permissions(stored, resource);
        if let Some(template) = catalog.vocabulary(&resource.template()) {
            referenced.retain(|permission| !template.contains(permission));
        }
        return referenced;
    }
    stored
        .iter()
        .filter(|cell| cell.resource.group() == resource.group() && !cell.resource.is_template())
        .flat_map(|cell| {
            let own = catalog.vocabulary(&cell.resource);
            cell.permissions
                .iter()
                .filter(move |permission| !own.is_some_and(|perms| perms.contains(*permission)))
                .cloned()
        })
        .collect()
}
