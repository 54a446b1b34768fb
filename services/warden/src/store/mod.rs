//! Durable state behind the authorization engine.
//!
//! # Purpose
//! Defines the two narrow interfaces the engine consumes from the persistence
//! layer: [`GrantStore`] (roles, grant cells, catalog extensions) and
//! [`PrincipalDirectory`] (principal existence, durable role lists, instance
//! ownership, and the principal scan used by disaster recovery).
//!
//! # Key invariants
//! - Each grant cell write is atomic on its own; no multi-cell transaction is
//!   assumed by callers.
//! - `set_grant` replaces the cell; an empty permission set removes it.
//! - The anonymous principal (`0`) always exists.
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use warden_authz::{Permission, PrincipalId, ResourceName, RoleName};

pub mod memory;
pub mod postgres;


/// Resource -> permission map for one role.
pub type RoleGrants = BTreeMap<ResourceName, BTreeSet<Permission>>;

/// One `(role, resource) -> permissions` cell of the grant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantCell {
    pub role: RoleName,
    pub resource: ResourceName,
    pub permissions: BTreeSet<Permission>,
}

impl GrantCell {
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

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(anyhow::Error::new(err).context("postgres"))
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(anyhow::Error::new(err).context("postgres migrations"))
    }
}

impl From<casbin::Error> for StoreError {
    fn from(err: casbin::Error) -> Self {
        StoreError::Unexpected(anyhow::anyhow!("fast-path index: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable grant table and catalog extensions.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn list_roles(&self) -> StoreResult<Vec<RoleName>>;
    async fn role_exists(&self, role: &RoleName) -> StoreResult<bool>;
    /// Add an empty grant row. Returns `false` if the role already existed.
    async fn create_role(&self, role: &RoleName) -> StoreResult<bool>;
    /// Delete the role and every grant it holds.
    async fn delete_role(&self, role: &RoleName) -> StoreResult<()>;
    async fn role_grants(&self, role: &RoleName) -> StoreResult<RoleGrants>;
    /// Replace one cell. Creates the role row if needed.
    async fn set_grant(&self, cell: &GrantCell) -> StoreResult<()>;
    async fn list_grants(&self) -> StoreResult<Vec<GrantCell>>;

    async fn catalog_entries(&self) -> StoreResult<Vec<(ResourceName, BTreeSet<Permission>)>>;
    async fn put_catalog_entry(
        &self,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Principal records as seen by the authorization engine.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn principal_exists(&self, principal: PrincipalId) -> StoreResult<bool>;
    /// Durable role list; empty for unknown or soft-deleted principals.
    async fn principal_roles(&self, principal: PrincipalId) -> StoreResult<BTreeSet<RoleName>>;
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
    /// Creator of a resource instance, if the instance exists.
    async fn owner_of(
        &self,
        resource: &ResourceName,
        instance_id: &str,
    ) -> StoreResult<Option<PrincipalId>>;
    /// Non-deleted principal ids strictly greater than `after`, ascending, at
    /// most `limit` entries.
    async fn principal_page(
        &self,
        after: Option<PrincipalId>,
        limit: usize,
    ) -> StoreResult<Vec<PrincipalId>>;
}

/// Combined store used by the engine.
pub trait WardenStore: GrantStore + PrincipalDirectory {}

impl<T> WardenStore for T where T: GrantStore + PrincipalDirectory {}
