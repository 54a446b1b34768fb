//! Role lifecycle.
//!
//! Deleting a role removes its grants and links from the index first, then
//! its grant row from the durable store. Principals' durable role lists keep
//! the stale name until they are next edited; a rebuild relinks them to a
//! role that grants nothing.
use super::index::FastPathStore;
use super::{RbacError, RbacResult};
use crate::store::{RoleGrants, WardenStore};
use std::sync::Arc;
use warden_authz::RoleName;

pub struct RoleManager {
    store: Arc<dyn WardenStore>,
    index: Arc<dyn FastPathStore>,
}

impl RoleManager {
    pub fn new(store: Arc<dyn WardenStore>, index: Arc<dyn FastPathStore>) -> Self {
        Self { store, index }
    }

    /// Create an empty role. Returns `false` when it already existed.
    pub async fn create_role(&self, role: &RoleName) -> RbacResult<bool> {
        let created = self.store.create_role(role).await?;
        if created {
            tracing::info!(%role, "role created");
        }
        Ok(created)
    }

    /// Delete a role and every grant it holds.
    ///
    /// # Errors
    /// - [`RbacError::ProtectedRole`] for `administrator`.
    pub async fn delete_role(&self, role: &RoleName) -> RbacResult<()> {
        if role.is_administrator() {
            return Err(RbacError::ProtectedRole(role.clone()));
        }
        self.index.remove_role(role).await?;
        self.store.delete_role(role).await?;
        tracing::info!(%role, "role deleted");
        Ok(())
    }

    pub async fn list_roles(&self) -> RbacResult<Vec<RoleName>> {
        Ok(self.store.list_roles().await?)
    }

    pub async fn role_grants(&self, role: &RoleName) -> RbacResult<RoleGrants> {
        Ok(self.store.role_grants(role).await?)
    }
}
